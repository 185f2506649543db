//! In-memory catalog source
//!
//! Serves scripted records, fails chosen ids and logs every batch requested.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Mutex;

use bgref_cr::services::CatalogSource;
use bgref_cr::types::{EntityKind, ExternalId, ExternalRecord, LinkRef};

pub fn id(value: u64) -> ExternalId {
    ExternalId::new(value).unwrap()
}

pub fn link(value: u64, name: &str) -> LinkRef {
    LinkRef {
        id: id(value),
        name: name.to_string(),
    }
}

/// Base game record with no links
pub fn base_game(value: u64, name: &str, engagement: u64) -> ExternalRecord {
    let mut record = ExternalRecord::new(id(value), name, EntityKind::Base);
    record.engagement_count = engagement;
    record
}

/// Expansion record pointing at its base game
pub fn expansion_of(value: u64, name: &str, base: (u64, &str), engagement: u64) -> ExternalRecord {
    let mut record = ExternalRecord::new(id(value), name, EntityKind::Expansion);
    record.engagement_count = engagement;
    record.base_game = Some(link(base.0, base.1));
    record
}

#[derive(Default)]
pub struct FakeCatalog {
    records: Mutex<HashMap<ExternalId, ExternalRecord>>,
    failing: Mutex<HashSet<ExternalId>>,
    batches: Mutex<Vec<Vec<ExternalId>>>,
}

impl FakeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, record: ExternalRecord) -> Self {
        self.insert(record);
        self
    }

    pub fn insert(&self, record: ExternalRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    /// Make fetches of `value` come back empty
    pub fn fail(&self, value: u64) {
        self.failing.lock().unwrap().insert(id(value));
    }

    pub fn recover(&self, value: u64) {
        self.failing.lock().unwrap().remove(&id(value));
    }

    /// Every id requested so far, in request order
    pub fn requested_ids(&self) -> Vec<ExternalId> {
        self.batches.lock().unwrap().iter().flatten().copied().collect()
    }

    pub fn request_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn lookup(&self, id: ExternalId) -> Option<ExternalRecord> {
        if self.failing.lock().unwrap().contains(&id) {
            return None;
        }
        self.records.lock().unwrap().get(&id).cloned()
    }
}

impl CatalogSource for FakeCatalog {
    fn fetch_one(&self, id: ExternalId) -> impl Future<Output = Option<ExternalRecord>> + Send {
        self.batches.lock().unwrap().push(vec![id]);
        std::future::ready(self.lookup(id))
    }

    fn fetch_many(
        &self,
        ids: &[ExternalId],
    ) -> impl Future<Output = HashMap<ExternalId, Option<ExternalRecord>>> + Send {
        self.batches.lock().unwrap().push(ids.to_vec());
        let result = ids.iter().map(|id| (*id, self.lookup(*id))).collect();
        std::future::ready(result)
    }
}
