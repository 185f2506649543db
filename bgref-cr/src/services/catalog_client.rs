//! External catalog API client
//!
//! Fetches game records and their relationship links by numeric id.
//!
//! # Wire format
//! `GET {base_url}/thing?id=1,2,3` answers
//! `{"items": [{"id", "type", "name", "stats": {"usersrated"}, "links": [...]}]}`.
//! Item `type` is `boardgame` or `boardgameexpansion`. Links carry their own
//! `type` (`boardgameexpansion`, `boardgameimplementation`, `boardgamefamily`,
//! `boardgamecategory`); `inbound: true` marks a link pointing upstream (the
//! base game of an expansion, the original of a reimplementation).
//!
//! # Failure policy
//! Nothing here is fatal to a run. When a multi-id request fails, its ids are
//! requested one at a time so only the ids that fail alone end up absent. A
//! malformed item nulls only itself, and a malformed link is dropped.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use bgref_common::config::{user_agent, CatalogConfig};

use crate::services::rate_limiter::{Clock, RateLimiter, TokioClock};
use crate::types::{EntityKind, ExternalId, ExternalRecord, LinkRef};

/// Catalog client errors
///
/// Internal to the client: the [`CatalogSource`] boundary turns them into
/// absent records.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("API error {0}: {1}")]
    ApiError(u16, String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// Read access to the external catalog
///
/// A `None` record means "skip this id": not found, transport failure and
/// malformed payloads all look the same to callers.
pub trait CatalogSource: Send + Sync {
    fn fetch_one(&self, id: ExternalId) -> impl Future<Output = Option<ExternalRecord>> + Send;

    /// Every requested id is present in the result map
    fn fetch_many(
        &self,
        ids: &[ExternalId],
    ) -> impl Future<Output = HashMap<ExternalId, Option<ExternalRecord>>> + Send;
}

impl<T: CatalogSource> CatalogSource for Arc<T> {
    fn fetch_one(&self, id: ExternalId) -> impl Future<Output = Option<ExternalRecord>> + Send {
        (**self).fetch_one(id)
    }

    fn fetch_many(
        &self,
        ids: &[ExternalId],
    ) -> impl Future<Output = HashMap<ExternalId, Option<ExternalRecord>>> + Send {
        (**self).fetch_many(ids)
    }
}

// ============================================================================
// Raw payload (validated at the boundary)
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawResponse {
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawItem {
    #[serde(rename = "boardgame")]
    BoardGame(RawThing),
    #[serde(rename = "boardgameexpansion")]
    BoardGameExpansion(RawThing),
}

#[derive(Debug, Deserialize)]
struct RawThing {
    id: u64,
    name: String,
    #[serde(default)]
    stats: RawStats,
    #[serde(default)]
    links: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct RawStats {
    #[serde(default)]
    usersrated: u64,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawLink {
    #[serde(rename = "boardgameexpansion")]
    Expansion(RawLinkTarget),
    #[serde(rename = "boardgameimplementation")]
    Implementation(RawLinkTarget),
    #[serde(rename = "boardgamefamily")]
    Family(RawTag),
    #[serde(rename = "boardgamecategory")]
    Category(RawTag),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RawLinkTarget {
    id: u64,
    #[serde(default)]
    value: String,
    #[serde(default)]
    inbound: bool,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    value: String,
}

/// Validate one catalog item into an [`ExternalRecord`]
pub fn parse_record(value: serde_json::Value) -> Result<ExternalRecord, SourceError> {
    let item: RawItem =
        serde_json::from_value(value).map_err(|e| SourceError::Malformed(e.to_string()))?;

    let (kind, thing) = match item {
        RawItem::BoardGame(thing) => (EntityKind::Base, thing),
        RawItem::BoardGameExpansion(thing) => (EntityKind::Expansion, thing),
    };

    let id = ExternalId::new(thing.id)
        .ok_or_else(|| SourceError::Malformed("item id out of range".to_string()))?;
    let name = thing.name.trim().to_string();
    if name.is_empty() {
        return Err(SourceError::Malformed(format!("item {} has a blank name", id)));
    }

    let mut record = ExternalRecord::new(id, name, kind);
    record.engagement_count = thing.stats.usersrated;

    let mut seen: HashSet<(u8, ExternalId)> = HashSet::new();
    let mut family_tags = BTreeSet::new();

    for raw in thing.links {
        let link = match serde_json::from_value::<RawLink>(raw) {
            Ok(link) => link,
            Err(e) => {
                tracing::debug!(id = %id, error = %e, "Dropping malformed link");
                continue;
            }
        };

        match link {
            RawLink::Expansion(target) => {
                let Some(link) = link_ref(id, &target) else { continue };
                if target.inbound {
                    if record.base_game.is_none() && seen.insert((0, link.id)) {
                        record.base_game = Some(link);
                    }
                } else if seen.insert((1, link.id)) {
                    record.expansions.push(link);
                }
            }
            RawLink::Implementation(target) => {
                let Some(link) = link_ref(id, &target) else { continue };
                if target.inbound {
                    if seen.insert((2, link.id)) {
                        record.reimplements.push(link);
                    }
                } else if seen.insert((3, link.id)) {
                    record.reimplemented_by.push(link);
                }
            }
            RawLink::Family(tag) | RawLink::Category(tag) => {
                let value = tag.value.trim();
                if !value.is_empty() {
                    family_tags.insert(value.to_string());
                }
            }
            RawLink::Other => {}
        }
    }

    record.family_tags = family_tags;
    Ok(record)
}

/// Link target, or `None` for zero ids and self-links
fn link_ref(owner: ExternalId, target: &RawLinkTarget) -> Option<LinkRef> {
    let id = ExternalId::new(target.id)?;
    if id == owner {
        return None;
    }
    Some(LinkRef {
        id,
        name: target.value.trim().to_string(),
    })
}

// ============================================================================
// HTTP client
// ============================================================================

/// HTTP client for the external catalog
pub struct CatalogClient<C: Clock = TokioClock> {
    http_client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    batch_size: usize,
    rate_limiter: Arc<RateLimiter<C>>,
}

impl CatalogClient<TokioClock> {
    /// Build a client with its own wall-clock rate limiter
    pub fn from_config(
        config: &CatalogConfig,
        api_token: Option<String>,
    ) -> bgref_common::Result<Self> {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.min_request_interval_ms,
        )));
        Self::with_rate_limiter(config, api_token, limiter)
    }
}

impl<C: Clock> CatalogClient<C> {
    /// Build a client sharing an existing rate limiter
    pub fn with_rate_limiter(
        config: &CatalogConfig,
        api_token: Option<String>,
        rate_limiter: Arc<RateLimiter<C>>,
    ) -> bgref_common::Result<Self> {
        let base_url = config.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(bgref_common::Error::Config(
                "catalog.base_url is not configured".to_string(),
            ));
        }
        if config.batch_size == 0 {
            return Err(bgref_common::Error::Config(
                "catalog.batch_size must be at least 1".to_string(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .user_agent(user_agent())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| bgref_common::Error::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            api_token: api_token.filter(|t| !t.trim().is_empty()),
            batch_size: config.batch_size,
            rate_limiter,
        })
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter<C>> {
        &self.rate_limiter
    }

    /// One physical request for a batch of ids
    async fn request_batch(
        &self,
        ids: &[ExternalId],
    ) -> Result<HashMap<ExternalId, Option<ExternalRecord>>, SourceError> {
        self.rate_limiter.wait().await;

        let id_list = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/thing", self.base_url);

        tracing::debug!(url = %url, ids = %id_list, "Querying catalog API");

        let mut request = self
            .http_client
            .get(&url)
            .query(&[("id", id_list.as_str()), ("stats", "1")]);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SourceError::ApiError(status.as_u16(), error_text));
        }

        let body: RawResponse = response
            .json()
            .await
            .map_err(|e| SourceError::ParseError(e.to_string()))?;

        let requested: HashSet<ExternalId> = ids.iter().copied().collect();
        let mut records: HashMap<ExternalId, Option<ExternalRecord>> =
            ids.iter().map(|id| (*id, None)).collect();

        for item in body.items {
            match parse_record(item) {
                Ok(record) if requested.contains(&record.id) => {
                    records.insert(record.id, Some(record));
                }
                Ok(record) => {
                    tracing::debug!(id = %record.id, "Ignoring unrequested catalog item");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed catalog item");
                }
            }
        }

        Ok(records)
    }
}

impl<C: Clock> CatalogSource for CatalogClient<C> {
    async fn fetch_one(&self, id: ExternalId) -> Option<ExternalRecord> {
        self.fetch_many(&[id]).await.remove(&id).flatten()
    }

    async fn fetch_many(&self, ids: &[ExternalId]) -> HashMap<ExternalId, Option<ExternalRecord>> {
        let mut unique = Vec::with_capacity(ids.len());
        let mut seen = HashSet::new();
        for id in ids {
            if seen.insert(*id) {
                unique.push(*id);
            }
        }

        let mut results = HashMap::with_capacity(unique.len());
        for chunk in unique.chunks(self.batch_size) {
            match self.request_batch(chunk).await {
                Ok(records) => collect_records(&mut results, records),
                Err(e) if chunk.len() > 1 => {
                    tracing::warn!(
                        error = %e,
                        batch_size = chunk.len(),
                        "Catalog batch request failed, requesting ids one at a time"
                    );
                    self.fetch_individually(chunk, &mut results).await;
                }
                Err(e) => {
                    tracing::warn!(id = %chunk[0], error = %e, "Catalog request failed, id treated as unavailable");
                    results.insert(chunk[0], None);
                }
            }
        }

        results
    }
}

impl<C: Clock> CatalogClient<C> {
    /// Isolate the failing ids of a rejected batch
    async fn fetch_individually(
        &self,
        ids: &[ExternalId],
        results: &mut HashMap<ExternalId, Option<ExternalRecord>>,
    ) {
        for id in ids {
            match self.request_batch(std::slice::from_ref(id)).await {
                Ok(records) => collect_records(results, records),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Catalog request failed, id treated as unavailable");
                    results.insert(*id, None);
                }
            }
        }
    }
}

fn collect_records(
    results: &mut HashMap<ExternalId, Option<ExternalRecord>>,
    records: HashMap<ExternalId, Option<ExternalRecord>>,
) {
    for (id, record) in records {
        if record.is_none() {
            tracing::warn!(id = %id, "Catalog returned no usable record");
        }
        results.insert(id, record);
    }
}
