//! Reconciliation orchestrator
//!
//! Drives one run end to end: collect the relation graph, then walk seeds
//! followed by collected ids and import, resync or skip each against the
//! local catalog, attaching relation edges as both ends become known.
//!
//! # Progress contract
//! Every processed id gets exactly one terminal status (`success`, `failed`
//! or `skipped`), preceded by `importing` or `syncing` when work is done.
//! Exactly one `complete` event closes the run, also after cancellation.
//! A dropped receiver does not stop the run.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bgref_common::config::ReconcileConfig;
use bgref_common::events::{CatalogEvent, EventBus, ItemProgress, ProgressEvent, ProgressStatus, RunSummary};
use bgref_common::{Error, Result};

use crate::db::{entities, relations, runs};
use crate::services::catalog_client::CatalogSource;
use crate::services::entity_matcher::{EntityMatcher, KnownEntities, MatchQuery, MatchType};
use crate::services::noise_classifier::NoiseClassifier;
use crate::services::relation_collector::{CollectRequest, CollectionOutcome, RelationCollector};
use crate::types::{ExternalId, ExternalRecord, LocalEntity, RelationType, TraversalMode};

/// Depth used when a request does not set one
pub const DEFAULT_MAX_DEPTH: u32 = 2;

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

/// What to reconcile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub seeds: Vec<ExternalId>,

    #[serde(default)]
    pub mode: TraversalMode,

    /// Levels to traverse; 0 means until the graph is exhausted
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Refresh entities that already exist locally
    #[serde(default)]
    pub resync: bool,

    #[serde(default)]
    pub exclude: Vec<ExternalId>,

    /// Treat ids finished by this earlier run as already processed
    #[serde(default)]
    pub resume_from: Option<Uuid>,
}

impl ReconcileRequest {
    pub fn new(seeds: Vec<ExternalId>) -> Self {
        Self {
            seeds,
            mode: TraversalMode::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            resync: false,
            exclude: Vec::new(),
            resume_from: None,
        }
    }
}

/// A validated request, ready to run
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub run_id: Uuid,
    pub request: ReconcileRequest,
    /// Seeds minus exclusions, deduplicated
    pub seeds: Vec<ExternalId>,
    pub exclude: HashSet<ExternalId>,
    pub already_processed: HashSet<ExternalId>,
}

impl PreparedRun {
    /// Seeds still to be processed; ids finished by a resumed run only seed traversal
    pub fn pending_seeds(&self) -> impl Iterator<Item = ExternalId> + '_ {
        self.seeds
            .iter()
            .copied()
            .filter(|id| !self.already_processed.contains(id))
    }

    pub(crate) fn collect_request(&self) -> CollectRequest {
        CollectRequest {
            seeds: self.seeds.clone(),
            mode: self.request.mode,
            max_depth: self.request.max_depth,
            exclude: self.exclude.clone(),
            already_processed: self.already_processed.clone(),
        }
    }
}

/// How an id left the processing loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Imported,
    Synced,
    Skipped,
    Failed,
}

/// Reconciliation engine over a catalog source
pub struct Reconciler<S: CatalogSource> {
    pub(crate) db: SqlitePool,
    pub(crate) source: S,
    pub(crate) classifier: NoiseClassifier,
    pub(crate) matcher: EntityMatcher,
    link_fuzzy_matches: bool,
    event_bus: Option<EventBus>,
}

impl<S: CatalogSource> Reconciler<S> {
    /// Build the engine; fails on invalid noise patterns
    pub fn new(db: SqlitePool, source: S, config: &ReconcileConfig) -> Result<Self> {
        if !(0.0..=1.0).contains(&config.fuzzy_overlap_threshold) {
            return Err(Error::Config(format!(
                "reconcile.fuzzy_overlap_threshold must be within 0..=1, got {}",
                config.fuzzy_overlap_threshold
            )));
        }

        Ok(Self {
            db,
            source,
            classifier: NoiseClassifier::from_config(config)?,
            matcher: EntityMatcher::new(config.fuzzy_overlap_threshold),
            link_fuzzy_matches: config.link_fuzzy_matches,
            event_bus: None,
        })
    }

    /// Mirror run lifecycle events onto `event_bus`
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Validate a request before any network activity
    pub async fn prepare(&self, request: ReconcileRequest) -> Result<PreparedRun> {
        if request.seeds.is_empty() {
            return Err(Error::InvalidInput("At least one seed id is required".to_string()));
        }

        let exclude: HashSet<ExternalId> = request.exclude.iter().copied().collect();
        let already_processed = match request.resume_from {
            Some(previous) => runs::completed_ids(&self.db, previous).await.map_err(|e| match e {
                Error::NotFound(what) => Error::InvalidInput(format!("Cannot resume: {} does not exist", what)),
                other => other,
            })?,
            None => HashSet::new(),
        };

        let mut seen = HashSet::new();
        let seeds: Vec<ExternalId> = request
            .seeds
            .iter()
            .copied()
            .filter(|id| !exclude.contains(id) && seen.insert(*id))
            .collect();
        if seeds.is_empty() {
            return Err(Error::InvalidInput("Every seed id is excluded".to_string()));
        }

        Ok(PreparedRun {
            run_id: Uuid::new_v4(),
            request,
            seeds,
            exclude,
            already_processed,
        })
    }

    /// Validate and execute in one call
    pub async fn run(
        &self,
        request: ReconcileRequest,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let prepared = self.prepare(request).await?;
        Ok(self.execute(prepared, progress, cancel).await)
    }

    /// Execute a prepared run, streaming progress into `progress`
    pub async fn execute(
        &self,
        prepared: PreparedRun,
        progress: mpsc::Sender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> RunSummary {
        let started = Instant::now();
        let run_id = prepared.run_id;

        tracing::info!(
            %run_id,
            seeds = prepared.seeds.len(),
            mode = ?prepared.request.mode,
            max_depth = prepared.request.max_depth,
            resync = prepared.request.resync,
            "Reconciliation run started"
        );

        let request_json = serde_json::to_value(&prepared.request).unwrap_or_default();
        if let Err(e) = runs::start_run(&self.db, run_id, &request_json).await {
            tracing::warn!(%run_id, error = %e, "Failed to record run start");
        }
        self.publish(CatalogEvent::RunStarted {
            run_id,
            seed_count: prepared.seeds.len(),
            timestamp: chrono::Utc::now(),
        });

        let collector = RelationCollector::new(&self.source, &self.classifier);
        let collection = collector.collect(&prepared.collect_request(), &cancel).await;

        let mut run = RunContext::new(run_id, &prepared, collection, progress);
        run.unlinked = match entities::list_unlinked(&self.db).await {
            Ok(unlinked) => KnownEntities::new(unlinked),
            Err(e) => {
                tracing::warn!(%run_id, error = %e, "Could not load unlinked entities, matching disabled");
                KnownEntities::new(Vec::new())
            }
        };

        let order: Vec<ExternalId> = prepared.pending_seeds().chain(run.collected.iter().copied()).collect();
        let mut summary = RunSummary::default();

        for id in order {
            if cancel.is_cancelled() {
                tracing::info!(%run_id, "Reconciliation cancelled, stopping before {}", id);
                break;
            }

            let (outcome, item) = self.process_id(id, prepared.request.resync, &mut run).await;
            match outcome {
                ItemOutcome::Imported => summary.imported += 1,
                ItemOutcome::Synced => summary.synced += 1,
                ItemOutcome::Skipped => summary.skipped += 1,
                ItemOutcome::Failed => summary.failed += 1,
            }

            if let Err(e) = runs::record_item(&self.db, run_id, &item).await {
                tracing::warn!(%run_id, id = %id, error = %e, "Failed to record run item");
            }
            self.send_progress(&mut run, item).await;
        }

        summary.duration_seconds = started.elapsed().as_secs_f64();

        if let Err(e) = runs::finish_run(&self.db, run_id, &summary).await {
            tracing::warn!(%run_id, error = %e, "Failed to record run summary");
        }
        self.publish(CatalogEvent::RunCompleted {
            run_id,
            summary: summary.clone(),
            timestamp: chrono::Utc::now(),
        });
        if run.progress.send(ProgressEvent::Complete(summary.clone())).await.is_err() {
            tracing::debug!(%run_id, "Progress receiver gone before completion");
        }

        tracing::info!(
            %run_id,
            imported = summary.imported,
            synced = summary.synced,
            failed = summary.failed,
            skipped = summary.skipped,
            duration_seconds = summary.duration_seconds,
            "Reconciliation run finished"
        );

        summary
    }

    /// Handle one id and return its terminal progress
    async fn process_id(&self, id: ExternalId, resync: bool, run: &mut RunContext) -> (ItemOutcome, ItemProgress) {
        let existing = match entities::find_by_external_id(&self.db, id).await {
            Ok(existing) => existing,
            Err(e) => {
                let name = run.display_name(id, None);
                return failed(id, name, &e);
            }
        };

        match existing {
            Some(entity) if resync => {
                let name = run.display_name(id, Some(&entity));
                self.send_progress(run, in_flight(id, name.clone(), ProgressStatus::Syncing, Some(entity.local_id)))
                    .await;

                match self.resync(id, &entity, run).await {
                    Ok(()) => (ItemOutcome::Synced, done(id, name, ProgressStatus::Success, entity.local_id)),
                    Err(e) => failed(id, name, &e),
                }
            }

            Some(entity) => {
                tracing::debug!(id = %id, local_id = %entity.local_id, "Already imported, skipping");
                let name = run.display_name(id, Some(&entity));
                (ItemOutcome::Skipped, done(id, name, ProgressStatus::Skipped, entity.local_id))
            }

            None => {
                let name = run.display_name(id, None);
                self.send_progress(run, in_flight(id, name.clone(), ProgressStatus::Importing, None))
                    .await;

                match self.import(id, run).await {
                    Ok(entity) => (ItemOutcome::Imported, done(id, entity.name, ProgressStatus::Success, entity.local_id)),
                    Err(e) => failed(id, name, &e),
                }
            }
        }
    }

    async fn resync(&self, id: ExternalId, entity: &LocalEntity, run: &mut RunContext) -> Result<()> {
        let record = self.record_for(id, run)?;
        entities::update_from_record(&self.db, entity.local_id, &record).await?;
        self.attach_edges(entity.local_id, &record, run).await?;
        tracing::info!(id = %id, local_id = %entity.local_id, "Resynced entity");
        Ok(())
    }

    async fn import(&self, id: ExternalId, run: &mut RunContext) -> Result<LocalEntity> {
        let record = self.record_for(id, run)?;
        let entity = self.link_or_create(&record, run).await?;
        self.attach_edges(entity.local_id, &record, run).await?;
        Ok(entity)
    }

    /// Record fetched during collection; every processed id was requested there
    fn record_for(&self, id: ExternalId, run: &RunContext) -> Result<ExternalRecord> {
        run.records
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Catalog record {} unavailable", id)))
    }

    /// Link a matching hand-entered entity, otherwise create a new one
    async fn link_or_create(&self, record: &ExternalRecord, run: &mut RunContext) -> Result<LocalEntity> {
        let family_hint = run.family_hint(record);
        let query = MatchQuery {
            external_id: Some(record.id),
            name: &record.name,
            family_hint: family_hint.as_deref(),
        };
        let outcome = self.matcher.find_match(&query, &run.unlinked);
        let match_type = outcome.match_type;

        if let Some(candidate) = outcome.entity.cloned() {
            let linkable = match_type.is_confident()
                || (match_type == MatchType::FuzzyContains && self.link_fuzzy_matches);

            if !linkable {
                tracing::info!(
                    id = %record.id,
                    name = %record.name,
                    local_name = %candidate.name,
                    ?match_type,
                    "Possible match needs review, creating new entity"
                );
            } else if entities::link_external_id(&self.db, candidate.local_id, record).await? {
                run.unlinked.remove(candidate.local_id);
                tracing::info!(
                    id = %record.id,
                    local_id = %candidate.local_id,
                    ?match_type,
                    "Linked existing entity"
                );
                return Ok(LocalEntity {
                    external_id: Some(record.id),
                    ..candidate
                });
            } else {
                run.unlinked.remove(candidate.local_id);
            }
        }

        let (entity, _created) = entities::create_from_record(&self.db, record).await?;
        Ok(entity)
    }

    /// Write edges between `local_id` and already-resolved neighbours
    async fn attach_edges(&self, local_id: Uuid, record: &ExternalRecord, run: &RunContext) -> Result<()> {
        let mut edges: Vec<(ExternalId, bool, RelationType)> = Vec::new();
        if let Some(base) = &record.base_game {
            edges.push((base.id, true, RelationType::ExpansionOf));
        }
        edges.extend(record.expansions.iter().map(|l| (l.id, false, RelationType::ExpansionOf)));
        edges.extend(record.reimplements.iter().map(|l| (l.id, true, RelationType::ReimplementationOf)));
        edges.extend(record.reimplemented_by.iter().map(|l| (l.id, false, RelationType::ReimplementationOf)));

        for (other, outgoing, relation_type) in edges {
            if run.filtered.contains(&other) || run.excluded.contains(&other) {
                continue;
            }
            let Some(neighbour) = entities::find_by_external_id(&self.db, other).await? else {
                continue;
            };
            if neighbour.local_id == local_id {
                continue;
            }

            let (source, target) = if outgoing {
                (local_id, neighbour.local_id)
            } else {
                (neighbour.local_id, local_id)
            };
            relations::upsert_relation(&self.db, source, target, relation_type).await?;
        }

        Ok(())
    }

    async fn send_progress(&self, run: &mut RunContext, item: ItemProgress) {
        self.publish(CatalogEvent::RunProgress {
            run_id: run.run_id,
            progress: item.clone(),
            timestamp: chrono::Utc::now(),
        });

        if run.progress.send(ProgressEvent::Progress(item)).await.is_err() && !run.receiver_gone {
            run.receiver_gone = true;
            tracing::debug!(run_id = %run.run_id, "Progress receiver dropped, continuing run");
        }
    }

    fn publish(&self, event: CatalogEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit_lossy(event);
        }
    }
}

/// Mutable state of one run
struct RunContext {
    run_id: Uuid,
    collected: Vec<ExternalId>,
    records: HashMap<ExternalId, ExternalRecord>,
    filtered: HashSet<ExternalId>,
    excluded: HashSet<ExternalId>,
    unlinked: KnownEntities,
    progress: mpsc::Sender<ProgressEvent>,
    receiver_gone: bool,
}

impl RunContext {
    fn new(
        run_id: Uuid,
        prepared: &PreparedRun,
        collection: CollectionOutcome,
        progress: mpsc::Sender<ProgressEvent>,
    ) -> Self {
        let filtered = collection.filtered_ids();
        Self {
            run_id,
            collected: collection.ids,
            records: collection.records,
            filtered,
            excluded: prepared.exclude.clone(),
            unlinked: KnownEntities::new(Vec::new()),
            progress,
            receiver_gone: false,
        }
    }

    /// Local name, then catalog name, then the bare id
    fn display_name(&self, id: ExternalId, local: Option<&LocalEntity>) -> String {
        local
            .map(|e| e.name.clone())
            .or_else(|| self.records.get(&id).map(|r| r.name.clone()))
            .unwrap_or_else(|| id.to_string())
    }

    /// Base game name used to disambiguate expansion names
    fn family_hint(&self, record: &ExternalRecord) -> Option<String> {
        let base = record.base_game.as_ref()?;
        if !base.name.trim().is_empty() {
            return Some(base.name.clone());
        }
        self.records.get(&base.id).map(|r| r.name.clone())
    }
}

fn in_flight(id: ExternalId, name: String, status: ProgressStatus, local_id: Option<Uuid>) -> ItemProgress {
    ItemProgress {
        external_id: id,
        name,
        status,
        error: None,
        local_id,
    }
}

fn done(id: ExternalId, name: String, status: ProgressStatus, local_id: Uuid) -> ItemProgress {
    in_flight(id, name, status, Some(local_id))
}

fn failed(id: ExternalId, name: String, error: &Error) -> (ItemOutcome, ItemProgress) {
    tracing::error!(id = %id, name = %name, error = %error, "Reconciliation failed for id");
    let message = match error {
        Error::NotFound(what) => what.clone(),
        other => other.to_string(),
    };
    (
        ItemOutcome::Failed,
        ItemProgress {
            external_id: id,
            name,
            status: ProgressStatus::Failed,
            error: Some(message),
            local_id: None,
        },
    )
}
