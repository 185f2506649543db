//! Relation graph collector
//!
//! Walks the catalog graph outward from seed ids, one depth level at a time,
//! and returns the related ids worth reconciling.
//!
//! # Traversal
//! The frontier is an explicit work list; there is no recursion. Per level:
//! 1. fetch any frontier records not already cached
//! 2. discover linked ids the mode allows, skipping visited and excluded ids
//!    (every discovered id is marked visited at once)
//! 3. fetch all discovered ids in one batch and classify expansion records
//!    reached through a downstream expansion link
//! 4. noise is dropped; unavailable ids are reported but not expanded;
//!    survivors form the next level
//!
//! Ids finished by an earlier run are traversed through so their neighbours
//! are still reached, but they are never returned for processing.
//!
//! Stops when a level yields no survivors, `max_depth` levels are consumed
//! (0 = unbounded) or the run is cancelled.

use std::collections::{HashMap, HashSet};
use tokio_util::sync::CancellationToken;

use crate::services::catalog_client::CatalogSource;
use crate::services::noise_classifier::{NoiseClassifier, NoiseReason, NoiseVerdict};
use crate::types::{CandidateEntity, EntityKind, ExternalId, ExternalRecord, TraversalMode};

/// Collector inputs
#[derive(Debug, Clone, Default)]
pub struct CollectRequest {
    pub seeds: Vec<ExternalId>,
    pub mode: TraversalMode,
    /// Levels to expand; 0 means until the graph is exhausted
    pub max_depth: u32,
    pub exclude: HashSet<ExternalId>,
    /// Ids finished by an earlier run, traversed through but not returned
    pub already_processed: HashSet<ExternalId>,
}

/// Candidate dropped by the noise classifier
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredCandidate {
    pub candidate: CandidateEntity,
    pub reason: NoiseReason,
}

/// Collector output
#[derive(Debug, Default)]
pub struct CollectionOutcome {
    /// Newly discovered ids to process, in discovery order, seeds excluded.
    /// Includes unavailable ids so each still gets a terminal status.
    pub ids: Vec<ExternalId>,
    pub filtered: Vec<FilteredCandidate>,
    /// Discovered ids the catalog could not supply, also listed in `ids`
    pub unavailable: Vec<ExternalId>,
    /// Every record fetched along the way, seeds included
    pub records: HashMap<ExternalId, ExternalRecord>,
    /// Levels actually expanded
    pub depth_reached: u32,
}

impl CollectionOutcome {
    pub fn filtered_ids(&self) -> HashSet<ExternalId> {
        self.filtered.iter().map(|f| f.candidate.external_id).collect()
    }
}

/// How a discovered id is related to the record that linked to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkRole {
    Expansion,
    BaseGame,
    Reimplementation,
}

/// Collector lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Seeded,
    Expanding { depth: u32 },
    Exhausted,
}

struct Frontier {
    visited: HashSet<ExternalId>,
    excluded: HashSet<ExternalId>,
    already_processed: HashSet<ExternalId>,
    pending: Vec<ExternalId>,
}

impl Frontier {
    /// Mark `id` visited if it may be enqueued
    fn admit(&mut self, id: ExternalId) -> bool {
        if self.excluded.contains(&id) {
            return false;
        }
        self.visited.insert(id)
    }
}

/// Result of expanding one level
#[derive(Default)]
struct Level {
    /// Ids to hand to the caller, unavailable ones included
    reported: Vec<ExternalId>,
    /// Ids with a record that form the next frontier
    survivors: Vec<ExternalId>,
}

/// Graph walker over a catalog source
pub struct RelationCollector<'a, S: CatalogSource> {
    source: &'a S,
    classifier: &'a NoiseClassifier,
}

impl<'a, S: CatalogSource> RelationCollector<'a, S> {
    pub fn new(source: &'a S, classifier: &'a NoiseClassifier) -> Self {
        Self { source, classifier }
    }

    /// Discover related ids for `request`
    ///
    /// Seed records are always fetched (even with mode `none`) so callers can
    /// reuse them from [`CollectionOutcome::records`].
    pub async fn collect(&self, request: &CollectRequest, cancel: &CancellationToken) -> CollectionOutcome {
        let mut outcome = CollectionOutcome::default();
        let mut frontier = Frontier {
            visited: HashSet::new(),
            excluded: request.exclude.clone(),
            already_processed: request.already_processed.clone(),
            pending: Vec::new(),
        };

        for seed in &request.seeds {
            if frontier.admit(*seed) {
                frontier.pending.push(*seed);
            }
        }

        let mut state = CollectorState::Seeded;
        loop {
            state = match state {
                CollectorState::Seeded => {
                    self.fetch_uncached(&frontier.pending, &mut outcome).await;
                    if request.mode == TraversalMode::None || frontier.pending.is_empty() {
                        CollectorState::Exhausted
                    } else {
                        CollectorState::Expanding { depth: 1 }
                    }
                }

                CollectorState::Expanding { depth } => {
                    if cancel.is_cancelled() {
                        tracing::info!(depth, "Collection cancelled");
                        CollectorState::Exhausted
                    } else if request.max_depth != 0 && depth > request.max_depth {
                        CollectorState::Exhausted
                    } else {
                        let level = self.expand_level(request.mode, &mut frontier, &mut outcome).await;
                        outcome.depth_reached = depth;
                        tracing::debug!(
                            depth,
                            discovered = level.reported.len(),
                            survivors = level.survivors.len(),
                            "Expanded frontier level"
                        );

                        outcome.ids.extend(level.reported);
                        if level.survivors.is_empty() {
                            CollectorState::Exhausted
                        } else {
                            frontier.pending = level.survivors;
                            CollectorState::Expanding { depth: depth + 1 }
                        }
                    }
                }

                CollectorState::Exhausted => break,
            };
        }

        tracing::info!(
            collected = outcome.ids.len(),
            filtered = outcome.filtered.len(),
            unavailable = outcome.unavailable.len(),
            depth = outcome.depth_reached,
            "Relation graph collected"
        );

        outcome
    }

    async fn fetch_uncached(&self, ids: &[ExternalId], outcome: &mut CollectionOutcome) {
        let missing: Vec<ExternalId> = ids
            .iter()
            .copied()
            .filter(|id| !outcome.records.contains_key(id))
            .collect();
        if missing.is_empty() {
            return;
        }

        for (id, record) in self.source.fetch_many(&missing).await {
            if let Some(record) = record {
                outcome.records.insert(id, record);
            }
        }
    }

    /// Expand one level of the frontier
    async fn expand_level(
        &self,
        mode: TraversalMode,
        frontier: &mut Frontier,
        outcome: &mut CollectionOutcome,
    ) -> Level {
        let pending = std::mem::take(&mut frontier.pending);
        self.fetch_uncached(&pending, outcome).await;

        let mut discovered: Vec<(ExternalId, LinkRole)> = Vec::new();
        for id in &pending {
            let Some(record) = outcome.records.get(id) else {
                continue;
            };
            for (linked, role) in linked_ids(record, mode) {
                if frontier.admit(linked) {
                    discovered.push((linked, role));
                }
            }
        }

        let mut level = Level::default();
        if discovered.is_empty() {
            return level;
        }

        let ids: Vec<ExternalId> = discovered.iter().map(|(id, _)| *id).collect();
        self.fetch_uncached(&ids, outcome).await;

        for (id, role) in discovered {
            let processed = frontier.already_processed.contains(&id);
            let Some(record) = outcome.records.get(&id) else {
                if processed {
                    tracing::debug!(id = %id, "Processed earlier, no catalog record to traverse");
                } else {
                    tracing::warn!(id = %id, "Related id has no catalog record");
                    outcome.unavailable.push(id);
                    level.reported.push(id);
                }
                continue;
            };

            if role == LinkRole::Expansion && record.kind == EntityKind::Expansion {
                let candidate = record.candidate();
                if let NoiseVerdict::Noise(reason) = self.classifier.classify(&candidate) {
                    tracing::warn!(id = %id, name = %candidate.name, reason = %reason, "Filtered noise candidate");
                    outcome.filtered.push(FilteredCandidate { candidate, reason });
                    continue;
                }
            }

            if !processed {
                level.reported.push(id);
            }
            level.survivors.push(id);
        }

        level
    }
}

/// Links of `record` followed under `mode`, in a stable order
fn linked_ids(record: &ExternalRecord, mode: TraversalMode) -> Vec<(ExternalId, LinkRole)> {
    let mut linked = Vec::new();
    match mode {
        TraversalMode::None => {}
        TraversalMode::Upstream => {
            if let Some(base) = &record.base_game {
                linked.push((base.id, LinkRole::BaseGame));
            }
        }
        TraversalMode::All => {
            linked.extend(record.expansions.iter().map(|l| (l.id, LinkRole::Expansion)));
            if let Some(base) = &record.base_game {
                linked.push((base.id, LinkRole::BaseGame));
            }
            linked.extend(
                record
                    .reimplements
                    .iter()
                    .chain(record.reimplemented_by.iter())
                    .map(|l| (l.id, LinkRole::Reimplementation)),
            );
        }
    }
    linked
}
