//! Read-only analysis
//!
//! Runs the same traversal as a reconciliation run and reports how each id
//! would resolve against the local catalog, without writing anything.
//! Unmatched names come with review suggestions.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use bgref_common::Result;

use crate::db::entities;
use crate::services::catalog_client::CatalogSource;
use crate::services::entity_matcher::{suggestions, KnownEntities, MatchQuery, MatchType, Suggestion};
use crate::services::reconciler::{ReconcileRequest, Reconciler};
use crate::services::relation_collector::RelationCollector;
use crate::types::{EntityKind, ExternalId, ExternalRecord};

/// How one external id resolves locally
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisEntry {
    pub external_id: ExternalId,
    pub name: String,
    pub kind: EntityKind,
    /// True for seeds, false for collected ids
    pub seed: bool,
    pub match_type: MatchType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_name: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<Suggestion>,
}

/// Candidate the noise classifier dropped
#[derive(Debug, Clone, Serialize)]
pub struct FilteredEntry {
    pub external_id: ExternalId,
    pub name: String,
    pub engagement_count: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub entries: Vec<AnalysisEntry>,
    pub filtered: Vec<FilteredEntry>,
    /// Ids the catalog could not supply
    pub unavailable: Vec<ExternalId>,
}

impl AnalysisReport {
    pub fn unmatched(&self) -> impl Iterator<Item = &AnalysisEntry> {
        self.entries.iter().filter(|e| e.match_type == MatchType::None)
    }
}

impl<S: CatalogSource> Reconciler<S> {
    /// Report how `request` would resolve, without writing
    pub async fn analyze(&self, request: ReconcileRequest) -> Result<AnalysisReport> {
        let prepared = self.prepare(request).await?;
        let known = KnownEntities::new(entities::list_all(&self.db).await?);

        let collector = RelationCollector::new(&self.source, &self.classifier);
        let collection = collector
            .collect(&prepared.collect_request(), &CancellationToken::new())
            .await;

        let mut entries = Vec::new();
        let mut unavailable = Vec::new();

        let order = prepared
            .pending_seeds()
            .map(|id| (id, true))
            .chain(collection.ids.iter().map(|id| (*id, false)));

        for (id, seed) in order {
            let Some(record) = collection.records.get(&id) else {
                unavailable.push(id);
                continue;
            };
            entries.push(self.analyze_record(record, seed, &known, &collection.records));
        }

        let filtered = collection
            .filtered
            .iter()
            .map(|f| FilteredEntry {
                external_id: f.candidate.external_id,
                name: f.candidate.name.clone(),
                engagement_count: f.candidate.engagement_count,
                reason: f.reason.to_string(),
            })
            .collect();

        let report = AnalysisReport {
            entries,
            filtered,
            unavailable,
        };

        tracing::info!(
            entries = report.entries.len(),
            unmatched = report.unmatched().count(),
            filtered = report.filtered.len(),
            "Analysis complete"
        );

        Ok(report)
    }

    fn analyze_record(
        &self,
        record: &ExternalRecord,
        seed: bool,
        known: &KnownEntities,
        records: &std::collections::HashMap<ExternalId, ExternalRecord>,
    ) -> AnalysisEntry {
        let family_hint = record.base_game.as_ref().and_then(|base| {
            if base.name.trim().is_empty() {
                records.get(&base.id).map(|r| r.name.clone())
            } else {
                Some(base.name.clone())
            }
        });

        let query = MatchQuery {
            external_id: Some(record.id),
            name: &record.name,
            family_hint: family_hint.as_deref(),
        };
        let outcome = self.matcher.find_match(&query, known);

        let suggestions = if outcome.entity.is_none() {
            suggestions(&record.name, known)
        } else {
            Vec::new()
        };

        AnalysisEntry {
            external_id: record.id,
            name: record.name.clone(),
            kind: record.kind,
            seed,
            match_type: outcome.match_type,
            local_id: outcome.entity.map(|e| e.local_id),
            local_name: outcome.entity.map(|e| e.name.clone()),
            suggestions,
        }
    }
}
