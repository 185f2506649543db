//! Core reconciliation types
//!
//! Records from the external catalog ([`ExternalRecord`]), the classifier's
//! view of them ([`CandidateEntity`]), local catalog rows ([`LocalEntity`]) and
//! the directed edges between them ([`RelationEdge`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use bgref_common::ExternalId;

/// Whether a record is a standalone game or an add-on to one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Base,
    Expansion,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Base => "base",
            EntityKind::Expansion => "expansion",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "base" => Some(EntityKind::Base),
            "expansion" => Some(EntityKind::Expansion),
            _ => None,
        }
    }
}

/// Reference to another catalog record, as carried on a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRef {
    pub id: ExternalId,
    pub name: String,
}

/// Validated record from the external catalog
///
/// Link direction follows the dependency: `base_game` and `reimplements`
/// point upstream, `expansions` and `reimplemented_by` point downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRecord {
    pub id: ExternalId,
    pub name: String,
    pub kind: EntityKind,
    /// Number of users who rated the record
    pub engagement_count: u64,
    /// Family and category tags
    pub family_tags: BTreeSet<String>,
    pub base_game: Option<LinkRef>,
    pub expansions: Vec<LinkRef>,
    pub reimplements: Vec<LinkRef>,
    pub reimplemented_by: Vec<LinkRef>,
}

impl ExternalRecord {
    /// Minimal record with no links, mostly useful for tests and fakes
    pub fn new(id: ExternalId, name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            engagement_count: 0,
            family_tags: BTreeSet::new(),
            base_game: None,
            expansions: Vec::new(),
            reimplements: Vec::new(),
            reimplemented_by: Vec::new(),
        }
    }

    /// Classifier view of this record
    pub fn candidate(&self) -> CandidateEntity {
        CandidateEntity {
            external_id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            engagement_count: self.engagement_count,
            family_tags: self.family_tags.clone(),
        }
    }
}

/// Related entity under consideration for import; never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub external_id: ExternalId,
    pub name: String,
    pub kind: EntityKind,
    pub engagement_count: u64,
    pub family_tags: BTreeSet<String>,
}

/// Entity in the local catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalEntity {
    pub local_id: Uuid,
    pub name: String,
    /// Weak back-reference to the external catalog
    pub external_id: Option<ExternalId>,
}

/// Directed relation kinds; the source is always the derivative entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    ExpansionOf,
    ReimplementationOf,
    SequelTo,
    SpinOffOf,
    StandaloneInSeries,
}

impl RelationType {
    pub const ALL: [RelationType; 5] = [
        RelationType::ExpansionOf,
        RelationType::ReimplementationOf,
        RelationType::SequelTo,
        RelationType::SpinOffOf,
        RelationType::StandaloneInSeries,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelationType::ExpansionOf => "expansion_of",
            RelationType::ReimplementationOf => "reimplementation_of",
            RelationType::SequelTo => "sequel_to",
            RelationType::SpinOffOf => "spin_off_of",
            RelationType::StandaloneInSeries => "standalone_in_series",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = bgref_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| bgref_common::Error::InvalidInput(format!("Unknown relation type: {}", s)))
    }
}

/// Persisted relation between two local entities
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationEdge {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relation_type: RelationType,
}

/// Which links the graph collector follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TraversalMode {
    /// Seeds only
    None,
    /// Base-game links only
    Upstream,
    /// Expansions, base games and reimplementations
    #[default]
    All,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_type_round_trip_names() {
        for t in RelationType::ALL {
            assert_eq!(t.as_str().parse::<RelationType>().unwrap(), t);
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
        }
        assert!("prequel_to".parse::<RelationType>().is_err());
    }

    #[test]
    fn test_candidate_copies_classifier_fields() {
        let mut record = ExternalRecord::new(
            ExternalId::new(7).unwrap(),
            "Seafarers",
            EntityKind::Expansion,
        );
        record.engagement_count = 120;
        record.family_tags.insert("Catan".to_string());

        let candidate = record.candidate();
        assert_eq!(candidate.external_id, record.id);
        assert_eq!(candidate.engagement_count, 120);
        assert!(candidate.family_tags.contains("Catan"));
    }

    #[test]
    fn test_traversal_mode_wire_names() {
        let mode: TraversalMode = serde_json::from_str("\"upstream\"").unwrap();
        assert_eq!(mode, TraversalMode::Upstream);
        assert_eq!(TraversalMode::default(), TraversalMode::All);
    }
}
