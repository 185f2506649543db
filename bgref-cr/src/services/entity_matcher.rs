//! Entity matcher
//!
//! Resolves an external record to an existing local entity.
//!
//! # Strategy
//! Tiers are tried in order, first hit wins:
//! 1. external id equals a known back-reference (`exact_id`)
//! 2. normalized names equal (`exact_name`)
//! 3. `family hint + " " + name` equals a known name (`family_prefix`)
//! 4. a known name starts with the hint and ends with the name (`family_suffix`)
//! 5. containment either way with a length ratio above the overlap
//!    threshold (`fuzzy_contains`)
//!
//! Ties within a tier resolve to the first entity in input order.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::services::name_normalizer::normalize;
use crate::types::{ExternalId, LocalEntity};

/// Minimum normalized Levenshtein similarity for a review suggestion
pub const SUGGESTION_MIN_SIMILARITY: f64 = 0.6;

/// Maximum number of review suggestions per unmatched name
pub const MAX_SUGGESTIONS: usize = 3;

/// Which tier produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    ExactId,
    ExactName,
    FamilyPrefix,
    FamilySuffix,
    FuzzyContains,
    None,
}

impl MatchType {
    /// Matches trusted enough to link without review
    pub fn is_confident(self) -> bool {
        matches!(
            self,
            MatchType::ExactId | MatchType::ExactName | MatchType::FamilyPrefix | MatchType::FamilySuffix
        )
    }
}

/// What is being matched
#[derive(Debug, Clone, Copy)]
pub struct MatchQuery<'a> {
    pub external_id: Option<ExternalId>,
    pub name: &'a str,
    /// Usually the base game's name
    pub family_hint: Option<&'a str>,
}

/// Result of one lookup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome<'a> {
    pub entity: Option<&'a LocalEntity>,
    pub match_type: MatchType,
}

impl<'a> MatchOutcome<'a> {
    fn hit(entity: &'a LocalEntity, match_type: MatchType) -> Self {
        Self {
            entity: Some(entity),
            match_type,
        }
    }

    fn miss() -> Self {
        Self {
            entity: None,
            match_type: MatchType::None,
        }
    }
}

/// Local entities indexed for matching
///
/// Built once per run; normalized names are computed here and nowhere else.
pub struct KnownEntities {
    entities: Vec<LocalEntity>,
    normalized: Vec<String>,
    by_external_id: HashMap<ExternalId, usize>,
    by_name: HashMap<String, usize>,
}

impl KnownEntities {
    pub fn new(entities: Vec<LocalEntity>) -> Self {
        let normalized: Vec<String> = entities.iter().map(|e| normalize(&e.name)).collect();

        let mut by_external_id = HashMap::new();
        let mut by_name = HashMap::new();
        for (index, entity) in entities.iter().enumerate() {
            if let Some(external_id) = entity.external_id {
                by_external_id.entry(external_id).or_insert(index);
            }
            if !normalized[index].is_empty() {
                by_name.entry(normalized[index].clone()).or_insert(index);
            }
        }

        Self {
            entities,
            normalized,
            by_external_id,
            by_name,
        }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Drop an entity from consideration, e.g. once it has been linked
    pub fn remove(&mut self, local_id: uuid::Uuid) {
        let remaining: Vec<LocalEntity> = std::mem::take(&mut self.entities)
            .into_iter()
            .filter(|e| e.local_id != local_id)
            .collect();
        *self = Self::new(remaining);
    }
}

/// Tiered name and id matcher
#[derive(Debug, Clone, Copy)]
pub struct EntityMatcher {
    overlap_threshold: f64,
}

impl EntityMatcher {
    pub fn new(overlap_threshold: f64) -> Self {
        Self { overlap_threshold }
    }

    pub fn overlap_threshold(&self) -> f64 {
        self.overlap_threshold
    }

    /// Find the best local entity for `query`
    pub fn find_match<'k>(&self, query: &MatchQuery<'_>, known: &'k KnownEntities) -> MatchOutcome<'k> {
        if let Some(external_id) = query.external_id {
            if let Some(&index) = known.by_external_id.get(&external_id) {
                return MatchOutcome::hit(&known.entities[index], MatchType::ExactId);
            }
        }

        let name = normalize(query.name);
        if name.is_empty() {
            return MatchOutcome::miss();
        }

        if let Some(&index) = known.by_name.get(&name) {
            return MatchOutcome::hit(&known.entities[index], MatchType::ExactName);
        }

        let hint = query
            .family_hint
            .map(normalize)
            .filter(|hint| !hint.is_empty());

        if let Some(hint) = &hint {
            let combined = normalize(&format!("{} {}", hint, name));
            if let Some(&index) = known.by_name.get(&combined) {
                return MatchOutcome::hit(&known.entities[index], MatchType::FamilyPrefix);
            }

            if let Some(index) = known
                .normalized
                .iter()
                .position(|known_name| known_name.starts_with(hint.as_str()) && known_name.ends_with(name.as_str()))
            {
                return MatchOutcome::hit(&known.entities[index], MatchType::FamilySuffix);
            }
        }

        if let Some(index) = known
            .normalized
            .iter()
            .position(|known_name| self.substantial_overlap(&name, known_name))
        {
            return MatchOutcome::hit(&known.entities[index], MatchType::FuzzyContains);
        }

        tracing::debug!(name = %query.name, "No local match");
        MatchOutcome::miss()
    }

    /// Containment either way, with the shorter name a large enough share
    fn substantial_overlap(&self, a: &str, b: &str) -> bool {
        if a.is_empty() || b.is_empty() || !(a.contains(b) || b.contains(a)) {
            return false;
        }
        let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
        (short.len() as f64 / long.len() as f64) > self.overlap_threshold
    }
}

/// A local name offered for manual review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub local_id: uuid::Uuid,
    pub name: String,
    pub similarity: f64,
}

/// Closest local names to an unmatched `name`, best first
pub fn suggestions(name: &str, known: &KnownEntities) -> Vec<Suggestion> {
    let target = normalize(name);
    if target.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f64)> = known
        .normalized
        .iter()
        .enumerate()
        .map(|(index, known_name)| (index, strsim::normalized_levenshtein(&target, known_name)))
        .filter(|(_, similarity)| *similarity >= SUGGESTION_MIN_SIMILARITY)
        .collect();

    // Stable sort keeps input order among equal scores
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    scored
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(|(index, similarity)| Suggestion {
            local_id: known.entities[index].local_id,
            name: known.entities[index].name.clone(),
            similarity,
        })
        .collect()
}
