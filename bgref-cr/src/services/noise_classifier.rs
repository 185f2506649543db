//! Noise classifier
//!
//! Decides whether a related expansion is worth importing. Catalog graphs
//! around popular games are full of fan content, promo cards and accessories
//! that would drown the real expansions.
//!
//! Rules are checked in order and the first hit wins:
//! 1. engagement below the configured minimum
//! 2. a "fan expansion" family tag
//! 3. promotional name pattern
//! 4. accessory name pattern
//! 5. promotional family tag
//! 6. accessory family tag

use regex::Regex;
use std::fmt;

use bgref_common::config::ReconcileConfig;
use bgref_common::{Error, Result};

use crate::types::CandidateEntity;

const FAN_EXPANSION_TAG: &str = "fan expansion";

/// Why a candidate was filtered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoiseReason {
    LowEngagement { count: u64, threshold: u64 },
    FanExpansion { tag: String },
    PromoName { pattern: String },
    AccessoryName { pattern: String },
    PromoFamily { tag: String },
    AccessoryFamily { tag: String },
}

impl fmt::Display for NoiseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoiseReason::LowEngagement { count, threshold } => {
                write!(f, "low engagement ({} < {})", count, threshold)
            }
            NoiseReason::FanExpansion { tag } => write!(f, "fan expansion family '{}'", tag),
            NoiseReason::PromoName { pattern } => write!(f, "promotional name (matches {})", pattern),
            NoiseReason::AccessoryName { pattern } => write!(f, "accessory name (matches {})", pattern),
            NoiseReason::PromoFamily { tag } => write!(f, "promotional family '{}'", tag),
            NoiseReason::AccessoryFamily { tag } => write!(f, "accessory family '{}'", tag),
        }
    }
}

/// Classification result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoiseVerdict {
    Signal,
    Noise(NoiseReason),
}

impl NoiseVerdict {
    pub fn is_filtered(&self) -> bool {
        matches!(self, NoiseVerdict::Noise(_))
    }

    pub fn reason(&self) -> Option<&NoiseReason> {
        match self {
            NoiseVerdict::Signal => None,
            NoiseVerdict::Noise(reason) => Some(reason),
        }
    }
}

/// Compiled noise rules
#[derive(Debug, Clone)]
pub struct NoiseClassifier {
    min_engagement: u64,
    promo_patterns: Vec<Regex>,
    accessory_patterns: Vec<Regex>,
    promo_families: Vec<String>,
    accessory_families: Vec<String>,
}

impl NoiseClassifier {
    /// Compile the configured rules
    ///
    /// An invalid pattern is a configuration error.
    pub fn from_config(config: &ReconcileConfig) -> Result<Self> {
        Ok(Self {
            min_engagement: config.min_engagement,
            promo_patterns: compile_patterns("promo_patterns", &config.noise.promo_patterns)?,
            accessory_patterns: compile_patterns("accessory_patterns", &config.noise.accessory_patterns)?,
            promo_families: lowercase_all(&config.noise.promo_families),
            accessory_families: lowercase_all(&config.noise.accessory_families),
        })
    }

    pub fn min_engagement(&self) -> u64 {
        self.min_engagement
    }

    /// Classify one candidate
    pub fn classify(&self, candidate: &CandidateEntity) -> NoiseVerdict {
        if candidate.engagement_count < self.min_engagement {
            return NoiseVerdict::Noise(NoiseReason::LowEngagement {
                count: candidate.engagement_count,
                threshold: self.min_engagement,
            });
        }

        let tags: Vec<(&String, String)> = candidate
            .family_tags
            .iter()
            .map(|tag| (tag, tag.to_lowercase()))
            .collect();

        if let Some((tag, _)) = tags.iter().find(|(_, lower)| lower.contains(FAN_EXPANSION_TAG)) {
            return NoiseVerdict::Noise(NoiseReason::FanExpansion { tag: (*tag).clone() });
        }

        if let Some(re) = self.promo_patterns.iter().find(|re| re.is_match(&candidate.name)) {
            return NoiseVerdict::Noise(NoiseReason::PromoName {
                pattern: re.as_str().to_string(),
            });
        }

        if let Some(re) = self.accessory_patterns.iter().find(|re| re.is_match(&candidate.name)) {
            return NoiseVerdict::Noise(NoiseReason::AccessoryName {
                pattern: re.as_str().to_string(),
            });
        }

        if let Some(tag) = find_tag(&tags, &self.promo_families) {
            return NoiseVerdict::Noise(NoiseReason::PromoFamily { tag });
        }

        if let Some(tag) = find_tag(&tags, &self.accessory_families) {
            return NoiseVerdict::Noise(NoiseReason::AccessoryFamily { tag });
        }

        NoiseVerdict::Signal
    }
}

fn compile_patterns(field: &str, patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| {
                Error::Config(format!("reconcile.noise.{}: invalid pattern '{}': {}", field, pattern, e))
            })
        })
        .collect()
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

fn find_tag(tags: &[(&String, String)], needles: &[String]) -> Option<String> {
    tags.iter()
        .find(|(_, lower)| needles.iter().any(|needle| lower.contains(needle.as_str())))
        .map(|(tag, _)| (*tag).clone())
}
