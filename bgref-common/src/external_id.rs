//! External catalog identifiers

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Identifier of a record in the external catalog
///
/// Always positive and at most `i64::MAX`, so it fits an SQLite integer.
/// Stable across runs, so it is the dedup key for graph
/// traversal and the back-reference stored on local entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ExternalId(u64);

impl ExternalId {
    /// Create an identifier, rejecting zero and values SQLite cannot store
    pub fn new(value: u64) -> Option<Self> {
        (value > 0 && i64::try_from(value).is_ok()).then_some(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }

    /// SQLite stores integers as i64; `new` keeps the value in range
    pub fn as_i64(self) -> i64 {
        i64::try_from(self.0).unwrap_or(i64::MAX)
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        u64::try_from(value).ok().and_then(Self::new)
    }
}

impl<'de> Deserialize<'de> for ExternalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u64::deserialize(deserializer)?;
        Self::new(value).ok_or_else(|| serde::de::Error::custom("catalog ids must be within 1..=i64::MAX"))
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExternalId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u64 = s
            .trim()
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Not a catalog id: {:?}", s)))?;
        Self::new(value)
            .ok_or_else(|| Error::InvalidInput("Catalog ids must be within 1..=i64::MAX".to_string()))
    }
}
