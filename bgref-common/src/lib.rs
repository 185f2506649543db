//! # bgref Common Library
//!
//! Shared code for the bgref services:
//! - Error type
//! - External catalog identifiers
//! - Progress and lifecycle event types (`ProgressEvent`, `CatalogEvent`, `EventBus`)
//! - Bootstrap configuration (TOML) and root folder resolution
//! - Database initialization
//! - SSE helpers

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod external_id;
pub mod sse;

pub use error::{Error, Result};
pub use external_id::ExternalId;
