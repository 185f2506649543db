//! Reconciliation services
//!
//! Leaves first: the catalog client and its rate limiter, the pure name,
//! matching and noise helpers, then the collector and the orchestrator that
//! ties them together.

pub mod analyzer;
pub mod catalog_client;
pub mod entity_matcher;
pub mod name_normalizer;
pub mod noise_classifier;
pub mod rate_limiter;
pub mod reconciler;
pub mod relation_collector;

pub use analyzer::AnalysisReport;
pub use catalog_client::{CatalogClient, CatalogSource};
pub use reconciler::{PreparedRun, ReconcileRequest, Reconciler};
