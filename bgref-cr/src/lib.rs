//! bgref-cr library interface
//!
//! Catalog Reconciler: imports a third-party board-game catalog's relation
//! graph into the local catalog. Exposed for the binary and for integration
//! tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use bgref_common::config::TomlConfig;
use bgref_common::events::EventBus;

use crate::services::{CatalogClient, Reconciler};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for run lifecycle observers
    pub event_bus: EventBus,
    /// Engine over the HTTP catalog client
    pub reconciler: Arc<Reconciler<CatalogClient>>,
    /// Cancellation tokens of runs in flight
    pub active_runs: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
    /// Bounded progress channel size per run
    pub progress_channel_capacity: usize,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        reconciler: Reconciler<CatalogClient>,
        progress_channel_capacity: usize,
    ) -> Self {
        Self {
            db,
            event_bus,
            reconciler: Arc::new(reconciler),
            active_runs: Arc::new(RwLock::new(HashMap::new())),
            progress_channel_capacity: progress_channel_capacity.max(1),
            startup_time: Utc::now(),
        }
    }

    /// Wire up the engine from bootstrap configuration
    ///
    /// Fails on configuration errors (missing catalog URL, invalid noise
    /// patterns) before anything talks to the network.
    pub async fn from_config(db: SqlitePool, event_bus: EventBus, config: &TomlConfig) -> bgref_common::Result<Self> {
        let token = crate::config::resolve_catalog_token(&db, config).await?;
        let client = CatalogClient::from_config(&config.catalog, token)?;
        let reconciler = Reconciler::new(db.clone(), client, &config.reconcile)?.with_event_bus(event_bus.clone());

        Ok(Self::new(db, event_bus, reconciler, config.reconcile.progress_channel_capacity))
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::reconcile_routes())
        .merge(api::relation_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
