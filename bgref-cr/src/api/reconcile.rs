//! Reconciliation API handlers
//!
//! POST /reconcile, POST /reconcile/analyze, GET /reconcile/runs/:run_id,
//! POST /reconcile/runs/:run_id/cancel

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::runs::{self, RunReport};
use crate::error::{ApiError, ApiResult};
use crate::services::{AnalysisReport, ReconcileRequest};
use crate::AppState;

/// Header carrying the id of a started run
pub const RUN_ID_HEADER: &str = "x-run-id";

/// POST /reconcile/runs/:run_id/cancel response
#[derive(Debug, Serialize)]
pub struct CancelRunResponse {
    pub run_id: Uuid,
    pub cancelled: bool,
}

/// POST /reconcile
///
/// Validates the request, starts the run in the background and streams its
/// progress as SSE (`progress` events, then one `complete`). Closing the
/// stream cancels the run.
pub async fn start_reconcile(
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> ApiResult<impl IntoResponse> {
    let prepared = state.reconciler.prepare(request).await?;
    let run_id = prepared.run_id;

    let (tx, rx) = mpsc::channel(state.progress_channel_capacity);
    let cancel = CancellationToken::new();
    state.active_runs.write().await.insert(run_id, cancel.clone());

    let task_state = state.clone();
    let task_cancel = cancel.clone();
    tokio::spawn(async move {
        tracing::info!(%run_id, "Background reconciliation task started");
        let summary = task_state.reconciler.execute(prepared, tx, task_cancel).await;
        task_state.active_runs.write().await.remove(&run_id);
        tracing::info!(%run_id, failed = summary.failed, "Background reconciliation task finished");
    });

    let stream = bgref_common::sse::progress_sse_stream(rx, cancel.drop_guard());
    Ok(([(RUN_ID_HEADER, run_id.to_string())], stream))
}

/// POST /reconcile/analyze
///
/// Read-only: reports how each id would resolve locally.
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> ApiResult<Json<AnalysisReport>> {
    let report = state.reconciler.analyze(request).await?;
    Ok(Json(report))
}

/// GET /reconcile/runs/:run_id
pub async fn get_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> ApiResult<Json<RunReport>> {
    runs::load_run(&state.db, run_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Reconcile run not found: {}", run_id)))
}

/// POST /reconcile/runs/:run_id/cancel
///
/// Stops the run before its next id; the stream still ends with `complete`.
pub async fn cancel_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
) -> ApiResult<Json<CancelRunResponse>> {
    let token = state.active_runs.read().await.get(&run_id).cloned();
    match token {
        Some(token) => {
            token.cancel();
            tracing::info!(%run_id, "Reconciliation run cancellation requested");
            Ok(Json(CancelRunResponse { run_id, cancelled: true }))
        }
        None => Err(ApiError::NotFound(format!("No active reconcile run: {}", run_id))),
    }
}

/// Build reconciliation routes
pub fn reconcile_routes() -> Router<AppState> {
    Router::new()
        .route("/reconcile", post(start_reconcile))
        .route("/reconcile/analyze", post(analyze))
        .route("/reconcile/runs/:run_id", get(get_run))
        .route("/reconcile/runs/:run_id/cancel", post(cancel_run))
}
