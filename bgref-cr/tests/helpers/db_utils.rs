//! Database and run utilities

use anyhow::Result;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bgref_common::events::{ItemProgress, ProgressEvent, RunSummary};
use bgref_cr::services::{CatalogSource, ReconcileRequest, Reconciler};

/// Create a temporary file-backed database with the full schema
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_bgref.db");
    let pool = bgref_common::db::init_database(&db_path).await?;
    Ok((temp_dir, pool))
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Run `request` to completion while draining progress through a small channel
pub async fn run_and_collect<S: CatalogSource>(
    reconciler: &Reconciler<S>,
    request: ReconcileRequest,
    cancel: CancellationToken,
) -> bgref_common::Result<(RunSummary, Vec<ProgressEvent>)> {
    let (tx, mut rx) = mpsc::channel(4);

    let drain = async move {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    };

    let (summary, events) = tokio::join!(reconciler.run(request, tx, cancel), drain);
    Ok((summary?, events))
}

/// Terminal per-id statuses, in emission order
pub fn terminal_events(events: &[ProgressEvent]) -> Vec<ItemProgress> {
    events
        .iter()
        .filter_map(|event| match event {
            ProgressEvent::Progress(item) if item.status.is_terminal() => Some(item.clone()),
            _ => None,
        })
        .collect()
}
