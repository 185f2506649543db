//! Reconciliation run history
//!
//! One `reconcile_runs` row per run plus the terminal status of every id it
//! processed. A later run can resume from these rows.

use bgref_common::events::{ItemProgress, ProgressStatus, RunSummary};
use bgref_common::{Error, ExternalId, Result};
use chrono::Utc;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;

/// Stored run with its per-id outcomes
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub request: serde_json::Value,
    pub started_at: String,
    pub ended_at: Option<String>,
    /// Absent while the run is still in flight
    pub summary: Option<RunSummary>,
    pub items: Vec<ItemProgress>,
}

pub async fn start_run(pool: &SqlitePool, run_id: Uuid, request: &serde_json::Value) -> Result<()> {
    sqlx::query("INSERT INTO reconcile_runs (run_id, request, started_at) VALUES (?, ?, ?)")
        .bind(run_id.to_string())
        .bind(request.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
    Ok(())
}

/// Record the terminal status of one id
pub async fn record_item(pool: &SqlitePool, run_id: Uuid, item: &ItemProgress) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reconcile_run_items (run_id, external_id, name, status, error, local_id)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(run_id, external_id) DO UPDATE SET
            name = excluded.name,
            status = excluded.status,
            error = excluded.error,
            local_id = excluded.local_id,
            recorded_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(run_id.to_string())
    .bind(item.external_id.as_i64())
    .bind(&item.name)
    .bind(item.status.as_str())
    .bind(&item.error)
    .bind(item.local_id.map(|id| id.to_string()))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn finish_run(pool: &SqlitePool, run_id: Uuid, summary: &RunSummary) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE reconcile_runs
        SET ended_at = ?, imported = ?, synced = ?, failed = ?, skipped = ?, duration_seconds = ?
        WHERE run_id = ?
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(summary.imported as i64)
    .bind(summary.synced as i64)
    .bind(summary.failed as i64)
    .bind(summary.skipped as i64)
    .bind(summary.duration_seconds)
    .bind(run_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Ids a run finished with `success` or `skipped`
///
/// Errors with `NotFound` for an unknown run so a mistyped resume id is not
/// silently treated as "nothing done yet".
pub async fn completed_ids(pool: &SqlitePool, run_id: Uuid) -> Result<HashSet<ExternalId>> {
    let exists: Option<String> = sqlx::query_scalar("SELECT run_id FROM reconcile_runs WHERE run_id = ?")
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;
    if exists.is_none() {
        return Err(Error::NotFound(format!("Reconcile run {}", run_id)));
    }

    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT external_id FROM reconcile_run_items WHERE run_id = ? AND status IN ('success', 'skipped')",
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(ids.into_iter().filter_map(ExternalId::from_i64).collect())
}

pub async fn load_run(pool: &SqlitePool, run_id: Uuid) -> Result<Option<RunReport>> {
    let Some(row) = sqlx::query(
        r#"
        SELECT request, started_at, ended_at, imported, synced, failed, skipped, duration_seconds
        FROM reconcile_runs
        WHERE run_id = ?
        "#,
    )
    .bind(run_id.to_string())
    .fetch_optional(pool)
    .await?
    else {
        return Ok(None);
    };

    let request: String = row.get("request");
    let ended_at: Option<String> = row.get("ended_at");
    let duration_seconds: Option<f64> = row.get("duration_seconds");
    let summary = ended_at.as_ref().map(|_| RunSummary {
        imported: count(&row, "imported"),
        synced: count(&row, "synced"),
        failed: count(&row, "failed"),
        skipped: count(&row, "skipped"),
        duration_seconds: duration_seconds.unwrap_or_default(),
    });

    let item_rows = sqlx::query(
        r#"
        SELECT external_id, name, status, error, local_id
        FROM reconcile_run_items
        WHERE run_id = ?
        ORDER BY recorded_at, rowid
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(item_rows.len());
    for item in item_rows {
        let external_id: i64 = item.get("external_id");
        let status: String = item.get("status");
        let local_id: Option<String> = item.get("local_id");

        let (Some(external_id), Some(status)) = (ExternalId::from_i64(external_id), ProgressStatus::parse(&status))
        else {
            tracing::warn!(%run_id, external_id, status = %status, "Skipping corrupt run item");
            continue;
        };

        items.push(ItemProgress {
            external_id,
            name: item.get("name"),
            status,
            error: item.get("error"),
            local_id: local_id.and_then(|id| Uuid::parse_str(&id).ok()),
        });
    }

    Ok(Some(RunReport {
        run_id,
        request: serde_json::from_str(&request).unwrap_or(serde_json::Value::String(request)),
        started_at: row.get("started_at"),
        ended_at,
        summary,
        items,
    }))
}

fn count(row: &sqlx::sqlite::SqliteRow, column: &str) -> usize {
    let value: i64 = row.get(column);
    usize::try_from(value).unwrap_or_default()
}
