//! Relation writer
//!
//! Edges are written insert-or-ignore on `(source_id, target_id,
//! relation_type)`. Existing edges are never deleted or rewritten, so any
//! number of overlapping runs leave exactly one row per edge.

use bgref_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::types::{RelationEdge, RelationType};

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    AlreadyExisted,
}

/// Persist one directed edge
///
/// `source` is the derivative entity. Self relations are invalid input.
pub async fn upsert_relation(
    pool: &SqlitePool,
    source: Uuid,
    target: Uuid,
    relation_type: RelationType,
) -> Result<UpsertOutcome> {
    if source == target {
        return Err(Error::InvalidInput(format!(
            "Entity {} cannot be {} itself",
            source, relation_type
        )));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO relations (source_id, target_id, relation_type)
        VALUES (?, ?, ?)
        ON CONFLICT(source_id, target_id, relation_type) DO NOTHING
        "#,
    )
    .bind(source.to_string())
    .bind(target.to_string())
    .bind(relation_type.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() > 0 {
        tracing::debug!(%source, %target, relation = %relation_type, "Created relation");
        Ok(UpsertOutcome::Created)
    } else {
        tracing::info!(%source, %target, relation = %relation_type, "Relation already existed");
        Ok(UpsertOutcome::AlreadyExisted)
    }
}

/// Edges touching `local_id` in either direction
pub async fn list_relations_for(pool: &SqlitePool, local_id: Uuid) -> Result<Vec<RelationEdge>> {
    let rows = sqlx::query(
        r#"
        SELECT source_id, target_id, relation_type
        FROM relations
        WHERE source_id = ? OR target_id = ?
        ORDER BY created_at, rowid
        "#,
    )
    .bind(local_id.to_string())
    .bind(local_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let source: String = row.get("source_id");
            let target: String = row.get("target_id");
            let relation_type: String = row.get("relation_type");
            Ok(RelationEdge {
                source_id: parse_uuid(&source)?,
                target_id: parse_uuid(&target)?,
                relation_type: relation_type.parse()?,
            })
        })
        .collect()
}

pub async fn count_relations(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM relations")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Corrupt relation endpoint '{}': {}", value, e)))
}
