//! Local catalog entity operations

use bgref_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::types::{EntityKind, ExternalId, ExternalRecord, LocalEntity};

/// Full entity row
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    pub entity: LocalEntity,
    pub kind: Option<EntityKind>,
    pub engagement_count: Option<u64>,
}

fn parse_guid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Internal(format!("Corrupt entity guid '{}': {}", value, e)))
}

fn local_entity_from_row(row: &SqliteRow) -> Result<LocalEntity> {
    let guid: String = row.get("guid");
    let external_id: Option<i64> = row.get("external_id");
    Ok(LocalEntity {
        local_id: parse_guid(&guid)?,
        name: row.get("name"),
        external_id: external_id.and_then(ExternalId::from_i64),
    })
}

/// Look up the entity back-referencing `external_id`
pub async fn find_by_external_id(pool: &SqlitePool, external_id: ExternalId) -> Result<Option<LocalEntity>> {
    let row = sqlx::query("SELECT guid, name, external_id FROM entities WHERE external_id = ?")
        .bind(external_id.as_i64())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(local_entity_from_row).transpose()
}

/// Load one entity with its catalog metadata
pub async fn load_entity(pool: &SqlitePool, local_id: Uuid) -> Result<Option<EntityRow>> {
    let row = sqlx::query(
        r#"
        SELECT guid, name, external_id, kind, engagement_count
        FROM entities
        WHERE guid = ?
        "#,
    )
    .bind(local_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let kind: Option<String> = row.get("kind");
            let engagement_count: Option<i64> = row.get("engagement_count");
            Ok(Some(EntityRow {
                entity: local_entity_from_row(&row)?,
                kind: kind.as_deref().and_then(EntityKind::parse),
                engagement_count: engagement_count.map(|c| c.max(0) as u64),
            }))
        }
        None => Ok(None),
    }
}

/// Entities with no external back-reference, oldest first
///
/// These are catalog rows entered by hand, candidates for match-then-link.
pub async fn list_unlinked(pool: &SqlitePool) -> Result<Vec<LocalEntity>> {
    let rows = sqlx::query(
        r#"
        SELECT guid, name, external_id
        FROM entities
        WHERE external_id IS NULL
        ORDER BY created_at, rowid
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(local_entity_from_row).collect()
}

/// Every local entity, oldest first
pub async fn list_all(pool: &SqlitePool) -> Result<Vec<LocalEntity>> {
    let rows = sqlx::query("SELECT guid, name, external_id FROM entities ORDER BY created_at, rowid")
        .fetch_all(pool)
        .await?;

    rows.iter().map(local_entity_from_row).collect()
}

/// Insert an entity without an external id
pub async fn insert_unlinked(pool: &SqlitePool, name: &str) -> Result<LocalEntity> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Entity name must not be blank".to_string()));
    }

    let entity = LocalEntity {
        local_id: Uuid::new_v4(),
        name: name.to_string(),
        external_id: None,
    };

    sqlx::query("INSERT INTO entities (guid, name) VALUES (?, ?)")
        .bind(entity.local_id.to_string())
        .bind(&entity.name)
        .execute(pool)
        .await?;

    Ok(entity)
}

/// Create the entity for `record`, or return the one already holding its id
///
/// Insert-or-ignore on `external_id`, so concurrent imports converge on one
/// row. The flag is true when this call created it.
pub async fn create_from_record(pool: &SqlitePool, record: &ExternalRecord) -> Result<(LocalEntity, bool)> {
    let result = sqlx::query(
        r#"
        INSERT INTO entities (guid, name, external_id, kind, engagement_count)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(external_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&record.name)
    .bind(record.id.as_i64())
    .bind(record.kind.as_str())
    .bind(engagement_i64(record.engagement_count))
    .execute(pool)
    .await?;

    let created = result.rows_affected() > 0;
    let entity = find_by_external_id(pool, record.id)
        .await?
        .ok_or_else(|| Error::Internal(format!("Entity for external id {} vanished after insert", record.id)))?;

    if created {
        tracing::info!(external_id = %record.id, local_id = %entity.local_id, name = %entity.name, "Created entity");
    }

    Ok((entity, created))
}

/// Refresh catalog-owned fields from a newly fetched record
pub async fn update_from_record(pool: &SqlitePool, local_id: Uuid, record: &ExternalRecord) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE entities
        SET name = ?, kind = ?, engagement_count = ?, updated_at = CURRENT_TIMESTAMP
        WHERE guid = ?
        "#,
    )
    .bind(&record.name)
    .bind(record.kind.as_str())
    .bind(engagement_i64(record.engagement_count))
    .bind(local_id.to_string())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Entity {}", local_id)));
    }

    Ok(())
}

/// Attach `record`'s external id to an unlinked entity, keeping its name
///
/// Returns false when the entity was linked by someone else meanwhile.
pub async fn link_external_id(pool: &SqlitePool, local_id: Uuid, record: &ExternalRecord) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE entities
        SET external_id = ?, kind = ?, engagement_count = ?, updated_at = CURRENT_TIMESTAMP
        WHERE guid = ? AND external_id IS NULL
        "#,
    )
    .bind(record.id.as_i64())
    .bind(record.kind.as_str())
    .bind(engagement_i64(record.engagement_count))
    .bind(local_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn count_entities(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entities")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn engagement_i64(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}
