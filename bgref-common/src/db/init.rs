//! Database initialization
//!
//! Creates the catalog schema on first run. Every statement is idempotent, so
//! `init_database` is safe to call on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Open (or create) the database file and ensure the schema exists
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas go on the connect options so every pooled connection gets them.
    // WAL allows concurrent readers alongside the single writer.
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_tables(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// Every pooled connection to `sqlite::memory:` would open a separate empty
/// database, so the pool is pinned to one connection.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    create_tables(&pool).await?;
    Ok(pool)
}

/// Create all tables and indexes if they don't exist
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    create_settings_table(pool).await?;
    create_entities_table(pool).await?;
    create_relations_table(pool).await?;
    create_runs_tables(pool).await?;

    Ok(())
}

/// Key/value runtime settings (catalog credential)
pub async fn create_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Local catalog entities
///
/// `external_id` is a nullable weak back-reference to the external catalog.
/// Its UNIQUE constraint is what makes concurrent imports of the same record
/// converge on one row.
pub async fn create_entities_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            external_id INTEGER UNIQUE,
            kind TEXT,
            engagement_count INTEGER,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (external_id IS NULL OR external_id > 0),
            CHECK (kind IS NULL OR kind IN ('base', 'expansion'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_name ON entities(name)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Directed relation edges between local entities
///
/// `(source_id, target_id, relation_type)` is the natural key.
pub async fn create_relations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS relations (
            source_id TEXT NOT NULL REFERENCES entities(guid) ON DELETE CASCADE,
            target_id TEXT NOT NULL REFERENCES entities(guid) ON DELETE CASCADE,
            relation_type TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (source_id, target_id, relation_type),
            CHECK (source_id <> target_id),
            CHECK (relation_type IN (
                'expansion_of', 'reimplementation_of', 'sequel_to',
                'spin_off_of', 'standalone_in_series'
            ))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Run history used for reporting and resume
pub async fn create_runs_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconcile_runs (
            run_id TEXT PRIMARY KEY,
            request TEXT NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            imported INTEGER NOT NULL DEFAULT 0,
            synced INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            duration_seconds REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reconcile_run_items (
            run_id TEXT NOT NULL REFERENCES reconcile_runs(run_id) ON DELETE CASCADE,
            external_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            local_id TEXT,
            recorded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (run_id, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
