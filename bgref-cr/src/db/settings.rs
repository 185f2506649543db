//! Key/value settings stored in the database

use bgref_common::Result;
use sqlx::SqlitePool;

/// Settings key of the catalog bearer credential
pub const CATALOG_API_TOKEN_KEY: &str = "catalog_api_token";

pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO settings (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

/// Catalog credential from the database, if set and non-blank
pub async fn get_catalog_api_token(pool: &SqlitePool) -> Result<Option<String>> {
    Ok(get_setting(pool, CATALOG_API_TOKEN_KEY)
        .await?
        .filter(|token| !token.trim().is_empty()))
}

pub async fn set_catalog_api_token(pool: &SqlitePool, token: &str) -> Result<()> {
    set_setting(pool, CATALOG_API_TOKEN_KEY, token).await
}
