//! Configuration resolution for bgref-cr
//!
//! Secrets resolve Database → ENV → TOML. The database wins so a token set
//! at runtime survives restarts without editing files.

use bgref_common::config::TomlConfig;
use bgref_common::Result;
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

/// Environment variable carrying the catalog bearer credential
pub const CATALOG_TOKEN_ENV_VAR: &str = "BGREF_CATALOG_TOKEN";

/// Resolve the catalog API credential from 3-tier configuration
///
/// **Priority:** Database → ENV → TOML. The credential is optional, so
/// `Ok(None)` means "send unauthenticated requests".
pub async fn resolve_catalog_token(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Option<String>> {
    let db_token = crate::db::settings::get_catalog_api_token(db).await?;
    let env_token = std::env::var(CATALOG_TOKEN_ENV_VAR).ok().filter(|t| is_valid_token(t));
    let toml_token = toml_config
        .catalog
        .api_token
        .clone()
        .filter(|t| is_valid_token(t));

    let sources: Vec<&str> = [
        db_token.as_ref().map(|_| "database"),
        env_token.as_ref().map(|_| "environment"),
        toml_token.as_ref().map(|_| "TOML"),
    ]
    .into_iter()
    .flatten()
    .collect();

    // Warn if multiple sources (potential misconfiguration)
    if sources.len() > 1 {
        warn!(
            "Catalog API token found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(token) = db_token {
        info!("Catalog API token loaded from database");
        return Ok(Some(token));
    }

    if let Some(token) = env_token {
        info!("Catalog API token loaded from environment variable");
        return Ok(Some(token));
    }

    if let Some(token) = toml_token {
        info!("Catalog API token loaded from TOML config");
        return Ok(Some(token));
    }

    info!("No catalog API token configured, sending unauthenticated requests");
    Ok(None)
}

/// Non-empty, non-whitespace
pub fn is_valid_token(token: &str) -> bool {
    !token.trim().is_empty()
}
