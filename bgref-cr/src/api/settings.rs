//! Settings API
//!
//! Stores the catalog credential in the database, the highest-priority
//! source. The running client keeps its token; the new one applies from the
//! next start.

use axum::{extract::State, routing::put, Json, Router};
use serde::{Deserialize, Serialize};

use crate::config::is_valid_token;
use crate::db::settings;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// PUT /settings/catalog_api_token request
#[derive(Debug, Deserialize)]
pub struct SetTokenRequest {
    pub api_token: String,
}

/// PUT /settings/catalog_api_token response
#[derive(Debug, Serialize)]
pub struct SetTokenResponse {
    pub success: bool,
    pub restart_required: bool,
}

/// PUT /settings/catalog_api_token
pub async fn set_catalog_api_token(
    State(state): State<AppState>,
    Json(request): Json<SetTokenRequest>,
) -> ApiResult<Json<SetTokenResponse>> {
    if !is_valid_token(&request.api_token) {
        return Err(ApiError::BadRequest("api_token must not be blank".to_string()));
    }

    settings::set_catalog_api_token(&state.db, request.api_token.trim()).await?;
    tracing::info!("Catalog API token updated in database");

    Ok(Json(SetTokenResponse {
        success: true,
        restart_required: true,
    }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/settings/catalog_api_token", put(set_catalog_api_token))
}
