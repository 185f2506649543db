//! Manual relation API
//!
//! The only way to record `sequel_to`, `spin_off_of` and
//! `standalone_in_series` edges, which the catalog does not carry.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{entities, relations};
use crate::db::relations::UpsertOutcome;
use crate::error::{ApiError, ApiResult};
use crate::types::{RelationEdge, RelationType};
use crate::AppState;

/// POST /relations request
#[derive(Debug, Deserialize)]
pub struct UpsertRelationRequest {
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub relation_type: RelationType,
}

/// POST /relations response
#[derive(Debug, Serialize)]
pub struct UpsertRelationResponse {
    pub outcome: UpsertOutcome,
}

/// POST /relations
pub async fn upsert_relation(
    State(state): State<AppState>,
    Json(request): Json<UpsertRelationRequest>,
) -> ApiResult<Json<UpsertRelationResponse>> {
    if request.source_id == request.target_id {
        return Err(ApiError::BadRequest(
            "source_id and target_id must differ".to_string(),
        ));
    }

    for id in [request.source_id, request.target_id] {
        if entities::load_entity(&state.db, id).await?.is_none() {
            return Err(ApiError::NotFound(format!("Entity not found: {}", id)));
        }
    }

    let outcome = relations::upsert_relation(
        &state.db,
        request.source_id,
        request.target_id,
        request.relation_type,
    )
    .await?;

    Ok(Json(UpsertRelationResponse { outcome }))
}

/// GET /entities/:local_id/relations
pub async fn list_relations(
    State(state): State<AppState>,
    Path(local_id): Path<Uuid>,
) -> ApiResult<Json<Vec<RelationEdge>>> {
    if entities::load_entity(&state.db, local_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Entity not found: {}", local_id)));
    }
    Ok(Json(relations::list_relations_for(&state.db, local_id).await?))
}

/// Build relation routes
pub fn relation_routes() -> Router<AppState> {
    Router::new()
        .route("/relations", post(upsert_relation))
        .route("/entities/:local_id/relations", get(list_relations))
}
