//! Local HTTP catalog for client and API tests
//!
//! Serves `GET /thing?id=1,2,3` from scripted JSON items on an ephemeral
//! port. A batch containing a failing id answers 500.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// One request as seen by the server
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub ids: Vec<u64>,
    pub authorization: Option<String>,
    pub received_at: Instant,
}

#[derive(Default)]
struct ServerState {
    items: Mutex<HashMap<u64, Value>>,
    failing: Mutex<HashSet<u64>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

#[derive(Clone)]
pub struct CatalogServer {
    pub base_url: String,
    state: Arc<ServerState>,
}

impl CatalogServer {
    /// Serve `item` under its own `id`
    pub fn add_item(&self, item: Value) {
        let id = item["id"].as_u64().expect("item needs a numeric id");
        self.state.items.lock().unwrap().insert(id, item);
    }

    /// Serve a raw payload under `id`, valid or not
    pub fn add_raw(&self, id: u64, item: Value) {
        self.state.items.lock().unwrap().insert(id, item);
    }

    pub fn fail(&self, id: u64) {
        self.state.failing.lock().unwrap().insert(id);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}

/// Catalog item JSON
pub fn item(id: u64, kind: &str, name: &str, usersrated: u64, links: Vec<Value>) -> Value {
    json!({
        "id": id,
        "type": kind,
        "name": name,
        "stats": { "usersrated": usersrated },
        "links": links,
    })
}

/// Expansion link JSON; `inbound` points at the base game
pub fn expansion_link(id: u64, name: &str, inbound: bool) -> Value {
    json!({ "type": "boardgameexpansion", "id": id, "value": name, "inbound": inbound })
}

async fn thing(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let ids: Vec<u64> = params
        .get("id")
        .map(|list| list.split(',').filter_map(|v| v.trim().parse().ok()).collect())
        .unwrap_or_default();

    state.requests.lock().unwrap().push(RecordedRequest {
        ids: ids.clone(),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
        received_at: Instant::now(),
    });

    let failing = state.failing.lock().unwrap();
    if ids.iter().any(|id| failing.contains(id)) {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "boom" })));
    }

    let items = state.items.lock().unwrap();
    let found: Vec<Value> = ids.iter().filter_map(|id| items.get(id).cloned()).collect();
    (StatusCode::OK, Json(json!({ "items": found })))
}

/// Start a catalog server on an ephemeral port
pub async fn spawn_catalog_server() -> CatalogServer {
    let state = Arc::new(ServerState::default());
    let app = Router::new()
        .route("/thing", get(thing))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    CatalogServer {
        base_url: format!("http://{}", addr),
        state,
    }
}
