//! Server-Sent Events for run lifecycle observers

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events
///
/// Streams `RunStarted`, `RunProgress` and `RunCompleted` for every run.
pub async fn event_stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    bgref_common::sse::catalog_event_sse_stream(state.event_bus.subscribe())
}
