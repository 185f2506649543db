//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE stream builders for bgref services.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::events::{CatalogEvent, ProgressEvent};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Stream the progress of one reconciliation run
///
/// Forwards every [`ProgressEvent`] from `rx` as an SSE event named
/// `progress` or `complete`, and closes the stream after `complete`.
///
/// `guard` lives exactly as long as the stream. Pass a cancellation drop
/// guard to stop the run when the client disconnects.
pub fn progress_sse_stream<G>(
    mut rx: mpsc::Receiver<ProgressEvent>,
    guard: G,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>>
where
    G: Send + 'static,
{
    let stream = async_stream::stream! {
        let _guard = guard;

        while let Some(event) = rx.recv().await {
            let is_complete = event.is_complete();
            match serde_json::to_string(&event) {
                Ok(data) => {
                    yield Ok(Event::default().event(event.event_type()).data(data));
                }
                Err(e) => {
                    warn!("SSE: Failed to serialize progress event: {}", e);
                }
            }
            if is_complete {
                debug!("SSE: Run complete, closing progress stream");
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}

/// Stream all catalog lifecycle events from the bus, with heartbeats
pub fn catalog_event_sse_stream(
    mut rx: broadcast::Receiver<CatalogEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to catalog events");

    let stream = async_stream::stream! {
        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            let event_type = event.event_type().to_string();
                            match serde_json::to_string(&event) {
                                Ok(data) => {
                                    yield Ok(Event::default().event(event_type).data(data));
                                }
                                Err(e) => {
                                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("SSE: Subscriber lagged, {} events dropped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
