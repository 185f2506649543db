//! Event types for bgref
//!
//! Two layers:
//! - [`ProgressEvent`] is the per-run progress contract streamed to the caller
//!   that started a reconciliation run. Serialized externally tagged:
//!   `{"progress": {...}}` or `{"complete": {...}}`.
//! - [`CatalogEvent`] is the lifecycle event republished on the [`EventBus`] for
//!   any other observers (dashboards, log shippers).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::ExternalId;

/// Status of a single external id within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Importing,
    Syncing,
    Success,
    Failed,
    Skipped,
}

impl ProgressStatus {
    /// Terminal statuses close out an id; each processed id gets exactly one
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Importing => "importing",
            Self::Syncing => "syncing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "importing" => Some(Self::Importing),
            "syncing" => Some(Self::Syncing),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

/// Progress for one external id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgress {
    pub external_id: ExternalId,
    pub name: String,
    pub status: ProgressStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<Uuid>,
}

/// Final counters of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub imported: usize,
    pub synced: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_seconds: f64,
}

/// Event streamed to the caller of a reconciliation run
///
/// The `Complete` variant is always the last event of a run and is emitted
/// exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressEvent {
    Progress(ItemProgress),
    Complete(RunSummary),
}

impl ProgressEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            ProgressEvent::Progress(_) => "progress",
            ProgressEvent::Complete(_) => "complete",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, ProgressEvent::Complete(_))
    }
}

/// Run lifecycle events broadcast on the [`EventBus`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CatalogEvent {
    /// A reconciliation run started
    RunStarted {
        run_id: Uuid,
        /// Seeds after exclusion and dedup
        seed_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// An id changed status within a run
    RunProgress {
        run_id: Uuid,
        progress: ItemProgress,
        timestamp: DateTime<Utc>,
    },

    /// A run finished (completed, cancelled or partially failed)
    RunCompleted {
        run_id: Uuid,
        summary: RunSummary,
        timestamp: DateTime<Utc>,
    },
}

impl CatalogEvent {
    pub fn event_type(&self) -> &str {
        match self {
            CatalogEvent::RunStarted { .. } => "RunStarted",
            CatalogEvent::RunProgress { .. } => "RunProgress",
            CatalogEvent::RunCompleted { .. } => "RunCompleted",
        }
    }
}

/// Broadcast bus for [`CatalogEvent`]s
///
/// Cloning shares the underlying channel. Slow subscribers lag and lose the
/// oldest events rather than blocking publishers.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CatalogEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// ```
    /// use bgref_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    pub fn emit(
        &self,
        event: CatalogEvent,
    ) -> Result<usize, Box<broadcast::error::SendError<CatalogEvent>>> {
        self.tx.send(event).map_err(Box::new)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: CatalogEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for catalog event");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
