//! Event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between workers, the expiry
//! reaper and the ingest gateway.

use chrono::Utc;
use photochanger_core::job_events;
use photochanger_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A job lifecycle event.
///
/// Constructed via [`JobEvent::new`] and enriched with
/// [`for_job`](JobEvent::for_job), [`with_payload`](JobEvent::with_payload)
/// and [`at`](JobEvent::at).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Dot-separated event name, e.g. `"job.completed"`.
    pub event_type: String,

    pub job_id: Option<JobId>,

    pub slot_id: Option<String>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event happened (UTC).
    pub timestamp: Timestamp,
}

impl JobEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            job_id: None,
            slot_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the job the event is about.
    pub fn for_job(mut self, job_id: JobId, slot_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id);
        self.slot_id = Some(slot_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Override the event time, e.g. with an injected clock's value.
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_terminal(&self) -> bool {
        job_events::is_terminal(&self.event_type)
    }

    /// Whether this is the terminal event of `job_id`.
    pub fn is_terminal_for(&self, job_id: JobId) -> bool {
        self.job_id == Some(job_id) && self.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is dropped.
    pub fn publish(&self, event: JobEvent) {
        tracing::trace!(
            event_type = %event.event_type,
            job_id = ?event.job_id,
            "Publishing job event",
        );
        // A send error only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
