//! Turn lifecycle events.
//!
//! The turn controller publishes; the gateway logs them. Nothing in the turn
//! path waits on a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A turn started generating
    TurnStarted {
        session_id: String,
        response_id: u64,
        model: String,
        timestamp: DateTime<Utc>,
    },

    /// The primary model's plain text was discarded for the fallback model
    FallbackTriggered {
        session_id: String,
        primary_model: String,
        fallback_model: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was dispatched
    ToolDispatched {
        session_id: String,
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A second tool call cut the stream short
    StreamTruncated {
        session_id: String,
        kept_call_id: String,
        dropped_call_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The agent hung up and the call was marked ended
    CallEnded {
        session_id: String,
        response_id: u64,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A turn emitted its terminal frame
    TurnCompleted {
        session_id: String,
        response_id: u64,
        frames: usize,
        end_call: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A turn failed after its terminal frame
    TurnFailed {
        session_id: String,
        response_id: u64,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus for [`DomainEvent`]s. Slow subscribers lag and lose events.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // no subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
