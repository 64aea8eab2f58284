//! Connection lifecycle events
//!
//! The `ConnectionEventBus` uses `tokio::sync::broadcast` to decouple the
//! connection state machine from whoever wants to observe it (supervisor,
//! status badges, analytics).
//!
//! # Architecture
//!
//! ```text
//! RealtimeConnection ──▶ ConnectionEventBus::publish() ──▶ broadcast ──▶ ConnectionSupervisor
//!                                                                    ──▶ host UI listeners
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use uuid::Uuid;

/// State of the single hub socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to the connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    /// The state enum changed
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// A socket was re-established by the automatic retry loop
    Reconnected { connection_id: Option<String> },
    /// The socket closed without being asked to
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
    /// Auto-connect was switched off after repeated failures
    Disabled { failures: u32 },
    /// Group membership was replayed on a fresh socket
    GroupsRejoined { rejoined: usize, dropped: usize },
}

/// Envelope wrapping a connection event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// The actual event
    pub event: ConnectionEvent,
}

impl EventEnvelope {
    /// Create a new event envelope
    pub fn new(event: ConnectionEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Broadcast bus for connection lifecycle events
///
/// Cheap to clone (Arc internally).
#[derive(Debug, Clone)]
pub struct ConnectionEventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl ConnectionEventBus {
    /// Create a bus that buffers `capacity` events per lagging receiver
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    ///
    /// Never fails. Returns the number of receivers that will see the event.
    pub fn publish(&self, event: ConnectionEvent) -> usize {
        let envelope = EventEnvelope::new(event);
        // send() returns Err only if there are no receivers
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Get the current number of active subscribers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ConnectionEventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
