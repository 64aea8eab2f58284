//! Hub message protocol definitions
//!
//! JSON text frames exchanged with the hub.
//!
//! ## Client → Server Messages
//!
//! ```json
//! // Call a hub method
//! {"type": "invoke", "invocation_id": "inv_1a2b", "target": "JoinGroup", "arguments": ["case-42"]}
//!
//! // Keepalive
//! {"type": "ping"}
//! ```
//!
//! ## Server → Client Messages
//!
//! ```json
//! // Connection accepted
//! {"type": "welcome", "connection_id": "conn_abc123"}
//!
//! // Pushed event
//! {"type": "event", "target": "caseUpdated", "arguments": [{"id": "case-42"}]}
//!
//! // Result of an invocation
//! {"type": "completion", "invocation_id": "inv_1a2b", "result": true}
//! {"type": "completion", "invocation_id": "inv_1a2b", "error": "Method does not exist"}
//!
//! // Keepalive response
//! {"type": "pong"}
//!
//! // Server is closing the connection
//! {"type": "close", "error": "Token expired"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Invoke a hub method
    Invoke {
        /// Correlates the completion with this call
        invocation_id: String,
        /// Hub method name
        target: String,
        /// Positional arguments
        #[serde(default)]
        arguments: Vec<Value>,
    },
    /// Keepalive ping
    Ping,
}

impl ClientMessage {
    /// Build an invocation with a fresh ID
    pub fn invoke(target: &str, arguments: Vec<Value>) -> Self {
        ClientMessage::Invoke {
            invocation_id: format!("inv_{}", Uuid::new_v4().simple()),
            target: target.to_string(),
            arguments,
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Welcome message on connection
    Welcome {
        /// Server-assigned connection ID
        connection_id: String,
    },
    /// A pushed event
    Event {
        /// Event name, e.g. "caseUpdated"
        target: String,
        /// Positional arguments; the first one is the payload
        #[serde(default)]
        arguments: Vec<Value>,
    },
    /// Result of an invocation
    Completion {
        invocation_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Keepalive response
    Pong,
    /// Server-initiated close
    Close {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ServerMessage {
    /// Payload of an event message (first argument, or null)
    pub fn event_payload(arguments: &[Value]) -> Value {
        arguments.first().cloned().unwrap_or(Value::Null)
    }
}
