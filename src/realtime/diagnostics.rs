//! Connection error history for logging and support
//!
//! One `ConnectionDiagnostics` instance is shared by reference (`Arc`) with the
//! connection that owns it. It is a recorder only: nothing in the state
//! machine branches on what is stored here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::RwLock;

/// Snapshot of the most recent failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticRecord {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Failures recorded since the last success (including this one)
    pub retry_count: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<Value>,
}

/// Point-in-time view of the diagnostics state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiagnosticsSnapshot {
    pub retry_count: u32,
    pub total_errors: u64,
    pub last_error: Option<DiagnosticRecord>,
    pub last_success_at: Option<DateTime<Utc>>,
}

/// Best-effort error recorder
#[derive(Debug, Default)]
pub struct ConnectionDiagnostics {
    state: RwLock<DiagnosticsSnapshot>,
}

impl ConnectionDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure
    ///
    /// Increments the retry counter and replaces the last-error snapshot.
    pub fn record_error(
        &self,
        message: impl Into<String>,
        code: Option<u16>,
        raw: Option<Value>,
    ) -> Option<DiagnosticRecord> {
        let message = message.into();
        let mut state = self.state.write().ok()?;
        state.retry_count = state.retry_count.saturating_add(1);
        state.total_errors = state.total_errors.saturating_add(1);

        let record = DiagnosticRecord {
            message,
            code,
            retry_count: state.retry_count,
            timestamp: Utc::now(),
            raw,
        };
        state.last_error = Some(record.clone());

        match code {
            Some(code) => tracing::warn!(
                code = code,
                retry_count = record.retry_count,
                recommendations = ?Self::error_recommendations(code),
                "Realtime connection error: {}",
                record.message
            ),
            None => tracing::warn!(
                retry_count = record.retry_count,
                "Realtime connection error: {}",
                record.message
            ),
        }

        Some(record)
    }

    /// Record a success, clearing the retry counter and last error
    pub fn record_success(&self) {
        if let Ok(mut state) = self.state.write() {
            if state.retry_count > 0 {
                tracing::info!(
                    previous_failures = state.retry_count,
                    "Realtime connection recovered"
                );
            }
            state.retry_count = 0;
            state.last_error = None;
            state.last_success_at = Some(Utc::now());
        }
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.state.read().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn last_error(&self) -> Option<DiagnosticRecord> {
        self.state.read().ok().and_then(|s| s.last_error.clone())
    }

    /// Remediation hints for a close / status code
    pub fn error_recommendations(code: u16) -> &'static [&'static str] {
        match code {
            1000 => &["Normal closure; no action needed"],
            1001 => &[
                "Server is restarting or the app went to background",
                "Reconnect when the app returns to foreground",
            ],
            1002 => &["Protocol error; check client and server protocol versions"],
            1003 => &["Server rejected the message format; check payload encoding"],
            1005 => &["Closed without status; usually a proxy terminated the socket"],
            1006 => &[
                "Connection dropped without a close frame",
                "Check device connectivity (Wi-Fi / cellular handover)",
                "Verify proxies or firewalls allow long-lived WebSocket connections",
            ],
            1007 => &["Invalid payload data; check text frame encoding"],
            1008 => &[
                "Policy violation; the credential may lack access to this hub",
                "Sign in again to refresh the access token",
            ],
            1009 => &["Message too big; reduce payload size"],
            1011 => &[
                "Server internal error",
                "Retry later; report to backend team if persistent",
            ],
            1012 => &["Service restart in progress; automatic retry will reconnect"],
            1013 => &["Server overloaded; back off before retrying"],
            1015 => &["TLS handshake failed; check device date/time and certificates"],
            401 => &[
                "Access token rejected",
                "Sign in again; automatic retry is pointless with the same token",
            ],
            403 => &["User role cannot access this hub; check role assignment"],
            _ => &["Unknown close code; check server logs"],
        }
    }
}
