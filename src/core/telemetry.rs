//! Fire-and-forget telemetry seam

use serde_json::Value;

/// Application event recorder (analytics / crash breadcrumbs)
///
/// The signature is infallible on purpose: telemetry must never surface an
/// error into connection handling.
pub trait EventLogger: Send + Sync {
    /// Record a named event with optional structured data
    fn record(&self, name: &str, data: Option<Value>);
}

/// Default logger that forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventLogger;

impl EventLogger for TracingEventLogger {
    fn record(&self, name: &str, data: Option<Value>) {
        match data {
            Some(data) => tracing::info!(event = name, data = %data, "realtime event"),
            None => tracing::info!(event = name, "realtime event"),
        }
    }
}
