//! Periodic health check and manual recovery for a UI layer
//!
//! The supervisor never fights the connection's own recovery: it only starts
//! the connection when nothing else is trying to, and it leaves a disabled
//! connection alone until the user asks for [`ConnectionSupervisor::reconnect`].

use super::connection::RealtimeConnection;
use super::diagnostics::DiagnosticRecord;
use crate::core::error::{RealtimeError, RealtimeResult};
use crate::core::events::{ConnectionEvent, ConnectionState};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

/// Default period between health checks
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Snapshot for a connection status badge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SupervisorStatus {
    pub state: ConnectionState,
    pub disabled: bool,
    pub failures: u32,
    pub last_error: Option<DiagnosticRecord>,
}

pub struct ConnectionSupervisor {
    connection: RealtimeConnection,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub fn new(connection: RealtimeConnection) -> Self {
        Self {
            connection,
            interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            task: Mutex::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawn the health-check task; calling it twice is harmless
    pub fn start(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting realtime supervisor"
        );
        *task = Some(tokio::spawn(supervise(
            self.connection.clone(),
            self.interval,
        )));
    }

    /// Abort the health-check task; the connection itself is left as is
    pub fn stop(&self) {
        if let Ok(mut task) = self.task.lock()
            && let Some(handle) = task.take()
        {
            handle.abort();
            tracing::info!("Realtime supervisor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    /// Run one health check now
    pub async fn check(&self) -> RealtimeResult<()> {
        health_check(&self.connection).await
    }

    pub fn status(&self) -> SupervisorStatus {
        SupervisorStatus {
            state: self.connection.state(),
            disabled: self.connection.is_disabled(),
            failures: self.connection.failure_count(),
            last_error: self.connection.diagnostics().last_error(),
        }
    }

    /// User-triggered recovery; clears the disabled state
    pub async fn reconnect(&self) -> RealtimeResult<()> {
        self.connection.force_reconnect().await
    }

    pub fn connection(&self) -> &RealtimeConnection {
        &self.connection
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start the connection if it is down and nobody else is recovering it
async fn health_check(connection: &RealtimeConnection) -> RealtimeResult<()> {
    if connection.is_disabled() {
        return Err(RealtimeError::Disabled {
            failures: connection.failure_count(),
        });
    }
    if connection.state() != ConnectionState::Disconnected || connection.is_connecting() {
        return Ok(());
    }
    tracing::debug!("Health check found the connection down; starting it");
    connection.start_connection().await
}

async fn supervise(connection: RealtimeConnection, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut events = BroadcastStream::new(connection.subscribe());

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match health_check(&connection).await {
                    Ok(()) => {}
                    Err(RealtimeError::Disabled { failures }) => {
                        tracing::debug!(failures = failures, "Connection disabled; health check idle");
                    }
                    Err(e) => tracing::warn!(error = %e, "Health check could not start the connection"),
                }
            }
            Some(Ok(envelope)) = events.next() => {
                if let ConnectionEvent::Disabled { failures } = envelope.event {
                    tracing::warn!(
                        failures = failures,
                        "Realtime updates are off; a manual reconnect is required"
                    );
                }
            }
        }
    }
}
