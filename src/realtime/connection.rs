//! Persistent hub connection with automatic recovery
//!
//! A `RealtimeConnection` owns at most one socket at a time. It is cheap to
//! clone; every clone drives the same underlying state.
//!
//! ```text
//! Disconnected ──start──▶ Connecting ──ok──▶ Connected
//!      ▲                      │                  │ unexpected close
//!      │◀──────── failure ────┘                  ▼
//!      │◀──────── retry budget exhausted ── Reconnecting ──ok──▶ Connected
//!      │
//!      └──────── stop (from any state)
//! ```
//!
//! Auto-connect is switched off after [`MAX_CONNECT_FAILURES`] consecutive
//! failed starts. The disabled flag is orthogonal to [`ConnectionState`];
//! only [`RealtimeConnection::force_reconnect`] clears it.

use super::diagnostics::ConnectionDiagnostics;
use super::groups::{GroupMembership, RejoinReport};
use super::router::EventRouter;
use super::transport::{
    ABNORMAL_CLOSURE, ConnectRequest, InboundFrame, Invoker, NORMAL_CLOSURE, TokenFactory,
    Transport, TransportLink,
};
use super::websocket::WebSocketTransport;
use crate::config::{RealtimeConfig, TransportProfile};
use crate::core::auth::{HubAudience, TokenProvider, fetch_credential};
use crate::core::cache::CacheInvalidator;
use crate::core::error::{ConfigError, RealtimeError, RealtimeResult};
use crate::core::events::{ConnectionEvent, ConnectionEventBus, ConnectionState, EventEnvelope};
use crate::core::telemetry::{EventLogger, TracingEventLogger};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use url::Url;

/// Consecutive failed starts after which auto-connect is disabled
pub const MAX_CONNECT_FAILURES: u32 = 3;

const NO_CONNECTION: &str = "No connection established";

/// Result of [`RealtimeConnection::test_connection`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
}

/// Builder for [`RealtimeConnection`]
///
/// # Example
///
/// ```ignore
/// let connection = RealtimeConnection::builder(config, "android")
///     .with_token_provider(tokens)
///     .with_cache(cache)
///     .build()?;
/// connection.start_connection().await?;
/// ```
pub struct RealtimeConnectionBuilder {
    config: RealtimeConfig,
    platform_id: String,
    tokens: Option<Arc<dyn TokenProvider>>,
    cache: Option<Arc<dyn CacheInvalidator>>,
    transport: Option<Arc<dyn Transport>>,
    logger: Option<Arc<dyn EventLogger>>,
    diagnostics: Option<Arc<ConnectionDiagnostics>>,
    events: Option<ConnectionEventBus>,
}

impl RealtimeConnectionBuilder {
    /// Set the credential source (required)
    pub fn with_token_provider(mut self, tokens: impl TokenProvider + 'static) -> Self {
        self.tokens = Some(Arc::new(tokens));
        self
    }

    /// Set the cache that inbound events invalidate (required)
    pub fn with_cache(mut self, cache: impl CacheInvalidator + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Replace the WebSocket transport
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Replace the `tracing`-backed telemetry logger
    pub fn with_logger(mut self, logger: impl EventLogger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Share an existing diagnostics recorder
    pub fn with_diagnostics(mut self, diagnostics: Arc<ConnectionDiagnostics>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Publish lifecycle events on an existing bus
    pub fn with_event_bus(mut self, events: ConnectionEventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and resolve the platform profile
    pub fn build(self) -> RealtimeResult<RealtimeConnection> {
        self.config.validate()?;
        let profile = self.config.profile_for(&self.platform_id)?;
        let tokens = self.tokens.ok_or_else(|| {
            ConfigError::invalid("token_provider", "none", "a token provider is required")
        })?;
        let cache = self
            .cache
            .ok_or_else(|| ConfigError::invalid("cache", "none", "a cache is required"))?;

        let router = EventRouter::new(self.config.route_table(), cache);

        tracing::debug!(
            platform = %profile.platform,
            routes = router.event_names().len(),
            "Realtime connection configured"
        );

        Ok(RealtimeConnection {
            inner: Arc::new(Inner {
                config: self.config,
                profile,
                transport: self
                    .transport
                    .unwrap_or_else(|| Arc::new(WebSocketTransport::new())),
                tokens,
                logger: self.logger.unwrap_or_else(|| Arc::new(TracingEventLogger)),
                diagnostics: self.diagnostics.unwrap_or_default(),
                router,
                groups: GroupMembership::new(),
                events: self.events.unwrap_or_default(),
                state: RwLock::new(ConnectionState::Disconnected),
                connecting: AtomicU64::new(0),
                disabled: AtomicBool::new(false),
                failure_count: AtomicU32::new(0),
                retry_count: AtomicU32::new(0),
                epoch: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                link: Mutex::new(None),
                tasks: Mutex::new(BackgroundTasks::default()),
            }),
        })
    }
}

/// Handle to the single hub connection
#[derive(Clone)]
pub struct RealtimeConnection {
    inner: Arc<Inner>,
}

impl fmt::Debug for RealtimeConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeConnection")
            .field("platform", &self.inner.profile.platform)
            .field("state", &self.inner.state())
            .field("disabled", &self.is_disabled())
            .field("failures", &self.failure_count())
            .finish()
    }
}

impl RealtimeConnection {
    /// Start building a connection for a platform identifier ("android", "ios")
    pub fn builder(config: RealtimeConfig, platform_id: &str) -> RealtimeConnectionBuilder {
        RealtimeConnectionBuilder {
            config,
            platform_id: platform_id.to_string(),
            tokens: None,
            cache: None,
            transport: None,
            logger: None,
            diagnostics: None,
            events: None,
        }
    }

    /// Open the socket
    ///
    /// A no-op when disabled, already connected, or while another attempt is
    /// in flight. A missing or malformed credential skips the attempt
    /// without an error. Connect failures are counted and returned.
    pub async fn start_connection(&self) -> RealtimeResult<()> {
        let inner = &self.inner;
        if inner.disabled.load(Ordering::SeqCst) {
            tracing::debug!(
                platform = %inner.profile.platform,
                failures = inner.failure_count.load(Ordering::SeqCst),
                "Auto-connect disabled; start ignored"
            );
            return Ok(());
        }
        if inner.is_connected() {
            tracing::debug!("Already connected; start ignored");
            return Ok(());
        }
        let epoch = inner.epoch.load(Ordering::SeqCst);
        let Some(_guard) = ConnectingGuard::acquire(&inner.connecting, epoch) else {
            tracing::debug!("Connect attempt already in flight; start ignored");
            return Ok(());
        };

        inner.start_attempt(epoch).await
    }

    /// Close the socket and cancel all background recovery
    ///
    /// The handle is always cleared, even when the close handshake fails.
    pub async fn stop_connection(&self) {
        let inner = &self.inner;
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut tasks) = inner.tasks.lock() {
            tasks.abort_all();
        }

        let link = inner.link.lock().ok().and_then(|mut slot| slot.take());
        if let Some(link) = link {
            match link.invoker.close().await {
                Ok(()) => tracing::info!(endpoint = %link.endpoint, "Realtime connection stopped"),
                Err(e) => tracing::warn!(error = %e, "Error while closing realtime connection"),
            }
            inner.logger.record("realtime_stopped", None);
        }
        inner.set_state(ConnectionState::Disconnected);
    }

    /// Stop, wait for the settle delay, clear the failure counters and start again
    ///
    /// This is the only way out of the disabled state.
    pub async fn force_reconnect(&self) -> RealtimeResult<()> {
        let inner = &self.inner;
        tracing::info!(platform = %inner.profile.platform, "Forcing realtime reconnection");
        self.stop_connection().await;
        tokio::time::sleep(inner.profile.settle_delay()).await;

        inner.failure_count.store(0, Ordering::SeqCst);
        inner.retry_count.store(0, Ordering::SeqCst);
        inner.disabled.store(false, Ordering::SeqCst);
        inner.logger.record("realtime_force_reconnect", None);

        self.start_connection().await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Report whether a live socket exists; never fails
    pub fn test_connection(&self) -> ConnectionTestResult {
        let link = self.inner.current_link();
        let state = self.inner.state();
        match link {
            Some(link) if state == ConnectionState::Connected => ConnectionTestResult {
                success: true,
                error: None,
                connection_id: link.connection_id,
            },
            Some(link) => ConnectionTestResult {
                success: false,
                error: Some(format!("Connection is {}", state)),
                connection_id: link.connection_id,
            },
            None => ConnectionTestResult {
                success: false,
                error: Some(NO_CONNECTION.to_string()),
                connection_id: None,
            },
        }
    }

    /// Join a hub group; `false` when not connected or the hub refuses
    pub async fn join_group(&self, name: &str) -> bool {
        let Some(invoker) = self.inner.live_invoker() else {
            tracing::debug!(group = name, "Not connected; join skipped");
            return false;
        };
        self.inner.groups.join(invoker.as_ref(), name).await
    }

    /// Leave a hub group; `false` when not connected or the hub refuses
    pub async fn leave_group(&self, name: &str) -> bool {
        let Some(invoker) = self.inner.live_invoker() else {
            tracing::debug!(group = name, "Not connected; leave skipped");
            return false;
        };
        self.inner.groups.leave(invoker.as_ref(), name).await
    }

    /// Replay every remembered group on the current socket
    pub async fn rejoin_all_groups(&self) -> RejoinReport {
        match self.inner.live_invoker() {
            Some(invoker) => self.inner.replay_groups(invoker.as_ref()).await,
            None => RejoinReport::default(),
        }
    }

    /// Invoke an arbitrary hub method on the current socket
    pub async fn invoke(&self, method: &str, arguments: Vec<Value>) -> RealtimeResult<Value> {
        let invoker = self.inner.live_invoker().ok_or(RealtimeError::NotConnected)?;
        Ok(invoker.invoke(method, arguments).await?)
    }

    pub fn joined_groups(&self) -> Vec<String> {
        self.inner.groups.joined()
    }

    /// Server-assigned ID of the current socket
    pub fn connection_id(&self) -> Option<String> {
        self.inner.current_link().and_then(|link| link.connection_id)
    }

    /// Hub URL of the current socket
    pub fn endpoint(&self) -> Option<Url> {
        self.inner.current_link().map(|link| link.endpoint)
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.failure_count.load(Ordering::SeqCst)
    }

    /// Attempt number of the running automatic reconnection (0 when idle)
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::SeqCst)
    }

    pub fn is_disabled(&self) -> bool {
        self.inner.disabled.load(Ordering::SeqCst)
    }

    /// Whether a start or retry is currently opening a socket
    pub fn is_connecting(&self) -> bool {
        self.inner.is_connecting()
    }

    pub fn profile(&self) -> &TransportProfile {
        &self.inner.profile
    }

    pub fn diagnostics(&self) -> Arc<ConnectionDiagnostics> {
        self.inner.diagnostics.clone()
    }

    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.inner.events.subscribe()
    }
}

#[derive(Clone)]
struct ActiveLink {
    connection_id: Option<String>,
    endpoint: Url,
    invoker: Arc<dyn Invoker>,
    generation: u64,
}

#[derive(Default)]
struct BackgroundTasks {
    receive: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    supplemental: Option<JoinHandle<()>>,
}

impl BackgroundTasks {
    fn abort_all(&mut self) {
        for handle in [
            self.receive.take(),
            self.reconnect.take(),
            self.supplemental.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }

    fn reconnecting(&self) -> bool {
        self.reconnect.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Claims the connecting slot for one attempt of an epoch
///
/// The slot holds `epoch + 1` of its owner (0 when free). An attempt from a
/// newer epoch takes the slot over from one a stop has superseded; the
/// superseded owner then leaves the slot alone when it finishes.
struct ConnectingGuard<'a> {
    slot: &'a AtomicU64,
    token: u64,
}

impl<'a> ConnectingGuard<'a> {
    fn acquire(slot: &'a AtomicU64, epoch: u64) -> Option<Self> {
        let token = epoch + 1;
        let mut current = slot.load(Ordering::SeqCst);
        loop {
            if current != 0 && current >= token {
                return None;
            }
            match slot.compare_exchange(current, token, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return Some(ConnectingGuard { slot, token }),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .slot
            .compare_exchange(self.token, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

enum RetryOutcome {
    Done,
    Retry,
}

struct Inner {
    config: RealtimeConfig,
    profile: TransportProfile,
    transport: Arc<dyn Transport>,
    tokens: Arc<dyn TokenProvider>,
    logger: Arc<dyn EventLogger>,
    diagnostics: Arc<ConnectionDiagnostics>,
    router: EventRouter,
    groups: GroupMembership,
    events: ConnectionEventBus,
    state: RwLock<ConnectionState>,
    /// Owner of the connecting slot, see [`ConnectingGuard`]
    connecting: AtomicU64,
    disabled: AtomicBool,
    failure_count: AtomicU32,
    retry_count: AtomicU32,
    /// Bumped by every stop; attempts from an older epoch are discarded
    epoch: AtomicU64,
    /// Bumped for every installed socket
    generation: AtomicU64,
    link: Mutex<Option<ActiveLink>>,
    tasks: Mutex<BackgroundTasks>,
}

impl Inner {
    fn state(&self) -> ConnectionState {
        self.state.read().map(|s| *s).unwrap_or_default()
    }

    fn set_state(&self, to: ConnectionState) {
        let from = {
            let Ok(mut state) = self.state.write() else {
                return;
            };
            let from = *state;
            if from == to {
                return;
            }
            *state = to;
            from
        };
        tracing::info!(
            platform = %self.profile.platform,
            from = %from,
            to = %to,
            "Realtime connection state changed"
        );
        self.events.publish(ConnectionEvent::StateChanged { from, to });
    }

    fn current_link(&self) -> Option<ActiveLink> {
        self.link.lock().ok().and_then(|slot| slot.clone())
    }

    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected && self.current_link().is_some()
    }

    fn live_invoker(&self) -> Option<Arc<dyn Invoker>> {
        if self.state() != ConnectionState::Connected {
            return None;
        }
        self.current_link().map(|link| link.invoker)
    }

    /// Whether an attempt of the current epoch is opening a socket
    fn is_connecting(&self) -> bool {
        self.connecting.load(Ordering::SeqCst) == self.epoch.load(Ordering::SeqCst) + 1
    }

    fn superseded(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    fn token_factory(&self) -> TokenFactory {
        let tokens = self.tokens.clone();
        Arc::new(move || {
            let tokens = tokens.clone();
            async move { fetch_credential(tokens.as_ref()).await }.boxed()
        })
    }

    /// Check the credential and pick the hub for the user's role
    async fn resolve_endpoint(&self) -> RealtimeResult<Url> {
        fetch_credential(self.tokens.as_ref()).await?;
        let role = self.tokens.user_role().await;
        let audience = HubAudience::from_role(role.as_deref());
        Ok(self.config.hub_url(audience)?)
    }

    /// Open one socket; `Ok(None)` when the connection was stopped meanwhile
    async fn open_link(
        &self,
        url: &Url,
        epoch: u64,
        stagger: bool,
    ) -> RealtimeResult<Option<TransportLink>> {
        if stagger {
            tokio::time::sleep(self.profile.startup_delay()).await;
            if self.superseded(epoch) {
                return Ok(None);
            }
        }

        let request = ConnectRequest {
            url: url.clone(),
            profile: self.profile.clone(),
            token_factory: self.token_factory(),
        };
        let link = tokio::time::timeout(
            self.profile.connect_timeout(),
            self.transport.connect(request),
        )
        .await
        .map_err(|_| RealtimeError::ConnectTimeout {
            timeout_ms: self.profile.connect_timeout_ms,
        })??;

        if self.superseded(epoch) {
            tracing::debug!(endpoint = %url, "Connection stopped while connecting; discarding socket");
            if let Err(e) = link.invoker.close().await {
                tracing::debug!(error = %e, "Failed to close discarded socket");
            }
            return Ok(None);
        }
        Ok(Some(link))
    }

    async fn start_attempt(self: &Arc<Self>, epoch: u64) -> RealtimeResult<()> {
        let url = match self.resolve_endpoint().await {
            Ok(url) => url,
            Err(RealtimeError::Credential(e)) => {
                tracing::warn!(error = %e, "Realtime connection skipped: no usable credential");
                self.logger
                    .record("realtime_skipped", Some(json!({ "reason": e.error_code() })));
                return Ok(());
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot resolve hub endpoint");
                return Err(e);
            }
        };
        if self.superseded(epoch) {
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        tracing::info!(
            platform = %self.profile.platform,
            endpoint = %url,
            "Starting realtime connection"
        );

        match self.open_link(&url, epoch, true).await {
            Ok(Some(link)) => {
                let invoker = self.install(link, url);
                if !self.groups.is_empty() {
                    self.replay_groups(invoker.as_ref()).await;
                }
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(_) if self.superseded(epoch) => Ok(()),
            Err(e) => Err(self.record_start_failure(e, &url)),
        }
    }

    fn record_start_failure(&self, error: RealtimeError, url: &Url) -> RealtimeError {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.diagnostics.record_error(
            error.to_string(),
            error.close_code(),
            Some(json!({ "error_code": error.error_code(), "failures": failures })),
        );

        let reconnecting = self
            .tasks
            .lock()
            .map(|tasks| tasks.reconnecting())
            .unwrap_or(false);
        self.set_state(if reconnecting {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Disconnected
        });

        match &error {
            RealtimeError::Unauthorized => tracing::error!(
                endpoint = %url,
                failures = failures,
                "Realtime credential rejected"
            ),
            RealtimeError::Forbidden { .. } => tracing::warn!(
                endpoint = %url,
                failures = failures,
                "Realtime hub refused this user"
            ),
            other => tracing::warn!(
                endpoint = %url,
                failures = failures,
                error = %other,
                "Realtime connection attempt failed"
            ),
        }
        self.logger.record(
            "realtime_connect_failed",
            Some(json!({
                "platform": self.profile.platform.as_str(),
                "error_code": error.error_code(),
                "failures": failures,
            })),
        );

        if failures >= MAX_CONNECT_FAILURES && !self.disabled.swap(true, Ordering::SeqCst) {
            tracing::error!(
                platform = %self.profile.platform,
                failures = failures,
                "Realtime auto-connect disabled until a forced reconnect"
            );
            self.events.publish(ConnectionEvent::Disabled { failures });
            self.logger
                .record("realtime_disabled", Some(json!({ "failures": failures })));
        }
        error
    }

    /// Make a freshly opened socket the active one
    fn install(self: &Arc<Self>, link: TransportLink, endpoint: Url) -> Arc<dyn Invoker> {
        let TransportLink {
            connection_id,
            invoker,
            inbound,
        } = link;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let epoch = self.epoch.load(Ordering::SeqCst);

        self.groups.reset_resolution();
        if let Ok(mut slot) = self.link.lock() {
            *slot = Some(ActiveLink {
                connection_id: connection_id.clone(),
                endpoint: endpoint.clone(),
                invoker: invoker.clone(),
                generation,
            });
        }
        self.failure_count.store(0, Ordering::SeqCst);
        self.retry_count.store(0, Ordering::SeqCst);
        self.diagnostics.record_success();
        self.set_state(ConnectionState::Connected);

        tracing::info!(
            platform = %self.profile.platform,
            endpoint = %endpoint,
            connection_id = ?connection_id,
            "Realtime connection established"
        );
        self.logger.record(
            "realtime_connected",
            Some(json!({
                "platform": self.profile.platform.as_str(),
                "endpoint": endpoint.path(),
            })),
        );

        // Spawned after the state flip so an immediate close is seen as Connected → Reconnecting
        let receive = tokio::spawn(receive_loop(self.clone(), inbound, epoch, generation));
        if let Ok(mut tasks) = self.tasks.lock()
            && let Some(previous) = tasks.receive.replace(receive)
        {
            previous.abort();
        }
        invoker
    }

    async fn replay_groups(&self, invoker: &dyn Invoker) -> RejoinReport {
        let report = self.groups.rejoin_all(invoker).await;
        self.events.publish(ConnectionEvent::GroupsRejoined {
            rejoined: report.rejoined.len(),
            dropped: report.dropped.len(),
        });
        report
    }

    /// React to the active socket going away without a stop
    fn handle_close(self: &Arc<Self>, epoch: u64, generation: u64, frame: InboundFrame) {
        let abnormal = frame.is_abnormal_closure();
        let InboundFrame::Closed { code, reason } = frame else {
            return;
        };
        if self.superseded(epoch) {
            return;
        }
        let current = match self.link.lock() {
            Ok(mut slot) if slot.as_ref().is_some_and(|l| l.generation == generation) => {
                slot.take();
                true
            }
            _ => false,
        };
        if !current {
            return;
        }

        let message = reason.as_deref().unwrap_or("no reason given");
        self.diagnostics.record_error(
            format!("Connection closed: {}", message),
            code,
            Some(json!({ "code": code, "reason": reason })),
        );
        if abnormal {
            tracing::warn!(
                platform = %self.profile.platform,
                "Realtime socket dropped without a close frame; scheduling recovery"
            );
        } else if code == Some(NORMAL_CLOSURE) {
            tracing::info!(reason = message, "Realtime socket closed by server");
        } else {
            tracing::warn!(code = ?code, reason = message, "Realtime socket closed by server");
        }
        self.events.publish(ConnectionEvent::Closed {
            code,
            reason: reason.clone(),
        });
        self.logger
            .record("realtime_closed", Some(json!({ "code": code, "reason": reason })));

        if self.disabled.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Disconnected);
            return;
        }

        self.set_state(ConnectionState::Reconnecting);
        let reconnect = tokio::spawn(reconnect_loop(self.clone(), epoch));
        let supplemental =
            abnormal.then(|| tokio::spawn(abnormal_closure_recovery(self.clone(), epoch)));

        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(previous) = tasks.reconnect.replace(reconnect) {
                previous.abort();
            }
            if let Some(handle) = supplemental
                && let Some(previous) = tasks.supplemental.replace(handle)
            {
                previous.abort();
            }
        }
    }

    /// One attempt of the automatic reconnection loop
    async fn retry_once(self: &Arc<Self>, epoch: u64, attempt: u32) -> RetryOutcome {
        let url = match self.resolve_endpoint().await {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "Stopping automatic reconnection");
                self.diagnostics.record_error(e.to_string(), e.close_code(), None);
                self.set_state(ConnectionState::Disconnected);
                return RetryOutcome::Done;
            }
        };

        match self.open_link(&url, epoch, false).await {
            Ok(Some(link)) => {
                let connection_id = link.connection_id.clone();
                let invoker = self.install(link, url);
                self.replay_groups(invoker.as_ref()).await;
                self.events
                    .publish(ConnectionEvent::Reconnected { connection_id });
                self.logger
                    .record("realtime_reconnected", Some(json!({ "attempt": attempt })));
                RetryOutcome::Done
            }
            Ok(None) => RetryOutcome::Done,
            Err(_) if self.superseded(epoch) => RetryOutcome::Done,
            Err(RealtimeError::Unauthorized) => {
                tracing::error!(attempt = attempt, "Credential rejected; automatic reconnection aborted");
                self.diagnostics.record_error(
                    RealtimeError::Unauthorized.to_string(),
                    Some(401),
                    Some(json!({ "attempt": attempt })),
                );
                self.set_state(ConnectionState::Disconnected);
                RetryOutcome::Done
            }
            Err(e) => {
                tracing::debug!(attempt = attempt, error = %e, "Reconnect attempt failed");
                self.diagnostics.record_error(
                    e.to_string(),
                    e.close_code(),
                    Some(json!({ "attempt": attempt })),
                );
                RetryOutcome::Retry
            }
        }
    }
}

async fn receive_loop(
    inner: Arc<Inner>,
    mut inbound: mpsc::UnboundedReceiver<InboundFrame>,
    epoch: u64,
    generation: u64,
) {
    while let Some(frame) = inbound.recv().await {
        match frame {
            InboundFrame::Event { target, payload } => {
                inner.router.dispatch(&target, &payload);
            }
            closed @ InboundFrame::Closed { .. } => {
                inner.handle_close(epoch, generation, closed);
                return;
            }
        }
    }
    // Sender dropped without reporting a close
    inner.handle_close(
        epoch,
        generation,
        InboundFrame::Closed {
            code: Some(ABNORMAL_CLOSURE),
            reason: Some("transport ended".to_string()),
        },
    );
}

/// Built-in retry schedule followed after an unexpected close
async fn reconnect_loop(inner: Arc<Inner>, epoch: u64) {
    let policy = inner.profile.reconnect_policy();
    let mut attempt = 0;

    while let Some(delay) = policy.next_delay(attempt) {
        attempt += 1;
        tokio::time::sleep(delay).await;

        if inner.superseded(epoch) || inner.state() == ConnectionState::Connected {
            return;
        }
        if inner.disabled.load(Ordering::SeqCst) {
            tracing::debug!("Auto-connect disabled; automatic reconnection stopped");
            inner.set_state(ConnectionState::Disconnected);
            return;
        }
        inner.retry_count.store(attempt, Ordering::SeqCst);

        let Some(_guard) = ConnectingGuard::acquire(&inner.connecting, epoch) else {
            tracing::debug!(attempt = attempt, "Another attempt is in flight; retry slot skipped");
            continue;
        };
        tracing::info!(
            platform = %inner.profile.platform,
            attempt = attempt,
            max_attempts = policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "Reconnecting"
        );
        if let RetryOutcome::Done = inner.retry_once(epoch, attempt).await {
            return;
        }
    }

    if !inner.superseded(epoch) && inner.state() == ConnectionState::Reconnecting {
        tracing::warn!(
            platform = %inner.profile.platform,
            attempts = attempt,
            "Automatic reconnection exhausted; waiting for a forced reconnect"
        );
        inner.retry_count.store(0, Ordering::SeqCst);
        inner.set_state(ConnectionState::Disconnected);
        inner
            .logger
            .record("realtime_retry_exhausted", Some(json!({ "attempts": attempt })));
    }
}

/// Extra start attempts after an abnormal closure, layered on the retry loop
async fn abnormal_closure_recovery(inner: Arc<Inner>, epoch: u64) {
    let delays: Vec<Duration> = inner.profile.abnormal_closure_delays().collect();
    for (index, delay) in delays.into_iter().enumerate() {
        tokio::time::sleep(delay).await;
        if inner.superseded(epoch) || inner.is_connected() {
            return;
        }
        if inner.state() != ConnectionState::Disconnected
            || inner.is_connecting()
        {
            continue;
        }

        tracing::info!(attempt = index + 1, "Supplemental reconnect after abnormal closure");
        let connection = RealtimeConnection {
            inner: inner.clone(),
        };
        if let Err(e) = connection.start_connection().await {
            tracing::debug!(error = %e, "Supplemental reconnect failed");
        }
        if inner.is_connected() {
            return;
        }
    }
}
