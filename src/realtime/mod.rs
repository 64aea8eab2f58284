//! Realtime hub connection
//!
//! - [`connection`]: the connection state machine and its recovery loops
//! - [`transport`] / [`websocket`]: the socket seam and its tokio-tungstenite implementation
//! - [`protocol`]: JSON frames exchanged with the hub
//! - [`router`]: declarative event → cache-key dispatch
//! - [`groups`]: best-effort group membership
//! - [`diagnostics`]: error history and close-code hints
//! - [`supervisor`]: periodic health check for UI layers

pub mod connection;
pub mod diagnostics;
pub mod groups;
pub mod protocol;
pub mod router;
pub mod supervisor;
pub mod transport;
pub mod websocket;

pub use connection::{
    ConnectionTestResult, MAX_CONNECT_FAILURES, RealtimeConnection, RealtimeConnectionBuilder,
};
pub use diagnostics::{ConnectionDiagnostics, DiagnosticRecord, DiagnosticsSnapshot};
pub use groups::{GroupMembership, JOIN_CANDIDATES, LEAVE_CANDIDATES, RejoinReport};
pub use protocol::{ClientMessage, ServerMessage};
pub use router::{EventRouter, KeySegment, KeyTemplate, RouteTable, RouterStats};
pub use supervisor::{ConnectionSupervisor, DEFAULT_HEALTH_CHECK_INTERVAL, SupervisorStatus};
pub use transport::{
    ABNORMAL_CLOSURE, ConnectRequest, InboundFrame, Invoker, NORMAL_CLOSURE, TokenFactory,
    Transport, TransportLink,
};
pub use websocket::WebSocketTransport;
