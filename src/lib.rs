//! # CaseHub Realtime
//!
//! Resilient client for the CaseHub realtime hub: one authenticated socket per
//! process, kept alive across mobile network transitions, with inbound events
//! turned into cache invalidations.
//!
//! ## Features
//!
//! - **Per-Platform Tuning**: Android and iOS transport profiles (timeouts, retry schedules)
//! - **Automatic Recovery**: Retry schedule with capped backoff, plus extra attempts after abnormal closures
//! - **Fail-Safe Start**: Missing credentials skip the connection; three failed starts disable auto-connect
//! - **Declarative Routing**: Event name → cache key templates, loadable from YAML
//! - **Group Replay**: Joined groups are rejoined on every fresh socket
//! - **Diagnostics**: Error history with close-code remediation hints
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use casehub::prelude::*;
//!
//! let config = RealtimeConfig::from_yaml_file("config/realtime.yaml")?;
//! let cache = InMemoryQueryCache::new();
//!
//! let connection = RealtimeConnection::builder(config, "android")
//!     .with_token_provider(StaticTokenProvider::new(Some(&token), Some("admin")))
//!     .with_cache(cache.clone())
//!     .build()?;
//!
//! connection.start_connection().await?;
//! connection.join_group("case-42").await;
//!
//! let supervisor = ConnectionSupervisor::new(connection.clone());
//! supervisor.start();
//! ```

pub mod config;
pub mod core;
pub mod realtime;
pub mod storage;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Core Traits ===
    pub use crate::core::{
        auth::{Credential, HubAudience, StaticTokenProvider, TokenProvider},
        cache::{CacheInvalidator, QueryKey},
        error::{ConfigError, CredentialError, RealtimeError, RealtimeResult, TransportError},
        events::{ConnectionEvent, ConnectionEventBus, ConnectionState, EventEnvelope},
        telemetry::{EventLogger, TracingEventLogger},
    };

    // === Realtime ===
    pub use crate::realtime::{
        ConnectionDiagnostics, ConnectionSupervisor, ConnectionTestResult, EventRouter,
        KeyTemplate, RealtimeConnection, RejoinReport, RouteTable, SupervisorStatus, Transport,
        WebSocketTransport,
    };

    // === Storage ===
    pub use crate::storage::InMemoryQueryCache;

    // === Config ===
    pub use crate::config::{Platform, RealtimeConfig, TransportKind, TransportProfile};

    // === External dependencies ===
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
}
