//! Core module containing the collaborator traits and shared types

pub mod auth;
pub mod cache;
pub mod error;
pub mod events;
pub mod telemetry;

pub use auth::{Credential, HubAudience, StaticTokenProvider, TokenProvider};
pub use cache::{CacheInvalidator, QueryKey};
pub use error::{ConfigError, CredentialError, RealtimeError, RealtimeResult, TransportError};
pub use events::{ConnectionEvent, ConnectionEventBus, ConnectionState, EventEnvelope};
pub use telemetry::{EventLogger, TracingEventLogger};
