//! Typed error handling for the realtime client
//!
//! Every failure the connection manager can observe is classified into one of
//! the categories below so callers (and the reconnect machinery itself) can
//! react to the *kind* of failure rather than parsing messages.
//!
//! # Error Categories
//!
//! - [`ConfigError`]: profile lookup, YAML parsing and config validation
//! - [`CredentialError`]: missing or structurally invalid bearer tokens
//! - [`TransportError`]: socket-level failures (handshake, I/O, protocol, invoke)
//! - [`RealtimeError::Unauthorized`]: the server rejected the credential (401)
//! - [`RealtimeError::Forbidden`]: the server refused the hub for this user (403)
//!
//! # Example
//!
//! ```rust,ignore
//! match connection.start_connection().await {
//!     Ok(()) => {}
//!     Err(RealtimeError::Unauthorized) => session.sign_out(),
//!     Err(e) if e.is_retryable() => tracing::debug!(error = %e, "will retry later"),
//!     Err(e) => tracing::warn!(code = e.error_code(), "realtime unavailable"),
//! }
//! ```

use thiserror::Error;

/// The main error type for the realtime client
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Credential errors
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Socket / protocol errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The hub rejected the bearer credential (HTTP 401 equivalent)
    #[error("Authentication rejected by hub: credential is invalid or expired")]
    Unauthorized,

    /// The hub refused access for this user (HTTP 403 equivalent)
    #[error("Access to hub '{endpoint}' is forbidden for this user")]
    Forbidden { endpoint: String },

    /// The connect attempt did not finish within the profile's connect timeout
    #[error("Connect attempt timed out after {timeout_ms}ms")]
    ConnectTimeout { timeout_ms: u64 },

    /// An operation needed a live socket
    #[error("No connection established")]
    NotConnected,

    /// Auto-connect has been disabled after repeated failures
    #[error("Realtime connection disabled after {failures} consecutive failures")]
    Disabled { failures: u32 },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RealtimeError {
    /// Get the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            RealtimeError::Config(e) => e.error_code(),
            RealtimeError::Credential(e) => e.error_code(),
            RealtimeError::Transport(e) => e.error_code(),
            RealtimeError::Unauthorized => "AUTH_UNAUTHORIZED",
            RealtimeError::Forbidden { .. } => "AUTH_FORBIDDEN",
            RealtimeError::ConnectTimeout { .. } => "CONNECT_TIMEOUT",
            RealtimeError::NotConnected => "NOT_CONNECTED",
            RealtimeError::Disabled { .. } => "CONNECTION_DISABLED",
            RealtimeError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether retrying the same operation later can reasonably succeed
    ///
    /// A rejected credential or a broken configuration will fail the same way
    /// on every retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            RealtimeError::Transport(e) => e.is_retryable(),
            RealtimeError::ConnectTimeout { .. } | RealtimeError::NotConnected => true,
            RealtimeError::Forbidden { .. } => true,
            RealtimeError::Config(_)
            | RealtimeError::Credential(_)
            | RealtimeError::Unauthorized
            | RealtimeError::Disabled { .. }
            | RealtimeError::Internal(_) => false,
        }
    }

    /// Close / status code associated with this error, when one exists
    ///
    /// Used when recording the failure to diagnostics.
    pub fn close_code(&self) -> Option<u16> {
        match self {
            RealtimeError::Unauthorized => Some(401),
            RealtimeError::Forbidden { .. } => Some(403),
            RealtimeError::Transport(TransportError::Closed { code, .. }) => *code,
            RealtimeError::Transport(TransportError::Handshake { status, .. }) => *status,
            _ => None,
        }
    }
}

// =============================================================================
// Config Errors
// =============================================================================

/// Errors related to configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No transport profile exists for the runtime platform
    #[error("No transport profile for platform '{platform}'")]
    UnknownPlatform { platform: String },

    /// Failed to parse configuration
    #[error("Failed to parse config{}: {message}", file.as_ref().map(|f| format!(" file '{}'", f)).unwrap_or_default())]
    ParseError {
        file: Option<String>,
        message: String,
    },

    /// Invalid value in configuration
    #[error("Invalid value '{value}' for field '{field}': {message}")]
    InvalidValue {
        field: String,
        value: String,
        message: String,
    },

    /// IO error while reading configuration
    #[error("IO error: {message}")]
    IoError { message: String },
}

impl ConfigError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ConfigError::UnknownPlatform { .. } => "CONFIG_UNKNOWN_PLATFORM",
            ConfigError::ParseError { .. } => "CONFIG_PARSE_ERROR",
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
            ConfigError::IoError { .. } => "CONFIG_IO_ERROR",
        }
    }

    pub(crate) fn invalid(field: &str, value: impl ToString, message: &str) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::ParseError {
            file: None,
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Credential Errors
// =============================================================================

/// Errors related to the bearer credential
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The credential store has no token
    #[error("No access token available")]
    Missing,

    /// The token does not have the structure of a bearer token
    #[error("Access token is malformed: {reason}")]
    Malformed { reason: String },
}

impl CredentialError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            CredentialError::Missing => "CREDENTIAL_MISSING",
            CredentialError::Malformed { .. } => "CREDENTIAL_MALFORMED",
        }
    }
}

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors raised by a transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint URL could not be built or parsed
    #[error("Invalid hub URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The upgrade handshake failed
    #[error("Handshake failed{}: {message}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Handshake {
        status: Option<u16>,
        message: String,
    },

    /// The socket is closed
    #[error("Connection closed{}{}", code.map(|c| format!(" with code {}", c)).unwrap_or_default(), reason.as_ref().map(|r| format!(": {}", r)).unwrap_or_default())]
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },

    /// Read/write failure on an open socket
    #[error("Socket I/O error: {0}")]
    Io(String),

    /// A frame could not be encoded or decoded
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server answered an invocation with an error
    #[error("Invocation of '{method}' failed: {message}")]
    Invocation { method: String, message: String },

    /// The server did not answer an invocation in time
    #[error("Invocation of '{method}' timed out")]
    InvocationTimeout { method: String },
}

impl TransportError {
    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            TransportError::InvalidUrl { .. } => "TRANSPORT_INVALID_URL",
            TransportError::Handshake { .. } => "TRANSPORT_HANDSHAKE",
            TransportError::Closed { .. } => "TRANSPORT_CLOSED",
            TransportError::Io(_) => "TRANSPORT_IO",
            TransportError::Protocol(_) => "TRANSPORT_PROTOCOL",
            TransportError::Invocation { .. } => "TRANSPORT_INVOCATION",
            TransportError::InvocationTimeout { .. } => "TRANSPORT_INVOCATION_TIMEOUT",
        }
    }

    /// Whether the failure is transient
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::InvalidUrl { .. } | TransportError::Invocation { .. }
        )
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Protocol(err.to_string())
    }
}

// =============================================================================
// Result type alias
// =============================================================================

/// A specialized Result type for realtime operations
pub type RealtimeResult<T> = Result<T, RealtimeError>;

// =============================================================================
// Tests
// =============================================================================
