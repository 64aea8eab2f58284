//! Transport seam between the connection state machine and the socket
//!
//! The state machine only needs three things from a socket: open it with a
//! fresh credential, invoke hub methods on it, and learn about pushed events
//! and closure. Keeping that behind a trait lets the reconnect logic run
//! against an in-process double in tests.
//!
//! ```text
//! RealtimeConnection ──connect(ConnectRequest)──▶ Transport
//!        ▲                                            │
//!        │                 TransportLink ◀────────────┘
//!        │                   ├─ invoker  (invoke / close)
//!        └── receive loop ◀──┴─ inbound  (Event / Closed)
//! ```

use crate::config::TransportProfile;
use crate::core::auth::Credential;
use crate::core::error::{CredentialError, RealtimeError, TransportError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Close code of a socket that dropped without a close handshake
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code of a clean, requested closure
pub const NORMAL_CLOSURE: u16 = 1000;

/// Callback that yields the freshest credential
///
/// Invoked by the transport for every negotiation, never cached.
pub type TokenFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Credential, CredentialError>> + Send + Sync>;

/// Everything a transport needs to open one socket
#[derive(Clone)]
pub struct ConnectRequest {
    /// Hub socket URL (already routed for the user's role)
    pub url: Url,
    /// Timeouts and keep-alive tuning
    pub profile: TransportProfile,
    /// Credential source
    pub token_factory: TokenFactory,
}

impl ConnectRequest {
    /// Ask the factory for the current credential
    pub async fn credential(&self) -> Result<Credential, CredentialError> {
        (self.token_factory)().await
    }
}

/// Frames delivered from the socket to the connection
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A pushed hub event
    Event { target: String, payload: Value },
    /// The socket is gone; no more frames will follow
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

impl InboundFrame {
    pub fn is_abnormal_closure(&self) -> bool {
        matches!(
            self,
            InboundFrame::Closed {
                code: Some(ABNORMAL_CLOSURE),
                ..
            }
        )
    }
}

/// Remote procedure invocation over an open socket
#[async_trait]
pub trait Invoker: Send + Sync {
    /// Invoke a hub method and wait for its completion
    async fn invoke(&self, method: &str, arguments: Vec<Value>) -> Result<Value, TransportError>;

    /// Close the socket gracefully
    async fn close(&self) -> Result<(), TransportError>;
}

/// An open socket
pub struct TransportLink {
    /// Server-assigned connection ID, if the protocol provides one
    pub connection_id: Option<String>,
    /// Outbound side
    pub invoker: Arc<dyn Invoker>,
    /// Inbound side; yields `Closed` exactly once when the socket ends
    pub inbound: mpsc::UnboundedReceiver<InboundFrame>,
}

/// Opens sockets to the hub
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open one authenticated socket
    ///
    /// Must map credential rejection to [`RealtimeError::Unauthorized`] and
    /// hub refusal to [`RealtimeError::Forbidden`].
    async fn connect(&self, request: ConnectRequest) -> Result<TransportLink, RealtimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_request_credential_uses_factory_each_time() {
        let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let c = counter.clone();
        let factory: TokenFactory = Arc::new(move || {
            let n = c.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Credential::parse(&format!("header.payload{}.sig", n)) }.boxed()
        });

        let request = ConnectRequest {
            url: Url::parse("ws://localhost/hubs/cases").unwrap(),
            profile: TransportProfile::android(),
            token_factory: factory,
        };

        let first = request.credential().await.unwrap();
        let second = request.credential().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_abnormal_closure_detection() {
        let abnormal = InboundFrame::Closed {
            code: Some(ABNORMAL_CLOSURE),
            reason: None,
        };
        let normal = InboundFrame::Closed {
            code: Some(NORMAL_CLOSURE),
            reason: None,
        };
        assert!(abnormal.is_abnormal_closure());
        assert!(!normal.is_abnormal_closure());
    }
}
