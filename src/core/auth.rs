//! Credential and role access for hub authentication
//!
//! The realtime client never owns the credential. It asks a [`TokenProvider`]
//! for the current token on every (re)connect and on every transport
//! negotiation, because the upstream store may rotate it at any time.

use crate::core::error::CredentialError;
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

/// Source of the current bearer credential and user role
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, if the user is signed in
    async fn access_token(&self) -> Option<String>;

    /// Role of the signed-in user (drives hub endpoint selection)
    async fn user_role(&self) -> Option<String>;
}

/// Opaque bearer credential
///
/// Only structurally validated: a bearer token issued by the API is a
/// dot-separated compact token, anything else is rejected before it is sent.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

const TOKEN_SHAPE: &str = r"^[A-Za-z0-9_\-=+/]+(\.[A-Za-z0-9_\-=+/]+)+$";

fn token_shape() -> Option<&'static Regex> {
    static SHAPE: OnceLock<Option<Regex>> = OnceLock::new();
    SHAPE.get_or_init(|| Regex::new(TOKEN_SHAPE).ok()).as_ref()
}

impl Credential {
    /// Validate a raw token string
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let token = raw.trim();
        if token.is_empty() {
            return Err(CredentialError::Missing);
        }
        if !token.contains('.') {
            return Err(CredentialError::Malformed {
                reason: "token has no segment separator".to_string(),
            });
        }
        if !token_shape().is_some_and(|shape| shape.is_match(token)) {
            return Err(CredentialError::Malformed {
                reason: "token contains empty segments or invalid characters".to_string(),
            });
        }
        Ok(Self(token.to_string()))
    }

    /// Raw token string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

// Never print the token itself
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(len={})", self.0.len())
    }
}

/// Fetch and validate the current credential from a provider
pub async fn fetch_credential(provider: &dyn TokenProvider) -> Result<Credential, CredentialError> {
    match provider.access_token().await {
        Some(raw) => Credential::parse(&raw),
        None => Err(CredentialError::Missing),
    }
}

/// Privilege level used to route a user to a hub endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubAudience {
    /// admin, super_admin and moderator users
    Privileged,
    /// Everyone else, including users without a role
    Standard,
}

impl HubAudience {
    /// Roles routed to the privileged hub
    pub const PRIVILEGED_ROLES: [&'static str; 3] = ["admin", "super_admin", "moderator"];

    /// Classify a user role
    pub fn from_role(role: Option<&str>) -> Self {
        match role {
            Some(role)
                if Self::PRIVILEGED_ROLES
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(role.trim())) =>
            {
                HubAudience::Privileged
            }
            _ => HubAudience::Standard,
        }
    }
}

/// Token provider backed by fixed values
///
/// Useful for tests, demos and hosts that push credentials into the client
/// instead of having it pull from a secure store.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    inner: Arc<RwLock<(Option<String>, Option<String>)>>,
}

impl StaticTokenProvider {
    /// Create a provider with an initial token and role
    pub fn new(token: Option<&str>, role: Option<&str>) -> Self {
        Self {
            inner: Arc::new(RwLock::new((
                token.map(str::to_string),
                role.map(str::to_string),
            ))),
        }
    }

    /// Replace the current token (simulates a refresh)
    pub fn set_token(&self, token: Option<&str>) {
        if let Ok(mut guard) = self.inner.write() {
            guard.0 = token.map(str::to_string);
        }
    }

    /// Replace the current role
    pub fn set_role(&self, role: Option<&str>) {
        if let Ok(mut guard) = self.inner.write() {
            guard.1 = role.map(str::to_string);
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Option<String> {
        self.inner.read().ok().and_then(|g| g.0.clone())
    }

    async fn user_role(&self) -> Option<String> {
        self.inner.read().ok().and_then(|g| g.1.clone())
    }
}
