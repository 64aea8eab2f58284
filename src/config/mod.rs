//! Configuration loading and management

pub mod profile;

pub use profile::{Platform, ReconnectPolicy, TransportKind, TransportProfile};

use crate::core::auth::HubAudience;
use crate::core::error::ConfigError;
use crate::realtime::router::RouteTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

fn default_hub_path() -> String {
    "/hubs/cases".to_string()
}

fn default_privileged_hub_path() -> String {
    "/hubs/admin".to_string()
}

/// Complete configuration for the realtime client
///
/// ```yaml
/// base_url: https://api.example.org
/// default_hub_path: /hubs/cases
/// privileged_hub_path: /hubs/admin
/// profiles:
///   android:
///     connect_timeout_ms: 20000
///     ...
/// routes:
///   caseUpdated:
///     - [cases]
///     - [case, "{id}"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// API base URL (`http(s)` or `ws(s)`)
    pub base_url: String,

    /// Hub path for regular users
    #[serde(default = "default_hub_path")]
    pub default_hub_path: String,

    /// Hub path for admin, super_admin and moderator users
    #[serde(default = "default_privileged_hub_path")]
    pub privileged_hub_path: String,

    /// Per-platform overrides of the built-in transport profiles
    #[serde(default)]
    pub profiles: BTreeMap<Platform, TransportProfile>,

    /// Override of the built-in event route table
    #[serde(default)]
    pub routes: Option<RouteTable>,
}

impl RealtimeConfig {
    /// Configuration with default hub paths and built-in profiles
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            default_hub_path: default_hub_path(),
            privileged_hub_path: default_privileged_hub_path(),
            profiles: BTreeMap::new(),
            routes: None,
        }
    }

    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            message: format!("{}: {}", path, e),
        })?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { message, .. } => ConfigError::ParseError {
                file: Some(path.to_string()),
                message,
            },
            other => other,
        })
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate URLs, paths and profile overrides
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid("base_url", &self.base_url, &e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https" | "ws" | "wss") {
            return Err(ConfigError::invalid(
                "base_url",
                &self.base_url,
                "scheme must be http, https, ws or wss",
            ));
        }
        for (field, path) in [
            ("default_hub_path", &self.default_hub_path),
            ("privileged_hub_path", &self.privileged_hub_path),
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::invalid(field, path, "must start with '/'"));
            }
        }
        for (platform, profile) in &self.profiles {
            if profile.platform != *platform {
                return Err(ConfigError::invalid(
                    "profiles",
                    platform,
                    "profile.platform does not match its key",
                ));
            }
            profile.validate()?;
        }
        Ok(())
    }

    /// Transport profile for a runtime platform identifier
    ///
    /// Overrides win over the built-in tuning. Unknown platforms are an error.
    pub fn profile_for(&self, platform_id: &str) -> Result<TransportProfile, ConfigError> {
        let platform: Platform = platform_id.parse()?;
        Ok(self
            .profiles
            .get(&platform)
            .cloned()
            .unwrap_or_else(|| TransportProfile::builtin(platform)))
    }

    /// Hub path for an audience
    pub fn hub_path(&self, audience: HubAudience) -> &str {
        match audience {
            HubAudience::Privileged => &self.privileged_hub_path,
            HubAudience::Standard => &self.default_hub_path,
        }
    }

    /// Socket URL of the hub for an audience
    ///
    /// `http`/`https` base URLs are rewritten to `ws`/`wss`.
    pub fn hub_url(&self, audience: HubAudience) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ConfigError::invalid("base_url", &self.base_url, &e.to_string()))?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(ConfigError::invalid(
                    "base_url",
                    other,
                    "unsupported scheme",
                ));
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::invalid("base_url", &self.base_url, "cannot set scheme"))?;
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}{}", base_path, self.hub_path(audience)));
        Ok(url)
    }

    /// Event route table (override or built-in)
    pub fn route_table(&self) -> RouteTable {
        self.routes.clone().unwrap_or_default()
    }
}
