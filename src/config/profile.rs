//! Per-platform transport tuning
//!
//! The two mobile targets need materially different timeout and retry tuning:
//! Android's network stack drops sockets more often during carrier handovers
//! and gets a slower, more patient schedule, iOS gets a faster schedule with
//! a longer keep-alive. A profile is selected once, when the connection is
//! constructed, and never mutated afterwards.

use crate::core::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Runtime platform the client is running on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Android,
    Ios,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Android => "android",
            Platform::Ios => "ios",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            _ => Err(ConfigError::UnknownPlatform {
                platform: s.to_string(),
            }),
        }
    }
}

/// Transport kinds in preference order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    WebSockets,
    ServerSentEvents,
    LongPolling,
}

/// Immutable transport configuration for one platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportProfile {
    /// Platform this profile was tuned for (used as log context)
    pub platform: Platform,
    /// Upper bound for one connect attempt (handshake included)
    pub connect_timeout_ms: u64,
    /// Interval between client keep-alive pings
    pub keep_alive_interval_ms: u64,
    /// Silence after which the server is considered gone
    pub server_timeout_ms: u64,
    /// Artificial delay before the first connect call of an attempt
    pub startup_delay_ms: u64,
    /// Waits tried in order after an unexpected disconnect
    pub retry_delay_schedule: Vec<u64>,
    /// Total automatic reconnect attempts before giving up
    pub max_auto_retries: u32,
    /// Cap for the exponential backoff that follows the schedule
    pub backoff_cap_ms: u64,
    /// Supplemental reconnect timers after an abnormal closure (1006)
    pub abnormal_closure_delays: Vec<u64>,
    /// Pause between stop and start during a forced reconnect
    pub settle_delay_ms: u64,
    /// Transports to try, most preferred first
    pub transport_preference: Vec<TransportKind>,
}

impl TransportProfile {
    /// Android tuning
    pub fn android() -> Self {
        Self {
            platform: Platform::Android,
            connect_timeout_ms: 15_000,
            keep_alive_interval_ms: 15_000,
            server_timeout_ms: 60_000,
            startup_delay_ms: 1_000,
            retry_delay_schedule: vec![0, 2_000, 5_000, 10_000, 30_000],
            max_auto_retries: 10,
            backoff_cap_ms: 60_000,
            abnormal_closure_delays: vec![2_000, 5_000, 15_000],
            settle_delay_ms: 1_000,
            transport_preference: vec![TransportKind::WebSockets, TransportKind::LongPolling],
        }
    }

    /// iOS tuning
    pub fn ios() -> Self {
        Self {
            platform: Platform::Ios,
            connect_timeout_ms: 10_000,
            keep_alive_interval_ms: 30_000,
            server_timeout_ms: 60_000,
            startup_delay_ms: 500,
            retry_delay_schedule: vec![0, 1_000, 3_000, 8_000, 15_000, 30_000],
            max_auto_retries: 8,
            backoff_cap_ms: 60_000,
            abnormal_closure_delays: vec![1_000, 3_000, 10_000],
            settle_delay_ms: 1_000,
            transport_preference: vec![
                TransportKind::WebSockets,
                TransportKind::ServerSentEvents,
                TransportKind::LongPolling,
            ],
        }
    }

    /// Built-in profile for a platform
    pub fn builtin(platform: Platform) -> Self {
        match platform {
            Platform::Android => Self::android(),
            Platform::Ios => Self::ios(),
        }
    }

    /// Resolve the profile for a runtime platform identifier
    ///
    /// An unknown identifier is a configuration error; there is no fallback.
    pub fn for_platform(platform_id: &str) -> Result<Self, ConfigError> {
        let platform: Platform = platform_id.parse()?;
        Ok(Self::builtin(platform))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn server_timeout(&self) -> Duration {
        Duration::from_millis(self.server_timeout_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn abnormal_closure_delays(&self) -> impl Iterator<Item = Duration> + '_ {
        self.abnormal_closure_delays
            .iter()
            .map(|ms| Duration::from_millis(*ms))
    }

    /// Reconnect policy derived from this profile
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            schedule: self.retry_delay_schedule.clone(),
            max_attempts: self.max_auto_retries,
            backoff_cap_ms: self.backoff_cap_ms,
        }
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "connect_timeout_ms",
                0,
                "must be greater than zero",
            ));
        }
        if self.server_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "server_timeout_ms",
                0,
                "must be greater than zero",
            ));
        }
        if self.keep_alive_interval_ms == 0 || self.keep_alive_interval_ms >= self.server_timeout_ms
        {
            return Err(ConfigError::invalid(
                "keep_alive_interval_ms",
                self.keep_alive_interval_ms,
                "must be non-zero and shorter than server_timeout_ms",
            ));
        }
        if self.retry_delay_schedule.is_empty() && self.max_auto_retries > 0 {
            return Err(ConfigError::invalid(
                "retry_delay_schedule",
                "[]",
                "cannot be empty when max_auto_retries is non-zero",
            ));
        }
        if self.transport_preference.is_empty() {
            return Err(ConfigError::invalid(
                "transport_preference",
                "[]",
                "at least one transport is required",
            ));
        }
        Ok(())
    }
}

/// Delay lookup for the automatic reconnect loop
///
/// Attempt `n` (zero-based) waits `schedule[n]`. Past the end of the schedule
/// the last entry is doubled per extra attempt up to `backoff_cap_ms`. Once
/// `max_attempts` attempts were made there is no next delay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    schedule: Vec<u64>,
    max_attempts: u32,
    backoff_cap_ms: u64,
}

impl ReconnectPolicy {
    pub fn new(schedule: Vec<u64>, max_attempts: u32, backoff_cap_ms: u64) -> Self {
        Self {
            schedule,
            max_attempts,
            backoff_cap_ms,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before attempt number `attempt`, or `None` when the budget is spent
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let index = attempt as usize;
        if let Some(ms) = self.schedule.get(index) {
            return Some(Duration::from_millis(*ms));
        }
        let last = self.schedule.last().copied().unwrap_or(0).max(1_000);
        let exponent = (index - self.schedule.len() + 1).min(16) as u32;
        let ms = last
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.backoff_cap_ms);
        Some(Duration::from_millis(ms))
    }
}
