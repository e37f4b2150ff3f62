//! # Channel Configuration
//!
//! Everything a channel needs to start: its endpoints, the preferred host
//! policy and the reconnect/initialisation timings. Deserialises from the
//! `channel` section of the layered JSON configuration (camelCase keys).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::endpoints::{Endpoint, EndpointList};
use crate::error::ValidationError;
use crate::fallback::policy::FallbackPolicy;

/// # Channel Config
///
/// ```json
/// {
///   "name": "prices",
///   "endpoints": [
///     { "address": "rt1.example", "port": 14002 },
///     { "address": "rt2.example", "port": 14002 }
///   ],
///   "preferredHost": { "enabled": true, "connectionListIndex": 0, "detectionInterval": 300 },
///   "reconnectMinDelayMs": 1000,
///   "reconnectMaxDelayMs": 60000,
///   "reconnectAttemptLimit": -1,
///   "initTimeoutMs": 60000
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChannelConfig {
    /// Name used in logs and `ChannelInfo`.
    pub name: String,
    /// Candidate endpoints, in round-robin order.
    pub endpoints: Vec<Endpoint>,
    /// Preferred host policy.
    pub preferred_host: FallbackPolicy,
    /// First reconnect delay in milliseconds.
    pub reconnect_min_delay_ms: u64,
    /// Reconnect delay cap in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Failed attempts before giving up; `-1` retries forever.
    pub reconnect_attempt_limit: i32,
    /// Timeout for opening one connection, in milliseconds.
    pub init_timeout_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "channel".to_string(),
            endpoints: Vec::new(),
            preferred_host: FallbackPolicy::default(),
            reconnect_min_delay_ms: 1000,
            reconnect_max_delay_ms: 60_000,
            reconnect_attempt_limit: -1,
            init_timeout_ms: 60_000,
        }
    }
}

impl ChannelConfig {
    /// A default configuration for `name` with the given endpoints.
    pub fn new(name: impl Into<String>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            name: name.into(),
            endpoints,
            ..Self::default()
        }
    }

    /// Sets the preferred host policy.
    pub fn with_preferred_host(mut self, policy: FallbackPolicy) -> Self {
        self.preferred_host = policy;
        self
    }

    /// Sets the reconnect delay bounds.
    pub fn with_reconnect_delays(mut self, min: Duration, max: Duration) -> Self {
        self.reconnect_min_delay_ms = min.as_millis() as u64;
        self.reconnect_max_delay_ms = max.as_millis() as u64;
        self
    }

    /// Sets the attempt limit (`-1` for unlimited).
    pub fn with_attempt_limit(mut self, limit: i32) -> Self {
        self.reconnect_attempt_limit = limit;
        self
    }

    /// Sets the per-attempt connection timeout.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Checks the configuration and returns the endpoint list it describes.
    pub fn validate(&self) -> Result<EndpointList, ValidationError> {
        let endpoints = EndpointList::new(self.endpoints.clone())?;
        self.preferred_host.validate(&endpoints)?;
        if self.reconnect_min_delay_ms > self.reconnect_max_delay_ms {
            return Err(ValidationError::InvalidReconnectDelays {
                min_ms: self.reconnect_min_delay_ms,
                max_ms: self.reconnect_max_delay_ms,
            });
        }
        if self.init_timeout_ms == 0 {
            return Err(ValidationError::ZeroInitTimeout);
        }
        Ok(endpoints)
    }

    /// First reconnect delay.
    pub fn reconnect_min_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_min_delay_ms)
    }

    /// Reconnect delay cap.
    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// Per-attempt connection timeout.
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms)
    }
}
