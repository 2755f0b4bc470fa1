//! # Realtime Client Options
//!
//! Every option has a default, and a JSON document only needs to name the keys
//! it wants to change:
//!
//! ```json
//! { "reconnectBaseDelayMs": 500, "maxReconnectAttempts": null }
//! ```
//!
//! `maxReconnectAttempts: null` means unlimited retries. A heartbeat interval or
//! connect timeout of `0` disables that timer.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::outbound_queue::OverflowPolicy;
use crate::error::ConfigError;

pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_OUTBOUND_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_JITTER_RATIO: f64 = 0.2;
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RealtimeOptions {
    /// Delay before the first reconnect attempt; doubles per failure.
    pub reconnect_base_delay_ms: u64,
    /// Upper bound for any reconnect delay, jitter included.
    pub reconnect_max_delay_ms: u64,
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Ping period while open. `0` disables heartbeats.
    pub heartbeat_interval_ms: u64,
    /// How long an unanswered ping may stay unanswered.
    pub heartbeat_timeout_ms: u64,
    pub outbound_queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    pub auto_reconnect: bool,
    /// Fraction of the backoff delay used as the +/- jitter band.
    pub jitter_ratio: f64,
    /// `0` waits for the transport indefinitely.
    pub connect_timeout_ms: u64,
}

impl Default for RealtimeOptions {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            reconnect_max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
            max_reconnect_attempts: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            outbound_queue_capacity: DEFAULT_OUTBOUND_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            auto_reconnect: true,
            jitter_ratio: DEFAULT_JITTER_RATIO,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl RealtimeOptions {
    /// Parses a JSON document and validates the result.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let options: RealtimeOptions = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    /// Reads and parses a JSON options file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_base_delay_ms == 0 {
            return Err(invalid("reconnectBaseDelayMs", "must be greater than zero"));
        }
        if self.reconnect_max_delay_ms < self.reconnect_base_delay_ms {
            return Err(invalid(
                "reconnectMaxDelayMs",
                format!(
                    "{} is smaller than reconnectBaseDelayMs ({})",
                    self.reconnect_max_delay_ms, self.reconnect_base_delay_ms
                ),
            ));
        }
        if self.heartbeat_interval_ms > 0 && self.heartbeat_timeout_ms == 0 {
            return Err(invalid(
                "heartbeatTimeoutMs",
                "must be greater than zero while heartbeats are enabled",
            ));
        }
        if self.outbound_queue_capacity == 0 {
            return Err(invalid("outboundQueueCapacity", "must be greater than zero"));
        }
        if !(0.0..1.0).contains(&self.jitter_ratio) {
            return Err(invalid(
                "jitterRatio",
                format!("{} is outside [0, 1)", self.jitter_ratio),
            ));
        }
        Ok(())
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    /// `None` when heartbeats are disabled.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// `None` when the connect timeout is disabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
