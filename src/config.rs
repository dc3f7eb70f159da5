//! Poller configuration.
//!
//! All sections have defaults, so an empty JSON object is a valid config file.
//! Durations are stored as plain seconds/milliseconds to keep the file format
//! readable.

use std::path::Path;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::PollError;
use crate::resilience::{Freshness, RetryPolicy};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PollerConfig {
    pub session: SessionSettings,
    pub retry: RetryPolicy,
    pub cache: CacheSettings,
    pub poll: PollSettings,
    pub notifications: NotificationSettings,
}

/// Session and prompt-detection timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SessionSettings {
    /// Timeout for the first prompt-detection strategy of every command.
    pub command_timeout_secs: u64,
    /// Timeouts for the alternate prompt-detection strategies, in order.
    pub prompt_fallback_secs: Vec<u64>,
    /// Consecutive session-level failures before the session is torn down.
    pub max_consecutive_failures: u32,
    /// Deadline after which a caller stops waiting for a queued job.
    pub operation_deadline_secs: u64,
    /// Capacity of the command job queue.
    pub queue_depth: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            command_timeout_secs: 30,
            prompt_fallback_secs: vec![60, 90, 120],
            max_consecutive_failures: 3,
            operation_deadline_secs: 300,
            queue_depth: 32,
        }
    }
}

impl SessionSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn operation_deadline(&self) -> Duration {
        Duration::from_secs(self.operation_deadline_secs)
    }
}

/// TTLs and capacity of the result caches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CacheSettings {
    pub interface_ttl_secs: u64,
    pub identity_ttl_secs: u64,
    pub mac_ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            interface_ttl_secs: 30,
            identity_ttl_secs: 300,
            mac_ttl_secs: 120,
            max_entries: 1000,
        }
    }
}

/// Background polling behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct PollSettings {
    pub interval_secs: u64,
    /// Whether background polls may be served from the interface cache.
    pub freshness: Freshness,
    /// Look up the MAC table when a link comes up.
    pub track_new_macs: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            freshness: Freshness::Fresh,
            track_new_macs: true,
        }
    }
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Retention of the human-readable notification log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct NotificationSettings {
    pub limit: usize,
    /// Capacity of the change-event broadcast channel.
    pub channel_capacity: usize,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            limit: 50,
            channel_capacity: 256,
        }
    }
}

impl PollerConfig {
    pub fn from_json_str(text: &str) -> Result<Self, PollError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PollError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PollError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// JSON schema of the config file.
    pub fn json_schema() -> Result<String, PollError> {
        let schema = schemars::schema_for!(PollerConfig);
        Ok(serde_json::to_string_pretty(&schema)?)
    }

    pub fn validate(&self) -> Result<(), PollError> {
        if self.retry.max_attempts == 0 {
            return Err(PollError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.backoff_factor < 1.0 {
            return Err(PollError::Config(
                "retry.backoff_factor must be >= 1.0".to_string(),
            ));
        }
        if self.session.command_timeout_secs == 0 {
            return Err(PollError::Config(
                "session.command_timeout_secs must be positive".to_string(),
            ));
        }
        if self.session.queue_depth == 0 {
            return Err(PollError::Config("session.queue_depth must be positive".to_string()));
        }
        if self.notifications.limit == 0 || self.notifications.channel_capacity == 0 {
            return Err(PollError::Config(
                "notification limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
