//! Session configuration.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How `load_notifications` asks the backend for data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollMode {
    /// Fetch the whole list every time. Picks up read state changed elsewhere.
    #[default]
    Full,
    /// Fetch only records newer than the newest one held.
    Delta,
}

/// Bounded exponential backoff for the push channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// First retry delay; doubled per consecutive failure.
    pub base_delay_ms: u64,
    /// Upper bound for a single delay.
    pub max_delay_ms: u64,
    /// Consecutive failures before giving up until the next explicit connect.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 6,
        }
    }
}

impl ReconnectPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Configuration for one notification session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// REST base, e.g. `https://api.example.com/api/v1`.
    pub base_url: String,

    /// Push channel endpoint (None = polling only).
    pub ws_url: Option<String>,

    /// Poll interval.
    /// Default: 30s
    pub poll_interval_ms: u64,

    pub poll_mode: PollMode,

    /// Run the first poll immediately instead of after one interval.
    pub poll_on_start: bool,

    /// Open the push channel when the session starts.
    pub connect_on_start: bool,

    pub reconnect: ReconnectPolicy,

    /// Handshake timeout for the push channel.
    pub connect_timeout_ms: u64,

    /// Timeout for REST requests.
    pub request_timeout_ms: u64,

    /// How long a channel read blocks before the worker checks for
    /// cancellation.
    pub receive_slice_ms: u64,

    /// Pending read receipts before new ones are dropped.
    pub receipt_queue_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api/v1".to_string(),
            ws_url: None,
            poll_interval_ms: 30_000,
            poll_mode: PollMode::Full,
            poll_on_start: true,
            connect_on_start: true,
            reconnect: ReconnectPolicy::default(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 15_000,
            receive_slice_ms: 250,
            receipt_queue_size: 256,
        }
    }
}

impl SyncConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: SyncConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would busy-loop or never fire.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(SyncError::InvalidConfig("base_url is empty".to_string()));
        }
        url::Url::parse(&self.base_url)?;
        if let Some(ws_url) = &self.ws_url {
            url::Url::parse(ws_url)?;
        }
        if self.poll_interval_ms == 0 {
            return Err(SyncError::InvalidConfig("poll_interval_ms must be > 0".to_string()));
        }
        if self.receive_slice_ms == 0 {
            return Err(SyncError::InvalidConfig("receive_slice_ms must be > 0".to_string()));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(SyncError::InvalidConfig(
                "reconnect.base_delay_ms must be > 0".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            return Err(SyncError::InvalidConfig(format!(
                "reconnect.max_delay_ms ({}) is below base_delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.base_delay_ms
            )));
        }
        if self.receipt_queue_size == 0 {
            return Err(SyncError::InvalidConfig("receipt_queue_size must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn receive_slice(&self) -> Duration {
        Duration::from_millis(self.receive_slice_ms)
    }
}
