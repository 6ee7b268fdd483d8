//! Link configuration loaded from YAML

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::{LinkError, Result};

/// Settings shared by every socket and session of a link.
///
/// Every field has a default, so an empty document is a valid configuration:
///
/// ```rust
/// use depthlink::LinkConfig;
///
/// let config = LinkConfig::from_yaml_str("request_port: 5600\n").unwrap();
/// assert_eq!(config.request_endpoint(), "127.0.0.1:5600");
/// assert_eq!(config.send_high_water_mark, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Capture host address
    pub host: String,
    pub request_port: u16,
    pub bus_port: u16,
    /// Per-attempt request timeout
    pub request_timeout_ms: u64,
    /// Wait before retrying a failed bootstrap step
    pub retry_backoff_ms: u64,
    /// Queued envelopes per subscriber before new ones are dropped
    pub send_high_water_mark: usize,
    /// Buffered envelopes per subscriber before old ones are dropped
    pub receive_high_water_mark: usize,
    pub reconnect_interval_ms: u64,
    pub max_message_bytes: usize,
    /// Delay samples kept in memory for summaries
    pub latency_history: usize,
    /// CSV file receiving every delay sample
    pub delay_log: Option<PathBuf>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            request_port: 5555,
            bus_port: 5556,
            request_timeout_ms: 1000,
            retry_backoff_ms: 200,
            send_high_water_mark: 10,
            receive_high_water_mark: 5,
            reconnect_interval_ms: 500,
            max_message_bytes: 64 * 1024 * 1024,
            latency_history: 1024,
            delay_log: None,
        }
    }
}

impl LinkConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: LinkConfig = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| LinkError::file_error(path.to_path_buf(), e))?;
        let config = Self::from_yaml_str(&yaml)?;
        debug!("Loaded link configuration from {}", path.display());
        Ok(config)
    }

    /// Reject values no socket can work with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(LinkError::config("host must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(LinkError::config("request_timeout_ms must be positive"));
        }
        if self.send_high_water_mark == 0 {
            return Err(LinkError::config("send_high_water_mark must be positive"));
        }
        if self.receive_high_water_mark == 0 {
            return Err(LinkError::config("receive_high_water_mark must be positive"));
        }
        if self.max_message_bytes == 0 {
            return Err(LinkError::config("max_message_bytes must be positive"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// `host:request_port`
    pub fn request_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.request_port)
    }

    /// `host:bus_port`
    pub fn bus_endpoint(&self) -> String {
        format!("{}:{}", self.host, self.bus_port)
    }
}
