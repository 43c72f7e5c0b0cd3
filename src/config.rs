//! Configuration module for AUD Manager

use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::Path;
use anyhow::{Context, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Capture settings
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Packet queue capacity (number of decoded records)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Maximum frame size to read from the socket
    #[serde(default = "default_snap_length")]
    pub snap_length: usize,

    /// Socket receive timeout in milliseconds (bounds shutdown latency)
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout_ms: u64,
}

/// Pipeline timing
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Interval between AUD update ticks (seconds)
    #[serde(default = "default_update_interval")]
    pub update_interval_secs: u64,

    /// Queue drain poll interval (milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

/// Anomaly detector tuning
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    /// Sliding window for the frequent-flow detector (seconds)
    #[serde(default = "default_freq_window")]
    pub freq_window_secs: u64,

    /// Flow count threshold within the window
    #[serde(default = "default_freq_threshold")]
    pub freq_threshold: usize,

    /// Retained anomaly ring capacity
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
}

/// Downstream publish channel
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Endpoint URL; ws:// and wss:// send a text frame, http:// and
    /// https:// send a POST
    #[serde(default = "default_publish_url")]
    pub url: String,

    /// Send timeout in milliseconds
    #[serde(default = "default_publish_timeout")]
    pub timeout_ms: u64,
}

/// HTTP control surface
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Listen address
    #[serde(default = "default_api_listen")]
    pub listen: String,
}

/// Local network identity
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NetworkConfig {
    /// Additional local IPv4 addresses beyond the probed primary
    #[serde(default)]
    pub local_ips: Vec<Ipv4Addr>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path
    #[serde(default)]
    pub file: Option<String>,

    /// Log format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_queue_capacity() -> usize { 65536 }
fn default_snap_length() -> usize { 65535 }
fn default_recv_timeout() -> u64 { 500 }
fn default_update_interval() -> u64 { 10 }
fn default_poll_interval() -> u64 { 100 }
fn default_freq_window() -> u64 { 30 }
fn default_freq_threshold() -> usize { 30 }
fn default_ring_capacity() -> usize { 100 }
fn default_publish_url() -> String { "ws://localhost:3000/ws".to_string() }
fn default_publish_timeout() -> u64 { 1000 }
fn default_api_listen() -> String { "0.0.0.0:6060".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            snap_length: default_snap_length(),
            recv_timeout_ms: default_recv_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: default_update_interval(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            freq_window_secs: default_freq_window(),
            freq_threshold: default_freq_threshold(),
            ring_capacity: default_ring_capacity(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            url: default_publish_url(),
            timeout_ms: default_publish_timeout(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { listen: default_api_listen() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        toml::from_str(&content)
            .with_context(|| "Failed to parse configuration")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.capture.queue_capacity < 64 {
            anyhow::bail!("Queue capacity must be at least 64");
        }

        if self.capture.snap_length < 64 || self.capture.snap_length > 65535 {
            anyhow::bail!("Snap length must be between 64 and 65535");
        }

        if self.pipeline.update_interval_secs < 1 {
            anyhow::bail!("Update interval must be at least 1 second");
        }

        if self.detector.freq_threshold == 0 {
            anyhow::bail!("Frequency threshold must be nonzero");
        }

        if self.detector.ring_capacity == 0 {
            anyhow::bail!("Anomaly ring capacity must be nonzero");
        }

        let url = &self.publish.url;
        if !(url.starts_with("ws://") || url.starts_with("wss://")
            || url.starts_with("http://") || url.starts_with("https://")) {
            anyhow::bail!("Publish URL must be a ws://, wss://, http:// or https:// endpoint");
        }

        self.api.listen.parse::<std::net::SocketAddr>()
            .with_context(|| format!("Invalid API listen address: {}", self.api.listen))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[capture]
queue_capacity = 4096
snap_length = 2048

[pipeline]
update_interval_secs = 5

[detector]
freq_window_secs = 15
freq_threshold = 10

[publish]
url = "http://collector:8080/pub"

[network]
local_ips = ["192.168.1.10"]

[logging]
level = "debug"
format = "pretty"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.capture.queue_capacity, 4096);
        assert_eq!(config.pipeline.update_interval_secs, 5);
        assert_eq!(config.detector.freq_threshold, 10);
        assert_eq!(config.network.local_ips, vec!["192.168.1.10".parse::<Ipv4Addr>().unwrap()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.capture.queue_capacity, 65536);
        assert_eq!(config.pipeline.update_interval_secs, 10);
        assert_eq!(config.detector.freq_window_secs, 30);
        assert_eq!(config.detector.freq_threshold, 30);
        assert_eq!(config.detector.ring_capacity, 100);
        assert_eq!(config.publish.url, "ws://localhost:3000/ws");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_publish_url() {
        let toml_content = r#"
[publish]
url = "redis://localhost:6379"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tiny_queue_rejected() {
        let toml_content = r#"
[capture]
queue_capacity = 8
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_err());
    }
}
