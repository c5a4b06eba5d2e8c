//! Server configuration
//!
//! Every delay the provisioning loop uses lives here so tests can shrink them
//! and field deployments can stretch them without touching protocol code.

use std::time::Duration;
use thiserror::Error;

/// Default human label appended to the advertised adapter name
pub const DEFAULT_DEVICE_LABEL: &str = "NeuChar-EdgeDevice";

/// Default adapter name prefix
pub const DEFAULT_NAME_PREFIX: &str = "NCBEdge";

/// Fixed RFCOMM channel the provisioning service listens on
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Highest channel number RFCOMM allows
pub const MAX_RFCOMM_CHANNEL: u8 = 30;

/// Errors for invalid server configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid RFCOMM channel: {0} (must be 1-30)")]
    InvalidChannel(u8),
    #[error("Invalid listen backlog: {0}")]
    InvalidBacklog(i32),
    #[error("Device label must not be empty")]
    EmptyLabel,
    #[error("Poll window must be non-zero")]
    ZeroPollWindow,
    #[error("Probe attempts must be at least 1")]
    NoProbeAttempts,
    #[error("Maximum line length must be non-zero")]
    ZeroLineLimit,
}

/// Provisioning server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Stable device id (DID); drives the adapter name and service UUID
    pub device_id: Option<String>,
    /// Human label appended to the adapter name
    pub device_label: String,
    /// Adapter name prefix
    pub name_prefix: String,
    /// RFCOMM channel to bind
    pub channel: u8,
    /// listen(2) backlog
    pub backlog: i32,
    /// Receive budget per poll attempt
    pub poll_window: Duration,
    /// Pause after a window that produced no bytes
    pub idle_backoff: Duration,
    /// Pause between reads that would block inside a window
    pub would_block_backoff: Duration,
    /// Pause before every send
    pub pre_send_delay: Duration,
    /// Pause before the single send retry after a would-block
    pub send_retry_delay: Duration,
    /// Pause after a successful send
    pub post_send_delay: Duration,
    /// Pause between forced cleanup and the bind retry
    pub bind_retry_delay: Duration,
    /// Pause after a failed accept
    pub accept_retry_delay: Duration,
    /// Pause between the end of one session and the next accept
    pub between_sessions_delay: Duration,
    /// Interval of the paired-device maintenance sweep
    pub sweep_interval: Duration,
    /// Liveness probes against a new control-plane address
    pub probe_attempts: u32,
    /// Timeout for a single liveness probe
    pub probe_timeout: Duration,
    /// Pause between failed liveness probes; zero runs them back-to-back
    pub probe_interval: Duration,
    /// Unterminated input longer than this is processed as-is
    pub max_line_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            device_label: DEFAULT_DEVICE_LABEL.to_string(),
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            channel: DEFAULT_RFCOMM_CHANNEL,
            backlog: 5,
            poll_window: Duration::from_millis(100),
            idle_backoff: Duration::from_millis(100),
            would_block_backoff: Duration::from_millis(10),
            pre_send_delay: Duration::from_millis(50),
            send_retry_delay: Duration::from_millis(500),
            post_send_delay: Duration::from_millis(10),
            bind_retry_delay: Duration::from_secs(2),
            accept_retry_delay: Duration::from_secs(2),
            between_sessions_delay: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(10),
            probe_attempts: 10,
            probe_timeout: Duration::from_secs(2),
            probe_interval: Duration::ZERO,
            max_line_bytes: 64 * 1024,
        }
    }
}

impl ServerConfig {
    /// Create configuration for a device id with default timings
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::default()
        }
    }

    /// Set the human label
    pub fn with_device_label(mut self, label: impl Into<String>) -> Self {
        self.device_label = label.into();
        self
    }

    /// Set the adapter name prefix
    pub fn with_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set the RFCOMM channel
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// Set the liveness probe budget
    pub fn with_probes(mut self, attempts: u32, timeout: Duration, interval: Duration) -> Self {
        self.probe_attempts = attempts;
        self.probe_timeout = timeout;
        self.probe_interval = interval;
        self
    }

    /// Shrink every delay to `delay`, keeping the poll window at `window`.
    /// Intended for tests and simulators.
    pub fn with_compressed_timing(mut self, window: Duration, delay: Duration) -> Self {
        self.poll_window = window;
        self.idle_backoff = delay;
        self.would_block_backoff = delay;
        self.pre_send_delay = delay;
        self.send_retry_delay = delay;
        self.post_send_delay = delay;
        self.bind_retry_delay = delay;
        self.accept_retry_delay = delay;
        self.between_sessions_delay = delay;
        self.probe_interval = delay;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel == 0 || self.channel > MAX_RFCOMM_CHANNEL {
            return Err(ConfigError::InvalidChannel(self.channel));
        }
        if self.backlog < 1 {
            return Err(ConfigError::InvalidBacklog(self.backlog));
        }
        if self.device_label.trim().is_empty() {
            return Err(ConfigError::EmptyLabel);
        }
        if self.poll_window.is_zero() {
            return Err(ConfigError::ZeroPollWindow);
        }
        if self.probe_attempts == 0 {
            return Err(ConfigError::NoProbeAttempts);
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::ZeroLineLimit);
        }
        Ok(())
    }
}
