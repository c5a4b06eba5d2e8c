// Network collaborators: WiFi configuration and liveness probing

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by the network configuration collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Network command failed: {0}")]
    CommandFailed(String),
    #[error("Network tool unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by a liveness probe
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("No reply within {0:?}")]
    Timeout(Duration),
    #[error("Host unreachable: {0}")]
    Unreachable(String),
    #[error("Probe could not run: {0}")]
    Failed(String),
}

/// A network seen in the latest scan
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NetworkInfo {
    pub ssid: String,
    /// Signal quality as reported by the scanner
    pub signal: i32,
    pub security: String,
}

/// WiFi configuration on the host
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkConfig: Send + Sync {
    /// Whether the WiFi radio is on and usable
    async fn is_enabled(&self) -> Result<bool, NetworkError>;
    /// Whether `ssid` appears in the current scan results
    async fn network_available(&self, ssid: &str) -> Result<bool, NetworkError>;
    /// Scan details for `ssid`
    async fn network_info(&self, ssid: &str) -> Result<Option<NetworkInfo>, NetworkError>;
    /// Every network in the current scan results
    async fn visible_networks(&self) -> Result<Vec<NetworkInfo>, NetworkError>;
    /// Delete any saved profile for `ssid`
    async fn remove_profile(&self, ssid: &str) -> Result<(), NetworkError>;
    /// Create an auto-reconnecting profile for `ssid` and bring it up.
    /// An empty password means an open network.
    async fn activate(&self, ssid: &str, password: &str) -> Result<(), NetworkError>;
    /// SSID the interface is currently associated with
    async fn active_ssid(&self) -> Result<Option<String>, NetworkError>;
}

/// Reachability check against a freshly configured address
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Send one probe; returns the round-trip time
    async fn probe(&self, addr: IpAddr, timeout: Duration) -> Result<Duration, ProbeError>;
}
