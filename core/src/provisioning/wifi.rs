// WiFi activation state machine
//
// validate address → join network → probe control plane → persist → signal
//
// Any failure leaves the persisted address and the reconnect signal
// untouched.

use super::network::{LivenessProbe, NetworkConfig, NetworkInfo};
use super::ProvisioningError;
use crate::config::ServerConfig;
use crate::control::{ControlChannel, ControlPlaneSettings};
use crate::message::WifiCredential;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Visible networks listed when the requested SSID is missing
const MAX_LOGGED_NETWORKS: usize = 10;

/// Liveness probe budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiActivationConfig {
    pub probe_attempts: u32,
    pub probe_timeout: Duration,
    pub probe_interval: Duration,
}

impl From<&ServerConfig> for WifiActivationConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            probe_attempts: config.probe_attempts,
            probe_timeout: config.probe_timeout,
            probe_interval: config.probe_interval,
        }
    }
}

impl Default for WifiActivationConfig {
    fn default() -> Self {
        Self::from(&ServerConfig::default())
    }
}

/// Applies a decrypted WiFi credential
pub struct WifiActivation {
    network: Arc<dyn NetworkConfig>,
    probe: Arc<dyn LivenessProbe>,
    settings: Arc<ControlPlaneSettings>,
    control: Arc<dyn ControlChannel>,
    config: WifiActivationConfig,
}

impl WifiActivation {
    pub fn new(
        network: Arc<dyn NetworkConfig>,
        probe: Arc<dyn LivenessProbe>,
        settings: Arc<ControlPlaneSettings>,
        control: Arc<dyn ControlChannel>,
        config: WifiActivationConfig,
    ) -> Self {
        Self {
            network,
            probe,
            settings,
            control,
            config,
        }
    }

    /// Run the full activation; returns the new control-plane address
    pub async fn apply(&self, credential: &WifiCredential) -> Result<IpAddr, ProvisioningError> {
        let address = parse_address(&credential.control_plane_address)?;

        let ssid = match credential.ssid() {
            Some(ssid) => ssid,
            None => {
                warn!("WiFi credential has no SSID");
                return Err(ProvisioningError::MissingSsid);
            }
        };
        self.join_network(ssid, credential.password()).await?;

        self.verify_connectivity(address).await?;

        self.settings
            .update(address)
            .map_err(ProvisioningError::Persist)?;
        info!(%address, "💾 Control-plane address saved");

        self.control.request_reconnect();
        Ok(address)
    }

    async fn join_network(&self, ssid: &str, password: &str) -> Result<(), ProvisioningError> {
        info!(ssid, "📶 Joining WiFi network");

        if !self.network.is_enabled().await? {
            return Err(ProvisioningError::NetworkUnavailable);
        }

        if !self.network.network_available(ssid).await? {
            warn!(ssid, "WiFi network not in scan results");
            self.log_visible_networks().await;
            return Err(ProvisioningError::NetworkNotFound(ssid.to_string()));
        }

        match self.network.network_info(ssid).await {
            Ok(Some(NetworkInfo {
                signal, security, ..
            })) => info!(ssid, signal, security = %security, "Found target network"),
            Ok(None) => debug!(ssid, "No scan details for target network"),
            Err(e) => debug!(ssid, "Reading scan details failed: {}", e),
        }

        if let Err(e) = self.network.remove_profile(ssid).await {
            debug!(ssid, "Removing stale profile failed: {}", e);
        }

        self.network
            .activate(ssid, password)
            .await
            .map_err(|e| ProvisioningError::ActivationFailed(e.to_string()))?;

        let active = self.network.active_ssid().await?;
        let associated = active
            .as_deref()
            .map(|current| current.trim().eq_ignore_ascii_case(ssid))
            .unwrap_or(false);
        if !associated {
            return Err(ProvisioningError::AssociationMismatch {
                expected: ssid.to_string(),
                actual: active,
            });
        }

        info!(ssid, "✅ WiFi connected");
        Ok(())
    }

    async fn log_visible_networks(&self) {
        match self.network.visible_networks().await {
            Ok(networks) if networks.is_empty() => warn!("No WiFi networks visible"),
            Ok(networks) => {
                info!("{} WiFi network(s) visible:", networks.len());
                for network in networks.iter().take(MAX_LOGGED_NETWORKS) {
                    info!(
                        "  SSID: {}, signal: {}, security: {}",
                        network.ssid, network.signal, network.security
                    );
                }
            }
            Err(e) => debug!("Listing visible networks failed: {}", e),
        }
    }

    async fn verify_connectivity(&self, address: IpAddr) -> Result<(), ProvisioningError> {
        let attempts = self.config.probe_attempts;
        for attempt in 1..=attempts {
            match self.probe.probe(address, self.config.probe_timeout).await {
                Ok(rtt) => {
                    info!(%address, attempt, "Control plane reachable in {:?}", rtt);
                    return Ok(());
                }
                Err(e) => warn!(%address, attempt, "Liveness probe failed: {}", e),
            }
            if attempt < attempts && !self.config.probe_interval.is_zero() {
                tokio::time::sleep(self.config.probe_interval).await;
            }
        }
        Err(ProvisioningError::ConnectivityVerificationFailed { address, attempts })
    }
}

/// Parse the control-plane address; empty and malformed values are rejected
pub fn parse_address(raw: &str) -> Result<IpAddr, ProvisioningError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ProvisioningError::InvalidAddress(String::new()));
    }
    trimmed
        .parse()
        .map_err(|_| ProvisioningError::InvalidAddress(trimmed.to_string()))
}
