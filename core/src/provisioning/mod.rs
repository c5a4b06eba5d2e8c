//! Provisioning command dispatch
//!
//! Requests are routed by their numeric type to an explicit handler table:
//! `GetDeviceId` returns the signed device id, `ConfigureWifi` runs the WiFi
//! activation state machine, anything else is unsupported. Plaintext lines
//! are answered by a small alias set. Every failure becomes a response; the
//! session never drops a client over a bad request.

pub mod dispatcher;
pub mod network;
pub mod wifi;

pub use dispatcher::{CommandDispatcher, DeviceInfo};
pub use network::{LivenessProbe, NetworkConfig, NetworkError, NetworkInfo, ProbeError};
pub use wifi::{WifiActivation, WifiActivationConfig};

use crate::crypto::CryptoError;
use crate::store::StoreError;
use std::net::IpAddr;
use thiserror::Error;

/// Peer-facing message for any crypto failure
pub const CRYPTO_FAILURE_MESSAGE: &str = "Error Happened，Encrypt Failed";

/// Errors for provisioning commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("Crypto failure: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("The message type is not supported: {0}")]
    UnsupportedType(i32),
    #[error("{}", invalid_address_message(.0))]
    InvalidAddress(String),
    #[error("WiFi SSID Is Empty")]
    MissingSsid,
    #[error("WiFi is not enabled")]
    NetworkUnavailable,
    #[error("WiFi network '{0}' not found")]
    NetworkNotFound(String),
    #[error("WiFi activation failed: {0}")]
    ActivationFailed(String),
    #[error(
        "WiFi association check failed: expected '{}', connected to '{}'",
        .expected,
        .actual.as_deref().unwrap_or("<none>")
    )]
    AssociationMismatch {
        expected: String,
        actual: Option<String>,
    },
    #[error("Ping NCBIP address {address} failed after {attempts} attempts")]
    ConnectivityVerificationFailed { address: IpAddr, attempts: u32 },
    #[error("Network configuration failed: {0}")]
    Network(#[from] NetworkError),
    #[error("Saving control-plane address failed: {0}")]
    Persist(StoreError),
}

fn invalid_address_message(raw: &str) -> String {
    if raw.trim().is_empty() {
        "NCBIP Is Empty".to_string()
    } else {
        format!("NCBIP Format Error: {}", raw)
    }
}

impl ProvisioningError {
    /// Stable code carried as signed `Data` in failure responses
    pub fn code(&self) -> &'static str {
        match self {
            ProvisioningError::Crypto(_) => "CRYPTO_FAILURE",
            ProvisioningError::Protocol(_) => "PROTOCOL_ERROR",
            ProvisioningError::UnsupportedType(_) => "UNSUPPORTED_TYPE",
            ProvisioningError::InvalidAddress(_) => "INVALID_ADDRESS",
            ProvisioningError::MissingSsid => "MISSING_SSID",
            ProvisioningError::NetworkUnavailable => "NETWORK_UNAVAILABLE",
            ProvisioningError::NetworkNotFound(_) => "NETWORK_NOT_FOUND",
            ProvisioningError::ActivationFailed(_) => "ACTIVATION_FAILED",
            ProvisioningError::AssociationMismatch { .. } => "ASSOCIATION_MISMATCH",
            ProvisioningError::ConnectivityVerificationFailed { .. } => {
                "CONNECTIVITY_VERIFICATION_FAILED"
            }
            ProvisioningError::Network(_) => "NETWORK_ERROR",
            ProvisioningError::Persist(_) => "PERSIST_FAILED",
        }
    }

    /// Crypto failures carry no signed payload
    pub fn is_crypto(&self) -> bool {
        matches!(self, ProvisioningError::Crypto(_))
    }

    /// Message reported to the peer
    pub fn peer_message(&self) -> String {
        if self.is_crypto() {
            CRYPTO_FAILURE_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}
