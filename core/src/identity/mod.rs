// Device identity: stable device id plus the RSA key pair that signs
// responses and decrypts provisioning secrets

mod keys;
mod store;

pub use keys::{public_key_from_pem, verify_signature, DeviceKeys, DEFAULT_KEY_BITS};
pub use store::KeyStore;

use crate::crypto::CryptoError;
use rsa::RsaPublicKey;
use std::path::PathBuf;
use thiserror::Error;
use zeroize::Zeroizing;

/// Errors for identity loading and storage
#[derive(Error, Debug, Clone)]
pub enum IdentityError {
    #[error("Private key not found: {0}")]
    KeyNotFound(PathBuf),
    #[error("Key file I/O failed: {0}")]
    Io(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Identity of this device for the lifetime of the process.
///
/// The key pair is optional: a device that has not been issued a key can
/// still answer plaintext commands, while every signed response fails with
/// `CryptoError::KeyUnavailable` and is reported to the peer as such.
#[derive(Clone)]
pub struct DeviceIdentity {
    device_id: Option<String>,
    keys: Option<DeviceKeys>,
}

impl DeviceIdentity {
    /// Create an identity from parts
    pub fn new(device_id: Option<String>, keys: Option<DeviceKeys>) -> Self {
        let device_id = device_id.filter(|did| !did.trim().is_empty());
        Self { device_id, keys }
    }

    /// Load the key for `device_id` from `store`.
    ///
    /// A missing or unreadable key is logged and yields an identity without
    /// keys rather than an error.
    pub fn load(device_id: Option<String>, store: &KeyStore) -> Self {
        let keys = match store.load(device_id.as_deref()) {
            Ok(keys) => {
                tracing::info!("🔑 Loaded device key from {}", store.key_path(device_id.as_deref()).display());
                Some(keys)
            }
            Err(e) => {
                tracing::warn!("🔑 Device key unavailable, signed responses will fail: {}", e);
                None
            }
        };
        Self::new(device_id, keys)
    }

    /// Stable device id (DID)
    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Whether a private key is loaded
    pub fn has_keys(&self) -> bool {
        self.keys.is_some()
    }

    /// Public key, when loaded
    pub fn public_key(&self) -> Option<&RsaPublicKey> {
        self.keys.as_ref().map(|k| k.public_key())
    }

    /// Sign data with the device key, returning base64
    pub fn sign(&self, data: &[u8]) -> Result<String, CryptoError> {
        match &self.keys {
            Some(keys) => keys.sign(data),
            None => Err(CryptoError::KeyUnavailable),
        }
    }

    /// Decrypt a base64 payload encrypted to the device public key
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        match &self.keys {
            Some(keys) => keys.decrypt(ciphertext_b64),
            None => Err(CryptoError::KeyUnavailable),
        }
    }
}

impl std::fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("has_keys", &self.has_keys())
            .finish()
    }
}
