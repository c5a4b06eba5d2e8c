// Cryptography module: RSA request decryption and response signing
//
// Requests carrying secrets are RSA-OAEP(SHA-256) encrypted to the device's
// public key; every response payload is RSA-PSS(SHA-256) signed with the
// device's private key. Both travel as standard base64.

pub mod encrypt;
pub mod signing;

pub use encrypt::{decrypt_oaep_sha256, encrypt_oaep_sha256};
pub use signing::{sign_pss_sha256, verify_pss_sha256};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

/// Errors for cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Device private key is not available")]
    KeyUnavailable,
    #[error("Invalid key: {0}")]
    InvalidKey(String),
    #[error("Invalid base64: {0}")]
    Encoding(String),
    #[error("Decryption failed: {0}")]
    Decrypt(String),
    #[error("Encryption failed: {0}")]
    Encrypt(String),
    #[error("Signing failed: {0}")]
    Sign(String),
    #[error("Signature verification failed")]
    BadSignature,
}

/// Decode a standard base64 field
pub fn decode_base64(input: &str) -> Result<Vec<u8>, CryptoError> {
    STANDARD
        .decode(input.trim())
        .map_err(|e| CryptoError::Encoding(e.to_string()))
}

/// Encode bytes as standard base64
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}
