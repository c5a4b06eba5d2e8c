// Device key pair management

use crate::crypto::{self, CryptoError};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

/// Key size generated by `DeviceKeys::generate`
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Device RSA key pair
#[derive(Clone)]
pub struct DeviceKeys {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl DeviceKeys {
    /// Generate a new random key pair
    pub fn generate(bits: usize) -> Result<Self, CryptoError> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, bits)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::from_private_key(private_key))
    }

    /// Wrap an existing private key
    pub fn from_private_key(private_key: RsaPrivateKey) -> Self {
        let public_key = RsaPublicKey::from(&private_key);
        Self {
            private_key,
            public_key,
        }
    }

    /// Parse a PEM private key: PKCS#8 (`BEGIN PRIVATE KEY`) first, then
    /// PKCS#1 (`BEGIN RSA PRIVATE KEY`)
    pub fn from_pem(pem: &str) -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|pkcs8_err| {
                RsaPrivateKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
                    CryptoError::InvalidKey(format!(
                        "not PKCS#8 ({}) or PKCS#1 ({})",
                        pkcs8_err, pkcs1_err
                    ))
                })
            })?;
        Ok(Self::from_private_key(private_key))
    }

    /// Private key as PKCS#8 PEM (wiped on drop)
    pub fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>, CryptoError> {
        self.private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Public key as SPKI PEM
    pub fn public_key_pem(&self) -> Result<String, CryptoError> {
        self.public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Public key
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    /// Sign data, returning base64
    pub fn sign(&self, data: &[u8]) -> Result<String, CryptoError> {
        let signature = crypto::sign_pss_sha256(&self.private_key, data)?;
        Ok(crypto::encode_base64(&signature))
    }

    /// Decrypt a base64 OAEP ciphertext
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let ciphertext = crypto::decode_base64(ciphertext_b64)?;
        crypto::decrypt_oaep_sha256(&self.private_key, &ciphertext)
    }
}

/// Parse a PEM public key: SPKI (`BEGIN PUBLIC KEY`) first, then PKCS#1
pub fn public_key_from_pem(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_public_key_pem(pem).or_else(|spki_err| {
        RsaPublicKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
            CryptoError::InvalidKey(format!(
                "not SPKI ({}) or PKCS#1 ({})",
                spki_err, pkcs1_err
            ))
        })
    })
}

/// Verify a base64 signature over `data`
pub fn verify_signature(
    public_key: &RsaPublicKey,
    data: &[u8],
    signature_b64: &str,
) -> Result<(), CryptoError> {
    let signature = crypto::decode_base64(signature_b64)?;
    crypto::verify_pss_sha256(public_key, data, &signature)
}
