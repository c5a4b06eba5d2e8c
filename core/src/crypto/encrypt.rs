// Payload confidentiality: RSA-OAEP with SHA-256
//
// The pairing client encrypts the WiFi credential JSON to the device's public
// key; only the device's private key can recover it. A 2048-bit key admits at
// most 190 plaintext bytes, which the credential document fits comfortably.

use super::CryptoError;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Encrypt `plaintext` to `public_key`
pub fn encrypt_oaep_sha256(
    public_key: &RsaPublicKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), plaintext)
        .map_err(|e| CryptoError::Encrypt(e.to_string()))
}

/// Decrypt `ciphertext` with `private_key`; the plaintext is wiped on drop
pub fn decrypt_oaep_sha256(
    private_key: &RsaPrivateKey,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), ciphertext)
        .map(Zeroizing::new)
        .map_err(|e| CryptoError::Decrypt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::test_keys;

    #[test]
    fn test_encrypt_decrypt_recovers_plaintext() {
        let plaintext = br#"{"SSID":"lab","Password":"hunter2","NCBIP":"10.0.0.5"}"#;
        let ciphertext = encrypt_oaep_sha256(&test_keys::public_key(), plaintext).unwrap();

        assert_eq!(ciphertext.len(), 256);
        assert_ne!(&ciphertext[..], &plaintext[..]);

        let recovered = decrypt_oaep_sha256(&test_keys::private_key(), &ciphertext).unwrap();
        assert_eq!(&recovered[..], &plaintext[..]);
    }

    #[test]
    fn test_encryption_is_randomized() {
        let a = encrypt_oaep_sha256(&test_keys::public_key(), b"same").unwrap();
        let b = encrypt_oaep_sha256(&test_keys::public_key(), b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_decrypt_rejects_tampered_ciphertext() {
        let mut ciphertext = encrypt_oaep_sha256(&test_keys::public_key(), b"secret").unwrap();
        ciphertext[10] ^= 0xFF;
        assert!(matches!(
            decrypt_oaep_sha256(&test_keys::private_key(), &ciphertext),
            Err(CryptoError::Decrypt(_))
        ));
    }

    #[test]
    fn test_plaintext_too_long_for_key() {
        let oversized = vec![b'x'; 191];
        assert!(matches!(
            encrypt_oaep_sha256(&test_keys::public_key(), &oversized),
            Err(CryptoError::Encrypt(_))
        ));
    }
}
