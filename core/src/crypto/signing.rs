// Response authentication: RSA-PSS with SHA-256

use super::CryptoError;
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

/// Sign `data` with the device private key
pub fn sign_pss_sha256(private_key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let signing_key = BlindedSigningKey::<Sha256>::new(private_key.clone());
    let mut rng = rand::thread_rng();
    let signature = signing_key
        .try_sign_with_rng(&mut rng, data)
        .map_err(|e| CryptoError::Sign(e.to_string()))?;
    Ok(signature.to_vec())
}

/// Verify a PSS signature over `data`
pub fn verify_pss_sha256(
    public_key: &RsaPublicKey,
    data: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::<Sha256>::new(public_key.clone());
    let signature = Signature::try_from(signature).map_err(|_| CryptoError::BadSignature)?;
    verifying_key
        .verify(data, &signature)
        .map_err(|_| CryptoError::BadSignature)
}
