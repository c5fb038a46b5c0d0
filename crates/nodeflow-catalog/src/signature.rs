//! Ed25519 signing and verification for catalog contributions.
//!
//! A publisher signs the fingerprint of its command list; consumers verify
//! the signature against the embedded public key before trusting any
//! command. Wire encoding is base64 for both signatures and public keys.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

use crate::error::{CatalogError, Result};
use crate::fingerprint::Fingerprint;

/// A publisher's signing key pair.
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    /// Generate a new random key pair.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// The base64-encoded public key.
    #[must_use]
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign a fingerprint, returning the base64-encoded signature.
    #[must_use]
    pub fn sign(&self, fingerprint: &Fingerprint) -> String {
        let signature = self.signing_key.sign(fingerprint.as_hex().as_bytes());
        BASE64.encode(signature.to_bytes())
    }
}

impl std::fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("public_key", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

/// Verify a base64 signature over a fingerprint.
///
/// Any decoding or verification failure is a [`CatalogError::Signature`].
pub fn verify_signature(
    fingerprint: &Fingerprint,
    signature_base64: &str,
    public_key_base64: &str,
) -> Result<()> {
    let key_bytes: [u8; 32] = BASE64
        .decode(public_key_base64)
        .map_err(|e| CatalogError::Signature(format!("invalid public key encoding: {e}")))?
        .try_into()
        .map_err(|v: Vec<u8>| {
            CatalogError::Signature(format!("public key must be 32 bytes, got {}", v.len()))
        })?;
    let verifying_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| CatalogError::Signature(format!("invalid public key: {e}")))?;

    let signature_bytes: [u8; 64] = BASE64
        .decode(signature_base64)
        .map_err(|e| CatalogError::Signature(format!("invalid signature encoding: {e}")))?
        .try_into()
        .map_err(|v: Vec<u8>| {
            CatalogError::Signature(format!("signature must be 64 bytes, got {}", v.len()))
        })?;
    let signature = ed25519_dalek::Signature::from_bytes(&signature_bytes);

    verifying_key
        .verify(fingerprint.as_hex().as_bytes(), &signature)
        .map_err(|e| CatalogError::Signature(format!("signature verification failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fingerprint() -> Fingerprint {
        Fingerprint::compute(&json!(["cmd.one", "cmd.two"])).unwrap()
    }

    #[test]
    fn test_sign_and_verify() {
        let keypair = SigningKeyPair::generate();
        let fp = fingerprint();
        let signature = keypair.sign(&fp);

        verify_signature(&fp, &signature, &keypair.public_key_base64()).unwrap();
    }

    #[test]
    fn test_verify_rejects_other_fingerprint() {
        let keypair = SigningKeyPair::generate();
        let signature = keypair.sign(&fingerprint());
        let other = Fingerprint::compute(&json!(["cmd.three"])).unwrap();

        let err = verify_signature(&other, &signature, &keypair.public_key_base64()).unwrap_err();
        assert!(matches!(err, CatalogError::Signature(_)));
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let keypair = SigningKeyPair::generate();
        let intruder = SigningKeyPair::generate();
        let fp = fingerprint();
        let signature = keypair.sign(&fp);

        let err = verify_signature(&fp, &signature, &intruder.public_key_base64()).unwrap_err();
        assert!(matches!(err, CatalogError::Signature(_)));
    }

    #[test]
    fn test_verify_rejects_tampered_signature() {
        let keypair = SigningKeyPair::generate();
        let fp = fingerprint();
        let mut signature = keypair.sign(&fp);
        // Flip one character.
        let flipped = if signature.starts_with('A') { "B" } else { "A" };
        signature.replace_range(0..1, flipped);

        let err = verify_signature(&fp, &signature, &keypair.public_key_base64()).unwrap_err();
        assert!(matches!(err, CatalogError::Signature(_)));
    }

    #[test]
    fn test_verify_rejects_garbage_encodings() {
        let fp = fingerprint();
        assert!(verify_signature(&fp, "!!not-base64!!", "also-not").is_err());
        assert!(verify_signature(&fp, &BASE64.encode([0_u8; 10]), &BASE64.encode([0_u8; 32])).is_err());
    }
}
