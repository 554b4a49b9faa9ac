//! Package signature verification.
//!
//! A package signature is the base64 encoding of an Ed25519 signature over
//! the package's SHA-256 digest. Trusted public keys are registered by
//! fingerprint (the SHA-256 of the key bytes, hex-encoded). Unverified
//! packages are only accepted when the caller explicitly passes
//! `skip_verification`.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Errors from signature handling.
#[derive(Debug, Clone, Error)]
pub enum SignatureError {
    /// Trusted keys are configured but the package carries no signature.
    #[error("package is unsigned and verification was not skipped")]
    Missing,

    /// The signature is not valid base64 or has the wrong length.
    #[error("malformed signature: {0}")]
    BadEncoding(String),

    /// No registered trusted key verifies the signature.
    #[error("signature does not verify against any trusted key")]
    Unverified,
}

/// Hex-encoded SHA-256 fingerprint of a public key.
pub fn fingerprint(key: &VerifyingKey) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// SHA-256 over arbitrary bytes, for package integrity.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Signs a package digest, producing the base64 signature carried in the
/// manifest. Used by packaging tooling and tests.
pub fn sign_digest(key: &SigningKey, digest: &[u8]) -> String {
    BASE64.encode(key.sign(digest).to_bytes())
}

/// The set of trusted signing keys, keyed by fingerprint.
#[derive(Default)]
pub struct TrustedKeys {
    keys: RwLock<HashMap<String, VerifyingKey>>,
}

impl TrustedKeys {
    /// An empty key set. With no keys registered, verification is not
    /// enforced.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a trusted key; returns its fingerprint.
    pub fn register(&self, key: VerifyingKey) -> String {
        let fp = fingerprint(&key);
        debug!(fingerprint = %fp, "Trusted key registered");
        self.keys.write().insert(fp.clone(), key);
        fp
    }

    /// Whether any keys are registered.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Verifies a base64 signature over `digest` against the registered
    /// keys. Returns the fingerprint of the verifying key.
    pub fn verify(&self, digest: &[u8], signature_b64: &str) -> Result<String, SignatureError> {
        let bytes = BASE64
            .decode(signature_b64)
            .map_err(|e| SignatureError::BadEncoding(e.to_string()))?;
        let signature = Signature::from_slice(&bytes)
            .map_err(|e| SignatureError::BadEncoding(e.to_string()))?;

        let keys = self.keys.read();
        for (fp, key) in keys.iter() {
            if key.verify(digest, &signature).is_ok() {
                return Ok(fp.clone());
            }
        }
        Err(SignatureError::Unverified)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    #[test]
    fn test_round_trip_verification() {
        let signing = test_key();
        let keys = TrustedKeys::new();
        let fp = keys.register(signing.verifying_key());

        let digest = sha256(b"package bytes");
        let signature = sign_digest(&signing, &digest);
        assert_eq!(keys.verify(&digest, &signature).unwrap(), fp);
    }

    #[test]
    fn test_wrong_key_rejected() {
        let signing = test_key();
        let other = SigningKey::from_bytes(&[9u8; 32]);
        let keys = TrustedKeys::new();
        keys.register(other.verifying_key());

        let digest = sha256(b"package bytes");
        let signature = sign_digest(&signing, &digest);
        assert!(matches!(
            keys.verify(&digest, &signature),
            Err(SignatureError::Unverified)
        ));
    }

    #[test]
    fn test_tampered_digest_rejected() {
        let signing = test_key();
        let keys = TrustedKeys::new();
        keys.register(signing.verifying_key());

        let signature = sign_digest(&signing, &sha256(b"original"));
        assert!(matches!(
            keys.verify(&sha256(b"tampered"), &signature),
            Err(SignatureError::Unverified)
        ));
    }

    #[test]
    fn test_malformed_signature() {
        let keys = TrustedKeys::new();
        keys.register(test_key().verifying_key());
        assert!(matches!(
            keys.verify(&sha256(b"x"), "not base64 !!!"),
            Err(SignatureError::BadEncoding(_))
        ));
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let key = test_key().verifying_key();
        assert_eq!(fingerprint(&key), fingerprint(&key));
        assert_eq!(fingerprint(&key).len(), 64);
    }
}
