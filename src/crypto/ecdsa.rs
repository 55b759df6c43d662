//! ECDSA signature service
//!
//! secp256k1 ECDSA over the regular hash of the message. Public keys are
//! the 33-byte SEC1 compressed form; signatures travel DER-encoded (at most
//! 72 bytes, so they fit the 1-byte length prefix of the wire format).

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use super::hash_bytes;

/// Signature errors
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Invalid private key")]
    InvalidPrivateKey,
    #[error("Signing failed: {0}")]
    SigningFailed(String),
}

/// 32-byte private key
#[derive(Clone)]
pub struct PrivateKey(SigningKey);

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey([REDACTED])")
    }
}

/// 33-byte compressed public key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(pub [u8; 33]);

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl PrivateKey {
    /// Generate a new random private key
    pub fn generate() -> Self {
        PrivateKey(SigningKey::random(&mut OsRng))
    }

    /// Create from 32 bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, SignatureError> {
        SigningKey::from_slice(bytes)
            .map(PrivateKey)
            .map_err(|_| SignatureError::InvalidPrivateKey)
    }

    /// Get the corresponding compressed public key
    pub fn public_key(&self) -> PublicKey {
        let point = self.0.verifying_key().to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        PublicKey(bytes)
    }

    /// Sign a message, returning the DER-encoded signature
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let digest = hash_bytes(message);
        let signature: Signature = self
            .0
            .sign_prehash(digest.as_bytes())
            .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }

    /// Export to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes().into()
    }
}

/// Generate a fresh keypair
pub fn generate() -> (PrivateKey, PublicKey) {
    let private = PrivateKey::generate();
    let public = private.public_key();
    (private, public)
}

/// Verify a DER signature of `message` under a compressed public key.
/// Malformed keys or signatures simply fail verification.
pub fn verify(message: &[u8], public_key: &[u8; 33], signature: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(signature) else {
        return false;
    };
    let digest = hash_bytes(message);
    verifying_key.verify_prehash(digest.as_bytes(), &signature).is_ok()
}

/// Signature check used by consensus.
///
/// The engine only ever asks "does this signature verify"; production nodes
/// use [`Secp256k1Verifier`], tests may substitute their own.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, message: &[u8], public_key: &[u8; 33], signature: &[u8]) -> bool;
}

/// secp256k1 ECDSA verifier
#[derive(Debug, Clone, Copy, Default)]
pub struct Secp256k1Verifier;

impl SignatureVerifier for Secp256k1Verifier {
    fn verify(&self, message: &[u8], public_key: &[u8; 33], signature: &[u8]) -> bool {
        verify(message, public_key, signature)
    }
}
