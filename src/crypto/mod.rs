//! Cryptography module - BLAKE3 hashing, ECDSA signatures, Merkle trees

mod hash;
mod merkle;
pub mod ecdsa;

pub use hash::*;
pub use merkle::*;
pub use ecdsa::{PrivateKey, PublicKey, Secp256k1Verifier, SignatureError, SignatureVerifier};
