//! Cryptographic Primitives Module
//!
//! The opaque cryptographic capability the zerocoin subsystem orchestrates:
//! - Coin secrets, serial numbers and Pedersen coin commitments (BN254)
//! - Order-sensitive accumulator folding and checksums
//! - Accumulator membership proofs that reveal only the serial number

use rand::RngCore;
use sha2::Digest;

pub mod commitments;
pub mod accumulator;
pub mod membership_proof;

// Re-export main types
pub use commitments::*;
pub use accumulator::*;
pub use membership_proof::*;

/// Cryptographic error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("Commitment generation failed: {0}")]
    CommitmentFailed(String),

    #[error("Proof construction failed: {0}")]
    ProofFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for cryptographic operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Cryptographic context for domain separation
#[derive(Debug, Clone)]
pub struct CryptoContext {
    /// Domain separator for this context
    pub domain: [u8; 32],
    /// Context-specific salt
    pub salt: [u8; 32],
}

impl CryptoContext {
    /// Create new cryptographic context
    pub fn new(domain: &str) -> Self {
        let domain_hash = blake2::Blake2s256::digest(domain.as_bytes());
        let mut domain_bytes = [0u8; 32];
        domain_bytes.copy_from_slice(&domain_hash[..32]);

        let salt = blake2::Blake2s256::digest(b"zerocoin-obfuscation-salt");
        let mut salt_bytes = [0u8; 32];
        salt_bytes.copy_from_slice(&salt[..32]);

        Self {
            domain: domain_bytes,
            salt: salt_bytes,
        }
    }

    /// Context for coin secret derivation
    pub fn coin_context() -> Self {
        Self::new("zerocoin-coin")
    }
}

/// Cryptographic utilities
pub struct CryptoUtils;

impl CryptoUtils {
    /// Generate random 32-byte array
    pub fn random_32() -> [u8; 32] {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        bytes
    }

    /// Hash data with SHA-256
    pub fn sha256(data: &[u8]) -> [u8; 32] {
        sha2::Sha256::digest(data).into()
    }

    /// Constant-time comparison of byte arrays
    pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
        use subtle::ConstantTimeEq;
        a.ct_eq(b).into()
    }

    /// Convert bytes to hex string
    pub fn to_hex(bytes: &[u8]) -> String {
        hex::encode(bytes)
    }

    /// HKDF-SHA256 key derivation
    pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], length: usize) -> CryptoResult<Vec<u8>> {
        let hk = hkdf::Hkdf::<sha2::Sha256>::new(Some(salt), ikm);
        let mut okm = vec![0u8; length];
        hk.expand(info, &mut okm)
            .map_err(|e| CryptoError::KeyDerivationFailed(format!("HKDF expand failed: {}", e)))?;
        Ok(okm)
    }
}
