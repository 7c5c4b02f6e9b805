//! Coin Commitments
//!
//! Pedersen commitments over BN254 G1: `C = g * serial + h * randomness`,
//! where both scalars are derived from a 32-byte coin secret. The serial is
//! revealed at spend time; the randomness never leaves the wallet.

use ark_bn254::{Fq, Fr, G1Affine, G1Projective};
use ark_ec::{AffineRepr, CurveGroup, Group};
use ark_ff::{Field, PrimeField};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::consensus_params::{domain_hash, domains};
use crate::crypto::{CryptoContext, CryptoError, CryptoResult, CryptoUtils};

/// Secret from which a coin's serial number and randomness derive
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinSecret(pub [u8; 32]);

impl CoinSecret {
    /// Fresh random secret
    pub fn random() -> Self {
        Self(CryptoUtils::random_32())
    }
}

impl fmt::Debug for CoinSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CoinSecret(..)")
    }
}

/// Serial number, revealed in the clear when a coin is spent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SerialNumber(pub [u8; 32]);

impl SerialNumber {
    pub fn to_hex(&self) -> String {
        CryptoUtils::to_hex(&self.0)
    }
}

/// Compressed G1 commitment to a coin
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CoinCommitment(pub [u8; 32]);

impl CoinCommitment {
    pub fn to_hex(&self) -> String {
        CryptoUtils::to_hex(&self.0)
    }
}

/// Pedersen commitment scheme for coins
#[derive(Debug, Clone)]
pub struct CoinCommitmentScheme {
    /// Generator for serial numbers
    pub g: G1Projective,
    /// Generator for randomness, with unknown discrete log relative to `g`
    pub h: G1Projective,
    context: CryptoContext,
}

impl Default for CoinCommitmentScheme {
    fn default() -> Self {
        Self::new()
    }
}

impl CoinCommitmentScheme {
    /// Create the scheme with the standard generators
    pub fn new() -> Self {
        Self {
            g: G1Projective::generator(),
            h: hash_to_g1(b"zerocoin-randomness-generator"),
            context: CryptoContext::coin_context(),
        }
    }

    /// Serial number scalar of a coin secret
    pub fn serial_scalar(&self, secret: &CoinSecret) -> CryptoResult<Fr> {
        self.derive_scalar(secret, &domains::SERIAL)
    }

    /// Randomness scalar of a coin secret
    pub fn randomness_scalar(&self, secret: &CoinSecret) -> CryptoResult<Fr> {
        self.derive_scalar(secret, &domains::RANDOMNESS)
    }

    /// Public serial number of a coin secret
    pub fn serial_number(&self, secret: &CoinSecret) -> CryptoResult<SerialNumber> {
        Ok(SerialNumber(scalar_to_bytes(&self.serial_scalar(secret)?)?))
    }

    /// Commit to a coin secret
    pub fn commit(&self, secret: &CoinSecret) -> CryptoResult<CoinCommitment> {
        let serial = self.serial_scalar(secret)?;
        let randomness = self.randomness_scalar(secret)?;
        let point = self.g * serial + self.h * randomness;
        Ok(CoinCommitment(point_to_bytes(&point)?))
    }

    /// Check that a commitment opens to the given secret
    pub fn verify_opening(&self, commitment: &CoinCommitment, secret: &CoinSecret) -> CryptoResult<bool> {
        let expected = self.commit(secret)?;
        Ok(CryptoUtils::constant_time_eq(&expected.0, &commitment.0))
    }

    fn derive_scalar(&self, secret: &CoinSecret, label: &[u8; 4]) -> CryptoResult<Fr> {
        let wide = CryptoUtils::hkdf_sha256(&secret.0, &self.context.salt, label, 64)?;
        Ok(Fr::from_le_bytes_mod_order(&wide))
    }
}

/// Try-and-increment hash onto BN254 G1 (cofactor 1)
pub fn hash_to_g1(seed: &[u8]) -> G1Projective {
    let mut counter: u32 = 0;
    loop {
        let digest = domain_hash(&domains::COMMITMENT_GENERATOR, &[seed, &counter.to_be_bytes()]);
        let x = Fq::from_le_bytes_mod_order(&digest);
        let rhs = x.square() * x + Fq::from(3u64);
        if let Some(y) = rhs.sqrt() {
            let point = G1Affine::new_unchecked(x, y);
            if point.is_on_curve() && point.is_in_correct_subgroup_assuming_on_curve() && !point.is_zero() {
                return point.into_group();
            }
        }
        counter = counter.wrapping_add(1);
    }
}

/// Compressed encoding of a G1 point
pub fn point_to_bytes(point: &G1Projective) -> CryptoResult<[u8; 32]> {
    let mut buf = Vec::with_capacity(32);
    point
        .into_affine()
        .serialize_compressed(&mut buf)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    to_array(&buf)
}

/// Decode a compressed G1 point
pub fn point_from_bytes(bytes: &[u8; 32]) -> CryptoResult<G1Projective> {
    let affine = G1Affine::deserialize_compressed(&bytes[..])
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    Ok(affine.into_group())
}

/// Canonical encoding of a scalar
pub fn scalar_to_bytes(scalar: &Fr) -> CryptoResult<[u8; 32]> {
    let mut buf = Vec::with_capacity(32);
    scalar
        .serialize_compressed(&mut buf)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    to_array(&buf)
}

/// Decode a canonical scalar
pub fn scalar_from_bytes(bytes: &[u8; 32]) -> CryptoResult<Fr> {
    Fr::deserialize_compressed(&bytes[..]).map_err(|e| CryptoError::SerializationError(e.to_string()))
}

fn to_array(buf: &[u8]) -> CryptoResult<[u8; 32]> {
    <[u8; 32]>::try_from(buf)
        .map_err(|_| CryptoError::SerializationError(format!("expected 32 bytes, got {}", buf.len())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commitment_is_deterministic() {
        let scheme = CoinCommitmentScheme::new();
        let secret = CoinSecret::random();

        let a = scheme.commit(&secret).unwrap();
        let b = scheme.commit(&secret).unwrap();
        assert_eq!(a, b);
        assert!(scheme.verify_opening(&a, &secret).unwrap());
        assert!(!scheme.verify_opening(&a, &CoinSecret::random()).unwrap());
    }

    #[test]
    fn test_serial_differs_from_commitment() {
        let scheme = CoinCommitmentScheme::new();
        let secret = CoinSecret::random();
        let serial = scheme.serial_number(&secret).unwrap();
        let commitment = scheme.commit(&secret).unwrap();
        assert_ne!(serial.0, commitment.0);
    }

    #[test]
    fn test_point_roundtrip() {
        let scheme = CoinCommitmentScheme::new();
        let bytes = point_to_bytes(&scheme.h).unwrap();
        assert_eq!(point_from_bytes(&bytes).unwrap(), scheme.h);
        assert_ne!(scheme.g, scheme.h);
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = CoinSecret([7u8; 32]);
        assert_eq!(format!("{:?}", secret), "CoinSecret(..)");
    }
}
