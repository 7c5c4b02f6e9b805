//! Accumulator Membership Proofs
//!
//! A one-out-of-many Schnorr proof (Cramer-Damgard-Schoenmakers OR
//! composition). For every member `C_i` the statement is
//! `C_i - g * serial = h * r`; the prover knows `r` for exactly one member,
//! simulates the rest, and the verifier cannot tell which branch was real.
//! The serial number is public so the network can detect reuse.

use ark_bn254::{Fr, G1Projective};
use ark_ff::{PrimeField, Zero};
use ark_std::UniformRand;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};

use crate::consensus_params::domains;
use crate::crypto::{
    point_from_bytes, point_to_bytes, scalar_from_bytes, scalar_to_bytes, AccumulatorWitness,
    CoinCommitment, CoinCommitmentScheme, CoinSecret, CryptoError, CryptoResult, SerialNumber,
};
use crate::denomination::Denomination;

/// Zero-knowledge proof that a revealed serial belongs to one accumulated coin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipProof {
    pub denomination: Denomination,
    pub serial: SerialNumber,
    /// Accumulated commitments, in fold order
    pub members: Vec<CoinCommitment>,
    pub challenges: Vec<[u8; 32]>,
    pub responses: Vec<[u8; 32]>,
}

impl MembershipProof {
    /// Build a proof for the coin opened by `secret`
    pub fn create(
        scheme: &CoinCommitmentScheme,
        witness: &AccumulatorWitness,
        secret: &CoinSecret,
        message: &[u8; 32],
    ) -> CryptoResult<Self> {
        let own = scheme.commit(secret)?;
        let index = witness
            .members
            .iter()
            .position(|member| *member == own)
            .ok_or_else(|| CryptoError::ProofFailed("coin is not part of the witness".to_string()))?;

        let serial = scheme.serial_scalar(secret)?;
        let randomness = scheme.randomness_scalar(secret)?;
        let serial_bytes = SerialNumber(scalar_to_bytes(&serial)?);
        let statements = statements(scheme, &witness.members, &serial)?;

        let mut rng = rand::thread_rng();
        let count = statements.len();
        let mut challenges = vec![Fr::zero(); count];
        let mut responses = vec![Fr::zero(); count];
        let mut nonces = Vec::with_capacity(count);

        let blinding = Fr::rand(&mut rng);
        for (i, statement) in statements.iter().enumerate() {
            if i == index {
                nonces.push(scheme.h * blinding);
                continue;
            }
            let challenge = Fr::rand(&mut rng);
            let response = Fr::rand(&mut rng);
            challenges[i] = challenge;
            responses[i] = response;
            nonces.push(scheme.h * response - *statement * challenge);
        }

        let total = challenge_scalar(
            witness.denomination,
            &serial_bytes,
            &witness.members,
            &nonces,
            message,
        )?;
        let simulated: Fr = challenges
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, c)| *c)
            .sum();
        challenges[index] = total - simulated;
        responses[index] = blinding + challenges[index] * randomness;

        Ok(Self {
            denomination: witness.denomination,
            serial: serial_bytes,
            members: witness.members.clone(),
            challenges: challenges.iter().map(scalar_to_bytes).collect::<CryptoResult<_>>()?,
            responses: responses.iter().map(scalar_to_bytes).collect::<CryptoResult<_>>()?,
        })
    }

    /// Check the OR-composition against the proof's own member list
    pub fn verify_ring(&self, scheme: &CoinCommitmentScheme, message: &[u8; 32]) -> CryptoResult<bool> {
        let count = self.members.len();
        if count == 0 || self.challenges.len() != count || self.responses.len() != count {
            return Ok(false);
        }

        let serial = scalar_from_bytes(&self.serial.0)?;
        let statements = statements(scheme, &self.members, &serial)?;

        let mut nonces = Vec::with_capacity(count);
        let mut sum = Fr::zero();
        for ((statement, challenge), response) in statements.iter().zip(&self.challenges).zip(&self.responses) {
            let challenge = scalar_from_bytes(challenge)?;
            let response = scalar_from_bytes(response)?;
            nonces.push(scheme.h * response - *statement * challenge);
            sum += challenge;
        }

        let expected = challenge_scalar(self.denomination, &self.serial, &self.members, &nonces, message)?;
        Ok(sum == expected)
    }

    /// Serialized proof blob
    pub fn to_bytes(&self) -> CryptoResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CryptoError::SerializationError(e.to_string()))
    }

    /// Parse a serialized proof blob
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        bincode::deserialize(bytes).map_err(|e| CryptoError::SerializationError(e.to_string()))
    }
}

fn statements(
    scheme: &CoinCommitmentScheme,
    members: &[CoinCommitment],
    serial: &Fr,
) -> CryptoResult<Vec<G1Projective>> {
    let serial_point = scheme.g * *serial;
    members
        .iter()
        .map(|member| Ok(point_from_bytes(&member.0)? - serial_point))
        .collect()
}

fn challenge_scalar(
    denomination: Denomination,
    serial: &SerialNumber,
    members: &[CoinCommitment],
    nonces: &[G1Projective],
    message: &[u8; 32],
) -> CryptoResult<Fr> {
    let mut hasher = Sha512::new();
    hasher.update(domains::SPEND_CHALLENGE);
    hasher.update(denomination.id().to_be_bytes());
    hasher.update(serial.0);
    hasher.update(message);
    for member in members {
        hasher.update(member.0);
    }
    for nonce in nonces {
        hasher.update(point_to_bytes(nonce)?);
    }
    Ok(Fr::from_le_bytes_mod_order(&hasher.finalize()))
}
