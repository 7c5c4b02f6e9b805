//! Accumulator Capability
//!
//! The contract the ledger and spend builder depend on, and the concrete
//! scheme used by this wallet. Folding is a domain-separated hash chain, so
//! the accumulator value depends on fold order.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::consensus_params::{domain_hash, domains};
use crate::crypto::{
    CoinCommitment, CoinCommitmentScheme, CoinSecret, CryptoResult, CryptoUtils, MembershipProof,
    SerialNumber,
};
use crate::denomination::Denomination;

/// Accumulator value at some point in the fold
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccumulatorValue(pub [u8; 32]);

impl AccumulatorValue {
    /// 32-bit checksum used to reference the value compactly
    pub fn checksum(&self) -> u32 {
        let digest = CryptoUtils::sha256(&self.0);
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }

    /// Constant-time equality
    pub fn ct_eq(&self, other: &AccumulatorValue) -> bool {
        CryptoUtils::constant_time_eq(&self.0, &other.0)
    }

    pub fn to_hex(&self) -> String {
        CryptoUtils::to_hex(&self.0)
    }
}

impl fmt::Debug for AccumulatorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccumulatorValue({})", &self.to_hex()[..16])
    }
}

/// Everything needed to prove membership against one checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorWitness {
    pub denomination: Denomination,
    /// Commitments in fold order
    pub members: Vec<CoinCommitment>,
    /// Value the members fold to
    pub value: AccumulatorValue,
}

/// Opaque cryptographic capability behind mints, checkpoints and spends
pub trait AccumulatorScheme: Send + Sync {
    /// Commitment to a coin secret
    fn commit(&self, secret: &CoinSecret) -> CryptoResult<CoinCommitment>;

    /// Serial number of a coin secret
    fn serial_number(&self, secret: &CoinSecret) -> CryptoResult<SerialNumber>;

    /// Empty accumulator for a denomination
    fn genesis(&self, denomination: Denomination) -> AccumulatorValue;

    /// Fold one commitment into an accumulator
    fn fold(&self, acc: &AccumulatorValue, commitment: &CoinCommitment) -> AccumulatorValue;

    /// Prove that the secret's coin is one of the witness members
    fn prove(
        &self,
        witness: &AccumulatorWitness,
        secret: &CoinSecret,
        message: &[u8; 32],
    ) -> CryptoResult<MembershipProof>;

    /// Verify a membership proof against an accumulator value
    fn verify(&self, acc: &AccumulatorValue, proof: &MembershipProof, message: &[u8; 32]) -> CryptoResult<bool>;

    /// Fold a sequence of commitments starting from genesis
    fn fold_all(&self, denomination: Denomination, commitments: &[CoinCommitment]) -> AccumulatorValue {
        commitments
            .iter()
            .fold(self.genesis(denomination), |acc, c| self.fold(&acc, c))
    }
}

/// Pedersen commitments, hash-chain accumulator, ring membership proofs
#[derive(Debug, Clone, Default)]
pub struct PedersenRingAccumulator {
    pub commitments: CoinCommitmentScheme,
}

impl PedersenRingAccumulator {
    pub fn new() -> Self {
        Self {
            commitments: CoinCommitmentScheme::new(),
        }
    }
}

impl AccumulatorScheme for PedersenRingAccumulator {
    fn commit(&self, secret: &CoinSecret) -> CryptoResult<CoinCommitment> {
        self.commitments.commit(secret)
    }

    fn serial_number(&self, secret: &CoinSecret) -> CryptoResult<SerialNumber> {
        self.commitments.serial_number(secret)
    }

    fn genesis(&self, denomination: Denomination) -> AccumulatorValue {
        AccumulatorValue(domain_hash(
            &domains::ACCUMULATOR_GENESIS,
            &[&denomination.id().to_be_bytes()],
        ))
    }

    fn fold(&self, acc: &AccumulatorValue, commitment: &CoinCommitment) -> AccumulatorValue {
        AccumulatorValue(domain_hash(&domains::ACCUMULATOR_FOLD, &[&acc.0, &commitment.0]))
    }

    fn prove(
        &self,
        witness: &AccumulatorWitness,
        secret: &CoinSecret,
        message: &[u8; 32],
    ) -> CryptoResult<MembershipProof> {
        MembershipProof::create(&self.commitments, witness, secret, message)
    }

    fn verify(&self, acc: &AccumulatorValue, proof: &MembershipProof, message: &[u8; 32]) -> CryptoResult<bool> {
        let refolded = self.fold_all(proof.denomination, &proof.members);
        if !refolded.ct_eq(acc) {
            return Ok(false);
        }
        proof.verify_ring(&self.commitments, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commitments(n: u8) -> Vec<CoinCommitment> {
        (0..n).map(|i| CoinCommitment([i + 1; 32])).collect()
    }

    #[test]
    fn test_fold_is_order_sensitive() {
        let scheme = PedersenRingAccumulator::new();
        let members = commitments(3);
        let mut swapped = members.clone();
        swapped.swap(0, 2);

        let a = scheme.fold_all(Denomination::OneHundred, &members);
        let b = scheme.fold_all(Denomination::OneHundred, &swapped);
        assert_ne!(a, b);
        assert_eq!(a, scheme.fold_all(Denomination::OneHundred, &members));
    }

    #[test]
    fn test_genesis_per_denomination() {
        let scheme = PedersenRingAccumulator::new();
        assert_ne!(scheme.genesis(Denomination::One), scheme.genesis(Denomination::Five));
    }

    #[test]
    fn test_checksum_stable() {
        let value = AccumulatorValue([9u8; 32]);
        assert_eq!(value.checksum(), value.checksum());
        assert_ne!(value.checksum(), AccumulatorValue([8u8; 32]).checksum());
    }
}
