//! Spend Proofs
//!
//! Builds and verifies zero-knowledge spends of accumulated mints, keeps the
//! registry of accepted serial numbers, and selects which mints fund a spend.

use std::fmt;
use std::sync::Arc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::consensus_params::zerocoin::{MAX_SECURITY_LEVEL, MAX_SPENDS_PER_TRANSACTION, MIN_SECURITY_LEVEL};
use crate::consensus_params::{domain_hash, domains, generate_txid, Amount};
use crate::crypto::{AccumulatorScheme, CryptoUtils, MembershipProof, SerialNumber};
use crate::denomination::{self, Denomination, DenominationCounts};
use crate::zerocoin::{
    AccumulatorCheckpoint, AccumulatorLedger, AccumulatorSnapshot, KeyStoreError, LedgerError, MintRecord, WalletKeyStore,
};

/// Spend error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SpendError {
    #[error("Wallet is locked")]
    WalletLocked,

    #[error("Proof construction failed: {0}")]
    ProofConstructionFailed(String),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { requested: Amount, available: Amount },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Amount),

    #[error("Serial number {0} has already been spent")]
    DoubleSpend(String),

    #[error("Spend needs {needed} coins, at most {max} allowed")]
    TooManySpends { needed: usize, max: usize },

    #[error("Mint {0} is not confirmed or not mature")]
    MintNotMature(String),

    #[error("Mint {0} is not in the accumulator witness")]
    InvalidWitness(String),

    #[error("Invalid coin: {0}")]
    InvalidCoin(String),

    #[error("Spend proof does not verify: {0}")]
    InvalidProof(String),

    #[error("Denomination {denomination} has no matching accumulator checkpoint at height {height}")]
    UnrecognizedCheckpoint { denomination: Denomination, height: u64 },

    #[error("Denomination {0} is halted pending resynchronization")]
    Halted(Denomination),

    #[error("Security level {0} is outside 1..=100")]
    SecurityLevelOutOfRange(u8),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<KeyStoreError> for SpendError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::Locked => SpendError::WalletLocked,
            KeyStoreError::UnknownSerial(serial) => SpendError::InvalidCoin(format!("no secret for {}", serial)),
        }
    }
}

pub type SpendResult<T> = Result<T, SpendError>;

/// Recipient the spend pays to
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination(pub [u8; 32]);

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Destination({})", &CryptoUtils::to_hex(&self.0)[..16])
    }
}

/// Message a spend proof is bound to, so it cannot be redirected
pub fn spend_message(checkpoint: &AccumulatorCheckpoint, security_level: u8, destination: &Destination) -> [u8; 32] {
    domain_hash(
        &domains::SPEND_MESSAGE,
        &[
            &checkpoint.denomination.id().to_be_bytes(),
            &checkpoint.block_height.to_be_bytes(),
            &checkpoint.accumulator_value.0,
            &[security_level],
            &destination.0,
        ],
    )
}

/// A serial-revealing proof that one accumulated coin is being spent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendProof {
    pub serial_number: SerialNumber,
    pub denomination: Denomination,
    pub accumulator_checkpoint_used: AccumulatorCheckpoint,
    pub proof_blob: Vec<u8>,
    pub security_level: u8,
    pub destination: Destination,
}

impl SpendProof {
    /// Check that the checkpoint the proof names is the one the ledger holds
    pub fn verify_checkpoint(&self, ledger: &AccumulatorLedger) -> SpendResult<()> {
        let used = &self.accumulator_checkpoint_used;
        let unrecognized = SpendError::UnrecognizedCheckpoint {
            denomination: used.denomination,
            height: used.block_height,
        };
        match ledger.checkpoint(used.denomination, used.block_height) {
            Some(known) if known.accumulator_value.ct_eq(&used.accumulator_value) => Ok(()),
            _ => Err(unrecognized),
        }
    }

    /// Check the proof against the checkpoint it names
    pub fn verify(&self, scheme: &dyn AccumulatorScheme) -> SpendResult<()> {
        let checkpoint = &self.accumulator_checkpoint_used;
        if checkpoint.denomination != self.denomination {
            return Err(SpendError::InvalidProof("checkpoint denomination mismatch".to_string()));
        }

        let proof = MembershipProof::from_bytes(&self.proof_blob)
            .map_err(|e| SpendError::InvalidProof(e.to_string()))?;
        if proof.serial != self.serial_number || proof.denomination != self.denomination {
            return Err(SpendError::InvalidProof("proof does not match the revealed serial".to_string()));
        }

        let message = spend_message(checkpoint, self.security_level, &self.destination);
        match scheme.verify(&checkpoint.accumulator_value, &proof, &message) {
            Ok(true) => Ok(()),
            Ok(false) => Err(SpendError::InvalidProof("accumulator witness does not verify".to_string())),
            Err(e) => Err(SpendError::InvalidProof(e.to_string())),
        }
    }
}

/// Constructs spend proofs from the wallet's own mints
pub struct SpendProofBuilder {
    scheme: Arc<dyn AccumulatorScheme>,
    keystore: Arc<WalletKeyStore>,
}

impl SpendProofBuilder {
    pub fn new(scheme: Arc<dyn AccumulatorScheme>, keystore: Arc<WalletKeyStore>) -> Self {
        Self { scheme, keystore }
    }

    /// Build and self-check a spend proof for `mint`.
    ///
    /// Construction is deterministic in its inputs apart from the proof's
    /// own randomness, so failures are reported rather than retried.
    pub fn build_proof(
        &self,
        mint: &MintRecord,
        snapshot: &AccumulatorSnapshot,
        security_level: u8,
        destination: Destination,
    ) -> SpendResult<SpendProof> {
        if !(MIN_SECURITY_LEVEL..=MAX_SECURITY_LEVEL).contains(&security_level) {
            return Err(SpendError::SecurityLevelOutOfRange(security_level));
        }
        if !mint.confirmed {
            return Err(SpendError::MintNotMature(mint.serial_number.to_hex()));
        }
        if mint.spent {
            return Err(SpendError::InvalidCoin(format!("{} is already spent", mint.serial_number.to_hex())));
        }
        if snapshot.checkpoint.denomination != mint.denomination
            || !snapshot.witness.members.contains(&mint.commitment)
        {
            return Err(SpendError::InvalidWitness(mint.serial_number.to_hex()));
        }

        let secret = self.keystore.secret(&mint.serial_number)?;
        let message = spend_message(&snapshot.checkpoint, security_level, &destination);
        let proof = self
            .scheme
            .prove(&snapshot.witness, &secret, &message)
            .map_err(|e| SpendError::ProofConstructionFailed(e.to_string()))?;
        let proof_blob = proof
            .to_bytes()
            .map_err(|e| SpendError::ProofConstructionFailed(e.to_string()))?;

        let spend = SpendProof {
            serial_number: proof.serial,
            denomination: mint.denomination,
            accumulator_checkpoint_used: snapshot.checkpoint,
            proof_blob,
            security_level,
            destination,
        };
        if let Err(e) = spend.verify(self.scheme.as_ref()) {
            log::error!("freshly built spend proof failed verification: {}", e);
            return Err(SpendError::ProofConstructionFailed(e.to_string()));
        }

        log::debug!(
            "built spend proof for denomination {} against checkpoint {} ({} members, level {})",
            mint.denomination,
            snapshot.checkpoint.block_height,
            snapshot.witness.members.len(),
            security_level
        );
        Ok(spend)
    }

    /// [`SpendProofBuilder::build_proof`] on the blocking pool.
    ///
    /// The wallet may be locked while the proof is computed; the result is
    /// only released if it is still unlocked afterwards.
    pub async fn build_proof_offloaded(
        self: &Arc<Self>,
        mint: MintRecord,
        snapshot: AccumulatorSnapshot,
        security_level: u8,
        destination: Destination,
    ) -> SpendResult<SpendProof> {
        let builder = Arc::clone(self);
        let proof = tokio::task::spawn_blocking(move || {
            builder.build_proof(&mint, &snapshot, security_level, destination)
        })
        .await
        .map_err(|e| SpendError::ProofConstructionFailed(format!("proof worker failed: {}", e)))??;

        if !self.keystore.is_unlocked() {
            log::warn!("wallet locked while spend proof was being built, discarding proof");
            return Err(SpendError::WalletLocked);
        }
        Ok(proof)
    }
}

/// Serial numbers of every accepted spend
pub struct SerialRegistry {
    scheme: Arc<dyn AccumulatorScheme>,
    accepted: DashMap<SerialNumber, u64>,
}

impl SerialRegistry {
    pub fn new(scheme: Arc<dyn AccumulatorScheme>) -> Self {
        Self {
            scheme,
            accepted: DashMap::new(),
        }
    }

    /// Verify a spend against the ledger and record its serial as used at `height`
    pub fn accept(&self, proof: &SpendProof, ledger: &AccumulatorLedger, height: u64) -> SpendResult<()> {
        if self.accepted.contains_key(&proof.serial_number) {
            return Err(SpendError::DoubleSpend(proof.serial_number.to_hex()));
        }
        proof.verify_checkpoint(ledger)?;
        proof.verify(self.scheme.as_ref())?;

        match self.accepted.entry(proof.serial_number) {
            Entry::Occupied(_) => Err(SpendError::DoubleSpend(proof.serial_number.to_hex())),
            Entry::Vacant(slot) => {
                slot.insert(height);
                log::info!(
                    "accepted spend of serial {} at height {}",
                    &proof.serial_number.to_hex()[..16],
                    height
                );
                Ok(())
            }
        }
    }

    /// Verify many spends in parallel without recording them
    pub fn verify_batch(&self, proofs: &[SpendProof], ledger: &AccumulatorLedger) -> Vec<SpendResult<()>> {
        proofs
            .par_iter()
            .map(|proof| {
                if self.accepted.contains_key(&proof.serial_number) {
                    return Err(SpendError::DoubleSpend(proof.serial_number.to_hex()));
                }
                proof.verify_checkpoint(ledger)?;
                proof.verify(self.scheme.as_ref())
            })
            .collect()
    }

    /// Record a serial known to be spent, e.g. from storage
    pub fn restore(&self, serial: SerialNumber, height: u64) {
        self.accepted.insert(serial, height);
    }

    pub fn is_spent(&self, serial: &SerialNumber) -> bool {
        self.accepted.contains_key(serial)
    }

    pub fn spent_height(&self, serial: &SerialNumber) -> Option<u64> {
        self.accepted.get(serial).map(|h| *h.value())
    }

    /// Forget spends above `height` after a reorganization
    pub fn forget_above(&self, height: u64) {
        self.accepted.retain(|_, spent| *spent <= height);
    }

    pub fn clear(&self) {
        self.accepted.clear();
    }

    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

/// Outcome codes of a spend attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpendStatus {
    SpendOkay,
    SpendError,
    WalletLocked,
    FundsProblem,
    InvalidCoin,
    AccumulatorInitFailed,
    InvalidWitness,
    BadSerialization,
    SerialUsed,
    TooManySpends,
}

impl SpendStatus {
    pub fn code(&self) -> u8 {
        match self {
            SpendStatus::SpendOkay => 0,
            SpendStatus::SpendError => 1,
            SpendStatus::WalletLocked => 2,
            SpendStatus::FundsProblem => 6,
            SpendStatus::InvalidCoin => 10,
            SpendStatus::AccumulatorInitFailed => 11,
            SpendStatus::InvalidWitness => 12,
            SpendStatus::BadSerialization => 13,
            SpendStatus::SerialUsed => 14,
            SpendStatus::TooManySpends => 15,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            SpendStatus::SpendOkay => "Spend Successful",
            SpendStatus::SpendError => "Spend failed",
            SpendStatus::WalletLocked => "Error: Wallet locked, unable to create transaction!",
            SpendStatus::FundsProblem => "You don't have enough Zerocoins in your wallet",
            SpendStatus::InvalidCoin => "The selected mint coin is an invalid coin",
            SpendStatus::AccumulatorInitFailed => "Try to spend with a higher security level to include more coins",
            SpendStatus::InvalidWitness => "CoinSpend: Accumulator witness does not verify",
            SpendStatus::BadSerialization => "Failed to deserialize",
            SpendStatus::SerialUsed => "The coin spend has been used",
            SpendStatus::TooManySpends => "Too many spends needed",
        }
    }
}

impl From<&SpendError> for SpendStatus {
    fn from(err: &SpendError) -> Self {
        match err {
            SpendError::WalletLocked => SpendStatus::WalletLocked,
            SpendError::InsufficientFunds { .. } | SpendError::InvalidAmount(_) => SpendStatus::FundsProblem,
            SpendError::DoubleSpend(_) => SpendStatus::SerialUsed,
            SpendError::TooManySpends { .. } => SpendStatus::TooManySpends,
            SpendError::MintNotMature(_) | SpendError::InvalidCoin(_) => SpendStatus::InvalidCoin,
            SpendError::InvalidWitness(_)
            | SpendError::InvalidProof(_)
            | SpendError::UnrecognizedCheckpoint { .. } => SpendStatus::InvalidWitness,
            SpendError::Ledger(LedgerError::UnknownCheckpoint { .. }) => SpendStatus::AccumulatorInitFailed,
            _ => SpendStatus::SpendError,
        }
    }
}

/// Signed spend handed to the broadcaster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendTransaction {
    pub txid: [u8; 32],
    pub spends: Vec<SpendProof>,
    pub destination: Destination,
    pub amount: Amount,
    /// Value above `amount` returned to the wallet as fresh mints
    pub change: Amount,
}

impl SpendTransaction {
    pub fn assemble(spends: Vec<SpendProof>, destination: Destination, amount: Amount, change: Amount) -> SpendResult<Self> {
        let serials: Vec<[u8; 32]> = spends.iter().map(|s| s.serial_number.0).collect();
        let body = bincode::serialize(&(serials, destination.0, amount, change))
            .map_err(|e| SpendError::ProofConstructionFailed(e.to_string()))?;
        Ok(Self {
            txid: generate_txid(&body),
            spends,
            destination,
            amount,
            change,
        })
    }

    pub fn serials(&self) -> Vec<SerialNumber> {
        self.spends.iter().map(|s| s.serial_number).collect()
    }
}

/// Result of a spend attempt as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendReceipt {
    pub status: SpendStatus,
    pub message: String,
    pub transaction: Option<SpendTransaction>,
    pub needed_spends: usize,
}

impl SpendReceipt {
    pub fn success(transaction: SpendTransaction) -> Self {
        Self {
            status: SpendStatus::SpendOkay,
            message: SpendStatus::SpendOkay.message().to_string(),
            needed_spends: transaction.spends.len(),
            transaction: Some(transaction),
        }
    }

    pub fn failure(err: &SpendError) -> Self {
        let status = SpendStatus::from(err);
        let needed_spends = match err {
            SpendError::TooManySpends { needed, .. } => *needed,
            _ => 0,
        };
        Self {
            status,
            message: format!("{}: {}", status.message(), err),
            transaction: None,
            needed_spends,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == SpendStatus::SpendOkay
    }
}

/// Pick the mature mints that fund a spend of `target`.
///
/// Exact greedy selection over held coins first. Failing that, the
/// selection with the least change is used (fewer coins on a tie) and the
/// excess is returned as change. Oldest mints of a denomination are spent
/// first.
pub fn select_mints(target: Amount, mature: &[MintRecord]) -> SpendResult<(Vec<MintRecord>, Amount)> {
    if target <= 0 {
        return Err(SpendError::InvalidAmount(target));
    }
    let available: Amount = mature.iter().map(|m| m.denomination.amount()).sum();
    if available < target {
        return Err(SpendError::InsufficientFunds {
            requested: target,
            available,
        });
    }

    let mut held = DenominationCounts::new();
    for mint in mature {
        *held.entry(mint.denomination).or_insert(0) += 1;
    }

    let greedy = denomination::select_spend_denominations(target, &held);
    let (selected, total) = if denomination::counts_total(&greedy) == target {
        (greedy, target)
    } else {
        match least_change_cover(target, &held) {
            Some((change, cover)) => (cover, target + change),
            // Nothing covers the gap; spend everything held
            None => (held, available),
        }
    };

    let needed = denomination::coin_count(&selected);
    if needed > MAX_SPENDS_PER_TRANSACTION {
        return Err(SpendError::TooManySpends {
            needed,
            max: MAX_SPENDS_PER_TRANSACTION,
        });
    }

    let mut ordered: Vec<&MintRecord> = mature.iter().collect();
    ordered.sort_by_key(|m| (m.mint_height, m.serial_number));
    let mut picked = Vec::with_capacity(needed);
    for (denom, count) in &selected {
        picked.extend(
            ordered
                .iter()
                .filter(|m| m.denomination == *denom)
                .take(*count)
                .map(|m| (*m).clone()),
        );
    }
    Ok((picked, total - target))
}

/// Walk the greedy selection and close each step with the smallest unused
/// coin covering the rest; returns the least change found and its counts.
fn least_change_cover(target: Amount, held: &DenominationCounts) -> Option<(Amount, DenominationCounts)> {
    let mut taken = DenominationCounts::new();
    let mut remaining = target;
    let mut best: Option<(Amount, usize, DenominationCounts)> = None;

    for denom in Denomination::all().rev() {
        let count = taken.entry(denom).or_insert(0);
        while remaining >= denom.amount() && *count < held.get(&denom).copied().unwrap_or(0) {
            *count += 1;
            remaining -= denom.amount();
        }
        if remaining == 0 {
            return Some((0, taken));
        }

        let cover = Denomination::all().find(|d| {
            d.amount() >= remaining && held.get(d).copied().unwrap_or(0) > taken.get(d).copied().unwrap_or(0)
        });
        if let Some(cover) = cover {
            let mut candidate = taken.clone();
            *candidate.entry(cover).or_insert(0) += 1;
            let change = cover.amount() - remaining;
            let coins = denomination::coin_count(&candidate);
            if best.as_ref().map_or(true, |(c, n, _)| (change, coins) < (*c, *n)) {
                best = Some((change, coins, candidate));
            }
        }
    }
    best.map(|(change, _, counts)| (change, counts))
}
