//! Accumulator Ledger
//!
//! Per-denomination accumulator checkpoints keyed by block height. The value
//! at height H is the fold of every confirmed mint of that denomination that
//! is still unspent at H, in the configured deterministic order. Checkpoints
//! are append-only; only [`AccumulatorLedger::rollback`] removes them.
//!
//! All mutations take the write half of a single lock, so a concurrent
//! reader always observes a fully applied append or rollback.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::FoldOrder;
use crate::consensus_params::{domain_hash, domains};
use crate::consensus_params::zerocoin::{CHECKPOINT_INTERVAL, MAX_SECURITY_LEVEL, MIN_SECURITY_LEVEL};
use crate::crypto::{AccumulatorScheme, AccumulatorValue, AccumulatorWitness, CoinCommitment, SerialNumber};
use crate::denomination::Denomination;
use crate::zerocoin::{FaultState, MintRecord};

/// Ledger error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Accumulator divergence for denomination {denomination} at height {height}: expected {expected}, computed {computed}")]
    AccumulatorDivergence {
        denomination: Denomination,
        height: u64,
        expected: String,
        computed: String,
    },

    #[error("Corrupted mint history for denomination {denomination}: {reason}")]
    CorruptedMintHistory {
        denomination: Denomination,
        reason: String,
    },

    #[error("Denomination {0} is halted pending resynchronization")]
    Halted(Denomination),

    #[error("Mint {0} is not confirmed")]
    MintNotConfirmed(String),

    #[error("Mint {0} is already accumulated")]
    DuplicateMint(String),

    #[error("Height {height} is below the ledger tip {tip}")]
    OutOfOrder { height: u64, tip: u64 },

    #[error("No checkpoint for denomination {denomination} at or below height {height}")]
    UnknownCheckpoint { denomination: Denomination, height: u64 },

    #[error("Mint {0} is not part of the ledger")]
    UnknownMint(String),

    #[error("Security level {0} is outside 1..=100")]
    InvalidSecurityLevel(u8),
}

impl LedgerError {
    /// Errors that require operator intervention
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::AccumulatorDivergence { .. }
                | LedgerError::CorruptedMintHistory { .. }
                | LedgerError::Halted(_)
        )
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Accumulator value frozen at a block height
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccumulatorCheckpoint {
    pub denomination: Denomination,
    pub block_height: u64,
    pub accumulator_value: AccumulatorValue,
}

impl AccumulatorCheckpoint {
    pub fn checksum(&self) -> u32 {
        self.accumulator_value.checksum()
    }
}

/// A checkpoint together with the ordered members it folds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatorSnapshot {
    pub checkpoint: AccumulatorCheckpoint,
    pub witness: AccumulatorWitness,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    record: MintRecord,
    sequence: u64,
    spent_at: Option<u64>,
}

#[derive(Debug, Clone, Default)]
struct DenominationBook {
    entries: Vec<LedgerEntry>,
    checkpoints: BTreeMap<u64, AccumulatorValue>,
}

impl DenominationBook {
    fn tip(&self) -> Option<u64> {
        self.checkpoints.keys().next_back().copied()
    }

    fn members_at(&self, height: u64, order: FoldOrder) -> Vec<CoinCommitment> {
        let mut live: Vec<&LedgerEntry> = self
            .entries
            .iter()
            .filter(|e| e.record.mint_height <= height)
            .filter(|e| e.spent_at.map_or(true, |spent| spent > height))
            .collect();

        match order {
            FoldOrder::SerialNumber => live.sort_by(|a, b| a.record.serial_number.cmp(&b.record.serial_number)),
            FoldOrder::Confirmation => live.sort_by_key(|e| (e.record.mint_height, e.sequence)),
        }
        live.iter().map(|e| e.record.commitment).collect()
    }

    fn contains(&self, record: &MintRecord) -> bool {
        self.entries.iter().any(|e| {
            e.record.serial_number == record.serial_number || e.record.commitment == record.commitment
        })
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    books: BTreeMap<Denomination, DenominationBook>,
    next_sequence: u64,
}

impl LedgerState {
    fn book_mut(&mut self, denomination: Denomination) -> &mut DenominationBook {
        self.books.entry(denomination).or_default()
    }
}

/// Per-denomination accumulator state and checkpoint history
pub struct AccumulatorLedger {
    scheme: Arc<dyn AccumulatorScheme>,
    fold_order: FoldOrder,
    faults: FaultState,
    state: RwLock<LedgerState>,
}

impl AccumulatorLedger {
    pub fn new(scheme: Arc<dyn AccumulatorScheme>, fold_order: FoldOrder, faults: FaultState) -> Self {
        Self {
            scheme,
            fold_order,
            faults,
            state: RwLock::new(LedgerState::default()),
        }
    }

    pub fn fold_order(&self) -> FoldOrder {
        self.fold_order
    }

    pub fn faults(&self) -> &FaultState {
        &self.faults
    }

    /// Fold a newly confirmed mint into its denomination's accumulator
    pub fn append_mint(&self, record: &MintRecord) -> LedgerResult<AccumulatorValue> {
        let denomination = record.denomination;
        self.ensure_operational(denomination)?;
        if !record.confirmed {
            return Err(LedgerError::MintNotConfirmed(record.serial_number.to_hex()));
        }

        let mut state = self.state.write();
        if let Some(tip) = state.books.get(&denomination).and_then(|b| b.tip()) {
            if record.mint_height < tip {
                return Err(LedgerError::OutOfOrder { height: record.mint_height, tip });
            }
        }
        self.apply_locked(&mut state, record.mint_height, std::slice::from_ref(record), &[])?;

        state
            .books
            .get(&denomination)
            .and_then(|b| b.checkpoints.get(&record.mint_height).copied())
            .ok_or(LedgerError::UnknownCheckpoint {
                denomination,
                height: record.mint_height,
            })
    }

    /// Advance every denomination to `height`, applying the block's mints and spends.
    ///
    /// The whole block is validated before anything is applied, and each
    /// checkpoint at `height` is written once, under a single write guard.
    /// A rejected block leaves the ledger untouched.
    pub fn connect_block(
        &self,
        height: u64,
        mints: &[MintRecord],
        spends: &[(Denomination, SerialNumber)],
    ) -> LedgerResult<Vec<AccumulatorCheckpoint>> {
        let live: Vec<Denomination> = Denomination::all().filter(|d| !self.faults.is_halted(*d)).collect();
        let mints: Vec<MintRecord> = mints
            .iter()
            .filter(|m| {
                let keep = live.contains(&m.denomination);
                if !keep {
                    log::warn!("skipping mint for halted denomination {}", m.denomination);
                }
                keep
            })
            .map(|m| m.clone().confirmed_at(height))
            .collect();
        let spends: Vec<(Denomination, SerialNumber)> =
            spends.iter().copied().filter(|(d, _)| live.contains(d)).collect();

        let mut state = self.state.write();
        for denomination in &live {
            if let Some(tip) = state.books.get(denomination).and_then(|b| b.tip()) {
                if height < tip {
                    return Err(LedgerError::OutOfOrder { height, tip });
                }
            }
        }
        let touched = self.apply_locked(&mut state, height, &mints, &spends)?;

        let mut sealed = Vec::with_capacity(live.len());
        for denomination in live {
            let book = state.book_mut(denomination);
            let value = match book.checkpoints.get(&height) {
                Some(value) if !touched.contains(&denomination) => *value,
                _ => {
                    let members = book.members_at(height, self.fold_order);
                    let value = self.scheme.fold_all(denomination, &members);
                    book.checkpoints.insert(height, value);
                    value
                }
            };
            sealed.push(AccumulatorCheckpoint {
                denomination,
                block_height: height,
                accumulator_value: value,
            });
        }
        Ok(sealed)
    }

    /// Validate then apply one block's worth of changes on a held write guard.
    ///
    /// Returns the denominations whose checkpoint at `height` was rewritten.
    fn apply_locked(
        &self,
        state: &mut LedgerState,
        height: u64,
        mints: &[MintRecord],
        spends: &[(Denomination, SerialNumber)],
    ) -> LedgerResult<BTreeSet<Denomination>> {
        for (i, mint) in mints.iter().enumerate() {
            let in_block = mints[..i]
                .iter()
                .any(|o| o.serial_number == mint.serial_number || o.commitment == mint.commitment);
            let in_history = state
                .books
                .values()
                .any(|b| b.contains(mint));
            if in_block || in_history {
                return Err(LedgerError::DuplicateMint(mint.serial_number.to_hex()));
            }
        }
        for (i, (denomination, serial)) in spends.iter().enumerate() {
            let twice = || LedgerError::CorruptedMintHistory {
                denomination: *denomination,
                reason: format!("serial {} spent twice", serial.to_hex()),
            };
            if spends[..i].iter().any(|(_, s)| s == serial) {
                return Err(twice());
            }
            let known = state
                .books
                .get(denomination)
                .and_then(|b| b.entries.iter().find(|e| e.record.serial_number == *serial));
            match known {
                Some(entry) if entry.spent_at.is_some() => return Err(twice()),
                Some(_) => {}
                None if mints
                    .iter()
                    .any(|m| m.denomination == *denomination && m.serial_number == *serial) => {}
                None => return Err(LedgerError::UnknownMint(serial.to_hex())),
            }
        }

        let mut touched = BTreeSet::new();
        for mint in mints {
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.book_mut(mint.denomination).entries.push(LedgerEntry {
                record: mint.clone(),
                sequence,
                spent_at: None,
            });
            touched.insert(mint.denomination);
        }
        for (denomination, serial) in spends {
            if let Some(entry) = state
                .book_mut(*denomination)
                .entries
                .iter_mut()
                .find(|e| e.record.serial_number == *serial)
            {
                entry.spent_at = Some(height);
                entry.record.spent = true;
            }
            touched.insert(*denomination);
        }

        for denomination in &touched {
            let book = state.book_mut(*denomination);
            let members = book.members_at(height, self.fold_order);
            let value = self.scheme.fold_all(*denomination, &members);
            book.checkpoints.insert(height, value);
            log::debug!(
                "denomination {} at height {}: {} live coins (checksum {:08x})",
                denomination,
                height,
                members.len(),
                value.checksum()
            );
        }
        Ok(touched)
    }

    /// Recompute the checkpoint at `height` from mint history and compare.
    ///
    /// A mismatch halts the denomination and returns false.
    pub fn verify_checkpoint(&self, height: u64, denomination: Denomination, expected: &AccumulatorValue) -> bool {
        self.ensure_checkpoint(height, denomination, expected).is_ok()
    }

    /// [`AccumulatorLedger::verify_checkpoint`] with the divergence as an error
    pub fn ensure_checkpoint(
        &self,
        height: u64,
        denomination: Denomination,
        expected: &AccumulatorValue,
    ) -> LedgerResult<()> {
        let (computed, stored) = {
            let state = self.state.read();
            let book = state.books.get(&denomination);
            let members = book
                .map(|b| b.members_at(height, self.fold_order))
                .unwrap_or_default();
            let stored = book.and_then(|b| b.checkpoints.get(&height).copied());
            (self.scheme.fold_all(denomination, &members), stored)
        };

        let stored_matches = stored.map_or(true, |s| s.ct_eq(&computed));
        if computed.ct_eq(expected) && stored_matches {
            return Ok(());
        }

        let error = LedgerError::AccumulatorDivergence {
            denomination,
            height,
            expected: expected.to_hex(),
            computed: computed.to_hex(),
        };
        self.faults.halt(denomination, error.to_string());
        Err(error)
    }

    /// Discard checkpoints, mints and spends above `to_height`
    pub fn rollback(&self, to_height: u64) {
        let mut state = self.state.write();
        let mut removed_checkpoints = 0usize;
        let mut removed_mints = 0usize;

        for book in state.books.values_mut() {
            let above = book.checkpoints.split_off(&(to_height + 1));
            removed_checkpoints += above.len();

            let before = book.entries.len();
            book.entries.retain(|e| e.record.mint_height <= to_height);
            removed_mints += before - book.entries.len();

            for entry in book.entries.iter_mut() {
                if entry.spent_at.map_or(false, |spent| spent > to_height) {
                    entry.spent_at = None;
                    entry.record.spent = false;
                }
            }
        }

        log::info!(
            "ledger rolled back to height {}: {} checkpoints and {} mints discarded",
            to_height,
            removed_checkpoints,
            removed_mints
        );
    }

    /// Checkpoint stored at exactly `height`
    pub fn checkpoint(&self, denomination: Denomination, height: u64) -> Option<AccumulatorCheckpoint> {
        let state = self.state.read();
        state
            .books
            .get(&denomination)
            .and_then(|b| b.checkpoints.get(&height))
            .map(|value| AccumulatorCheckpoint {
                denomination,
                block_height: height,
                accumulator_value: *value,
            })
    }

    /// Most recent checkpoint of a denomination
    pub fn latest_checkpoint(&self, denomination: Denomination) -> Option<AccumulatorCheckpoint> {
        let state = self.state.read();
        state
            .books
            .get(&denomination)
            .and_then(|b| b.checkpoints.iter().next_back())
            .map(|(height, value)| AccumulatorCheckpoint {
                denomination,
                block_height: *height,
                accumulator_value: *value,
            })
    }

    /// Digest over all eight denominations' checkpoints at `height`
    pub fn checkpoint_digest(&self, height: u64) -> Option<[u8; 32]> {
        let state = self.state.read();
        let mut values = Vec::with_capacity(Denomination::ALL.len() * 32);
        for denomination in Denomination::all() {
            let value = state.books.get(&denomination)?.checkpoints.get(&height)?;
            values.extend_from_slice(&value.0);
        }
        Some(domain_hash(&domains::CHECKPOINT_DIGEST, &[&height.to_be_bytes(), &values]))
    }

    /// Highest height any denomination has reached
    pub fn tip_height(&self) -> Option<u64> {
        let state = self.state.read();
        state.books.values().filter_map(|b| b.tip()).max()
    }

    /// Every stored checkpoint of a denomination, ascending
    pub fn checkpoints(&self, denomination: Denomination) -> Vec<AccumulatorCheckpoint> {
        let state = self.state.read();
        state
            .books
            .get(&denomination)
            .map(|b| {
                b.checkpoints
                    .iter()
                    .map(|(height, value)| AccumulatorCheckpoint {
                        denomination,
                        block_height: *height,
                        accumulator_value: *value,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Accumulated mint history of a denomination, in insertion order
    pub fn mint_history(&self, denomination: Denomination) -> Vec<MintRecord> {
        let state = self.state.read();
        state
            .books
            .get(&denomination)
            .map(|b| b.entries.iter().map(|e| e.record.clone()).collect())
            .unwrap_or_default()
    }

    /// Witness for spending a coin minted at `mint_height`.
    ///
    /// Each security-level unit advances the witness `CHECKPOINT_INTERVAL`
    /// blocks past the mint, widening the anonymity set and the proof cost.
    pub fn snapshot(
        &self,
        denomination: Denomination,
        mint_height: u64,
        security_level: u8,
    ) -> LedgerResult<AccumulatorSnapshot> {
        if !(MIN_SECURITY_LEVEL..=MAX_SECURITY_LEVEL).contains(&security_level) {
            return Err(LedgerError::InvalidSecurityLevel(security_level));
        }
        self.ensure_operational(denomination)?;

        let state = self.state.read();
        let book = state
            .books
            .get(&denomination)
            .ok_or(LedgerError::UnknownCheckpoint { denomination, height: mint_height })?;
        let tip = book
            .tip()
            .ok_or(LedgerError::UnknownCheckpoint { denomination, height: mint_height })?;

        let target = tip.min(mint_height.saturating_add(security_level as u64 * CHECKPOINT_INTERVAL));
        let (height, stored) = book
            .checkpoints
            .range(mint_height..=target)
            .next_back()
            .map(|(h, v)| (*h, *v))
            .ok_or(LedgerError::UnknownCheckpoint { denomination, height: target })?;

        let members = book.members_at(height, self.fold_order);
        let computed = self.scheme.fold_all(denomination, &members);
        if !computed.ct_eq(&stored) {
            drop(state);
            let error = LedgerError::AccumulatorDivergence {
                denomination,
                height,
                expected: stored.to_hex(),
                computed: computed.to_hex(),
            };
            self.faults.halt(denomination, error.to_string());
            return Err(error);
        }

        Ok(AccumulatorSnapshot {
            checkpoint: AccumulatorCheckpoint {
                denomination,
                block_height: height,
                accumulator_value: stored,
            },
            witness: AccumulatorWitness {
                denomination,
                members,
                value: stored,
            },
        })
    }

    /// Drop all state of a denomination ahead of a rebuild
    pub fn reset_denomination(&self, denomination: Denomination) {
        self.state.write().books.remove(&denomination);
    }

    /// Drop all state
    pub fn reset(&self) {
        let mut state = self.state.write();
        state.books.clear();
        state.next_sequence = 0;
    }

    fn ensure_operational(&self, denomination: Denomination) -> LedgerResult<()> {
        if self.faults.is_halted(denomination) {
            return Err(LedgerError::Halted(denomination));
        }
        Ok(())
    }
}
