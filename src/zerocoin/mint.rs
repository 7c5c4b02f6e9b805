//! Mint Engine
//!
//! Turns standard coins into commitment / serial pairs of catalog
//! denominations and tracks each mint from pending to confirmed to spent.

use std::collections::BTreeMap;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::PrivacyConfig;
use crate::consensus_params::zerocoin::{AUTOMINT_ALL_DENOMINATIONS, AUTOMINT_MIN_BALANCE};
use crate::consensus_params::{generate_txid, Amount, COIN};
use crate::crypto::{AccumulatorScheme, CoinCommitment, CoinSecret, CryptoError, SerialNumber};
use crate::denomination::{self, Decomposition, Denomination, DenominationCounts, DenominationError};
use crate::zerocoin::{FaultState, KeyStoreError, MintRecord, WalletKeyStore};

/// Mint error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MintError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(Amount),

    #[error("Insufficient funds: {requested} is below the smallest denomination")]
    InsufficientFunds { requested: Amount },

    #[error("Waiting for enough funds to mint preferred denomination {0}")]
    WaitingForPreferred(Denomination),

    #[error("Wallet is locked")]
    WalletLocked,

    #[error("Unknown mint: {0}")]
    UnknownMint(String),

    #[error("Mint {0} is already confirmed")]
    AlreadyConfirmed(String),

    #[error("Denomination {0} is halted pending resynchronization")]
    Halted(Denomination),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl From<DenominationError> for MintError {
    fn from(err: DenominationError) -> Self {
        match err {
            DenominationError::InvalidAmount(amount) => MintError::InvalidAmount(amount),
            DenominationError::BelowSmallestDenomination(amount) => {
                MintError::InsufficientFunds { requested: amount }
            }
            DenominationError::UnknownDenomination(value) => MintError::InvalidAmount(value as Amount),
        }
    }
}

impl From<KeyStoreError> for MintError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::Locked => MintError::WalletLocked,
            KeyStoreError::UnknownSerial(serial) => MintError::UnknownMint(serial),
        }
    }
}

pub type MintResult<T> = Result<T, MintError>;

/// One coin to be minted on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRequest {
    pub denomination: Denomination,
    pub commitment: CoinCommitment,
    pub serial_number: SerialNumber,
}

/// Mint transaction handed to the broadcaster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintTransaction {
    pub txid: [u8; 32],
    pub requests: Vec<MintRequest>,
    /// Dust left unconverted
    pub remainder: Amount,
}

impl MintTransaction {
    fn assemble(requests: Vec<MintRequest>, remainder: Amount) -> MintResult<Self> {
        // Only public outputs go into the id; serials stay private until spent
        let outputs: Vec<(u16, [u8; 32])> = requests
            .iter()
            .map(|r| (r.denomination.id(), r.commitment.0))
            .collect();
        let body = bincode::serialize(&outputs).map_err(|e| CryptoError::SerializationError(e.to_string()))?;
        Ok(Self {
            txid: generate_txid(&body),
            requests,
            remainder,
        })
    }

    /// Value committed by the transaction
    pub fn total(&self) -> Amount {
        self.requests.iter().map(|r| r.denomination.amount()).sum()
    }
}

#[derive(Debug, Clone)]
struct WalletMint {
    record: MintRecord,
    spent_height: Option<u64>,
    /// Selected by an in-flight spend
    reserved: bool,
}

/// Wallet-side mint issuance and bookkeeping
pub struct MintEngine {
    scheme: Arc<dyn AccumulatorScheme>,
    keystore: Arc<WalletKeyStore>,
    faults: FaultState,
    mints: RwLock<BTreeMap<SerialNumber, WalletMint>>,
}

impl MintEngine {
    pub fn new(scheme: Arc<dyn AccumulatorScheme>, keystore: Arc<WalletKeyStore>, faults: FaultState) -> Self {
        Self {
            scheme,
            keystore,
            faults,
            mints: RwLock::new(BTreeMap::new()),
        }
    }

    /// Split `amount` into the denominations that will be minted
    pub fn plan_denominations(
        &self,
        amount: Amount,
        preferred: Option<Denomination>,
        wait_for_preferred: bool,
    ) -> MintResult<Decomposition> {
        if amount <= 0 {
            return Err(MintError::InvalidAmount(amount));
        }

        let plan = match preferred {
            Some(preferred) => {
                let count = amount / preferred.amount();
                if count == 0 && wait_for_preferred {
                    return Err(MintError::WaitingForPreferred(preferred));
                }
                let mut denominations = vec![preferred; count as usize];
                let rest = amount - count * preferred.amount();
                let remainder = if wait_for_preferred || rest == 0 {
                    rest
                } else {
                    let tail = denomination::decompose(rest)?;
                    denominations.extend(tail.denominations);
                    tail.remainder
                };
                Decomposition {
                    denominations,
                    remainder,
                }
            }
            None => denomination::decompose(amount)?,
        };

        if plan.denominations.is_empty() {
            return Err(MintError::InsufficientFunds { requested: amount });
        }
        Ok(plan)
    }

    /// Generate fresh coins for `amount` and the transaction that mints them
    pub fn mint(
        &self,
        amount: Amount,
        preferred: Option<Denomination>,
        wait_for_preferred: bool,
    ) -> MintResult<MintTransaction> {
        let plan = self.plan_denominations(amount, preferred, wait_for_preferred)?;
        if let Some(halted) = plan.denominations.iter().find(|d| self.faults.is_halted(**d)) {
            return Err(MintError::Halted(*halted));
        }
        if !self.keystore.is_unlocked() {
            return Err(MintError::WalletLocked);
        }

        let mut requests = Vec::with_capacity(plan.denominations.len());
        let mut generated = Vec::with_capacity(plan.denominations.len());
        for denomination in &plan.denominations {
            let secret = CoinSecret::random();
            let serial_number = self.scheme.serial_number(&secret)?;
            let commitment = self.scheme.commit(&secret)?;
            generated.push((serial_number, secret));
            requests.push(MintRequest {
                denomination: *denomination,
                commitment,
                serial_number,
            });
        }

        for (serial, secret) in generated {
            self.keystore.insert(serial, secret)?;
        }
        {
            let mut mints = self.mints.write();
            for request in &requests {
                mints.insert(
                    request.serial_number,
                    WalletMint {
                        record: MintRecord::pending(request.serial_number, request.commitment, request.denomination),
                        spent_height: None,
                        reserved: false,
                    },
                );
            }
        }

        let transaction = MintTransaction::assemble(requests, plan.remainder)?;
        log::info!(
            "minting {} coins worth {} ({} dust left) in tx {}",
            transaction.requests.len(),
            transaction.total() / COIN,
            plan.remainder,
            hex::encode(&transaction.txid[..8])
        );
        Ok(transaction)
    }

    /// Mark a pending mint confirmed once its transaction is final
    pub fn confirm_mint(&self, serial: &SerialNumber, height: u64) -> MintResult<MintRecord> {
        let mut mints = self.mints.write();
        let mint = mints
            .get_mut(serial)
            .ok_or_else(|| MintError::UnknownMint(serial.to_hex()))?;
        if mint.record.confirmed {
            return Err(MintError::AlreadyConfirmed(serial.to_hex()));
        }
        mint.record = mint.record.clone().confirmed_at(height);
        log::debug!("mint {} confirmed at height {}", &serial.to_hex()[..16], height);
        Ok(mint.record.clone())
    }

    /// Record that a spend of this coin was accepted at `height`
    pub fn mark_spent(&self, serial: &SerialNumber, height: u64) -> MintResult<()> {
        let mut mints = self.mints.write();
        let mint = mints
            .get_mut(serial)
            .ok_or_else(|| MintError::UnknownMint(serial.to_hex()))?;
        mint.record.spent = true;
        mint.spent_height = Some(height);
        mint.reserved = false;
        Ok(())
    }

    /// Choose among mature, unreserved mints and reserve the chosen ones.
    ///
    /// Selection and reservation happen under one write guard, so concurrent
    /// spends never pick the same coin. Reservations last until
    /// [`MintEngine::mark_spent`] or [`MintEngine::release`].
    pub fn reserve_mature<T, E>(
        &self,
        tip: u64,
        required_confirmations: u64,
        select: impl FnOnce(Vec<MintRecord>) -> Result<(Vec<MintRecord>, T), E>,
    ) -> Result<(Vec<MintRecord>, T), E> {
        let mut mints = self.mints.write();
        let candidates: Vec<MintRecord> = mints
            .values()
            .filter(|m| !m.reserved && m.record.is_mature(tip, required_confirmations))
            .map(|m| m.record.clone())
            .collect();

        let (chosen, extra) = select(candidates)?;
        for record in &chosen {
            if let Some(mint) = mints.get_mut(&record.serial_number) {
                mint.reserved = true;
            }
        }
        Ok((chosen, extra))
    }

    /// Return reserved mints to the spendable set after a failed spend
    pub fn release(&self, serials: &[SerialNumber]) {
        let mut mints = self.mints.write();
        for serial in serials {
            if let Some(mint) = mints.get_mut(serial) {
                mint.reserved = false;
            }
        }
    }

    /// Track an already confirmed mint, e.g. one reloaded from storage
    pub fn restore(&self, record: MintRecord, spent_height: Option<u64>) {
        let mut mints = self.mints.write();
        let reserved = !record.spent && mints.get(&record.serial_number).map_or(false, |m| m.reserved);
        mints.insert(
            record.serial_number,
            WalletMint {
                record,
                spent_height,
                reserved,
            },
        );
    }

    /// Drop a pending mint whose transaction never confirmed
    pub fn discard_pending(&self, serial: &SerialNumber) -> MintResult<()> {
        let mut mints = self.mints.write();
        match mints.get(serial) {
            Some(mint) if !mint.record.confirmed => {
                mints.remove(serial);
                self.keystore.remove(serial);
                Ok(())
            }
            Some(_) => Err(MintError::AlreadyConfirmed(serial.to_hex())),
            None => Err(MintError::UnknownMint(serial.to_hex())),
        }
    }

    /// Undo confirmations and spends above `to_height`
    pub fn rollback(&self, to_height: u64) {
        let mut mints = self.mints.write();
        for mint in mints.values_mut() {
            if mint.record.confirmed && mint.record.mint_height > to_height {
                mint.record.confirmed = false;
                mint.record.mint_height = 0;
            }
            if mint.spent_height.map_or(false, |h| h > to_height) {
                mint.spent_height = None;
                mint.record.spent = false;
            }
        }
    }

    pub fn get(&self, serial: &SerialNumber) -> Option<MintRecord> {
        self.mints.read().get(serial).map(|m| m.record.clone())
    }

    pub fn mints(&self) -> Vec<MintRecord> {
        self.mints.read().values().map(|m| m.record.clone()).collect()
    }

    pub fn pending_mints(&self) -> Vec<MintRecord> {
        self.filtered(|r| !r.confirmed)
    }

    /// Confirmed, unspent mints
    pub fn confirmed_mints(&self) -> Vec<MintRecord> {
        self.filtered(|r| r.confirmed && !r.spent)
    }

    /// Mints that can be spent at `tip`, excluding those held by an in-flight spend
    pub fn mature_mints(&self, tip: u64, required_confirmations: u64) -> Vec<MintRecord> {
        self.mints
            .read()
            .values()
            .filter(|m| !m.reserved && m.record.is_mature(tip, required_confirmations))
            .map(|m| m.record.clone())
            .collect()
    }

    /// Held coins per denomination among the given mints
    pub fn counts(records: &[MintRecord]) -> DenominationCounts {
        let mut counts = DenominationCounts::new();
        for record in records {
            *counts.entry(record.denomination).or_insert(0) += 1;
        }
        counts
    }

    /// Unspent zerocoin value, pending included
    pub fn balance(&self) -> Amount {
        self.mints
            .read()
            .values()
            .filter(|m| !m.record.spent)
            .map(|m| m.record.denomination.amount())
            .sum()
    }

    fn filtered(&self, keep: impl Fn(&MintRecord) -> bool) -> Vec<MintRecord> {
        self.mints
            .read()
            .values()
            .map(|m| &m.record)
            .filter(|r| keep(r))
            .cloned()
            .collect()
    }
}

/// Amount to auto-mint so zerocoin reaches the configured share of the balance.
///
/// Returns `None` when nothing should be minted yet. A preferred
/// denomination is minted one coin at a time once affordable; without one,
/// large shortfalls mint one coin of every denomination.
pub fn plan_auto_mint(zerocoin_balance: Amount, available_balance: Amount, config: &PrivacyConfig) -> Option<Amount> {
    if available_balance < AUTOMINT_MIN_BALANCE as Amount * COIN {
        log::debug!("available balance {} too small for auto-mint", available_balance);
        return None;
    }

    let total = zerocoin_balance + available_balance;
    let target_percentage = config.automint_percentage as i128;
    if (zerocoin_balance as i128) * 100 >= (total as i128) * target_percentage {
        log::debug!("zerocoin share already at or above {}%", target_percentage);
        return None;
    }

    let target = (total as i128 * target_percentage / 100) as Amount;
    let mut shortfall = ((target - zerocoin_balance) / COIN) as u64;

    if let Some(preferred) = config.preferred() {
        if shortfall >= preferred.value() {
            shortfall = preferred.value();
        } else {
            log::info!(
                "auto-mint waiting for funds to mint preferred denomination {}",
                preferred
            );
            return None;
        }
    }

    if shortfall >= AUTOMINT_ALL_DENOMINATIONS {
        return Some(AUTOMINT_ALL_DENOMINATIONS as Amount * COIN);
    }
    Denomination::all()
        .rev()
        .find(|d| shortfall >= d.value())
        .map(|d| d.amount())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PedersenRingAccumulator;

    fn engine() -> MintEngine {
        MintEngine::new(
            Arc::new(PedersenRingAccumulator::new()),
            Arc::new(WalletKeyStore::new()),
            FaultState::new(),
        )
    }

    #[test]
    fn test_mint_without_preference() {
        let engine = engine();
        let tx = engine.mint(10_000 * COIN, None, false).unwrap();
        let denominations: Vec<Denomination> = tx.requests.iter().map(|r| r.denomination).collect();
        assert_eq!(denominations, vec![Denomination::FiveThousand, Denomination::FiveThousand]);
        assert_eq!(tx.remainder, 0);
        assert_eq!(engine.pending_mints().len(), 2);
        assert!(engine.confirmed_mints().is_empty());
    }

    #[test]
    fn test_preferred_denomination_plans() {
        let engine = engine();
        let plan = engine.plan_denominations(120 * COIN, Some(Denomination::Fifty), false).unwrap();
        assert_eq!(
            plan.denominations,
            vec![Denomination::Fifty, Denomination::Fifty, Denomination::Ten, Denomination::Ten]
        );

        let waiting = engine.plan_denominations(120 * COIN, Some(Denomination::Fifty), true).unwrap();
        assert_eq!(waiting.denominations, vec![Denomination::Fifty, Denomination::Fifty]);
        assert_eq!(waiting.remainder, 20 * COIN);

        assert_eq!(
            engine.plan_denominations(40 * COIN, Some(Denomination::Fifty), true),
            Err(MintError::WaitingForPreferred(Denomination::Fifty))
        );
    }

    #[test]
    fn test_mint_failure_modes() {
        let engine = engine();
        assert_eq!(engine.mint(0, None, false), Err(MintError::InvalidAmount(0)));
        assert_eq!(
            engine.mint(COIN / 2, None, false),
            Err(MintError::InsufficientFunds { requested: COIN / 2 })
        );

        engine.keystore.lock();
        assert_eq!(engine.mint(5 * COIN, None, false), Err(MintError::WalletLocked));

        engine.keystore.unlock();
        engine.faults.halt(Denomination::Five, "test");
        assert_eq!(engine.mint(5 * COIN, None, false), Err(MintError::Halted(Denomination::Five)));
    }

    #[test]
    fn test_confirm_spend_and_rollback() {
        let engine = engine();
        let tx = engine.mint(6 * COIN, None, false).unwrap();
        let five = tx.requests[0].serial_number;

        let record = engine.confirm_mint(&five, 50).unwrap();
        assert!(record.confirmed);
        assert_eq!(record.mint_height, 50);
        assert!(matches!(engine.confirm_mint(&five, 51), Err(MintError::AlreadyConfirmed(_))));

        assert!(engine.mature_mints(60, 20).is_empty());
        assert_eq!(engine.mature_mints(70, 20).len(), 1);

        engine.mark_spent(&five, 72).unwrap();
        assert!(engine.mature_mints(80, 20).is_empty());
        assert_eq!(engine.balance(), COIN);

        engine.rollback(71);
        assert_eq!(engine.mature_mints(80, 20).len(), 1);
        engine.rollback(49);
        assert_eq!(engine.pending_mints().len(), 2);
    }

    #[test]
    fn test_reserved_mints_are_not_selected_twice() {
        let engine = engine();
        let tx = engine.mint(15 * COIN, None, false).unwrap();
        for request in &tx.requests {
            engine.confirm_mint(&request.serial_number, 1).unwrap();
        }

        let take_ten = |mature: Vec<MintRecord>| -> Result<(Vec<MintRecord>, ()), ()> {
            let ten: Vec<MintRecord> = mature.into_iter().filter(|m| m.denomination == Denomination::Ten).collect();
            if ten.is_empty() {
                Err(())
            } else {
                Ok((ten, ()))
            }
        };
        let (first, _) = engine.reserve_mature(30, 20, take_ten).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(engine.reserve_mature(30, 20, take_ten), Err(()));
        assert_eq!(engine.mature_mints(30, 20).len(), 1);

        engine.release(&[first[0].serial_number]);
        assert_eq!(engine.mature_mints(30, 20).len(), 2);

        let (again, _) = engine.reserve_mature(30, 20, take_ten).unwrap();
        engine.mark_spent(&again[0].serial_number, 31).unwrap();
        assert_eq!(engine.mature_mints(40, 20).len(), 1);
        assert_eq!(engine.balance(), 5 * COIN);
    }

    #[test]
    fn test_discard_pending_forgets_secret() {
        let engine = engine();
        let tx = engine.mint(COIN, None, false).unwrap();
        let serial = tx.requests[0].serial_number;
        assert_eq!(engine.keystore.len(), 1);

        engine.discard_pending(&serial).unwrap();
        assert!(engine.get(&serial).is_none());
        assert!(engine.keystore.is_empty());
    }

    #[test]
    fn test_txid_depends_on_outputs() {
        let engine = engine();
        let a = engine.mint(COIN, None, false).unwrap();
        let b = engine.mint(COIN, None, false).unwrap();
        assert_ne!(a.txid, b.txid);
    }

    #[test]
    fn test_auto_mint_targets_percentage() {
        let config = PrivacyConfig {
            automint_percentage: 10,
            ..PrivacyConfig::default()
        };

        assert_eq!(plan_auto_mint(0, 5 * COIN, &config), None);
        assert_eq!(plan_auto_mint(0, 1_000 * COIN, &config), Some(100 * COIN));
        assert_eq!(plan_auto_mint(0, 800 * COIN, &config), Some(50 * COIN));
        assert_eq!(plan_auto_mint(200 * COIN, 800 * COIN, &config), None);
        assert_eq!(plan_auto_mint(0, 100_000 * COIN, &config), Some(6666 * COIN));
    }

    #[test]
    fn test_auto_mint_waits_for_preferred() {
        let config = PrivacyConfig {
            automint_percentage: 10,
            preferred_denomination: 500,
            ..PrivacyConfig::default()
        };

        assert_eq!(plan_auto_mint(0, 1_000 * COIN, &config), None);
        assert_eq!(plan_auto_mint(0, 10_000 * COIN, &config), Some(500 * COIN));
    }
}
