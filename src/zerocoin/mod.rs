//! Zerocoin Module
//!
//! Minting standard coins into commitment / serial pairs, maintaining the
//! per-denomination accumulator checkpoints, and building spend proofs.

pub mod fault;
pub mod keystore;
pub mod ledger;
pub mod mint;
pub mod spend;

use serde::{Deserialize, Serialize};

use crate::crypto::{CoinCommitment, SerialNumber};
use crate::denomination::Denomination;

// Re-export main types
pub use fault::FaultState;
pub use keystore::{KeyStoreError, WalletKeyStore};
pub use ledger::{AccumulatorCheckpoint, AccumulatorLedger, AccumulatorSnapshot, LedgerError, LedgerResult};
pub use mint::{plan_auto_mint, MintEngine, MintError, MintRequest, MintResult, MintTransaction};
pub use spend::{
    select_mints, spend_message, Destination, SerialRegistry, SpendError, SpendProof, SpendProofBuilder,
    SpendReceipt, SpendResult, SpendStatus, SpendTransaction,
};

/// A minted coin as the wallet tracks it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRecord {
    /// Secret-derived serial number, unique across the chain
    pub serial_number: SerialNumber,
    /// Public commitment placed on chain
    pub commitment: CoinCommitment,
    pub denomination: Denomination,
    /// Height of the block that confirmed the mint (0 while pending)
    pub mint_height: u64,
    pub confirmed: bool,
    /// Set once a spend of this coin has been accepted
    pub spent: bool,
}

impl MintRecord {
    /// A mint that has been issued but not yet confirmed
    pub fn pending(serial_number: SerialNumber, commitment: CoinCommitment, denomination: Denomination) -> Self {
        Self {
            serial_number,
            commitment,
            denomination,
            mint_height: 0,
            confirmed: false,
            spent: false,
        }
    }

    /// The same mint, confirmed at `height`
    pub fn confirmed_at(mut self, height: u64) -> Self {
        self.mint_height = height;
        self.confirmed = true;
        self
    }

    /// Confirmed, unspent and buried deeply enough to spend at `tip`
    pub fn is_mature(&self, tip: u64, required_confirmations: u64) -> bool {
        self.confirmed && !self.spent && tip >= self.mint_height + required_confirmations
    }
}
