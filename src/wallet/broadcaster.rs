//! Outbound transaction hand-off

use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::Mutex;

use crate::zerocoin::{MintTransaction, SpendTransaction};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BroadcastError {
    #[error("Broadcaster unavailable: {0}")]
    Unavailable(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),
}

/// Relays signed mint and spend transactions to the network
pub trait TransactionBroadcaster: Send + Sync {
    fn broadcast_mint(&self, transaction: &MintTransaction) -> Result<(), BroadcastError>;

    fn broadcast_spend(&self, transaction: &SpendTransaction) -> Result<(), BroadcastError>;
}

/// Keeps every transaction it is handed; used by tests and the simulator
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    mints: Mutex<Vec<MintTransaction>>,
    spends: Mutex<Vec<SpendTransaction>>,
    offline: AtomicBool,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn mints(&self) -> Vec<MintTransaction> {
        self.mints.lock().clone()
    }

    pub fn spends(&self) -> Vec<SpendTransaction> {
        self.spends.lock().clone()
    }

    fn check_online(&self) -> Result<(), BroadcastError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BroadcastError::Unavailable("no peers connected".to_string()));
        }
        Ok(())
    }
}

impl TransactionBroadcaster for RecordingBroadcaster {
    fn broadcast_mint(&self, transaction: &MintTransaction) -> Result<(), BroadcastError> {
        self.check_online()?;
        log::debug!("relaying mint tx {}", hex::encode(&transaction.txid[..8]));
        self.mints.lock().push(transaction.clone());
        Ok(())
    }

    fn broadcast_spend(&self, transaction: &SpendTransaction) -> Result<(), BroadcastError> {
        self.check_online()?;
        log::debug!("relaying spend tx {}", hex::encode(&transaction.txid[..8]));
        self.spends.lock().push(transaction.clone());
        Ok(())
    }
}
