//! Coin secret storage with wallet lock semantics

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use parking_lot::RwLock;

use crate::crypto::{CoinSecret, SerialNumber};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyStoreError {
    #[error("Wallet is locked")]
    Locked,

    #[error("No secret for serial {0}")]
    UnknownSerial(String),
}

/// Secrets of the wallet's own mints, readable only while unlocked
#[derive(Debug, Default)]
pub struct WalletKeyStore {
    locked: AtomicBool,
    secrets: RwLock<HashMap<SerialNumber, CoinSecret>>,
}

impl WalletKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
        log::info!("wallet locked");
    }

    pub fn unlock(&self) {
        self.locked.store(false, Ordering::SeqCst);
        log::info!("wallet unlocked");
    }

    pub fn is_unlocked(&self) -> bool {
        !self.locked.load(Ordering::SeqCst)
    }

    /// Store the secret of a freshly minted coin
    pub fn insert(&self, serial: SerialNumber, secret: CoinSecret) -> Result<(), KeyStoreError> {
        if !self.is_unlocked() {
            return Err(KeyStoreError::Locked);
        }
        self.secrets.write().insert(serial, secret);
        Ok(())
    }

    pub fn secret(&self, serial: &SerialNumber) -> Result<CoinSecret, KeyStoreError> {
        if !self.is_unlocked() {
            return Err(KeyStoreError::Locked);
        }
        self.secrets
            .read()
            .get(serial)
            .cloned()
            .ok_or_else(|| KeyStoreError::UnknownSerial(serial.to_hex()))
    }

    pub fn remove(&self, serial: &SerialNumber) {
        self.secrets.write().remove(serial);
    }

    pub fn len(&self) -> usize {
        self.secrets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
