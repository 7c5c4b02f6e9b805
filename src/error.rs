//! Wallet-level error type
//!
//! Wraps every module error and sorts it into one of four classes that
//! decide whether the caller may retry.

use crate::crypto::CryptoError;
use crate::database::StorageError;
use crate::denomination::DenominationError;
use crate::obfuscation::SessionError;
use crate::wallet::BroadcastError;
use crate::zerocoin::{KeyStoreError, LedgerError, MintError, SpendError};

/// How an error should be handled by its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad parameters or wallet state; retry with different input
    LocalValidation,
    /// Session-scoped network failure; retry with backoff
    Protocol,
    /// Ledger state cannot be trusted; operator must resynchronize
    ConsensusIntegrity,
    /// Serial number already spent; never retry with the same serial
    DoubleSpend,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WalletError {
    #[error(transparent)]
    Denomination(#[from] DenominationError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Mint(#[from] MintError),

    #[error(transparent)]
    Spend(#[from] SpendError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

pub type WalletResult<T> = Result<T, WalletError>;

impl WalletError {
    pub fn class(&self) -> ErrorClass {
        match self {
            WalletError::Denomination(_) | WalletError::KeyStore(_) => ErrorClass::LocalValidation,
            WalletError::Crypto(_) => ErrorClass::LocalValidation,
            WalletError::Ledger(e) => ledger_class(e),
            WalletError::Mint(e) => match e {
                MintError::Halted(_) => ErrorClass::ConsensusIntegrity,
                _ => ErrorClass::LocalValidation,
            },
            WalletError::Spend(e) => match e {
                SpendError::DoubleSpend(_) => ErrorClass::DoubleSpend,
                SpendError::Halted(_) => ErrorClass::ConsensusIntegrity,
                SpendError::Ledger(inner) => ledger_class(inner),
                _ => ErrorClass::LocalValidation,
            },
            WalletError::Session(e) => match e {
                SessionError::Timeout(_)
                | SessionError::CoordinatorUnreachable(_)
                | SessionError::QueueFull
                | SessionError::Rejected(_) => ErrorClass::Protocol,
                _ => ErrorClass::LocalValidation,
            },
            WalletError::Storage(e) => match e {
                StorageError::Ledger(inner) => ledger_class(inner),
                StorageError::Database(_) | StorageError::Chain(_) => ErrorClass::Protocol,
            },
            WalletError::Broadcast(_) => ErrorClass::Protocol,
        }
    }

    /// Whether retrying (possibly with other parameters) can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::LocalValidation | ErrorClass::Protocol)
    }
}

fn ledger_class(err: &LedgerError) -> ErrorClass {
    if err.is_fatal() {
        ErrorClass::ConsensusIntegrity
    } else {
        ErrorClass::LocalValidation
    }
}
