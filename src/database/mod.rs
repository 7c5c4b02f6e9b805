//! Database Module
//!
//! RocksDB-backed accumulator and mint cache with atomic per-block writes,
//! an LRU in front of it, and reload / rescan of the in-memory ledger.

pub mod schema;
pub mod cache_manager;
pub mod persistence;

use crate::zerocoin::LedgerError;

// Re-export main types
pub use schema::{BlockWrite, DBConfig, LedgerStore};
pub use cache_manager::{CacheConfig, CacheManager, CacheStats};
pub use persistence::{ChainBlock, ChainSource, MemoryChain, PersistentLedger, ReloadReport, RescanReport};

/// Storage error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Chain source error: {0}")]
    Chain(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type StorageResult<T> = Result<T, StorageError>;
