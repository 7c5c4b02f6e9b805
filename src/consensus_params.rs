//! Consensus Parameters
//!
//! Protocol-fixed constants shared by the mixing and zerocoin subsystems,
//! together with the canonical byte-level encodings that must agree with
//! the rest of the network. All integers are encoded big-endian and every
//! hash carries a domain separator.

use blake2::{Blake2s256, Digest};

/// Amount in base units (1 coin = `COIN` base units)
pub type Amount = i64;

/// Base units per coin
pub const COIN: Amount = 100_000_000;

/// Domain separators for collision resistance
pub mod domains {
    /// Coin commitment generator derivation: "ZCGH"
    pub const COMMITMENT_GENERATOR: [u8; 4] = [0x5A, 0x43, 0x47, 0x48];

    /// Serial number derivation: "ZSER"
    pub const SERIAL: [u8; 4] = [0x5A, 0x53, 0x45, 0x52];

    /// Commitment randomness derivation: "ZRND"
    pub const RANDOMNESS: [u8; 4] = [0x5A, 0x52, 0x4E, 0x44];

    /// Accumulator fold: "ACCF"
    pub const ACCUMULATOR_FOLD: [u8; 4] = [0x41, 0x43, 0x43, 0x46];

    /// Accumulator genesis value: "ACC0"
    pub const ACCUMULATOR_GENESIS: [u8; 4] = [0x41, 0x43, 0x43, 0x30];

    /// Combined per-height checkpoint digest: "ACKD"
    pub const CHECKPOINT_DIGEST: [u8; 4] = [0x41, 0x43, 0x4B, 0x44];

    /// Spend proof challenge: "SPCH"
    pub const SPEND_CHALLENGE: [u8; 4] = [0x53, 0x50, 0x43, 0x48];

    /// Message a spend proof is bound to: "SPMG"
    pub const SPEND_MESSAGE: [u8; 4] = [0x53, 0x50, 0x4D, 0x47];

    /// Obfuscation session message: "DSMS"
    pub const SESSION_MESSAGE: [u8; 4] = [0x44, 0x53, 0x4D, 0x53];

    /// Transaction id: "TXID"
    pub const TRANSACTION_ID: [u8; 4] = [0x54, 0x58, 0x49, 0x44];
}

/// Obfuscation (mixing) protocol constants
pub mod obfuscation {
    use super::{Amount, COIN};

    /// Anti-spam collateral paid into a mixing request
    pub const COLLATERAL: Amount = 10 * COIN;

    /// Largest input accepted as collateral
    pub const MAX_COLLATERAL: Amount = 4 * COLLATERAL;

    /// Largest amount a single pool may carry
    pub const POOL_MAX: Amount = 99_999 * COIN + 99_000_000;

    /// Seconds a queued / accepted session waits for the coordinator
    pub const QUEUE_TIMEOUT_SECS: u64 = 30;

    /// Seconds allowed for collecting every participant's signature
    pub const SIGNING_TIMEOUT_SECS: u64 = 15;

    /// Participants required before the coordinator accepts entries
    pub const POOL_MAX_TRANSACTIONS: usize = 3;
}

/// Zerocoin protocol constants
pub mod zerocoin {
    /// Maximum number of spends in one transaction
    pub const MAX_SPENDS_PER_TRANSACTION: usize = 7;

    /// Confirmations before a mint may be spent
    pub const MINT_REQUIRED_CONFIRMATIONS: u64 = 20;

    /// Blocks advanced per security-level unit when picking a witness checkpoint
    pub const CHECKPOINT_INTERVAL: u64 = 10;

    /// Default spend security level
    pub const DEFAULT_SECURITY_LEVEL: u8 = 42;

    /// Security level bounds
    pub const MIN_SECURITY_LEVEL: u8 = 1;
    pub const MAX_SECURITY_LEVEL: u8 = 100;

    /// Auto-mint amount (in coins) that yields one coin of every denomination
    pub const AUTOMINT_ALL_DENOMINATIONS: u64 = 6666;

    /// Spendable balance (in coins) below which auto-mint does nothing
    pub const AUTOMINT_MIN_BALANCE: u64 = 10;

    /// Auto-mint percentage bounds
    pub const MIN_AUTOMINT_PERCENTAGE: u8 = 10;
    pub const MAX_AUTOMINT_PERCENTAGE: u8 = 100;
}

/// Storage key prefixes
pub mod cf_prefixes {
    pub const CHECKPOINTS: u8 = 0x01;
    pub const MINTS: u8 = 0x02;
    pub const SPENT_SERIALS: u8 = 0x03;
    pub const METADATA: u8 = 0x04;
}

/// Hash a list of byte slices under a domain separator
pub fn domain_hash(domain: &[u8; 4], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Blake2s256::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Generate a transaction id from its serialized body
pub fn generate_txid(body: &[u8]) -> [u8; 32] {
    domain_hash(&domains::TRANSACTION_ID, &[body])
}

/// Storage key: denomination (2 bytes BE) || height (8 bytes BE)
pub fn height_key(prefix: u8, denomination: u16, height: u64) -> [u8; 11] {
    let mut key = [0u8; 11];
    key[0] = prefix;
    key[1..3].copy_from_slice(&denomination.to_be_bytes());
    key[3..11].copy_from_slice(&height.to_be_bytes());
    key
}

/// Parse a key produced by [`height_key`]
pub fn parse_height_key(key: &[u8]) -> Option<(u8, u16, u64)> {
    if key.len() != 11 {
        return None;
    }
    let denomination = u16::from_be_bytes([key[1], key[2]]);
    let mut height = [0u8; 8];
    height.copy_from_slice(&key[3..11]);
    Some((key[0], denomination, u64::from_be_bytes(height)))
}
