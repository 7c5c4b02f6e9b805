//! Obfuscation Module
//!
//! Client side of masternode-coordinated coin mixing: collateral checks,
//! input reservation, the per-session state machine and the abstract
//! coordinator it talks to.

pub mod collateral;
pub mod coordinator;
pub mod input_locks;
pub mod manager;
pub mod messages;
pub mod session;
pub mod signer;

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::consensus_params::Amount;
use crate::crypto::CryptoUtils;

// Re-export main types
pub use collateral::{CollateralCandidate, CollateralValidator, CollateralVerdict};
pub use coordinator::{
    CoordinatorError, CoordinatorEvent, CoordinatorEventKind, MasternodeCoordinator, SessionRequest,
    SignatureSubmission, SimulatedBehavior, SimulatedCoordinator,
};
pub use input_locks::{InputLockRegistry, LockError};
pub use manager::{MixingSessionManager, SessionError, SessionOutcome, SessionResult};
pub use messages::PoolMessage;
pub use session::{ObfuscationSession, SessionState};
pub use signer::{InputSigner, Secp256k1InputSigner, SignedInput};

/// Reference to a transaction output
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: [u8; 32],
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: [u8; 32], vout: u32) -> Self {
        Self { txid, vout }
    }

    pub fn to_bytes(&self) -> [u8; 36] {
        let mut bytes = [0u8; 36];
        bytes[..32].copy_from_slice(&self.txid);
        bytes[32..].copy_from_slice(&self.vout.to_be_bytes());
        bytes
    }
}

impl fmt::Debug for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", &CryptoUtils::to_hex(&self.txid)[..16], self.vout)
    }
}

/// A denominated input the wallet contributes to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputCommitment {
    pub outpoint: OutPoint,
    pub value: Amount,
}

/// Session identifier assigned locally when a request is submitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}
