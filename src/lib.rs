// Protocol parameters and configuration
pub mod consensus_params;
pub mod config;
pub mod error;

// Organized modules
pub mod denomination;
pub mod crypto;
pub mod zerocoin;
pub mod obfuscation;
pub mod database;
pub mod wallet;


// Re-export main types for easy access
pub use config::{FoldOrder, PrivacyConfig};
pub use consensus_params::{Amount, COIN};
pub use denomination::{decompose, Decomposition, Denomination, DenominationError};
pub use crypto::{AccumulatorScheme, AccumulatorValue, CoinCommitment, CryptoError, PedersenRingAccumulator, SerialNumber};
pub use zerocoin::{
    AccumulatorCheckpoint, AccumulatorLedger, FaultState, MintEngine, MintRecord, SerialRegistry, SpendProof,
    SpendProofBuilder, SpendReceipt, SpendStatus,
};
pub use obfuscation::{MasternodeCoordinator, MixingSessionManager, ObfuscationSession, PoolMessage, SessionState};
pub use database::{ChainBlock, ChainSource, PersistentLedger};
pub use wallet::{PrivacyWallet, TransactionBroadcaster, WalletServices};
pub use error::{ErrorClass, WalletError, WalletResult};
