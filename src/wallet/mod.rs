//! Privacy Wallet
//!
//! Orchestrates the mint engine, accumulator ledger, spend builder, serial
//! registry and mixing sessions behind one wallet-level API.

pub mod broadcaster;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::PrivacyConfig;
use crate::consensus_params::zerocoin::{MAX_SECURITY_LEVEL, MINT_REQUIRED_CONFIRMATIONS, MIN_SECURITY_LEVEL};
use crate::consensus_params::Amount;
use crate::crypto::{AccumulatorScheme, AccumulatorValue, SerialNumber};
use crate::database::{ChainBlock, ChainSource, PersistentLedger, ReloadReport, RescanReport, StorageError};
use crate::denomination::Denomination;
use crate::error::WalletResult;
use crate::obfuscation::{
    CollateralCandidate, CoordinatorEvent, InputCommitment, InputLockRegistry, InputSigner, MasternodeCoordinator,
    MixingSessionManager, SessionId,
};
use crate::zerocoin::{
    plan_auto_mint, select_mints, AccumulatorCheckpoint, AccumulatorLedger, Destination, FaultState, KeyStoreError,
    MintEngine, MintRecord, MintTransaction, SerialRegistry, SpendError, SpendProof, SpendProofBuilder,
    SpendReceipt, SpendResult, SpendTransaction, WalletKeyStore,
};

pub use broadcaster::{BroadcastError, RecordingBroadcaster, TransactionBroadcaster};

/// External collaborators the wallet talks to
pub struct WalletServices {
    pub scheme: Arc<dyn AccumulatorScheme>,
    pub coordinator: Arc<dyn MasternodeCoordinator>,
    pub signer: Arc<dyn InputSigner>,
    pub broadcaster: Arc<dyn TransactionBroadcaster>,
}

pub struct PrivacyWallet {
    config: PrivacyConfig,
    keystore: Arc<WalletKeyStore>,
    faults: FaultState,
    ledger: Arc<AccumulatorLedger>,
    mints: Arc<MintEngine>,
    spend_builder: Arc<SpendProofBuilder>,
    registry: Arc<SerialRegistry>,
    mixing: Arc<MixingSessionManager>,
    broadcaster: Arc<dyn TransactionBroadcaster>,
    storage: Option<Arc<PersistentLedger>>,
}

impl PrivacyWallet {
    pub fn new(config: PrivacyConfig, services: WalletServices) -> Self {
        let config = config.normalized();
        let keystore = Arc::new(WalletKeyStore::new());
        let faults = FaultState::new();
        let scheme = services.scheme;

        Self {
            ledger: Arc::new(AccumulatorLedger::new(scheme.clone(), config.fold_order, faults.clone())),
            mints: Arc::new(MintEngine::new(scheme.clone(), keystore.clone(), faults.clone())),
            spend_builder: Arc::new(SpendProofBuilder::new(scheme.clone(), keystore.clone())),
            registry: Arc::new(SerialRegistry::new(scheme)),
            mixing: Arc::new(MixingSessionManager::new(
                services.coordinator,
                services.signer,
                Arc::new(InputLockRegistry::new()),
                config.enable_mixing,
            )),
            broadcaster: services.broadcaster,
            storage: None,
            keystore,
            faults,
            config,
        }
    }

    /// Mirror every connected block into the on-disk cache
    pub fn with_storage(mut self, storage: Arc<PersistentLedger>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn config(&self) -> &PrivacyConfig {
        &self.config
    }

    pub fn keystore(&self) -> &Arc<WalletKeyStore> {
        &self.keystore
    }

    pub fn faults(&self) -> &FaultState {
        &self.faults
    }

    pub fn ledger(&self) -> &Arc<AccumulatorLedger> {
        &self.ledger
    }

    pub fn mint_engine(&self) -> &Arc<MintEngine> {
        &self.mints
    }

    pub fn registry(&self) -> &Arc<SerialRegistry> {
        &self.registry
    }

    pub fn mixing(&self) -> &Arc<MixingSessionManager> {
        &self.mixing
    }

    pub fn tip_height(&self) -> u64 {
        self.ledger.tip_height().unwrap_or(0)
    }

    pub fn unlock(&self) {
        self.keystore.unlock();
    }

    /// Lock the key store and cancel every mixing session
    pub fn lock(&self) {
        self.keystore.lock();
        let cancelled = self.mixing.shutdown();
        log::info!("wallet locked, {} mixing sessions cancelled", cancelled);
    }

    /// Zerocoin value held, pending mints included
    pub fn zerocoin_balance(&self) -> Amount {
        self.mints.balance()
    }

    /// Mint `amount` using the configured denomination preference
    pub fn mint(&self, amount: Amount) -> WalletResult<MintTransaction> {
        let transaction = self
            .mints
            .mint(amount, self.config.preferred(), self.config.wait_for_preferred)?;
        if let Err(err) = self.broadcaster.broadcast_mint(&transaction) {
            for request in &transaction.requests {
                if let Err(discard) = self.mints.discard_pending(&request.serial_number) {
                    log::warn!(
                        "could not discard unbroadcast mint {}: {}",
                        &request.serial_number.to_hex()[..16],
                        discard
                    );
                }
            }
            return Err(err.into());
        }
        Ok(transaction)
    }

    /// Mint toward the configured zerocoin share of the balance
    pub fn auto_mint(&self, available_balance: Amount) -> WalletResult<Option<MintTransaction>> {
        match plan_auto_mint(self.zerocoin_balance(), available_balance, &self.config) {
            Some(amount) => {
                log::info!("auto-minting {}", amount);
                self.mint(amount).map(Some)
            }
            None => Ok(None),
        }
    }

    pub fn confirm_mint(&self, serial: &SerialNumber, height: u64) -> WalletResult<MintRecord> {
        Ok(self.mints.confirm_mint(serial, height)?)
    }

    /// Apply a confirmed block to the ledger, the registry and our own mints
    pub fn connect_block(&self, block: &ChainBlock) -> WalletResult<Vec<AccumulatorCheckpoint>> {
        let checkpoints = match &self.storage {
            Some(storage) => storage.connect_block(&self.ledger, &self.registry, block)?,
            None => {
                let checkpoints = self.ledger.connect_block(block.height, &block.mints, &block.spends)?;
                for (_, serial) in &block.spends {
                    self.registry.restore(*serial, block.height);
                }
                checkpoints
            }
        };

        for mint in &block.mints {
            if let Some(own) = self.mints.get(&mint.serial_number) {
                if !own.confirmed {
                    self.mints.confirm_mint(&mint.serial_number, block.height)?;
                }
            }
        }
        for (_, serial) in &block.spends {
            if self.mints.get(serial).is_some() {
                self.mints.mark_spent(serial, block.height)?;
            }
        }
        Ok(checkpoints)
    }

    /// Compare a consensus-recorded checkpoint with the local fold
    pub fn verify_checkpoint(&self, height: u64, denomination: Denomination, expected: &AccumulatorValue) -> bool {
        self.ledger.verify_checkpoint(height, denomination, expected)
    }

    /// Undo everything above `height` after a reorganization
    pub fn rollback(&self, height: u64) -> WalletResult<()> {
        match &self.storage {
            Some(storage) => storage.rollback(&self.ledger, &self.registry, height)?,
            None => {
                self.ledger.rollback(height);
                self.registry.forget_above(height);
            }
        }
        self.mints.rollback(height);
        Ok(())
    }

    /// Spend `amount` to `destination` at the configured security level
    pub async fn spend(&self, amount: Amount, destination: Destination) -> WalletResult<SpendReceipt> {
        self.spend_at_level(amount, destination, self.config.security_level).await
    }

    /// Spend `amount`, reporting spend failures as a receipt.
    ///
    /// Broadcast failures are returned as errors; nothing is marked spent and
    /// the selected coins become spendable again.
    pub async fn spend_at_level(
        &self,
        amount: Amount,
        destination: Destination,
        security_level: u8,
    ) -> WalletResult<SpendReceipt> {
        let transaction = match self.prepare_spend(amount, destination, security_level).await {
            Ok(transaction) => transaction,
            Err(err) => {
                log::warn!("spend of {} failed: {}", amount, err);
                return Ok(SpendReceipt::failure(&err));
            }
        };

        if let Err(err) = self.broadcaster.broadcast_spend(&transaction) {
            self.mints.release(&transaction.serials());
            return Err(err.into());
        }
        let tip = self.tip_height();
        for serial in transaction.serials() {
            self.mints.mark_spent(&serial, tip)?;
        }
        if transaction.change > 0 {
            match self.mint(transaction.change) {
                Ok(change) => log::info!("minted {} change coins", change.requests.len()),
                Err(err) => log::warn!("could not mint change of {}: {}", transaction.change, err),
            }
        }

        log::info!(
            "spent {} with {} coins in tx {}",
            amount,
            transaction.spends.len(),
            hex::encode(&transaction.txid[..8])
        );
        Ok(SpendReceipt::success(transaction))
    }

    async fn prepare_spend(
        &self,
        amount: Amount,
        destination: Destination,
        security_level: u8,
    ) -> SpendResult<SpendTransaction> {
        if !(MIN_SECURITY_LEVEL..=MAX_SECURITY_LEVEL).contains(&security_level) {
            return Err(SpendError::SecurityLevelOutOfRange(security_level));
        }
        if !self.keystore.is_unlocked() {
            return Err(SpendError::WalletLocked);
        }

        let tip = self.tip_height();
        let (selected, change) = self.mints.reserve_mature(tip, MINT_REQUIRED_CONFIRMATIONS, |mature| {
            let (usable, halted): (Vec<MintRecord>, Vec<MintRecord>) = mature
                .into_iter()
                .partition(|m| !self.faults.is_halted(m.denomination));
            match select_mints(amount, &usable) {
                Err(SpendError::InsufficientFunds { .. }) if !halted.is_empty() => {
                    Err(SpendError::Halted(halted[0].denomination))
                }
                selection => selection,
            }
        })?;

        let reserved: Vec<SerialNumber> = selected.iter().map(|m| m.serial_number).collect();
        let built = self.build_spend(selected, change, amount, destination, security_level).await;
        if built.is_err() {
            self.mints.release(&reserved);
        }
        built
    }

    async fn build_spend(
        &self,
        selected: Vec<MintRecord>,
        change: Amount,
        amount: Amount,
        destination: Destination,
        security_level: u8,
    ) -> SpendResult<SpendTransaction> {
        let mut spends: Vec<SpendProof> = Vec::with_capacity(selected.len());
        for mint in selected {
            let snapshot = self
                .ledger
                .snapshot(mint.denomination, mint.mint_height, security_level)?;
            let proof = self
                .spend_builder
                .build_proof_offloaded(mint, snapshot, security_level, destination)
                .await?;
            spends.push(proof);
        }

        SpendTransaction::assemble(spends, destination, amount, change)
    }

    /// Accept a spend seen on the network
    pub fn accept_spend(&self, proof: &SpendProof, height: u64) -> WalletResult<()> {
        if self.faults.is_halted(proof.denomination) {
            return Err(SpendError::Halted(proof.denomination).into());
        }
        self.registry.accept(proof, &self.ledger, height)?;
        if self.mints.get(&proof.serial_number).is_some() {
            self.mints.mark_spent(&proof.serial_number, height)?;
        }
        Ok(())
    }

    /// Queue denominated inputs for a mixing round
    pub fn start_mixing(
        &self,
        denomination: Denomination,
        inputs: Vec<InputCommitment>,
        collateral: CollateralCandidate,
    ) -> WalletResult<SessionId> {
        if !self.keystore.is_unlocked() {
            return Err(KeyStoreError::Locked.into());
        }
        Ok(self.mixing.submit(denomination, inputs, collateral, Instant::now())?)
    }

    pub fn mixing_status(&self, session_id: SessionId) -> String {
        self.mixing.status_text(session_id)
    }

    /// Drive mixing sessions from coordinator events until `shutdown` flips
    pub fn spawn_mixing_loop(
        &self,
        events: mpsc::UnboundedReceiver<CoordinatorEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.mixing).run_event_loop(events, shutdown))
    }

    /// Rebuild the ledger from the on-disk cache
    pub fn reload(&self) -> WalletResult<ReloadReport> {
        let storage = self
            .storage
            .as_ref()
            .ok_or_else(|| StorageError::Database("no ledger storage configured".to_string()))?;
        let report = storage.reload(&self.ledger, &self.registry)?;
        self.reconcile_own_mints();
        Ok(report)
    }

    /// Discard all ledger state and rebuild it from confirmed chain history.
    ///
    /// This is the only way to clear halted denominations.
    pub fn resynchronize(&self, chain: &dyn ChainSource) -> WalletResult<RescanReport> {
        let halted = self.faults.halted_denominations();
        let report = match &self.storage {
            Some(storage) => storage.reset_and_rescan(&self.ledger, &self.registry, chain, self.config.rescan_depth)?,
            None => self.rescan_in_memory(chain)?,
        };
        self.reconcile_own_mints();
        log::info!(
            "resynchronized blocks {}..={}, cleared {} halted denominations",
            report.from_height,
            report.to_height,
            halted.len()
        );
        Ok(report)
    }

    fn rescan_in_memory(&self, chain: &dyn ChainSource) -> WalletResult<RescanReport> {
        self.ledger.reset();
        self.registry.clear();
        for denomination in self.faults.halted_denominations() {
            self.faults.clear(denomination);
        }

        let tip = chain.tip_height();
        let from_height = tip.saturating_sub(self.config.rescan_depth.saturating_sub(1));
        let mut report = RescanReport {
            from_height,
            to_height: tip,
            ..RescanReport::default()
        };
        for height in from_height..=tip {
            let block = chain
                .block(height)
                .map_err(|e| StorageError::Chain(format!("block {}: {:#}", height, e)))?
                .unwrap_or(ChainBlock { height, ..ChainBlock::default() });
            self.ledger.connect_block(height, &block.mints, &block.spends)?;
            for (_, serial) in &block.spends {
                self.registry.restore(*serial, height);
            }
            report.blocks += 1;
            report.mints += block.mints.len();
            report.spends += block.spends.len();
        }
        Ok(report)
    }

    /// Bring our own mint records in line with the rebuilt ledger
    fn reconcile_own_mints(&self) {
        let mut on_chain: HashMap<SerialNumber, MintRecord> = HashMap::new();
        for denomination in Denomination::all() {
            for record in self.ledger.mint_history(denomination) {
                on_chain.insert(record.serial_number, record);
            }
        }

        for own in self.mints.mints() {
            let spent_height = self.registry.spent_height(&own.serial_number);
            match on_chain.remove(&own.serial_number) {
                Some(mut record) => {
                    record.spent = spent_height.is_some();
                    self.mints.restore(record, spent_height);
                }
                None if own.confirmed => {
                    log::warn!(
                        "mint {} is no longer on chain, returning it to pending",
                        &own.serial_number.to_hex()[..16]
                    );
                    let pending = MintRecord::pending(own.serial_number, own.commitment, own.denomination);
                    self.mints.restore(pending, None);
                }
                None => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus_params::COIN;
    use crate::crypto::PedersenRingAccumulator;
    use crate::obfuscation::{Secp256k1InputSigner, SimulatedBehavior, SimulatedCoordinator};
    use crate::error::WalletError;
    use crate::zerocoin::SpendStatus;

    fn wallet_with(config: PrivacyConfig) -> (PrivacyWallet, Arc<RecordingBroadcaster>) {
        let (coordinator, _events) = SimulatedCoordinator::new(SimulatedBehavior::Silent);
        let broadcaster = Arc::new(RecordingBroadcaster::new());
        let wallet = PrivacyWallet::new(
            config,
            WalletServices {
                scheme: Arc::new(PedersenRingAccumulator::new()),
                coordinator: Arc::new(coordinator),
                signer: Arc::new(Secp256k1InputSigner::new(&[3u8; 32]).unwrap()),
                broadcaster: broadcaster.clone(),
            },
        );
        wallet.unlock();
        (wallet, broadcaster)
    }

    fn confirm_all(wallet: &PrivacyWallet, tx: &MintTransaction, height: u64) {
        let mints: Vec<MintRecord> = tx
            .requests
            .iter()
            .map(|r| MintRecord::pending(r.serial_number, r.commitment, r.denomination))
            .collect();
        wallet.connect_block(&ChainBlock { height, mints, spends: vec![] }).unwrap();
    }

    fn advance(wallet: &PrivacyWallet, to: u64) {
        for height in wallet.tip_height() + 1..=to {
            wallet.connect_block(&ChainBlock { height, ..ChainBlock::default() }).unwrap();
        }
    }

    #[test]
    fn test_mint_is_broadcast_and_confirmed_by_block() {
        let (wallet, broadcaster) = wallet_with(PrivacyConfig::default());
        let tx = wallet.mint(60 * COIN).unwrap();
        assert_eq!(broadcaster.mints().len(), 1);
        assert_eq!(wallet.mint_engine().pending_mints().len(), 2);

        confirm_all(&wallet, &tx, 1);
        assert_eq!(wallet.mint_engine().confirmed_mints().len(), 2);
        assert_eq!(wallet.ledger().mint_history(Denomination::Fifty).len(), 1);
    }

    #[test]
    fn test_failed_broadcast_discards_pending_mints() {
        let (wallet, broadcaster) = wallet_with(PrivacyConfig::default());
        broadcaster.set_offline(true);
        let err = wallet.mint(10 * COIN).unwrap_err();
        assert!(matches!(err, WalletError::Broadcast(_)));
        assert!(wallet.mint_engine().mints().is_empty());
    }

    #[tokio::test]
    async fn test_spend_requires_maturity() {
        let (wallet, _) = wallet_with(PrivacyConfig::default());
        let tx = wallet.mint(10 * COIN).unwrap();
        confirm_all(&wallet, &tx, 1);

        let receipt = wallet.spend(10 * COIN, Destination([1u8; 32])).await.unwrap();
        assert_eq!(receipt.status, SpendStatus::FundsProblem);

        advance(&wallet, 1 + MINT_REQUIRED_CONFIRMATIONS);
        let receipt = wallet.spend(10 * COIN, Destination([1u8; 32])).await.unwrap();
        assert!(receipt.is_success(), "{}", receipt.message);
        assert_eq!(wallet.mint_engine().confirmed_mints().len(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_spends_never_share_a_coin() {
        let (wallet, broadcaster) = wallet_with(PrivacyConfig::default());
        let tx = wallet.mint(10 * COIN).unwrap();
        confirm_all(&wallet, &tx, 1);
        advance(&wallet, 1 + MINT_REQUIRED_CONFIRMATIONS);

        let (first, second) = tokio::join!(
            wallet.spend(10 * COIN, Destination([1u8; 32])),
            wallet.spend(10 * COIN, Destination([2u8; 32]))
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert!(first.is_success() != second.is_success());
        let failed = if first.is_success() { &second } else { &first };
        assert_eq!(failed.status, SpendStatus::FundsProblem);
        assert_eq!(broadcaster.spends().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_spend_broadcast_releases_coins() {
        let (wallet, broadcaster) = wallet_with(PrivacyConfig::default());
        let tx = wallet.mint(10 * COIN).unwrap();
        confirm_all(&wallet, &tx, 1);
        advance(&wallet, 1 + MINT_REQUIRED_CONFIRMATIONS);

        broadcaster.set_offline(true);
        let err = wallet.spend(10 * COIN, Destination([1u8; 32])).await.unwrap_err();
        assert!(matches!(err, WalletError::Broadcast(_)));
        assert_eq!(
            wallet.mint_engine().mature_mints(wallet.tip_height(), MINT_REQUIRED_CONFIRMATIONS).len(),
            1
        );

        broadcaster.set_offline(false);
        let receipt = wallet.spend(10 * COIN, Destination([1u8; 32])).await.unwrap();
        assert!(receipt.is_success(), "{}", receipt.message);
        assert_eq!(broadcaster.spends().len(), 1);
    }

    #[test]
    fn test_locked_wallet_cannot_spend() {
        let (wallet, _) = wallet_with(PrivacyConfig::default());
        wallet.lock();
        let receipt = tokio_test::block_on(wallet.spend(10 * COIN, Destination([1u8; 32]))).unwrap();
        assert_eq!(receipt.status, SpendStatus::WalletLocked);
        assert_eq!(receipt.status.code(), 2);
    }

    #[test]
    fn test_auto_mint_targets_share() {
        let config = PrivacyConfig {
            automint_percentage: 50,
            ..PrivacyConfig::default()
        };
        let (wallet, _) = wallet_with(config);

        let tx = wallet.auto_mint(200 * COIN).unwrap().unwrap();
        assert_eq!(tx.total(), 100 * COIN);
        assert!(wallet.auto_mint(5 * COIN).unwrap().is_none());
    }

    #[test]
    fn test_resynchronize_clears_fault_and_reconfirms() {
        let (wallet, _) = wallet_with(PrivacyConfig::default());
        let tx = wallet.mint(5 * COIN).unwrap();
        let mints: Vec<MintRecord> = tx
            .requests
            .iter()
            .map(|r| MintRecord::pending(r.serial_number, r.commitment, r.denomination))
            .collect();

        let chain = crate::database::MemoryChain::new();
        chain.push(ChainBlock { height: 1, mints: mints.clone(), spends: vec![] });
        wallet.connect_block(&chain.block(1).unwrap().unwrap()).unwrap();

        assert!(!wallet.verify_checkpoint(1, Denomination::Five, &AccumulatorValue([7u8; 32])));
        assert!(wallet.faults().is_halted(Denomination::Five));
        assert!(matches!(wallet.mint(5 * COIN), Err(WalletError::Mint(_))));

        let report = wallet.resynchronize(&chain).unwrap();
        assert_eq!(report.mints, 1);
        assert!(!wallet.faults().is_faulted());
        assert!(wallet.mint_engine().get(&mints[0].serial_number).unwrap().confirmed);
    }
}
