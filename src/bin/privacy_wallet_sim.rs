//! Privacy Wallet Simulator
//!
//! Runs a mint, spend and mixing round against in-process collaborators.
//! Configuration comes from the environment, or from a JSON file given as
//! the first argument.

use std::sync::Arc;
use std::time::Duration;
use anyhow::{anyhow, Context, Result};

use zerocoin_obfuscation::consensus_params::obfuscation::COLLATERAL;
use zerocoin_obfuscation::consensus_params::zerocoin::MINT_REQUIRED_CONFIRMATIONS;
use zerocoin_obfuscation::crypto::CryptoUtils;
use zerocoin_obfuscation::database::{CacheConfig, ChainSource, DBConfig, MemoryChain};
use zerocoin_obfuscation::obfuscation::{
    CollateralCandidate, InputCommitment, OutPoint, Secp256k1InputSigner, SessionState, SimulatedBehavior,
    SimulatedCoordinator,
};
use zerocoin_obfuscation::wallet::RecordingBroadcaster;
use zerocoin_obfuscation::zerocoin::Destination;
use zerocoin_obfuscation::{
    ChainBlock, Denomination, MintRecord, PedersenRingAccumulator, PersistentLedger, PrivacyConfig, PrivacyWallet,
    WalletServices, COIN,
};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => PrivacyConfig::from_json_file(&path)?,
        None => PrivacyConfig::from_env(),
    };
    log::info!("starting privacy wallet simulation with {:?}", config);

    let (coordinator, events) = SimulatedCoordinator::new(SimulatedBehavior::Cooperative);
    let broadcaster = Arc::new(RecordingBroadcaster::new());
    let storage = PersistentLedger::open(DBConfig::at(config.db_path.clone()), CacheConfig::default())
        .with_context(|| format!("failed to open ledger cache at {}", config.db_path))?;
    let signer = Secp256k1InputSigner::random().map_err(|e| anyhow!("signer setup failed: {}", e))?;

    let wallet = PrivacyWallet::new(
        config.clone(),
        WalletServices {
            scheme: Arc::new(PedersenRingAccumulator::new()),
            coordinator: Arc::new(coordinator),
            signer: Arc::new(signer),
            broadcaster: broadcaster.clone(),
        },
    )
    .with_storage(Arc::new(storage));
    wallet.unlock();

    // Start from an empty cache
    let chain = MemoryChain::new();
    wallet.resynchronize(&chain)?;

    let mint_tx = wallet.mint(10_000 * COIN)?;
    let mints: Vec<MintRecord> = mint_tx
        .requests
        .iter()
        .map(|r| MintRecord::pending(r.serial_number, r.commitment, r.denomination))
        .collect();
    chain.push(ChainBlock { height: 1, mints, spends: Vec::new() });
    for height in 2..=1 + MINT_REQUIRED_CONFIRMATIONS {
        chain.push(ChainBlock { height, ..ChainBlock::default() });
    }
    for height in 1..=chain.tip_height() {
        if let Some(block) = chain.block(height)? {
            wallet.connect_block(&block)?;
        }
    }
    log::info!(
        "chain at height {}, zerocoin balance {}",
        wallet.tip_height(),
        wallet.zerocoin_balance() / COIN
    );

    let destination = Destination(CryptoUtils::random_32());
    let receipt = wallet.spend(5_000 * COIN, destination).await?;
    log::info!("spend status {} ({}): {}", receipt.status.code(), receipt.needed_spends, receipt.message);

    if let Some(transaction) = &receipt.transaction {
        let height = wallet.tip_height() + 1;
        let spends: Vec<(Denomination, _)> = transaction
            .spends
            .iter()
            .map(|s| (s.denomination, s.serial_number))
            .collect();
        for proof in &transaction.spends {
            wallet.accept_spend(proof, height)?;
        }
        let block = ChainBlock { height, mints: Vec::new(), spends };
        chain.push(block.clone());
        wallet.connect_block(&block)?;

        if let Err(err) = wallet.accept_spend(&transaction.spends[0], height + 1) {
            log::info!("replayed spend rejected as expected: {} ({:?})", err, err.class());
        }
    }

    wallet.mixing().set_enabled(true);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mixing_loop = wallet.spawn_mixing_loop(events, shutdown_rx);
    let session = wallet.start_mixing(
        Denomination::Ten,
        vec![InputCommitment {
            outpoint: OutPoint::new(CryptoUtils::random_32(), 0),
            value: Denomination::Ten.amount(),
        }],
        CollateralCandidate {
            outpoint: OutPoint::new(CryptoUtils::random_32(), 1),
            value: COLLATERAL,
        },
    )?;

    for _ in 0..50 {
        match wallet.mixing().status(session) {
            Some(state) if state.is_terminal() => break,
            _ => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    log::info!("mixing {} finished: {}", session, wallet.mixing_status(session));
    if wallet.mixing().status(session) != Some(SessionState::Complete) {
        log::warn!("mixing round did not complete");
    }

    shutdown_tx.send(true).ok();
    mixing_loop.await?;

    log::info!(
        "relayed {} mint and {} spend transactions; final zerocoin balance {}",
        broadcaster.mints().len(),
        broadcaster.spends().len(),
        wallet.zerocoin_balance() / COIN
    );
    Ok(())
}
