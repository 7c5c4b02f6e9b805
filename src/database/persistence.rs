//! Ledger persistence
//!
//! Mirrors connected blocks into the RocksDB cache, reloads the ledger from
//! it on startup, and rebuilds everything from the chain when asked to.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::crypto::SerialNumber;
use crate::denomination::Denomination;
use crate::zerocoin::{AccumulatorCheckpoint, AccumulatorLedger, MintRecord, SerialRegistry};

use super::{BlockWrite, CacheConfig, CacheManager, DBConfig, LedgerStore, StorageError, StorageResult};

/// Block contents relevant to the accumulators
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainBlock {
    pub height: u64,
    pub mints: Vec<MintRecord>,
    pub spends: Vec<(Denomination, SerialNumber)>,
}

/// Source of confirmed blocks used for a rescan
pub trait ChainSource: Send + Sync {
    fn tip_height(&self) -> u64;

    fn block(&self, height: u64) -> anyhow::Result<Option<ChainBlock>>;
}

/// Summary of a reload from the cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub blocks: usize,
    pub mints: usize,
    pub spends: usize,
    /// Stored checkpoints that disagree with the recomputed fold
    pub divergent: Vec<(Denomination, u64)>,
}

/// Summary of a cache reset and rescan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RescanReport {
    pub from_height: u64,
    pub to_height: u64,
    pub blocks: usize,
    pub mints: usize,
    pub spends: usize,
}

/// Accumulator ledger backed by the on-disk cache
pub struct PersistentLedger {
    store: LedgerStore,
    cache: CacheManager,
}

impl PersistentLedger {
    pub fn open(db: DBConfig, cache: CacheConfig) -> StorageResult<Self> {
        let store = LedgerStore::open(db).map_err(|e| StorageError::Database(format!("{:#}", e)))?;
        Ok(Self {
            store,
            cache: CacheManager::new(cache),
        })
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Apply a block to the ledger and registry and persist the result
    pub fn connect_block(
        &self,
        ledger: &AccumulatorLedger,
        registry: &SerialRegistry,
        block: &ChainBlock,
    ) -> StorageResult<Vec<AccumulatorCheckpoint>> {
        let checkpoints = ledger.connect_block(block.height, &block.mints, &block.spends)?;
        for (_, serial) in &block.spends {
            registry.restore(*serial, block.height);
        }
        self.persist(block, &checkpoints)?;
        Ok(checkpoints)
    }

    fn persist(&self, block: &ChainBlock, checkpoints: &[AccumulatorCheckpoint]) -> StorageResult<()> {
        let write = BlockWrite {
            height: block.height,
            mints: block.mints.iter().map(|m| m.clone().confirmed_at(block.height)).collect(),
            spends: block.spends.clone(),
            checkpoints: checkpoints.to_vec(),
        };
        self.store.persist_block(&write).map_err(|e| StorageError::Database(format!("{:#}", e)))?;
        for checkpoint in checkpoints {
            self.cache
                .put_checkpoint(checkpoint.denomination, checkpoint.block_height, checkpoint.accumulator_value);
        }
        Ok(())
    }

    /// Stored checkpoint, through the cache
    pub fn checkpoint(&self, denomination: Denomination, height: u64) -> StorageResult<Option<AccumulatorCheckpoint>> {
        let value = match self.cache.get_checkpoint(denomination, height) {
            Some(value) => Some(value),
            None => {
                let stored = self
                    .store
                    .checkpoint(denomination, height)
                    .map_err(|e| StorageError::Database(format!("{:#}", e)))?;
                if let Some(value) = stored {
                    self.cache.put_checkpoint(denomination, height, value);
                }
                stored
            }
        };
        Ok(value.map(|accumulator_value| AccumulatorCheckpoint {
            denomination,
            block_height: height,
            accumulator_value,
        }))
    }

    /// Rebuild the in-memory ledger and registry from the cache.
    ///
    /// Every stored checkpoint is checked against the recomputed fold; a
    /// mismatch halts its denomination and is listed in the report.
    pub fn reload(&self, ledger: &AccumulatorLedger, registry: &SerialRegistry) -> StorageResult<ReloadReport> {
        let mints = self.store.load_mints().map_err(|e| StorageError::Database(format!("{:#}", e)))?;
        let spends = self.store.load_spends().map_err(|e| StorageError::Database(format!("{:#}", e)))?;
        let checkpoints = self
            .store
            .load_checkpoints()
            .map_err(|e| StorageError::Database(format!("{:#}", e)))?;

        let stats = self.cache.get_stats();
        log::debug!(
            "dropping {} cached checkpoints (hit rate {:.2}) before reload",
            self.cache.len(),
            stats.checkpoint_hit_rate()
        );
        ledger.reset();
        registry.clear();
        self.cache.clear_all();

        let mut blocks: BTreeMap<u64, ChainBlock> = BTreeMap::new();
        let heights: BTreeSet<u64> = checkpoints.iter().map(|c| c.block_height).collect();
        for height in heights {
            blocks.insert(height, ChainBlock { height, ..ChainBlock::default() });
        }
        for mint in &mints {
            let height = mint.mint_height;
            blocks
                .entry(height)
                .or_insert_with(|| ChainBlock { height, ..ChainBlock::default() })
                .mints
                .push(mint.clone());
        }
        for (serial, denomination, height) in &spends {
            blocks
                .entry(*height)
                .or_insert_with(|| ChainBlock { height: *height, ..ChainBlock::default() })
                .spends
                .push((*denomination, *serial));
        }

        for block in blocks.values() {
            ledger.connect_block(block.height, &block.mints, &block.spends)?;
            for (_, serial) in &block.spends {
                registry.restore(*serial, block.height);
            }
        }

        let mut report = ReloadReport {
            blocks: blocks.len(),
            mints: mints.len(),
            spends: spends.len(),
            divergent: Vec::new(),
        };
        for checkpoint in checkpoints {
            let denomination = checkpoint.denomination;
            if ledger.faults().is_halted(denomination) {
                continue;
            }
            match ledger.ensure_checkpoint(checkpoint.block_height, denomination, &checkpoint.accumulator_value) {
                Ok(()) => {
                    self.cache
                        .put_checkpoint(denomination, checkpoint.block_height, checkpoint.accumulator_value);
                }
                Err(e) => {
                    log::error!("stored checkpoint rejected on reload: {}", e);
                    report.divergent.push((denomination, checkpoint.block_height));
                }
            }
        }

        log::info!(
            "reloaded {} blocks, {} mints and {} spends from the cache ({} divergent checkpoints)",
            report.blocks,
            report.mints,
            report.spends,
            report.divergent.len()
        );
        Ok(report)
    }

    /// Discard everything above `height` in memory and on disk
    pub fn rollback(&self, ledger: &AccumulatorLedger, registry: &SerialRegistry, height: u64) -> StorageResult<()> {
        ledger.rollback(height);
        registry.forget_above(height);
        self.cache.invalidate_above(height);
        let removed = self
            .store
            .truncate_above(height)
            .map_err(|e| StorageError::Database(format!("{:#}", e)))?;
        log::debug!("removed {} stored entries above height {}", removed, height);
        Ok(())
    }

    /// Wipe the cache and rebuild it from the last `scan_depth` blocks of `chain`.
    ///
    /// Clears every halted denomination: this is the explicit resynchronization.
    pub fn reset_and_rescan(
        &self,
        ledger: &AccumulatorLedger,
        registry: &SerialRegistry,
        chain: &dyn ChainSource,
        scan_depth: u64,
    ) -> StorageResult<RescanReport> {
        self.store.clear().map_err(|e| StorageError::Database(format!("{:#}", e)))?;
        self.cache.clear_all();
        ledger.reset();
        registry.clear();
        for denomination in ledger.faults().halted_denominations() {
            ledger.faults().clear(denomination);
        }

        let tip = chain.tip_height();
        let from_height = tip.saturating_sub(scan_depth.saturating_sub(1));
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
            if block.height != height {
                return Err(StorageError::Chain(format!(
                    "requested block {} but received {}",
                    height, block.height
                )));
            }
            report.mints += block.mints.len();
            report.spends += block.spends.len();
            self.connect_block(ledger, registry, &block)?;
            report.blocks += 1;
        }

        log::info!(
            "rescanned blocks {}..={}: {} mints, {} spends",
            report.from_height,
            report.to_height,
            report.mints,
            report.spends
        );
        Ok(report)
    }
}

/// Chain held in memory, for tests and the simulator
#[derive(Debug, Default)]
pub struct MemoryChain {
    blocks: parking_lot::RwLock<BTreeMap<u64, ChainBlock>>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, block: ChainBlock) {
        self.blocks.write().insert(block.height, block);
    }

    pub fn truncate_above(&self, height: u64) {
        self.blocks.write().split_off(&(height + 1));
    }
}

impl ChainSource for MemoryChain {
    fn tip_height(&self) -> u64 {
        self.blocks.read().keys().next_back().copied().unwrap_or(0)
    }

    fn block(&self, height: u64) -> anyhow::Result<Option<ChainBlock>> {
        Ok(self.blocks.read().get(&height).cloned())
    }
}

impl<T: ChainSource + ?Sized> ChainSource for Arc<T> {
    fn tip_height(&self) -> u64 {
        (**self).tip_height()
    }

    fn block(&self, height: u64) -> anyhow::Result<Option<ChainBlock>> {
        (**self).block(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FoldOrder;
    use crate::crypto::{AccumulatorScheme, AccumulatorValue, CoinCommitment, PedersenRingAccumulator};
    use crate::zerocoin::FaultState;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        persistent: PersistentLedger,
        ledger: AccumulatorLedger,
        registry: SerialRegistry,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("ledger_db").to_string_lossy().to_string();
        let scheme: Arc<dyn AccumulatorScheme> = Arc::new(PedersenRingAccumulator::new());
        Fixture {
            persistent: PersistentLedger::open(DBConfig::at(db_path), CacheConfig::default()).unwrap(),
            ledger: AccumulatorLedger::new(scheme.clone(), FoldOrder::SerialNumber, FaultState::new()),
            registry: SerialRegistry::new(scheme),
            _dir: dir,
        }
    }

    fn mint(seed: u8) -> MintRecord {
        MintRecord::pending(SerialNumber([seed; 32]), CoinCommitment([seed; 32]), Denomination::OneHundred)
    }

    fn chain() -> MemoryChain {
        let chain = MemoryChain::new();
        chain.push(ChainBlock { height: 1, mints: vec![mint(1), mint(2)], spends: vec![] });
        chain.push(ChainBlock { height: 2, mints: vec![mint(3)], spends: vec![] });
        chain.push(ChainBlock {
            height: 3,
            mints: vec![],
            spends: vec![(Denomination::OneHundred, SerialNumber([1u8; 32]))],
        });
        chain
    }

    #[test]
    fn test_reload_restores_ledger() {
        let f = fixture();
        let chain = chain();
        for height in 1..=3 {
            let block = chain.block(height).unwrap().unwrap();
            f.persistent.connect_block(&f.ledger, &f.registry, &block).unwrap();
        }
        let before = f.ledger.latest_checkpoint(Denomination::OneHundred).unwrap();

        let report = f.persistent.reload(&f.ledger, &f.registry).unwrap();
        assert_eq!(report.blocks, 3);
        assert_eq!(report.mints, 3);
        assert_eq!(report.spends, 1);
        assert!(report.divergent.is_empty());
        assert_eq!(f.ledger.latest_checkpoint(Denomination::OneHundred), Some(before));
        assert!(f.registry.is_spent(&SerialNumber([1u8; 32])));
        assert_eq!(
            f.persistent.checkpoint(Denomination::OneHundred, 3).unwrap(),
            Some(before)
        );
        assert_eq!(f.persistent.cache().get_stats().checkpoint_hits, 1);
    }

    #[test]
    fn test_reload_detects_tampered_checkpoint() {
        let f = fixture();
        let block = ChainBlock { height: 1, mints: vec![mint(1)], spends: vec![] };
        f.persistent.connect_block(&f.ledger, &f.registry, &block).unwrap();

        f.persistent
            .store()
            .persist_block(&BlockWrite {
                height: 1,
                checkpoints: vec![AccumulatorCheckpoint {
                    denomination: Denomination::OneHundred,
                    block_height: 1,
                    accumulator_value: AccumulatorValue([0xAB; 32]),
                }],
                ..BlockWrite::default()
            })
            .unwrap();

        let report = f.persistent.reload(&f.ledger, &f.registry).unwrap();
        assert_eq!(report.divergent, vec![(Denomination::OneHundred, 1)]);
        assert!(f.ledger.faults().is_halted(Denomination::OneHundred));
        assert!(!f.ledger.faults().is_halted(Denomination::Ten));
    }

    #[test]
    fn test_reset_and_rescan_clears_faults() {
        let f = fixture();
        let chain = chain();
        chain.push(ChainBlock { height: 4, mints: vec![mint(4)], spends: vec![] });
        f.ledger.faults().halt(Denomination::OneHundred, "diverged");

        let report = f.persistent.reset_and_rescan(&f.ledger, &f.registry, &chain, 10).unwrap();
        assert_eq!(report.from_height, 0);
        assert_eq!(report.to_height, 4);
        assert_eq!(report.mints, 4);
        assert!(!f.ledger.faults().is_faulted());
        assert_eq!(f.ledger.mint_history(Denomination::OneHundred).len(), 4);
        assert!(f.registry.is_spent(&SerialNumber([1u8; 32])));
        assert_eq!(f.persistent.store().tip_height().unwrap(), Some(4));

        let shallow = f.persistent.reset_and_rescan(&f.ledger, &f.registry, &chain, 1).unwrap();
        assert_eq!(shallow.from_height, 4);
        assert_eq!(shallow.blocks, 1);
        assert_eq!(f.ledger.mint_history(Denomination::OneHundred).len(), 1);
    }

    #[test]
    fn test_rollback_truncates_store() {
        let f = fixture();
        let chain = chain();
        for height in 1..=3 {
            let block = chain.block(height).unwrap().unwrap();
            f.persistent.connect_block(&f.ledger, &f.registry, &block).unwrap();
        }

        let cached = f.persistent.cache().len();
        f.persistent.rollback(&f.ledger, &f.registry, 1).unwrap();
        assert!(f.persistent.cache().len() < cached);
        assert!(!f.persistent.cache().is_empty());
        assert!(!f.registry.is_spent(&SerialNumber([1u8; 32])));
        assert_eq!(f.persistent.store().load_mints().unwrap().len(), 2);
        assert_eq!(f.persistent.checkpoint(Denomination::OneHundred, 2).unwrap(), None);
    }
}
