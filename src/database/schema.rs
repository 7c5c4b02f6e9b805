//! Database Schema Implementation
//!
//! RocksDB layout for the accumulator / mint cache:
//! - cf_checkpoints: prefix || denomination || height -> accumulator value
//! - cf_mints: prefix || denomination || height || index -> mint record
//! - cf_spent_serials: prefix || serial -> (denomination, height)
//! - cf_metadata: name -> value

use rocksdb::{BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompactionStyle, Options, ReadOptions, WriteBatch, WriteOptions, DB};
use std::path::Path;
use std::sync::Arc;
use anyhow::{anyhow, Context, Result};

use crate::consensus_params::{cf_prefixes, height_key, parse_height_key};
use crate::crypto::{AccumulatorValue, SerialNumber};
use crate::denomination::Denomination;
use crate::zerocoin::{AccumulatorCheckpoint, MintRecord};

/// Column family names
pub mod cf_names {
    pub const CHECKPOINTS: &str = "cf_checkpoints";
    pub const MINTS: &str = "cf_mints";
    pub const SPENT_SERIALS: &str = "cf_spent_serials";
    pub const METADATA: &str = "cf_metadata";

    pub const ALL: [&str; 4] = [CHECKPOINTS, MINTS, SPENT_SERIALS, METADATA];
}

/// Metadata keys
pub mod meta_keys {
    pub const TIP_HEIGHT: &[u8] = b"tip_height";
    pub const FOLD_ORDER: &[u8] = b"fold_order";
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DBConfig {
    pub db_path: String,
    pub block_cache_size: usize,
    pub max_open_files: i32,
    /// fsync every block write
    pub sync_writes: bool,
}

impl Default for DBConfig {
    fn default() -> Self {
        Self {
            db_path: "./zerocoin_cache_db".to_string(),
            block_cache_size: 64 * 1024 * 1024, // 64MB
            max_open_files: 512,
            sync_writes: true,
        }
    }
}

impl DBConfig {
    pub fn at(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }
}

/// Per column family tuning
#[derive(Debug, Clone)]
pub struct CFConfig {
    pub name: &'static str,
    pub write_buffer_size: usize,
    pub enable_bloom_filter: bool,
    pub compression_type: rocksdb::DBCompressionType,
}

impl CFConfig {
    pub fn checkpoints() -> Self {
        Self {
            name: cf_names::CHECKPOINTS,
            write_buffer_size: 32 * 1024 * 1024,
            enable_bloom_filter: true, // point lookups by (denomination, height)
            compression_type: rocksdb::DBCompressionType::Lz4,
        }
    }

    pub fn mints() -> Self {
        Self {
            name: cf_names::MINTS,
            write_buffer_size: 32 * 1024 * 1024,
            enable_bloom_filter: false, // range scans on reload
            compression_type: rocksdb::DBCompressionType::Lz4,
        }
    }

    pub fn spent_serials() -> Self {
        Self {
            name: cf_names::SPENT_SERIALS,
            write_buffer_size: 16 * 1024 * 1024,
            enable_bloom_filter: true,
            compression_type: rocksdb::DBCompressionType::Zstd,
        }
    }

    pub fn metadata() -> Self {
        Self {
            name: cf_names::METADATA,
            write_buffer_size: 4 * 1024 * 1024,
            enable_bloom_filter: false,
            compression_type: rocksdb::DBCompressionType::None,
        }
    }

    pub fn to_options(&self, shared_cache: &Cache) -> Options {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_compression_type(self.compression_type);
        opts.set_compaction_style(DBCompactionStyle::Level);

        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(shared_cache);
        if self.enable_bloom_filter {
            block_opts.set_bloom_filter(10.0, false);
        }
        opts.set_block_based_table_factory(&block_opts);
        opts
    }
}

/// Everything one connected block changes in the store
#[derive(Debug, Clone, Default)]
pub struct BlockWrite {
    pub height: u64,
    pub mints: Vec<MintRecord>,
    pub spends: Vec<(Denomination, SerialNumber)>,
    pub checkpoints: Vec<AccumulatorCheckpoint>,
}

/// Persistent accumulator / mint cache
#[derive(Clone)]
pub struct LedgerStore {
    db: Arc<DB>,
    config: DBConfig,
}

impl LedgerStore {
    pub fn open(config: DBConfig) -> Result<Self> {
        let block_cache = Cache::new_lru_cache(config.block_cache_size);
        let cf_configs = [
            CFConfig::checkpoints(),
            CFConfig::mints(),
            CFConfig::spent_serials(),
            CFConfig::metadata(),
        ];
        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_configs
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.name, cf.to_options(&block_cache)))
            .collect();

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);

        let db = DB::open_cf_descriptors(&db_opts, Path::new(&config.db_path), cf_descriptors)
            .with_context(|| format!("Failed to open database at {}", config.db_path))?;
        log::info!("opened zerocoin cache at {}", config.db_path);

        Ok(Self {
            db: Arc::new(db),
            config,
        })
    }

    pub fn config(&self) -> &DBConfig {
        &self.config
    }

    pub fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| anyhow!("Column family '{}' not found", name))
    }

    pub fn get_cf(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(cf_name)?;
        self.db
            .get_cf_opt(cf, key, &ReadOptions::default())
            .with_context(|| format!("Failed to get key from {}", cf_name))
    }

    pub fn put_cf(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        self.db
            .put_cf_opt(cf, key, value, &WriteOptions::default())
            .with_context(|| format!("Failed to put key to {}", cf_name))
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts).context("Failed to execute write batch")
    }

    fn scan(&self, cf_name: &str) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let cf = self.cf_handle(cf_name)?;
        self.db
            .iterator_cf_opt(cf, ReadOptions::default(), rocksdb::IteratorMode::Start)
            .map(|item| item.with_context(|| format!("Failed to iterate {}", cf_name)))
            .collect()
    }

    /// Atomically store a connected block
    pub fn persist_block(&self, block: &BlockWrite) -> Result<()> {
        let mut batch = WriteBatch::default();
        let checkpoints = self.cf_handle(cf_names::CHECKPOINTS)?;
        let mints = self.cf_handle(cf_names::MINTS)?;
        let spent = self.cf_handle(cf_names::SPENT_SERIALS)?;
        let metadata = self.cf_handle(cf_names::METADATA)?;

        for checkpoint in &block.checkpoints {
            let key = height_key(cf_prefixes::CHECKPOINTS, checkpoint.denomination.id(), checkpoint.block_height);
            batch.put_cf(checkpoints, key, bincode::serialize(&checkpoint.accumulator_value)?);
        }
        for (index, mint) in block.mints.iter().enumerate() {
            batch.put_cf(mints, mint_key(mint.denomination, block.height, index as u32), bincode::serialize(mint)?);
        }
        for (denomination, serial) in &block.spends {
            batch.put_cf(spent, spent_key(serial), bincode::serialize(&(*denomination, block.height))?);
        }
        batch.put_cf(metadata, meta_keys::TIP_HEIGHT, block.height.to_be_bytes());

        self.write(batch)
    }

    pub fn checkpoint(&self, denomination: Denomination, height: u64) -> Result<Option<AccumulatorValue>> {
        let key = height_key(cf_prefixes::CHECKPOINTS, denomination.id(), height);
        match self.get_cf(cf_names::CHECKPOINTS, &key)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every stored checkpoint, ordered by denomination then height
    pub fn load_checkpoints(&self) -> Result<Vec<AccumulatorCheckpoint>> {
        self.scan(cf_names::CHECKPOINTS)?
            .into_iter()
            .map(|(key, value)| {
                let (_, denomination, height) =
                    parse_height_key(&key).ok_or_else(|| anyhow!("Malformed checkpoint key"))?;
                Ok(AccumulatorCheckpoint {
                    denomination: Denomination::from_id(denomination)?,
                    block_height: height,
                    accumulator_value: bincode::deserialize(&value)?,
                })
            })
            .collect()
    }

    /// Every stored mint in confirmation order within its denomination
    pub fn load_mints(&self) -> Result<Vec<MintRecord>> {
        self.scan(cf_names::MINTS)?
            .into_iter()
            .map(|(_, value)| Ok(bincode::deserialize(&value)?))
            .collect()
    }

    pub fn load_spends(&self) -> Result<Vec<(SerialNumber, Denomination, u64)>> {
        self.scan(cf_names::SPENT_SERIALS)?
            .into_iter()
            .map(|(key, value)| {
                if key.len() != 33 {
                    return Err(anyhow!("Malformed spent serial key"));
                }
                let mut serial = [0u8; 32];
                serial.copy_from_slice(&key[1..]);
                let (denomination, height): (Denomination, u64) = bincode::deserialize(&value)?;
                Ok((SerialNumber(serial), denomination, height))
            })
            .collect()
    }

    pub fn tip_height(&self) -> Result<Option<u64>> {
        match self.get_cf(cf_names::METADATA, meta_keys::TIP_HEIGHT)? {
            Some(bytes) if bytes.len() == 8 => {
                let mut height = [0u8; 8];
                height.copy_from_slice(&bytes);
                Ok(Some(u64::from_be_bytes(height)))
            }
            Some(_) => Err(anyhow!("Malformed tip height")),
            None => Ok(None),
        }
    }

    /// Drop everything recorded above `height` after a reorganization
    pub fn truncate_above(&self, height: u64) -> Result<usize> {
        let mut batch = WriteBatch::default();
        let mut removed = 0usize;

        for cf_name in [cf_names::CHECKPOINTS, cf_names::MINTS] {
            let cf = self.cf_handle(cf_name)?;
            for (key, _) in self.scan(cf_name)? {
                let above = key
                    .get(..11)
                    .and_then(parse_height_key)
                    .map_or(false, |(_, _, h)| h > height);
                if above {
                    batch.delete_cf(cf, &key);
                    removed += 1;
                }
            }
        }

        let spent = self.cf_handle(cf_names::SPENT_SERIALS)?;
        for (key, value) in self.scan(cf_names::SPENT_SERIALS)? {
            let (_, spent_at): (Denomination, u64) = bincode::deserialize(&value)?;
            if spent_at > height {
                batch.delete_cf(spent, &key);
                removed += 1;
            }
        }

        let metadata = self.cf_handle(cf_names::METADATA)?;
        batch.put_cf(metadata, meta_keys::TIP_HEIGHT, height.to_be_bytes());
        self.write(batch)?;
        Ok(removed)
    }

    /// Remove every entry from every column family
    pub fn clear(&self) -> Result<()> {
        let mut batch = WriteBatch::default();
        for cf_name in cf_names::ALL {
            let cf = self.cf_handle(cf_name)?;
            for (key, _) in self.scan(cf_name)? {
                batch.delete_cf(cf, &key);
            }
        }
        self.write(batch)
    }
}

/// Mint key: checkpoint-style prefix plus the mint's index inside the block
pub fn mint_key(denomination: Denomination, height: u64, index: u32) -> Vec<u8> {
    let mut key = height_key(cf_prefixes::MINTS, denomination.id(), height).to_vec();
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub fn spent_key(serial: &SerialNumber) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(cf_prefixes::SPENT_SERIALS);
    key.extend_from_slice(&serial.0);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CoinCommitment;
    use tempfile::tempdir;

    fn open() -> (tempfile::TempDir, LedgerStore) {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test_db").to_string_lossy().to_string();
        let store = LedgerStore::open(DBConfig::at(db_path)).unwrap();
        (temp_dir, store)
    }

    fn mint(seed: u8, height: u64) -> MintRecord {
        MintRecord::pending(SerialNumber([seed; 32]), CoinCommitment([seed; 32]), Denomination::Ten).confirmed_at(height)
    }

    fn checkpoint(height: u64, fill: u8) -> AccumulatorCheckpoint {
        AccumulatorCheckpoint {
            denomination: Denomination::Ten,
            block_height: height,
            accumulator_value: AccumulatorValue([fill; 32]),
        }
    }

    #[test]
    fn test_database_creation() {
        let (_dir, store) = open();
        for name in cf_names::ALL {
            assert!(store.cf_handle(name).is_ok());
        }
        assert_eq!(store.tip_height().unwrap(), None);
    }

    #[test]
    fn test_persist_and_load_block() {
        let (_dir, store) = open();
        store
            .persist_block(&BlockWrite {
                height: 7,
                mints: vec![mint(2, 7), mint(1, 7)],
                spends: vec![(Denomination::Ten, SerialNumber([9u8; 32]))],
                checkpoints: vec![checkpoint(7, 3)],
            })
            .unwrap();

        let mints = store.load_mints().unwrap();
        assert_eq!(mints, vec![mint(2, 7), mint(1, 7)]);
        assert_eq!(store.load_checkpoints().unwrap(), vec![checkpoint(7, 3)]);
        assert_eq!(
            store.load_spends().unwrap(),
            vec![(SerialNumber([9u8; 32]), Denomination::Ten, 7)]
        );
        assert_eq!(store.checkpoint(Denomination::Ten, 7).unwrap(), Some(AccumulatorValue([3u8; 32])));
        assert_eq!(store.tip_height().unwrap(), Some(7));
    }

    #[test]
    fn test_truncate_and_clear() {
        let (_dir, store) = open();
        for height in 1..=3 {
            store
                .persist_block(&BlockWrite {
                    height,
                    mints: vec![mint(height as u8, height)],
                    spends: Vec::new(),
                    checkpoints: vec![checkpoint(height, height as u8)],
                })
                .unwrap();
        }

        assert_eq!(store.truncate_above(1).unwrap(), 4);
        assert_eq!(store.load_mints().unwrap().len(), 1);
        assert_eq!(store.tip_height().unwrap(), Some(1));

        store.clear().unwrap();
        assert!(store.load_checkpoints().unwrap().is_empty());
        assert_eq!(store.tip_height().unwrap(), None);
    }
}
