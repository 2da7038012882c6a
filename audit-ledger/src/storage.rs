//! Storage layer
//!
//! # Column Families
//!
//! - `blocks` - Block documents as JSON (key: chain_id || 0x00 || block_number BE)
//! - `heads` - Latest position per chain (key: chain_id)
//! - `tokens` - Payload token index (key: token, value: block key)
//!
//! Every insert checks the chain head and the token index and then writes
//! block, head and token in one `WriteBatch`, so a chain can never hold two
//! blocks at the same number or two blocks pointing at the same predecessor.

use crate::{
    error::{Error, Result},
    types::{Block, ChainHead, ChainId, GENESIS_BLOCK_NUMBER, GENESIS_PREVIOUS_HASH},
    Config,
};
use parking_lot::Mutex;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB,
};
use std::path::Path;

/// Column family holding block documents
pub const CF_BLOCKS: &str = "blocks";
/// Column family holding chain heads
pub const CF_HEADS: &str = "heads";
/// Column family holding the token index
pub const CF_TOKENS: &str = "tokens";

/// Persistence contract the chain ledger is written against
pub trait BlockStore: Send + Sync {
    /// Insert the next block of a chain.
    ///
    /// Fails with [`Error::AppendConflict`] when the block does not extend the
    /// current head, and with [`Error::TokenConflict`] when its payload token is
    /// already recorded. Nothing is written on failure.
    fn insert_block(&self, block: &Block) -> Result<()>;

    /// Block at a position
    fn get_block(&self, chain_id: &ChainId, block_number: u64) -> Result<Option<Block>>;

    /// Up to `limit` blocks in ascending order, starting at `from`
    fn read_range(&self, chain_id: &ChainId, from: u64, limit: usize) -> Result<Vec<Block>>;

    /// Head of one chain
    fn chain_head(&self, chain_id: &ChainId) -> Result<Option<ChainHead>>;

    /// Heads of every chain
    fn chain_heads(&self) -> Result<Vec<ChainHead>>;

    /// Newest block of a chain
    fn latest_block(&self, chain_id: &ChainId) -> Result<Option<Block>> {
        match self.chain_head(chain_id)? {
            Some(head) => self.get_block(chain_id, head.latest_block_number),
            None => Ok(None),
        }
    }
}

/// Check that `block` extends `head`
pub(crate) fn check_extends(block: &Block, head: Option<&ChainHead>) -> Result<()> {
    let (expected_number, expected_previous) = match head {
        Some(head) => (head.latest_block_number + 1, head.latest_hash.as_str()),
        None => (GENESIS_BLOCK_NUMBER, GENESIS_PREVIOUS_HASH),
    };

    if block.block_number != expected_number || block.previous_hash != expected_previous {
        return Err(Error::AppendConflict {
            chain_id: block.chain_id.to_string(),
            block_number: block.block_number,
        });
    }
    Ok(())
}

/// Key of a block in the `blocks` column family
pub fn block_key(chain_id: &ChainId, block_number: u64) -> Vec<u8> {
    let mut key = chain_prefix(chain_id);
    key.extend_from_slice(&block_number.to_be_bytes());
    key
}

fn chain_prefix(chain_id: &ChainId) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(chain_id.as_str().len() + 9);
    prefix.extend_from_slice(chain_id.as_str().as_bytes());
    prefix.push(0x00);
    prefix
}

/// RocksDB-backed block store
pub struct RocksStore {
    db: DB,
    // Serializes check-then-write across threads
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_blocks()),
            ColumnFamilyDescriptor::new(CF_HEADS, Self::cf_options_lookup()),
            ColumnFamilyDescriptor::new(CF_TOKENS, Self::cf_options_lookup()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = ?path, "Opened RocksDB block store");

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    /// Open with default tuning at `path`
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        let config = Config {
            data_dir: path.as_ref().to_path_buf(),
            ..Config::default()
        };
        Self::open(&config)
    }

    fn cf_options_blocks() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_lookup() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn read_head(&self, chain_id: &ChainId) -> Result<Option<ChainHead>> {
        let cf = self.cf_handle(CF_HEADS)?;
        match self.db.get_cf(cf, chain_id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Flush memtables to disk
    pub fn flush(&self) -> Result<()> {
        for name in [CF_BLOCKS, CF_HEADS, CF_TOKENS] {
            self.db.flush_cf(self.cf_handle(name)?)?;
        }
        Ok(())
    }
}

impl BlockStore for RocksStore {
    fn insert_block(&self, block: &Block) -> Result<()> {
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_heads = self.cf_handle(CF_HEADS)?;
        let cf_tokens = self.cf_handle(CF_TOKENS)?;
        let key = block_key(&block.chain_id, block.block_number);

        let _guard = self.write_lock.lock();

        check_extends(block, self.read_head(&block.chain_id)?.as_ref())?;
        if self.db.get_cf(cf_blocks, &key)?.is_some() {
            return Err(Error::AppendConflict {
                chain_id: block.chain_id.to_string(),
                block_number: block.block_number,
            });
        }
        if let Some(token) = block.token() {
            if self.db.get_cf(cf_tokens, token.as_bytes())?.is_some() {
                return Err(Error::TokenConflict(token.to_string()));
            }
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(cf_blocks, &key, serde_json::to_vec(block)?);
        batch.put_cf(
            cf_heads,
            block.chain_id.as_str().as_bytes(),
            bincode::serialize(&ChainHead::from_block(block))?,
        );
        if let Some(token) = block.token() {
            batch.put_cf(cf_tokens, token.as_bytes(), &key);
        }
        self.db.write(batch)?;

        tracing::debug!(
            chain_id = %block.chain_id,
            block_number = block.block_number,
            hash = %block.hash,
            "Block stored"
        );

        Ok(())
    }

    fn get_block(&self, chain_id: &ChainId, block_number: u64) -> Result<Option<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        match self.db.get_cf(cf, block_key(chain_id, block_number))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn read_range(&self, chain_id: &ChainId, from: u64, limit: usize) -> Result<Vec<Block>> {
        let cf = self.cf_handle(CF_BLOCKS)?;
        let prefix = chain_prefix(chain_id);
        let start = block_key(chain_id, from);

        let mut blocks = Vec::new();
        if limit == 0 {
            return Ok(blocks);
        }

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(start.as_slice(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_slice()) {
                break;
            }
            blocks.push(serde_json::from_slice(&value)?);
            if blocks.len() == limit {
                break;
            }
        }

        Ok(blocks)
    }

    fn chain_head(&self, chain_id: &ChainId) -> Result<Option<ChainHead>> {
        self.read_head(chain_id)
    }

    fn chain_heads(&self) -> Result<Vec<ChainHead>> {
        let cf = self.cf_handle(CF_HEADS)?;
        let mut heads = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            heads.push(bincode::deserialize(&value)?);
        }
        Ok(heads)
    }
}
