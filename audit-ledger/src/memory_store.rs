//! In-memory block store.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{Error, Result};
use crate::storage::{check_extends, BlockStore};
use crate::types::{Block, ChainHead, ChainId};

#[derive(Default)]
pub(crate) struct Chains {
    pub(crate) blocks: BTreeMap<ChainId, Vec<Block>>,
    tokens: HashMap<String, (ChainId, u64)>,
}

/// Block store backed by a `RwLock<BTreeMap>`.
///
/// Same constraints as the RocksDB store; useful for tests and for running
/// the ledger without a data directory.
#[derive(Default)]
pub struct MemoryStore {
    chains: RwLock<Chains>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a reference to the inner state (for testing purposes).
    #[cfg(test)]
    pub(crate) fn inner(&self) -> &RwLock<Chains> {
        &self.chains
    }
}

impl BlockStore for MemoryStore {
    fn insert_block(&self, block: &Block) -> Result<()> {
        let mut chains = self.chains.write();

        let head = chains
            .blocks
            .get(&block.chain_id)
            .and_then(|blocks| blocks.last())
            .map(ChainHead::from_block);
        check_extends(block, head.as_ref())?;

        if let Some(token) = block.token() {
            if chains.tokens.contains_key(token) {
                return Err(Error::TokenConflict(token.to_string()));
            }
            chains.tokens.insert(
                token.to_string(),
                (block.chain_id.clone(), block.block_number),
            );
        }

        debug!(chain_id = %block.chain_id, block_number = block.block_number, "storing block in memory");
        chains
            .blocks
            .entry(block.chain_id.clone())
            .or_default()
            .push(block.clone());
        Ok(())
    }

    fn get_block(&self, chain_id: &ChainId, block_number: u64) -> Result<Option<Block>> {
        let chains = self.chains.read();
        Ok(chains
            .blocks
            .get(chain_id)
            .and_then(|blocks| blocks.iter().find(|b| b.block_number == block_number))
            .cloned())
    }

    fn read_range(&self, chain_id: &ChainId, from: u64, limit: usize) -> Result<Vec<Block>> {
        let chains = self.chains.read();
        Ok(chains
            .blocks
            .get(chain_id)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b.block_number >= from)
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn chain_head(&self, chain_id: &ChainId) -> Result<Option<ChainHead>> {
        let chains = self.chains.read();
        Ok(chains
            .blocks
            .get(chain_id)
            .and_then(|blocks| blocks.last())
            .map(ChainHead::from_block))
    }

    fn chain_heads(&self) -> Result<Vec<ChainHead>> {
        let chains = self.chains.read();
        Ok(chains
            .blocks
            .values()
            .filter_map(|blocks| blocks.last())
            .map(ChainHead::from_block)
            .collect())
    }
}
