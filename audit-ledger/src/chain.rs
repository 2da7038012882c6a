//! Chain ledger
//!
//! One [`ChainLedger`] per domain. Appends read the chain head, build the
//! next block and insert it; when another writer took the position first the
//! store reports a conflict and the append is retried on the new head, up to
//! `max_retries` times.

use rand::Rng;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::block::next_block;
use crate::config::AppendConfig;
use crate::domain::LedgerDomain;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::storage::BlockStore;
use crate::types::{Block, ChainHead, ChainId, GENESIS_BLOCK_NUMBER};

/// Append-only chain access for one domain
pub struct ChainLedger {
    domain: LedgerDomain,
    store: Arc<dyn BlockStore>,
    max_retries: u32,
    retry_backoff: Duration,
    metrics: Option<Metrics>,
}

impl ChainLedger {
    /// Create a ledger for `domain` over a shared store
    pub fn new(domain: LedgerDomain, store: Arc<dyn BlockStore>, config: &AppendConfig) -> Self {
        Self {
            domain,
            store,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            metrics: None,
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Domain served by this ledger
    pub fn domain(&self) -> LedgerDomain {
        self.domain
    }

    /// Append `payload` as the next block of `chain_id`
    pub fn append(&self, chain_id: &ChainId, payload: Value) -> Result<Block> {
        self.check_chain(chain_id)?;
        if !payload.is_object() {
            return Err(Error::InvalidPayload(
                "payload must be a JSON object".to_string(),
            ));
        }

        let started = Instant::now();
        let attempts = self.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            let latest = self.store.latest_block(chain_id)?;
            let block = next_block(chain_id.clone(), latest.as_ref(), payload.clone());

            match self.store.insert_block(&block) {
                Ok(()) => {
                    debug!(
                        chain_id = %chain_id,
                        block_number = block.block_number,
                        attempt,
                        "Block appended"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_append(self.domain, started.elapsed().as_secs_f64());
                    }
                    return Ok(block);
                }
                Err(Error::AppendConflict { block_number, .. }) => {
                    debug!(chain_id = %chain_id, block_number, attempt, "Lost append race");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_conflict(self.domain);
                    }
                    if attempt < attempts {
                        self.backoff(attempt);
                    }
                }
                Err(e) => {
                    self.record_failure();
                    return Err(e);
                }
            }
        }

        warn!(chain_id = %chain_id, attempts, "Append retries exhausted");
        self.record_failure();
        Err(Error::RetriesExhausted {
            chain_id: chain_id.to_string(),
            attempts,
        })
    }

    /// Up to `limit` blocks in ascending order starting at `from`
    pub fn read_range(&self, chain_id: &ChainId, from: u64, limit: usize) -> Result<Vec<Block>> {
        self.check_chain(chain_id)?;
        self.store
            .read_range(chain_id, from.max(GENESIS_BLOCK_NUMBER), limit)
    }

    /// Newest block of a chain
    pub fn read_latest(&self, chain_id: &ChainId) -> Result<Option<Block>> {
        self.check_chain(chain_id)?;
        self.store.latest_block(chain_id)
    }

    /// Block at a position
    pub fn get_block(&self, chain_id: &ChainId, block_number: u64) -> Result<Block> {
        self.check_chain(chain_id)?;
        self.store
            .get_block(chain_id, block_number)?
            .ok_or_else(|| Error::BlockNotFound(format!("{}#{}", chain_id, block_number)))
    }

    /// Number of blocks in a chain
    pub fn block_count(&self, chain_id: &ChainId) -> Result<u64> {
        self.check_chain(chain_id)?;
        Ok(self
            .store
            .chain_head(chain_id)?
            .map(|head| head.latest_block_number)
            .unwrap_or(0))
    }

    /// Heads of every chain in this domain
    pub fn heads(&self) -> Result<Vec<ChainHead>> {
        Ok(self
            .store
            .chain_heads()?
            .into_iter()
            .filter(|head| matches!(head.chain_id.domain(), Ok(d) if d == self.domain))
            .collect())
    }

    fn check_chain(&self, chain_id: &ChainId) -> Result<()> {
        let domain = chain_id.domain()?;
        if domain != self.domain {
            return Err(Error::InvalidChain(format!(
                "{} does not belong to {}",
                chain_id, self.domain
            )));
        }
        Ok(())
    }

    fn backoff(&self, attempt: u32) {
        if self.retry_backoff.is_zero() {
            return;
        }
        let jitter = rand::thread_rng().gen_range(0..=self.retry_backoff.as_micros() as u64);
        std::thread::sleep(self.retry_backoff * attempt + Duration::from_micros(jitter));
    }

    fn record_failure(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.record_append_failure(self.domain);
        }
    }
}
