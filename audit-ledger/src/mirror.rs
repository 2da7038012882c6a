//! External mirror
//!
//! After a block commits, a compact anchor (chain, number, hash) can be sent
//! to an independent system. The mirror is best effort: anchoring runs in the
//! background under a timeout and its failures are logged, never returned to
//! the appender. An auditor can later compare the local hash of a block with
//! the mirrored one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::types::{Block, ChainId};

/// What the mirror records for each block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAnchor {
    /// Chain of the block
    pub chain_id: ChainId,
    /// Block number
    pub block_number: u64,
    /// Block hash
    pub hash: String,
    /// Block creation time
    pub timestamp: DateTime<Utc>,
}

impl From<&Block> for BlockAnchor {
    fn from(block: &Block) -> Self {
        Self {
            chain_id: block.chain_id.clone(),
            block_number: block.block_number,
            hash: block.hash.clone(),
            timestamp: block.timestamp,
        }
    }
}

/// Independent copy of block hashes
#[async_trait]
pub trait LedgerMirror: Send + Sync {
    /// Record an anchor
    async fn anchor(&self, anchor: &BlockAnchor) -> Result<()>;

    /// Hash the mirror holds for a block, if any
    async fn mirrored_hash(&self, chain_id: &ChainId, block_number: u64) -> Result<Option<String>>;
}

/// Outcome of comparing a block with its mirrored anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MirrorCheck {
    /// Mirror holds the same hash
    Matches,
    /// Mirror holds a different hash
    Differs {
        /// Hash stored in the ledger
        local: String,
        /// Hash held by the mirror
        mirrored: String,
    },
    /// Mirror has no anchor for this block
    NotAnchored,
    /// Mirror could not be reached
    Unavailable {
        /// Error or timeout description
        reason: String,
    },
    /// No mirror configured
    Disabled,
}

/// Send an anchor in the background
pub fn spawn_anchor(
    mirror: Arc<dyn LedgerMirror>,
    anchor: BlockAnchor,
    timeout: Duration,
    metrics: Metrics,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, mirror.anchor(&anchor)).await {
            Ok(Ok(())) => {
                debug!(chain_id = %anchor.chain_id, block_number = anchor.block_number, "Block anchored");
            }
            Ok(Err(e)) => {
                metrics.record_mirror_failure();
                warn!(
                    chain_id = %anchor.chain_id,
                    block_number = anchor.block_number,
                    error = %e,
                    "Mirror rejected anchor"
                );
            }
            Err(_) => {
                metrics.record_mirror_failure();
                warn!(
                    chain_id = %anchor.chain_id,
                    block_number = anchor.block_number,
                    timeout_ms = timeout.as_millis() as u64,
                    "Mirror anchor timed out"
                );
            }
        }
    })
}

/// Compare a block's hash with the mirror
pub async fn cross_check(
    mirror: &dyn LedgerMirror,
    block: &Block,
    timeout: Duration,
) -> MirrorCheck {
    let lookup = mirror.mirrored_hash(&block.chain_id, block.block_number);
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(Some(mirrored))) if mirrored.eq_ignore_ascii_case(&block.hash) => MirrorCheck::Matches,
        Ok(Ok(Some(mirrored))) => MirrorCheck::Differs {
            local: block.hash.clone(),
            mirrored,
        },
        Ok(Ok(None)) => MirrorCheck::NotAnchored,
        Ok(Err(e)) => MirrorCheck::Unavailable {
            reason: e.to_string(),
        },
        Err(_) => MirrorCheck::Unavailable {
            reason: "timed out".to_string(),
        },
    }
}

/// In-process mirror
///
/// Can be switched offline to exercise the failure path.
#[derive(Default)]
pub struct MemoryMirror {
    anchors: RwLock<HashMap<(ChainId, u64), String>>,
    offline: AtomicBool,
}

impl MemoryMirror {
    /// Create an empty, online mirror
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of anchors held
    pub fn len(&self) -> usize {
        self.anchors.read().len()
    }

    /// Whether no anchor is held
    pub fn is_empty(&self) -> bool {
        self.anchors.read().is_empty()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Storage("mirror offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerMirror for MemoryMirror {
    async fn anchor(&self, anchor: &BlockAnchor) -> Result<()> {
        self.check_online()?;
        self.anchors.write().insert(
            (anchor.chain_id.clone(), anchor.block_number),
            anchor.hash.clone(),
        );
        Ok(())
    }

    async fn mirrored_hash(&self, chain_id: &ChainId, block_number: u64) -> Result<Option<String>> {
        self.check_online()?;
        Ok(self
            .anchors
            .read()
            .get(&(chain_id.clone(), block_number))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::next_block;
    use crate::domain::LedgerDomain;
    use serde_json::json;

    fn block() -> Block {
        next_block(ChainId::global(LedgerDomain::DocumentTransfer), None, json!({"n": 1}))
    }

    /// Mirror that never answers
    struct StalledMirror;

    #[async_trait]
    impl LedgerMirror for StalledMirror {
        async fn anchor(&self, _anchor: &BlockAnchor) -> Result<()> {
            std::future::pending().await
        }

        async fn mirrored_hash(&self, _chain_id: &ChainId, _n: u64) -> Result<Option<String>> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_anchor_then_matches() {
        let mirror = Arc::new(MemoryMirror::new());
        let block = block();

        spawn_anchor(
            mirror.clone(),
            BlockAnchor::from(&block),
            Duration::from_secs(1),
            Metrics::new().unwrap(),
        )
        .await
        .unwrap();

        assert_eq!(mirror.len(), 1);
        assert_eq!(
            cross_check(mirror.as_ref(), &block, Duration::from_secs(1)).await,
            MirrorCheck::Matches
        );
    }

    #[tokio::test]
    async fn test_differs_and_not_anchored() {
        let mirror = MemoryMirror::new();
        let block = block();
        assert_eq!(
            cross_check(&mirror, &block, Duration::from_secs(1)).await,
            MirrorCheck::NotAnchored
        );

        let mut forged = BlockAnchor::from(&block);
        forged.hash = "f".repeat(64);
        mirror.anchor(&forged).await.unwrap();

        assert!(matches!(
            cross_check(&mirror, &block, Duration::from_secs(1)).await,
            MirrorCheck::Differs { .. }
        ));
    }

    #[tokio::test]
    async fn test_offline_mirror_is_counted_not_raised() {
        let mirror = Arc::new(MemoryMirror::new());
        mirror.set_offline(true);
        let metrics = Metrics::new().unwrap();

        spawn_anchor(
            mirror.clone(),
            BlockAnchor::from(&block()),
            Duration::from_secs(1),
            metrics.clone(),
        )
        .await
        .unwrap();

        assert!(mirror.is_empty());
        assert_eq!(metrics.mirror_failures.get(), 1);
        assert!(matches!(
            cross_check(mirror.as_ref(), &block(), Duration::from_secs(1)).await,
            MirrorCheck::Unavailable { .. }
        ));
    }

    #[tokio::test]
    async fn test_stalled_mirror_times_out() {
        let metrics = Metrics::new().unwrap();
        spawn_anchor(
            Arc::new(StalledMirror),
            BlockAnchor::from(&block()),
            Duration::from_millis(20),
            metrics.clone(),
        )
        .await
        .unwrap();

        assert_eq!(metrics.mirror_failures.get(), 1);
        assert_eq!(
            cross_check(&StalledMirror, &block(), Duration::from_millis(20)).await,
            MirrorCheck::Unavailable {
                reason: "timed out".to_string()
            }
        );
    }
}
