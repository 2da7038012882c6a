//! Verification and explorer service
//!
//! Read-only views over the ledger: full-chain validation with a per-block
//! audit trail, newest-first browsing with display projections, a health
//! overview of every chain, and comparison against the external mirror.
//! Nothing here takes the writer path; a concurrent append may or may not be
//! visible to a running validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::block::{chain_statistics, verify_block, verify_chain};
use crate::config::ExplorerConfig;
use crate::domain::LedgerDomain;
use crate::error::{Error, Result};
use crate::metrics::Metrics;
use crate::mirror::{self, LedgerMirror, MirrorCheck};
use crate::storage::BlockStore;
use crate::types::{
    Block, BlockCheck, ChainId, ChainStatistics, ChainStatus, ChainVerification,
    GENESIS_BLOCK_NUMBER, GENESIS_PREVIOUS_HASH,
};

/// Per-block findings of a validation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAudit {
    /// Block number
    pub block_number: u64,
    /// Stored hash
    pub hash: String,
    /// Content matches the hash
    pub is_valid: bool,
    /// Points at its predecessor with the next number
    pub linked_correctly: bool,
    /// Legacy block that could not be recomputed exactly
    pub low_confidence: bool,
}

/// Result of validating one chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Chain that was validated
    pub chain_id: ChainId,
    /// Domain of the chain
    pub domain: LedgerDomain,
    /// Overall status
    pub status: ChainStatus,
    /// Chain-level findings
    pub verification: ChainVerification,
    /// Per-block audit trail
    pub blocks: Vec<BlockAudit>,
    /// Derived statistics
    pub statistics: ChainStatistics,
    /// When the report was produced
    pub validated_at: DateTime<Utc>,
}

/// Listing entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block number
    pub block_number: u64,
    /// Stored hash
    pub hash: String,
    /// Hash of the predecessor
    pub previous_hash: String,
    /// Block creation time
    pub timestamp: DateTime<Utc>,
    /// Ledger token of the payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Domain projection of the payload
    pub summary: Value,
}

impl BlockSummary {
    fn from_block(domain: LedgerDomain, block: &Block) -> Self {
        Self {
            block_number: block.block_number,
            hash: block.hash.clone(),
            previous_hash: block.previous_hash.clone(),
            timestamp: block.timestamp,
            token: block.token().map(str::to_string),
            summary: domain.project(&block.payload),
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Entries of this page
    pub items: Vec<T>,
    /// 1-based page number
    pub page: usize,
    /// Page size used
    pub limit: usize,
    /// Blocks in the chain
    pub total_items: u64,
    /// Pages at this size
    pub total_pages: u64,
}

/// Health entry of one chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHealth {
    /// Chain id
    pub chain_id: ChainId,
    /// Domain of the chain
    pub domain: LedgerDomain,
    /// Blocks in the chain
    pub block_count: u64,
    /// Hash of the newest block
    pub latest_hash: String,
    /// Last head update
    pub updated_at: DateTime<Utc>,
}

/// Overview of every chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Every known chain
    pub chains: Vec<ChainHealth>,
    /// Block count per domain, every domain present
    pub domains: BTreeMap<LedgerDomain, u64>,
    /// Blocks across all chains
    pub total_blocks: u64,
    /// When the report was produced
    pub generated_at: DateTime<Utc>,
}

/// Read-only ledger views
#[derive(Clone)]
pub struct Explorer {
    store: Arc<dyn BlockStore>,
    config: ExplorerConfig,
    mirror: Option<Arc<dyn LedgerMirror>>,
    mirror_timeout: Duration,
    metrics: Option<Metrics>,
}

impl Explorer {
    /// Create an explorer over a store
    pub fn new(store: Arc<dyn BlockStore>, config: ExplorerConfig) -> Self {
        Self {
            store,
            config,
            mirror: None,
            mirror_timeout: Duration::from_secs(2),
            metrics: None,
        }
    }

    /// Compare against an external mirror
    pub fn with_mirror(mut self, mirror: Arc<dyn LedgerMirror>, timeout: Duration) -> Self {
        self.mirror = Some(mirror);
        self.mirror_timeout = timeout;
        self
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validate up to `limit` blocks from the start of a chain
    ///
    /// A `limit` of zero means the configured maximum.
    pub fn validate(&self, chain_id: &ChainId, limit: usize) -> Result<ValidationReport> {
        let domain = chain_id.domain()?;
        let max = self.config.max_validation_blocks;
        let limit = if limit == 0 { max } else { limit.min(max) };

        let blocks = self
            .store
            .read_range(chain_id, GENESIS_BLOCK_NUMBER, limit)?;
        let verification = verify_chain(&blocks);
        let audits = audit_blocks(&blocks);

        match verification.status {
            ChainStatus::Compromised => warn!(
                chain_id = %chain_id,
                block_number = ?verification.failing_block_number,
                failure = ?verification.failure_kind,
                "Chain failed validation"
            ),
            _ => info!(
                chain_id = %chain_id,
                blocks = blocks.len(),
                status = ?verification.status,
                "Chain validated"
            ),
        }
        if !verification.low_confidence_blocks.is_empty() {
            warn!(
                chain_id = %chain_id,
                blocks = ?verification.low_confidence_blocks,
                "Blocks without recorded hash input failed reconstruction"
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_verification(verification.status);
        }

        Ok(ValidationReport {
            chain_id: chain_id.clone(),
            domain,
            status: verification.status,
            statistics: chain_statistics(&blocks),
            verification,
            blocks: audits,
            validated_at: Utc::now(),
        })
    }

    /// Newest-first page of a chain
    ///
    /// `page` is 1-based (0 is treated as 1); a `limit` of zero means the
    /// default page size, anything above the maximum is clamped.
    pub fn explore(&self, chain_id: &ChainId, page: usize, limit: usize) -> Result<Page<BlockSummary>> {
        let domain = chain_id.domain()?;
        let page = page.max(1);
        let limit = match limit {
            0 => self.config.default_page_size,
            n => n.min(self.config.max_page_size),
        };

        let total_items = self
            .store
            .chain_head(chain_id)?
            .map(|head| head.latest_block_number)
            .unwrap_or(0);
        let total_pages = total_items.div_ceil(limit as u64);

        let skip = (page as u64 - 1).saturating_mul(limit as u64);
        let items = if skip >= total_items {
            Vec::new()
        } else {
            let newest = total_items - skip;
            let oldest = newest.saturating_sub(limit as u64 - 1).max(GENESIS_BLOCK_NUMBER);
            let count = (newest - oldest + 1) as usize;

            let mut blocks = self.store.read_range(chain_id, oldest, count)?;
            blocks.reverse();
            blocks
                .iter()
                .map(|block| BlockSummary::from_block(domain, block))
                .collect()
        };

        Ok(Page {
            items,
            page,
            limit,
            total_items,
            total_pages,
        })
    }

    /// Overview of every chain
    pub fn health(&self) -> Result<HealthReport> {
        let mut domains: BTreeMap<LedgerDomain, u64> =
            LedgerDomain::ALL.iter().map(|d| (*d, 0)).collect();
        let mut chains = Vec::new();

        for head in self.store.chain_heads()? {
            let domain = match head.chain_id.domain() {
                Ok(domain) => domain,
                Err(_) => {
                    warn!(chain_id = %head.chain_id, "Skipping chain of unknown domain");
                    continue;
                }
            };
            *domains.entry(domain).or_insert(0) += head.latest_block_number;
            chains.push(ChainHealth {
                chain_id: head.chain_id,
                domain,
                block_count: head.latest_block_number,
                latest_hash: head.latest_hash,
                updated_at: head.updated_at,
            });
        }

        Ok(HealthReport {
            total_blocks: domains.values().sum(),
            chains,
            domains,
            generated_at: Utc::now(),
        })
    }

    /// Compare one block with the external mirror
    pub async fn cross_check(&self, chain_id: &ChainId, block_number: u64) -> Result<MirrorCheck> {
        let mirror = match &self.mirror {
            Some(mirror) => mirror.clone(),
            None => return Ok(MirrorCheck::Disabled),
        };

        let block = self
            .store
            .get_block(chain_id, block_number)?
            .ok_or_else(|| Error::BlockNotFound(format!("{}#{}", chain_id, block_number)))?;

        let check = mirror::cross_check(mirror.as_ref(), &block, self.mirror_timeout).await;
        if let MirrorCheck::Differs { mirrored, .. } = &check {
            warn!(
                chain_id = %chain_id,
                block_number,
                local = %block.hash,
                mirrored = %mirrored,
                "Mirror disagrees with local block"
            );
        }
        Ok(check)
    }
}

/// Annotate every block, independently of where chain verification stopped
fn audit_blocks(blocks: &[Block]) -> Vec<BlockAudit> {
    blocks
        .iter()
        .enumerate()
        .map(|(i, block)| {
            let check = verify_block(block);
            let linked_correctly = match i {
                0 if block.is_genesis() => block.previous_hash == GENESIS_PREVIOUS_HASH,
                0 => true,
                _ => {
                    let prev = &blocks[i - 1];
                    block.previous_hash == prev.hash
                        && prev.block_number.checked_add(1) == Some(block.block_number)
                }
            };
            BlockAudit {
                block_number: block.block_number,
                hash: block.hash.clone(),
                is_valid: check.is_trusted(),
                linked_correctly,
                low_confidence: check == BlockCheck::LegacyUnverified,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainLedger;
    use crate::config::AppendConfig;
    use crate::crypto::FieldCipher;
    use crate::memory_store::MemoryStore;
    use crate::mirror::MemoryMirror;
    use crate::types::FailureKind;
    use serde_json::json;

    fn setup(domain: LedgerDomain, n: usize) -> (Arc<MemoryStore>, Explorer, ChainId) {
        let store = Arc::new(MemoryStore::new());
        let ledger = ChainLedger::new(domain, store.clone(), &AppendConfig::default());
        let chain = ChainId::global(domain);
        for i in 0..n {
            ledger
                .append(&chain, json!({"order_id": format!("SO-{}", i), "amount": 22500}))
                .unwrap();
        }
        let explorer = Explorer::new(store.clone(), ExplorerConfig::default());
        (store, explorer, chain)
    }

    #[test]
    fn test_empty_chain_is_empty_not_error() {
        let (_, explorer, chain) = setup(LedgerDomain::DeliveryProof, 0);
        let report = explorer.validate(&chain, 0).unwrap();

        assert_eq!(report.status, ChainStatus::Empty);
        assert!(report.verification.is_valid);
        assert!(report.blocks.is_empty());
        assert_eq!(report.statistics.block_count, 0);
    }

    #[test]
    fn test_valid_chain_report() {
        let (_, explorer, chain) = setup(LedgerDomain::DeliveryProof, 5);
        let report = explorer.validate(&chain, 0).unwrap();

        assert_eq!(report.status, ChainStatus::Valid);
        assert_eq!(report.blocks.len(), 5);
        assert!(report.blocks.iter().all(|b| b.is_valid && b.linked_correctly));
        assert_eq!(report.statistics.block_count, 5);
    }

    #[test]
    fn test_tampered_block_reported() {
        let (store, explorer, chain) = setup(LedgerDomain::DeliveryProof, 4);
        {
            let mut inner = store.inner().write();
            let blocks = inner.blocks.get_mut(&chain).unwrap();
            blocks[1].payload["amount"] = json!(50000);
        }

        let report = explorer.validate(&chain, 0).unwrap();
        assert_eq!(report.status, ChainStatus::Compromised);
        assert_eq!(report.verification.failing_block_number, Some(2));
        assert_eq!(report.verification.failure_kind, Some(FailureKind::HashMismatch));

        // Audit trail still covers the blocks after the failure
        assert_eq!(report.blocks.len(), 4);
        assert!(!report.blocks[1].is_valid);
        assert!(report.blocks[2].is_valid && report.blocks[2].linked_correctly);
    }

    #[test]
    fn test_audit_survives_max_block_number() {
        let (store, _explorer, chain) = setup(LedgerDomain::DeliveryProof, 2);
        let mut blocks = store.read_range(&chain, 1, 10).unwrap();
        blocks[0].raw_hash_input = None;
        blocks[0].block_number = u64::MAX;

        let audits = audit_blocks(&blocks);
        assert!(audits[0].low_confidence);
        assert!(!audits[1].linked_correctly);
    }

    #[test]
    fn test_validate_limit_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ChainLedger::new(LedgerDomain::DocumentTransfer, store.clone(), &AppendConfig::default());
        let chain = ChainId::global(LedgerDomain::DocumentTransfer);
        for _ in 0..6 {
            ledger.append(&chain, json!({})).unwrap();
        }

        let config = ExplorerConfig {
            max_validation_blocks: 4,
            ..ExplorerConfig::default()
        };
        let explorer = Explorer::new(store, config);
        assert_eq!(explorer.validate(&chain, 0).unwrap().blocks.len(), 4);
        assert_eq!(explorer.validate(&chain, 2).unwrap().blocks.len(), 2);
        assert_eq!(explorer.validate(&chain, 100).unwrap().blocks.len(), 4);
    }

    #[test]
    fn test_pagination_newest_first() {
        let (_, explorer, chain) = setup(LedgerDomain::DeliveryProof, 7);

        let first = explorer.explore(&chain, 1, 3).unwrap();
        let numbers: Vec<u64> = first.items.iter().map(|s| s.block_number).collect();
        assert_eq!(numbers, vec![7, 6, 5]);
        assert_eq!(first.total_items, 7);
        assert_eq!(first.total_pages, 3);

        let last = explorer.explore(&chain, 3, 3).unwrap();
        let numbers: Vec<u64> = last.items.iter().map(|s| s.block_number).collect();
        assert_eq!(numbers, vec![1]);

        assert!(explorer.explore(&chain, 4, 3).unwrap().items.is_empty());
    }

    #[test]
    fn test_page_size_defaults_and_clamps() {
        let (_, explorer, chain) = setup(LedgerDomain::DeliveryProof, 2);
        assert_eq!(explorer.explore(&chain, 0, 0).unwrap().limit, 20);
        assert_eq!(explorer.explore(&chain, 1, 10_000).unwrap().limit, 100);
        assert_eq!(explorer.explore(&chain, 0, 0).unwrap().page, 1);
    }

    #[test]
    fn test_projection_hides_owner_id() {
        let store = Arc::new(MemoryStore::new());
        let ledger = ChainLedger::new(LedgerDomain::VehicleOwnership, store.clone(), &AppendConfig::default());
        let chain = ChainId::for_entity(LedgerDomain::VehicleOwnership, "1HGCM82633A004352").unwrap();
        let owner_id = FieldCipher::generate().encrypt("ID-1").unwrap();
        ledger
            .append(
                &chain,
                json!({"vin": "1HGCM82633A004352", "owner_name": "Ada", "owner_id_number": owner_id}),
            )
            .unwrap();

        let page = Explorer::new(store, ExplorerConfig::default())
            .explore(&chain, 1, 10)
            .unwrap();
        let summary = &page.items[0].summary;
        assert_eq!(summary["vin"], "1HGCM82633A004352");
        assert!(summary.get("owner_id_number").is_none());
        assert!(!summary.to_string().contains("enc:v1:"));
    }

    #[test]
    fn test_health_counts_every_domain() {
        let store = Arc::new(MemoryStore::new());
        let drivers = ChainLedger::new(LedgerDomain::DriverBehavior, store.clone(), &AppendConfig::default());
        for trip in ["T1", "T2"] {
            let chain = ChainId::for_entity(LedgerDomain::DriverBehavior, trip).unwrap();
            drivers.append(&chain, json!({})).unwrap();
            drivers.append(&chain, json!({})).unwrap();
        }

        let health = Explorer::new(store, ExplorerConfig::default()).health().unwrap();
        assert_eq!(health.chains.len(), 2);
        assert_eq!(health.total_blocks, 4);
        assert_eq!(health.domains[&LedgerDomain::DriverBehavior], 4);
        assert_eq!(health.domains[&LedgerDomain::DeliveryProof], 0);
        assert_eq!(health.domains.len(), 5);
    }

    #[tokio::test]
    async fn test_cross_check() {
        let (store, explorer, chain) = setup(LedgerDomain::ExportLogistics, 1);
        assert_eq!(explorer.cross_check(&chain, 1).await.unwrap(), MirrorCheck::Disabled);

        let mirror = Arc::new(MemoryMirror::new());
        let explorer = explorer.with_mirror(mirror.clone(), Duration::from_secs(1));
        assert_eq!(explorer.cross_check(&chain, 1).await.unwrap(), MirrorCheck::NotAnchored);

        let block = store.get_block(&chain, 1).unwrap().unwrap();
        mirror.anchor(&(&block).into()).await.unwrap();
        assert_eq!(explorer.cross_check(&chain, 1).await.unwrap(), MirrorCheck::Matches);

        assert!(matches!(
            explorer.cross_check(&chain, 9).await,
            Err(Error::BlockNotFound(_))
        ));
    }
}
