//! Core types for the ledger
//!
//! All persisted types are designed for:
//! - Stable JSON shape across the five domains
//! - Hashing through the canonical encoder only
//! - Memory safety (no unsafe code)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::domain::LedgerDomain;
use crate::{Error, Result};

/// `previous_hash` of the first block in every chain
pub const GENESIS_PREVIOUS_HASH: &str = "0";

/// Number of the first block in every chain
pub const GENESIS_BLOCK_NUMBER: u64 = 1;

/// Chain identifier: `<domain>` or `<domain>/<entity>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    /// The single chain of a globally partitioned domain
    pub fn global(domain: LedgerDomain) -> Self {
        Self(domain.slug().to_string())
    }

    /// The chain of one entity (trip, vehicle) within a domain
    pub fn for_entity(domain: LedgerDomain, entity: &str) -> Result<Self> {
        let entity = entity.trim();
        if !is_valid_entity(entity) {
            return Err(Error::InvalidChain(format!(
                "entity key {:?} is empty or contains '/' or control characters",
                entity
            )));
        }
        Ok(Self(format!("{}/{}", domain.slug(), entity)))
    }

    /// Parse and validate a chain id string
    pub fn parse(s: &str) -> Result<Self> {
        let id = Self(s.to_string());
        id.domain()?;
        if matches!(id.entity(), Some(e) if !is_valid_entity(e)) {
            return Err(Error::InvalidChain(s.to_string()));
        }
        Ok(id)
    }

    /// Domain this chain belongs to
    pub fn domain(&self) -> Result<LedgerDomain> {
        let slug = self.0.split('/').next().unwrap_or_default();
        LedgerDomain::from_slug(slug).ok_or_else(|| Error::InvalidChain(self.0.clone()))
    }

    /// Entity key for per-entity chains
    pub fn entity(&self) -> Option<&str> {
        self.0.split_once('/').map(|(_, entity)| entity)
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_valid_entity(entity: &str) -> bool {
    !entity.is_empty() && !entity.contains('/') && !entity.chars().any(char::is_control)
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One append-only, hash-linked ledger entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Chain this block belongs to
    pub chain_id: ChainId,

    /// Position in the chain (first block is 1)
    pub block_number: u64,

    /// Creation instant, captured once
    pub timestamp: DateTime<Utc>,

    /// Hash of the predecessor, `"0"` for the first block
    pub previous_hash: String,

    /// Hex SHA-256 of `raw_hash_input`
    pub hash: String,

    /// Uniqueness salt
    pub nonce: u64,

    /// Exact canonical string that was hashed (absent on legacy blocks)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_hash_input: Option<String>,

    /// Domain-specific data
    pub payload: Value,
}

impl Block {
    /// Whether this is the first block of its chain
    pub fn is_genesis(&self) -> bool {
        self.block_number == GENESIS_BLOCK_NUMBER
    }

    /// Ledger token carried by the payload, if any
    pub fn token(&self) -> Option<&str> {
        self.payload.get("token").and_then(Value::as_str)
    }

    /// Compact reference to this block
    pub fn to_ref(&self) -> BlockRef {
        BlockRef {
            block_number: self.block_number,
            hash: self.hash.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// Latest position of a chain, written atomically with each block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    /// Chain id
    pub chain_id: ChainId,
    /// Number of the newest block (equals the block count)
    pub latest_block_number: u64,
    /// Hash of the newest block
    pub latest_hash: String,
    /// When the newest block was appended
    pub updated_at: DateTime<Utc>,
}

impl ChainHead {
    /// Head pointing at `block`
    pub fn from_block(block: &Block) -> Self {
        Self {
            chain_id: block.chain_id.clone(),
            latest_block_number: block.block_number,
            latest_hash: block.hash.clone(),
            updated_at: block.timestamp,
        }
    }
}

/// Outcome of verifying a single block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockCheck {
    /// Hash recomputed and matched
    Valid,
    /// Stored hash disagrees with the block's content
    HashMismatch,
    /// Legacy block without raw input whose reconstruction did not match;
    /// may be serialization drift rather than tampering
    LegacyUnverified,
}

impl BlockCheck {
    /// Only a definite match counts as trusted
    pub fn is_trusted(&self) -> bool {
        matches!(self, BlockCheck::Valid)
    }

    /// Definite tamper finding
    pub fn is_tampered(&self) -> bool {
        matches!(self, BlockCheck::HashMismatch)
    }
}

/// Kind of chain integrity failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Block content no longer matches its hash
    HashMismatch,
    /// Block no longer points at its true predecessor
    LinkageBroken,
    /// Block numbers skip or repeat
    SequenceGap,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureKind::HashMismatch => "hash mismatch",
            FailureKind::LinkageBroken => "linkage broken",
            FailureKind::SequenceGap => "sequence gap",
        };
        f.write_str(text)
    }
}

/// Integrity status of a chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    /// Every block verified and linked
    Valid,
    /// At least one integrity failure
    Compromised,
    /// No blocks
    Empty,
}

/// Result of verifying an ordered run of blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainVerification {
    /// Whether the run is intact
    pub is_valid: bool,
    /// Status summary
    pub status: ChainStatus,
    /// Human-readable explanation
    pub message: String,
    /// First offending block
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failing_block_number: Option<u64>,
    /// What went wrong at `failing_block_number`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,
    /// Legacy blocks that could only be checked by reconstruction and failed
    pub low_confidence_blocks: Vec<u64>,
    /// Blocks examined before stopping
    pub blocks_checked: usize,
}

/// Compact block reference used in statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    /// Block number
    pub block_number: u64,
    /// Block hash
    pub hash: String,
    /// Block timestamp
    pub timestamp: DateTime<Utc>,
}

/// Derived chain statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainStatistics {
    /// Blocks considered
    pub block_count: usize,
    /// Oldest block
    pub first: Option<BlockRef>,
    /// Newest block
    pub last: Option<BlockRef>,
    /// Seconds between first and last block
    pub total_span_seconds: f64,
    /// Mean seconds between consecutive blocks
    pub average_inter_block_seconds: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_global_and_entity() {
        let global = ChainId::global(LedgerDomain::DeliveryProof);
        assert_eq!(global.as_str(), "delivery-proof");
        assert_eq!(global.entity(), None);
        assert_eq!(global.domain().unwrap(), LedgerDomain::DeliveryProof);

        let trip = ChainId::for_entity(LedgerDomain::DriverBehavior, "TRIP-88").unwrap();
        assert_eq!(trip.as_str(), "driver-behavior/TRIP-88");
        assert_eq!(trip.entity(), Some("TRIP-88"));
        assert_eq!(trip.domain().unwrap(), LedgerDomain::DriverBehavior);
    }

    #[test]
    fn test_chain_id_parse_rejects_unknown_domain() {
        assert!(ChainId::parse("payments").is_err());
        assert!(ChainId::parse("vehicle-ownership/").is_err());
        assert!(ChainId::parse("vehicle-ownership/a/b").is_err());
        assert!(ChainId::parse("vehicle-ownership/1HGCM82633A004352").is_ok());
    }

    #[test]
    fn test_entity_key_validation() {
        assert!(ChainId::for_entity(LedgerDomain::VehicleOwnership, "  ").is_err());
        assert!(ChainId::for_entity(LedgerDomain::VehicleOwnership, "a/b").is_err());
        assert!(ChainId::for_entity(LedgerDomain::VehicleOwnership, "a\0b").is_err());
    }

    #[test]
    fn test_block_check_classification() {
        assert!(BlockCheck::Valid.is_trusted());
        assert!(!BlockCheck::LegacyUnverified.is_trusted());
        assert!(!BlockCheck::LegacyUnverified.is_tampered());
        assert!(BlockCheck::HashMismatch.is_tampered());
    }

    #[test]
    fn test_chain_status_wire_format() {
        assert_eq!(
            serde_json::to_string(&ChainStatus::Compromised).unwrap(),
            "\"COMPROMISED\""
        );
    }
}
