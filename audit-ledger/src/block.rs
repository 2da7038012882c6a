//! Block engine
//!
//! Builds blocks from a payload and a chain position, and verifies single
//! blocks or ordered runs of blocks.
//!
//! The hash input of a block is the canonical encoding of
//! `{block_number, nonce, payload, previous_hash, timestamp}`. That exact
//! string is kept on the block as `raw_hash_input` so verification never has
//! to trust a re-serialization of stored data.

use chrono::{DateTime, SubsecRound, Utc};
use serde_json::{json, Value};

use crate::canonical::{format_timestamp, CanonicalBytes};
use crate::crypto::{generate_nonce, sha256_hex};
use crate::types::{
    Block, BlockCheck, ChainId, ChainStatistics, ChainStatus, ChainVerification, FailureKind,
    GENESIS_BLOCK_NUMBER, GENESIS_PREVIOUS_HASH,
};

/// Canonical hash input for a block position and payload
pub fn canonical_hash_input(
    block_number: u64,
    timestamp: &DateTime<Utc>,
    payload: &Value,
    previous_hash: &str,
    nonce: u64,
) -> CanonicalBytes {
    CanonicalBytes::from_value(&json!({
        "block_number": block_number,
        "nonce": nonce,
        "payload": payload,
        "previous_hash": previous_hash,
        "timestamp": format_timestamp(timestamp),
    }))
}

/// Build a block at an explicit position
///
/// The timestamp is truncated to milliseconds so that it survives an
/// ISO-8601 storage round-trip unchanged.
pub fn create_block(
    chain_id: ChainId,
    payload: Value,
    previous_hash: &str,
    block_number: u64,
    timestamp: DateTime<Utc>,
    nonce: u64,
) -> Block {
    let timestamp = timestamp.trunc_subsecs(3);
    let input = canonical_hash_input(block_number, &timestamp, &payload, previous_hash, nonce);
    let hash = input.digest();

    Block {
        chain_id,
        block_number,
        timestamp,
        previous_hash: previous_hash.to_string(),
        hash,
        nonce,
        raw_hash_input: Some(input.into_string()),
        payload,
    }
}

/// First block of a chain
pub fn create_genesis(chain_id: ChainId, payload: Value) -> Block {
    create_block(
        chain_id,
        payload,
        GENESIS_PREVIOUS_HASH,
        GENESIS_BLOCK_NUMBER,
        Utc::now(),
        generate_nonce(),
    )
}

/// Block following `previous` (or the genesis block when there is none)
pub fn next_block(chain_id: ChainId, previous: Option<&Block>, payload: Value) -> Block {
    match previous {
        Some(prev) => create_block(
            chain_id,
            payload,
            &prev.hash,
            prev.block_number + 1,
            Utc::now(),
            generate_nonce(),
        ),
        None => create_genesis(chain_id, payload),
    }
}

/// Recompute a block's hash and compare
///
/// With `raw_hash_input` present the raw string must hash to the stored hash
/// and must describe the block's current fields. Without it the input is
/// reconstructed from the fields; a mismatch there is only low confidence.
pub fn verify_block(block: &Block) -> BlockCheck {
    let reconstructed = canonical_hash_input(
        block.block_number,
        &block.timestamp,
        &block.payload,
        &block.previous_hash,
        block.nonce,
    );

    match &block.raw_hash_input {
        Some(raw) => {
            if !sha256_hex(raw.as_bytes()).eq_ignore_ascii_case(&block.hash) {
                return BlockCheck::HashMismatch;
            }
            if raw == reconstructed.as_str() {
                return BlockCheck::Valid;
            }
            // Raw input recorded by an older encoder: compare structure
            match serde_json::from_str::<Value>(raw) {
                Ok(parsed) if CanonicalBytes::from_value(&parsed) == reconstructed => {
                    BlockCheck::Valid
                }
                _ => BlockCheck::HashMismatch,
            }
        }
        None => {
            if reconstructed.digest().eq_ignore_ascii_case(&block.hash) {
                BlockCheck::Valid
            } else {
                BlockCheck::LegacyUnverified
            }
        }
    }
}

/// Verify an ordered run of blocks, stopping at the first failure
pub fn verify_chain(blocks: &[Block]) -> ChainVerification {
    if blocks.is_empty() {
        return ChainVerification {
            is_valid: true,
            status: ChainStatus::Empty,
            message: "No blocks".to_string(),
            failing_block_number: None,
            failure_kind: None,
            low_confidence_blocks: Vec::new(),
            blocks_checked: 0,
        };
    }

    let mut low_confidence = Vec::new();

    for (i, block) in blocks.iter().enumerate() {
        let number = block.block_number;
        let fail = |kind: FailureKind, message: String, low: Vec<u64>| ChainVerification {
            is_valid: false,
            status: ChainStatus::Compromised,
            message,
            failing_block_number: Some(number),
            failure_kind: Some(kind),
            low_confidence_blocks: low,
            blocks_checked: i + 1,
        };

        match verify_block(block) {
            BlockCheck::HashMismatch => {
                return fail(
                    FailureKind::HashMismatch,
                    format!("Block {} content was altered: its hash no longer matches", number),
                    low_confidence,
                );
            }
            BlockCheck::LegacyUnverified => low_confidence.push(number),
            BlockCheck::Valid => {}
        }

        if number == 0 {
            return fail(
                FailureKind::SequenceGap,
                "Block numbers start at 1".to_string(),
                low_confidence,
            );
        }

        if i == 0 {
            // A run starting mid-chain has no predecessor to compare against
            if block.is_genesis() && block.previous_hash != GENESIS_PREVIOUS_HASH {
                return fail(
                    FailureKind::LinkageBroken,
                    format!(
                        "Genesis block must reference \"{}\", found {}",
                        GENESIS_PREVIOUS_HASH, block.previous_hash
                    ),
                    low_confidence,
                );
            }
            continue;
        }

        let prev = &blocks[i - 1];
        if block.previous_hash != prev.hash {
            return fail(
                FailureKind::LinkageBroken,
                format!(
                    "Block {} no longer points at block {}",
                    number, prev.block_number
                ),
                low_confidence,
            );
        }
        if prev.block_number.checked_add(1) != Some(number) {
            return fail(
                FailureKind::SequenceGap,
                format!("Block {} follows block {}", number, prev.block_number),
                low_confidence,
            );
        }
    }

    let mut message = format!("Chain intact: {} blocks verified", blocks.len());
    if !low_confidence.is_empty() {
        message.push_str(&format!(
            "; legacy blocks {:?} carry no recorded hash input and do not match a reconstruction, so an edit cannot be ruled out",
            low_confidence
        ));
    }

    ChainVerification {
        is_valid: true,
        status: ChainStatus::Valid,
        message,
        failing_block_number: None,
        failure_kind: None,
        low_confidence_blocks: low_confidence,
        blocks_checked: blocks.len(),
    }
}

/// Span and pacing of an ordered run of blocks
pub fn chain_statistics(blocks: &[Block]) -> ChainStatistics {
    let (first, last) = match (blocks.first(), blocks.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => {
            return ChainStatistics {
                block_count: 0,
                first: None,
                last: None,
                total_span_seconds: 0.0,
                average_inter_block_seconds: None,
            }
        }
    };

    let total_span_seconds =
        (last.timestamp - first.timestamp).num_milliseconds() as f64 / 1000.0;
    let average_inter_block_seconds = if blocks.len() > 1 {
        Some(total_span_seconds / (blocks.len() - 1) as f64)
    } else {
        None
    };

    ChainStatistics {
        block_count: blocks.len(),
        first: Some(first.to_ref()),
        last: Some(last.to_ref()),
        total_span_seconds,
        average_inter_block_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LedgerDomain;
    use chrono::{Duration, TimeZone};

    fn chain_id() -> ChainId {
        ChainId::global(LedgerDomain::DeliveryProof)
    }

    fn build_chain(n: u64) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for i in 0..n {
            let block = next_block(
                chain_id(),
                blocks.last(),
                json!({"delivery_id": format!("D-{}", i), "amount": 22500 + i}),
            );
            blocks.push(block);
        }
        blocks
    }

    #[test]
    fn test_genesis_shape() {
        let genesis = create_genesis(chain_id(), json!({"x": 1}));
        assert_eq!(genesis.block_number, 1);
        assert_eq!(genesis.previous_hash, "0");
        assert_eq!(genesis.hash.len(), 64);
        assert!(genesis.raw_hash_input.is_some());
        assert!(genesis.is_genesis());
    }

    #[test]
    fn test_raw_input_hashes_to_hash() {
        let block = create_genesis(chain_id(), json!({"x": 1}));
        let raw = block.raw_hash_input.as_deref().unwrap();
        assert_eq!(sha256_hex(raw.as_bytes()), block.hash);
        assert!(raw.starts_with(r#"{"block_number":1,"nonce":"#));
    }

    #[test]
    fn test_deterministic_for_fixed_inputs() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let a = create_block(chain_id(), json!({"a": 1, "b": 2}), "0", 1, ts, 7);
        let b = create_block(chain_id(), json!({"b": 2, "a": 1}), "0", 1, ts, 7);
        assert_eq!(a.hash, b.hash);

        let c = create_block(chain_id(), json!({"a": 1, "b": 2}), "0", 1, ts, 8);
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn test_timestamp_truncated_to_millis() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap() + Duration::nanoseconds(1_234_567);
        let block = create_block(chain_id(), json!({}), "0", 1, ts, 1);
        assert_eq!(block.timestamp.timestamp_subsec_nanos(), 1_000_000);
    }

    #[test]
    fn test_fresh_block_verifies() {
        let block = create_genesis(chain_id(), json!({"amount": 22500}));
        assert_eq!(verify_block(&block), BlockCheck::Valid);
    }

    #[test]
    fn test_payload_edit_detected_even_with_raw_input() {
        let mut block = create_genesis(chain_id(), json!({"amount": 22500}));
        block.payload["amount"] = json!(50000);
        assert_eq!(verify_block(&block), BlockCheck::HashMismatch);
    }

    #[test]
    fn test_raw_input_edit_detected() {
        let mut block = create_genesis(chain_id(), json!({"amount": 22500}));
        block.raw_hash_input = Some(block.raw_hash_input.unwrap().replace("22500", "50000"));
        assert_eq!(verify_block(&block), BlockCheck::HashMismatch);
    }

    #[test]
    fn test_raw_input_in_older_key_order_still_valid() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let mut block = create_block(chain_id(), json!({"b": 2, "a": 1}), "0", 1, ts, 3);

        // Stringify-then-hash output from the old writer
        let legacy_raw = r#"{"timestamp":"2026-01-05T08:00:00.000Z","payload":{"b":2,"a":1},"previous_hash":"0","nonce":3,"block_number":1}"#;
        block.raw_hash_input = Some(legacy_raw.to_string());
        block.hash = sha256_hex(legacy_raw.as_bytes());

        assert_eq!(verify_block(&block), BlockCheck::Valid);
    }

    #[test]
    fn test_legacy_block_without_raw_input() {
        let mut block = create_genesis(chain_id(), json!({"amount": 22500}));
        block.raw_hash_input = None;
        assert_eq!(verify_block(&block), BlockCheck::Valid);

        block.payload["amount"] = json!(50000);
        assert_eq!(verify_block(&block), BlockCheck::LegacyUnverified);
    }

    #[test]
    fn test_chain_of_blocks_verifies() {
        let blocks = build_chain(5);
        let result = verify_chain(&blocks);
        assert!(result.is_valid);
        assert_eq!(result.status, ChainStatus::Valid);
        assert_eq!(result.blocks_checked, 5);
        assert!(result.failing_block_number.is_none());
    }

    #[test]
    fn test_empty_chain() {
        let result = verify_chain(&[]);
        assert!(result.is_valid);
        assert_eq!(result.status, ChainStatus::Empty);
    }

    #[test]
    fn test_hash_edit_breaks_the_block_itself() {
        let mut blocks = build_chain(3);
        blocks[1].hash = "f".repeat(64);

        let result = verify_chain(&blocks);
        assert!(!result.is_valid);
        assert_eq!(result.failing_block_number, Some(2));
        assert_eq!(result.failure_kind, Some(FailureKind::HashMismatch));
    }

    #[test]
    fn test_rehashed_block_breaks_linkage_of_successor() {
        let mut blocks = build_chain(3);
        // Forge block 2 consistently; block 3 still points at the original
        let forged = create_block(
            chain_id(),
            json!({"delivery_id": "forged"}),
            &blocks[0].hash,
            2,
            blocks[1].timestamp,
            blocks[1].nonce,
        );
        blocks[1] = forged;

        let result = verify_chain(&blocks);
        assert_eq!(result.failing_block_number, Some(3));
        assert_eq!(result.failure_kind, Some(FailureKind::LinkageBroken));
    }

    #[test]
    fn test_deleted_block_detected() {
        let mut blocks = build_chain(4);
        blocks.remove(1);

        let result = verify_chain(&blocks);
        assert!(!result.is_valid);
        assert_eq!(result.failing_block_number, Some(3));
        assert_eq!(result.failure_kind, Some(FailureKind::LinkageBroken));
    }

    #[test]
    fn test_bad_genesis_reference() {
        let ts = Utc::now();
        let genesis = create_block(chain_id(), json!({}), "abc", 1, ts, 1);
        let result = verify_chain(&[genesis]);
        assert_eq!(result.failing_block_number, Some(1));
        assert_eq!(result.failure_kind, Some(FailureKind::LinkageBroken));
    }

    #[test]
    fn test_duplicate_number_detected() {
        let blocks = build_chain(2);
        let duplicate = create_block(
            chain_id(),
            json!({"dup": true}),
            &blocks[1].hash,
            2,
            Utc::now(),
            9,
        );
        let run = vec![blocks[0].clone(), blocks[1].clone(), duplicate];

        let result = verify_chain(&run);
        assert_eq!(result.failing_block_number, Some(2));
        assert_eq!(result.failure_kind, Some(FailureKind::SequenceGap));
    }

    #[test]
    fn test_range_starting_mid_chain() {
        let blocks = build_chain(5);
        let result = verify_chain(&blocks[2..]);
        assert!(result.is_valid);
        assert_eq!(result.blocks_checked, 3);
    }

    #[test]
    fn test_legacy_mismatch_is_low_confidence_not_failure() {
        let mut blocks = build_chain(3);
        blocks[1].raw_hash_input = None;
        blocks[1].payload["note"] = json!("drifted");

        let result = verify_chain(&blocks);
        assert!(result.is_valid);
        assert_eq!(result.low_confidence_blocks, vec![2]);
        assert!(result.message.contains("legacy"));
        assert!(result.message.contains("cannot be ruled out"));
    }

    #[test]
    fn test_legacy_block_at_max_number_is_a_gap() {
        let mut blocks = build_chain(2);
        blocks[0].raw_hash_input = None;
        blocks[0].block_number = u64::MAX;

        let result = verify_chain(&blocks);
        assert!(!result.is_valid);
        assert_eq!(result.failure_kind, Some(FailureKind::SequenceGap));
        assert_eq!(result.failing_block_number, Some(2));
        assert_eq!(result.low_confidence_blocks, vec![u64::MAX]);
    }

    #[test]
    fn test_statistics() {
        let base = Utc.with_ymd_and_hms(2026, 1, 5, 8, 0, 0).unwrap();
        let b1 = create_block(chain_id(), json!({}), "0", 1, base, 1);
        let b2 = create_block(chain_id(), json!({}), &b1.hash, 2, base + Duration::seconds(10), 2);
        let b3 = create_block(chain_id(), json!({}), &b2.hash, 3, base + Duration::seconds(30), 3);

        let stats = chain_statistics(&[b1, b2, b3]);
        assert_eq!(stats.block_count, 3);
        assert_eq!(stats.first.unwrap().block_number, 1);
        assert_eq!(stats.last.unwrap().block_number, 3);
        assert_eq!(stats.total_span_seconds, 30.0);
        assert_eq!(stats.average_inter_block_seconds, Some(15.0));
    }

    #[test]
    fn test_statistics_empty_and_single() {
        assert_eq!(chain_statistics(&[]).block_count, 0);

        let single = chain_statistics(&build_chain(1));
        assert_eq!(single.block_count, 1);
        assert_eq!(single.total_span_seconds, 0.0);
        assert!(single.average_inter_block_seconds.is_none());
    }
}
