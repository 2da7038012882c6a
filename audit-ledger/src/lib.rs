//! Audit Ledger
//!
//! Tamper-evident, append-only ledger for logistics events: delivery proofs,
//! driver behavior, export milestones, vehicle ownership and document
//! handoffs.
//!
//! # Architecture
//!
//! - **Canonical hashing**: one deterministic encoding feeds every digest
//! - **Hash chains**: each block commits to its predecessor's hash
//! - **Single writer per chain**: one Tokio task orders appends to a chain
//! - **Storage uniqueness**: position and token constraints catch every
//!   remaining race, which is retried on the new head
//!
//! # Invariants
//!
//! - `hash == SHA256(canonical(block_number, timestamp, payload, previous_hash, nonce))`
//! - Block numbers start at 1 and have no gaps or duplicates within a chain
//! - Append-only: blocks are never modified or deleted; corrections are new blocks

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod actor;
pub mod block;
pub mod canonical;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod explorer;
pub mod ledger;
pub mod memory_store;
pub mod metrics;
pub mod mirror;
pub mod payloads;
pub mod storage;
pub mod types;

// Re-exports
pub use block::{verify_block, verify_chain};
pub use canonical::CanonicalBytes;
pub use config::Config;
pub use crypto::FieldCipher;
pub use domain::LedgerDomain;
pub use error::{Error, Result};
pub use explorer::{Explorer, HealthReport, Page, ValidationReport};
pub use ledger::Ledger;
pub use memory_store::MemoryStore;
pub use mirror::{LedgerMirror, MemoryMirror, MirrorCheck};
pub use payloads::{
    DeliveryProof, DocumentTransfer, DriverBehaviorEvent, ExportEvent, LedgerPayload,
    VehicleRegistration,
};
pub use storage::{BlockStore, RocksStore};
pub use types::{Block, BlockCheck, ChainId, ChainStatus, ChainVerification, FailureKind};
