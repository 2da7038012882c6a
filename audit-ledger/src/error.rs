//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Binary serialization error (chain head records)
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON encoding error (blocks, payloads)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another writer already holds `(chain_id, block_number)`
    #[error("Append conflict on {chain_id} at block {block_number}")]
    AppendConflict {
        /// Chain that was being appended to
        chain_id: String,
        /// Block number that was already taken
        block_number: u64,
    },

    /// Payload token is already recorded in the ledger
    #[error("Token already recorded: {0}")]
    TokenConflict(String),

    /// Append gave up after the configured number of attempts
    #[error("Append to {chain_id} failed after {attempts} attempts")]
    RetriesExhausted {
        /// Chain that was being appended to
        chain_id: String,
        /// Attempts made before giving up
        attempts: u32,
    },

    /// Field encryption or decryption failed
    #[error("Crypto failure: {0}")]
    Crypto(String),

    /// Block not found
    #[error("Block not found: {0}")]
    BlockNotFound(String),

    /// Chain id is malformed or belongs to another domain
    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    /// Payload is not a JSON object or misses required fields
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the operation can succeed if simply attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::AppendConflict { .. } | Error::TokenConflict(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
