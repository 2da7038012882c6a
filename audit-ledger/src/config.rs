//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Append / retry configuration
    pub append: AppendConfig,

    /// Explorer configuration
    pub explorer: ExplorerConfig,

    /// Field encryption configuration
    pub security: SecurityConfig,

    /// External mirror configuration
    pub mirror: MirrorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/audit-ledger"),
            service_name: "audit-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            append: AppendConfig::default(),
            explorer: ExplorerConfig::default(),
            security: SecurityConfig::default(),
            mirror: MirrorConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Append configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendConfig {
    /// Attempts after the first one when a block number is taken
    pub max_retries: u32,

    /// Base backoff between attempts (milliseconds, jittered)
    pub retry_backoff_ms: u64,

    /// Mailbox capacity of each chain writer
    pub writer_mailbox_capacity: usize,
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff_ms: 2,
            writer_mailbox_capacity: 256,
        }
    }
}

/// Explorer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplorerConfig {
    /// Page size used when the caller passes zero
    pub default_page_size: usize,

    /// Upper bound on page size
    pub max_page_size: usize,

    /// Upper bound on blocks loaded by one validation run
    pub max_validation_blocks: usize,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            default_page_size: 20,
            max_page_size: 100,
            max_validation_blocks: 10_000,
        }
    }
}

/// Field encryption configuration
///
/// Only the *name* of the environment variable holding the key lives here;
/// the key itself never enters the config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Environment variable holding the base64 AES-256 key
    pub field_key_env: String,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            field_key_env: "LEDGER_FIELD_KEY".to_string(),
        }
    }
}

/// External mirror configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Send anchors to the mirror after each append
    pub enabled: bool,

    /// Per-request timeout (milliseconds)
    pub timeout_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 2_000,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse from a TOML document
    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(name) = std::env::var("LEDGER_FIELD_KEY_ENV") {
            config.security.field_key_env = name;
        }

        if let Ok(retries) = std::env::var("LEDGER_APPEND_MAX_RETRIES") {
            config.append.max_retries = retries.parse().map_err(|e| {
                crate::Error::Config(format!("LEDGER_APPEND_MAX_RETRIES: {}", e))
            })?;
        }

        if let Ok(size) = std::env::var("LEDGER_EXPLORER_MAX_PAGE_SIZE") {
            config.explorer.max_page_size = size.parse().map_err(|e| {
                crate::Error::Config(format!("LEDGER_EXPLORER_MAX_PAGE_SIZE: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the ledger cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.append.writer_mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "append.writer_mailbox_capacity must be positive".to_string(),
            ));
        }
        if self.explorer.max_page_size == 0 || self.explorer.default_page_size == 0 {
            return Err(crate::Error::Config(
                "explorer page sizes must be positive".to_string(),
            ));
        }
        if self.security.field_key_env.trim().is_empty() {
            return Err(crate::Error::Config(
                "security.field_key_env must name an environment variable".to_string(),
            ));
        }
        Ok(())
    }
}
