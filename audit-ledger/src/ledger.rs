//! Main ledger orchestration layer
//!
//! Ties the store, the five domain chains, the per-chain writers, field
//! encryption, the mirror and the explorer into one API.
//!
//! # Example
//!
//! ```no_run
//! use audit_ledger::{Config, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> audit_ledger::Result<()> {
//!     let config = Config::default();
//!     let ledger = Ledger::open(config).await?;
//!
//!     // let block = ledger.append(delivery_proof).await?;
//!     println!("{:?}", ledger.health()?);
//!
//!     ledger.shutdown().await
//! }
//! ```

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::{
    actor::WriterRegistry,
    chain::ChainLedger,
    crypto::{generate_token, FieldCipher},
    domain::LedgerDomain,
    explorer::{BlockSummary, Explorer, HealthReport, Page, ValidationReport},
    metrics::Metrics,
    mirror::{spawn_anchor, BlockAnchor, LedgerMirror, MirrorCheck},
    payloads::LedgerPayload,
    storage::{BlockStore, RocksStore},
    types::{Block, ChainId},
    Config, Error, Result,
};

/// Attempts at finding an unused token before giving up
const TOKEN_ATTEMPTS: u32 = 3;

/// Main ledger interface
pub struct Ledger {
    /// Shared block store
    store: Arc<dyn BlockStore>,

    /// One chain ledger per domain, in `LedgerDomain::ALL` order
    chains: Vec<Arc<ChainLedger>>,

    /// Lazily spawned per-chain writers
    writers: WriterRegistry,

    /// Field encryption for sensitive payload values
    cipher: FieldCipher,

    /// Optional external anchor target
    mirror: Option<Arc<dyn LedgerMirror>>,

    /// Read-only views
    explorer: Explorer,

    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger {
    /// Open ledger with configuration
    ///
    /// The field key is read from the environment variable named by
    /// `security.field_key_env`.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let cipher = FieldCipher::from_env(&config.security.field_key_env)?;
        let store = Arc::new(RocksStore::open(&config)?);
        Self::with_store(config, store, cipher)
    }

    /// Build a ledger over an existing store
    pub fn with_store(config: Config, store: Arc<dyn BlockStore>, cipher: FieldCipher) -> Result<Self> {
        let metrics = Metrics::new()?;

        let chains = LedgerDomain::ALL
            .iter()
            .map(|domain| {
                Arc::new(
                    ChainLedger::new(*domain, store.clone(), &config.append)
                        .with_metrics(metrics.clone()),
                )
            })
            .collect();

        let explorer =
            Explorer::new(store.clone(), config.explorer.clone()).with_metrics(metrics.clone());

        info!(
            service = %config.service_name,
            version = %config.service_version,
            "Ledger ready"
        );

        Ok(Self {
            store,
            chains,
            writers: WriterRegistry::new(config.append.writer_mailbox_capacity),
            cipher,
            mirror: None,
            explorer,
            metrics,
            config,
        })
    }

    /// Anchor every appended block in an external mirror
    pub fn with_mirror(mut self, mirror: Arc<dyn LedgerMirror>) -> Self {
        self.explorer = self.explorer.with_mirror(mirror.clone(), self.mirror_timeout());
        self.mirror = Some(mirror);
        self
    }

    /// Record a typed payload in its domain ledger
    ///
    /// Validates and encrypts sensitive fields, then appends through
    /// [`Ledger::append_value`].
    pub async fn append<P: LedgerPayload>(&self, mut payload: P) -> Result<Block> {
        payload.validate()?;
        let chain_id = payload.chain_id()?;
        payload.seal(&self.cipher)?;
        self.append_value(&chain_id, serde_json::to_value(&payload)?).await
    }

    /// Append an untyped payload to a chain
    ///
    /// Sensitive fields of the chain's domain are encrypted if still in
    /// plaintext. A fresh token is assigned unless the payload carries one;
    /// a generated token that turns out to be taken is regenerated.
    pub async fn append_value(&self, chain_id: &ChainId, mut payload: Value) -> Result<Block> {
        let domain = chain_id.domain()?;
        let chain = self.chain(domain)?;
        if !payload.is_object() {
            return Err(Error::InvalidPayload(
                "payload must be a JSON object".to_string(),
            ));
        }
        self.seal_fields(domain, &mut payload)?;

        let preassigned = match payload.get("token") {
            Some(Value::String(token)) => Some(token.clone()),
            Some(Value::Null) | None => None,
            Some(_) => {
                return Err(Error::InvalidPayload("token must be a string".to_string()));
            }
        };
        let attempts = if preassigned.is_some() { 1 } else { TOKEN_ATTEMPTS };

        for attempt in 1..=attempts {
            let token = preassigned
                .clone()
                .unwrap_or_else(|| generate_token(domain.token_prefix()));
            payload["token"] = Value::String(token);

            match self.writers.handle(chain_id, chain).append(payload.clone()).await {
                Ok(block) => {
                    self.notify_mirror(&block);
                    return Ok(block);
                }
                Err(Error::TokenConflict(token)) if attempt < attempts => {
                    warn!(chain_id = %chain_id, token = %token, attempt, "Token already taken, regenerating");
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::RetriesExhausted {
            chain_id: chain_id.to_string(),
            attempts,
        })
    }

    /// Chain ledger of a domain
    pub fn chain(&self, domain: LedgerDomain) -> Result<&Arc<ChainLedger>> {
        self.chains
            .iter()
            .find(|chain| chain.domain() == domain)
            .ok_or_else(|| Error::InvalidChain(domain.to_string()))
    }

    /// Up to `limit` blocks in ascending order starting at `from`
    pub fn read_range(&self, chain_id: &ChainId, from: u64, limit: usize) -> Result<Vec<Block>> {
        self.chain(chain_id.domain()?)?.read_range(chain_id, from, limit)
    }

    /// Newest block of a chain
    pub fn read_latest(&self, chain_id: &ChainId) -> Result<Option<Block>> {
        self.chain(chain_id.domain()?)?.read_latest(chain_id)
    }

    /// Number of blocks in a chain
    pub fn block_count(&self, chain_id: &ChainId) -> Result<u64> {
        self.chain(chain_id.domain()?)?.block_count(chain_id)
    }

    /// Validate a chain from its first block
    pub fn validate(&self, chain_id: &ChainId, limit: usize) -> Result<ValidationReport> {
        self.explorer.validate(chain_id, limit)
    }

    /// Newest-first page of a chain
    pub fn explore(&self, chain_id: &ChainId, page: usize, limit: usize) -> Result<Page<BlockSummary>> {
        self.explorer.explore(chain_id, page, limit)
    }

    /// Overview of every chain
    pub fn health(&self) -> Result<HealthReport> {
        self.explorer.health()
    }

    /// Compare one block with the mirror
    pub async fn cross_check(&self, chain_id: &ChainId, block_number: u64) -> Result<MirrorCheck> {
        if !self.config.mirror.enabled {
            return Ok(MirrorCheck::Disabled);
        }
        self.explorer.cross_check(chain_id, block_number).await
    }

    /// Decrypt a sealed payload value
    pub fn decrypt_field(&self, ciphertext: &str) -> Result<String> {
        self.cipher.decrypt(ciphertext)
    }

    /// Read-only views
    pub fn explorer(&self) -> &Explorer {
        &self.explorer
    }

    /// Metrics collector
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Underlying store
    pub fn store(&self) -> &Arc<dyn BlockStore> {
        &self.store
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stop every chain writer
    pub async fn shutdown(self) -> Result<()> {
        self.writers.shutdown_all().await;
        info!(writers_stopped = true, "Ledger shut down");
        Ok(())
    }

    fn seal_fields(&self, domain: LedgerDomain, payload: &mut Value) -> Result<()> {
        for field in domain.sensitive_fields() {
            match payload.get_mut(*field) {
                Some(Value::String(value)) if !FieldCipher::is_encrypted(value) => {
                    *value = self.cipher.encrypt(value)?;
                }
                Some(Value::String(_)) | Some(Value::Null) | None => {}
                Some(_) => {
                    return Err(Error::InvalidPayload(format!("{} must be a string", field)));
                }
            }
        }
        Ok(())
    }

    fn notify_mirror(&self, block: &Block) {
        if let (Some(mirror), true) = (&self.mirror, self.config.mirror.enabled) {
            spawn_anchor(
                mirror.clone(),
                BlockAnchor::from(block),
                self.mirror_timeout(),
                self.metrics.clone(),
            );
        }
    }

    fn mirror_timeout(&self) -> Duration {
        Duration::from_millis(self.config.mirror.timeout_ms)
    }
}
