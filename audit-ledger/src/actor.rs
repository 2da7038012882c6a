//! Per-chain writer actors
//!
//! Appends to one chain are funnelled through a single Tokio task so that,
//! inside one process, blocks are built one after another on an up-to-date
//! head. Writers for different chains run in parallel.
//!
//! ```text
//!   Ledger::append ──► WriterRegistry ──► ChainWriterHandle (Clone)
//!                                              │ mpsc (bounded)
//!                                              ▼
//!                                        ChainWriter task
//!                                              │
//!                                              ▼
//!                                   ChainLedger::append (retry on conflict)
//! ```
//!
//! The store's uniqueness check still applies, so writers in other processes
//! sharing the same database are handled by the retry path.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::chain::ChainLedger;
use crate::types::{Block, ChainId};
use crate::{Error, Result};

/// Message sent to a chain writer
pub enum WriterMessage {
    /// Append a payload as the next block
    Append {
        /// Payload of the next block
        payload: Value,
        /// Receives the committed block or the error
        response: oneshot::Sender<Result<Block>>,
    },

    /// Stop after the messages already queued
    Shutdown,
}

/// Actor owning the append path of one chain
pub struct ChainWriter {
    chain_id: ChainId,
    ledger: Arc<ChainLedger>,
    mailbox: mpsc::Receiver<WriterMessage>,
}

impl ChainWriter {
    /// Create new actor
    pub fn new(
        chain_id: ChainId,
        ledger: Arc<ChainLedger>,
        mailbox: mpsc::Receiver<WriterMessage>,
    ) -> Self {
        Self {
            chain_id,
            ledger,
            mailbox,
        }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                WriterMessage::Append { payload, response } => {
                    // Store I/O and retry backoff block; keep them off the runtime threads
                    let ledger = self.ledger.clone();
                    let chain_id = self.chain_id.clone();
                    let result = tokio::task::spawn_blocking(move || ledger.append(&chain_id, payload))
                        .await
                        .unwrap_or_else(|e| Err(Error::Concurrency(format!("Append task failed: {}", e))));
                    if let Err(e) = &result {
                        error!(chain_id = %self.chain_id, error = %e, "Append failed");
                    }
                    // Caller may have given up waiting
                    let _ = response.send(result);
                }
                WriterMessage::Shutdown => break,
            }
        }

        debug!(chain_id = %self.chain_id, "Chain writer stopped");
    }
}

/// Handle to send messages to a chain writer
#[derive(Clone)]
pub struct ChainWriterHandle {
    sender: mpsc::Sender<WriterMessage>,
}

impl ChainWriterHandle {
    /// Append a payload and wait for the committed block
    pub async fn append(&self, payload: Value) -> Result<Block> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(WriterMessage::Append {
                payload,
                response: tx,
            })
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Actor response channel closed".to_string()))?
    }

    /// Stop the writer
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(WriterMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))
    }

    /// Whether the writer task is gone
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Spawn the writer of one chain
pub fn spawn_chain_writer(
    chain_id: ChainId,
    ledger: Arc<ChainLedger>,
    mailbox_capacity: usize,
) -> ChainWriterHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    debug!(chain_id = %chain_id, "Spawning chain writer");
    tokio::spawn(ChainWriter::new(chain_id, ledger, rx).run());
    ChainWriterHandle { sender: tx }
}

/// Lazily spawned writers, one per chain
pub struct WriterRegistry {
    writers: DashMap<ChainId, ChainWriterHandle>,
    mailbox_capacity: usize,
}

impl WriterRegistry {
    /// Create an empty registry
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            writers: DashMap::new(),
            mailbox_capacity,
        }
    }

    /// Writer of `chain_id`, spawned on first use
    pub fn handle(&self, chain_id: &ChainId, ledger: &Arc<ChainLedger>) -> ChainWriterHandle {
        let mut entry = self
            .writers
            .entry(chain_id.clone())
            .or_insert_with(|| {
                spawn_chain_writer(chain_id.clone(), ledger.clone(), self.mailbox_capacity)
            });

        if entry.is_closed() {
            *entry = spawn_chain_writer(chain_id.clone(), ledger.clone(), self.mailbox_capacity);
        }
        entry.value().clone()
    }

    /// Number of live writers
    pub fn len(&self) -> usize {
        self.writers.len()
    }

    /// Whether no writer was spawned yet
    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    /// Stop every writer
    pub async fn shutdown_all(&self) {
        let handles: Vec<ChainWriterHandle> =
            self.writers.iter().map(|entry| entry.value().clone()).collect();
        self.writers.clear();

        for handle in handles {
            // Already stopped writers are fine
            let _ = handle.shutdown().await;
        }
    }
}
