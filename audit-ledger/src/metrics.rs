//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_blocks_appended_total{domain}` - Blocks appended
//! - `ledger_append_conflicts_total{domain}` - Lost append races that were retried
//! - `ledger_append_failures_total{domain}` - Appends that gave up or errored
//! - `ledger_append_duration_seconds{domain}` - Append latency, retries included
//! - `ledger_verifications_total{status}` - Chain validations by outcome
//! - `ledger_mirror_failures_total` - Anchors the external mirror did not accept

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::domain::LedgerDomain;
use crate::types::ChainStatus;

/// Metrics collector
///
/// Every collector lives in the ledger's own registry, so several ledgers
/// can coexist in one process.
#[derive(Clone)]
pub struct Metrics {
    /// Blocks appended per domain
    pub blocks_appended: IntCounterVec,

    /// Retried append conflicts per domain
    pub append_conflicts: IntCounterVec,

    /// Failed appends per domain
    pub append_failures: IntCounterVec,

    /// Append duration histogram
    pub append_duration: HistogramVec,

    /// Validations per resulting status
    pub verifications: IntCounterVec,

    /// Mirror anchors that failed or timed out
    pub mirror_failures: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let blocks_appended = IntCounterVec::new(
            Opts::new("ledger_blocks_appended_total", "Total number of blocks appended"),
            &["domain"],
        )?;
        registry.register(Box::new(blocks_appended.clone()))?;

        let append_conflicts = IntCounterVec::new(
            Opts::new(
                "ledger_append_conflicts_total",
                "Append attempts that lost a race for the next block number",
            ),
            &["domain"],
        )?;
        registry.register(Box::new(append_conflicts.clone()))?;

        let append_failures = IntCounterVec::new(
            Opts::new("ledger_append_failures_total", "Appends that did not commit"),
            &["domain"],
        )?;
        registry.register(Box::new(append_failures.clone()))?;

        let append_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_append_duration_seconds",
                "Histogram of append latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
            &["domain"],
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        let verifications = IntCounterVec::new(
            Opts::new("ledger_verifications_total", "Chain validations by outcome"),
            &["status"],
        )?;
        registry.register(Box::new(verifications.clone()))?;

        let mirror_failures = IntCounter::new(
            "ledger_mirror_failures_total",
            "Anchors the external mirror did not accept",
        )?;
        registry.register(Box::new(mirror_failures.clone()))?;

        Ok(Self {
            blocks_appended,
            append_conflicts,
            append_failures,
            append_duration,
            verifications,
            mirror_failures,
            registry,
        })
    }

    /// Record a committed append
    pub fn record_append(&self, domain: LedgerDomain, duration_seconds: f64) {
        self.blocks_appended.with_label_values(&[domain.slug()]).inc();
        self.append_duration
            .with_label_values(&[domain.slug()])
            .observe(duration_seconds);
    }

    /// Record a lost race that will be retried
    pub fn record_conflict(&self, domain: LedgerDomain) {
        self.append_conflicts.with_label_values(&[domain.slug()]).inc();
    }

    /// Record an append that did not commit
    pub fn record_append_failure(&self, domain: LedgerDomain) {
        self.append_failures.with_label_values(&[domain.slug()]).inc();
    }

    /// Record a validation outcome
    pub fn record_verification(&self, status: ChainStatus) {
        let label = match status {
            ChainStatus::Valid => "valid",
            ChainStatus::Compromised => "compromised",
            ChainStatus::Empty => "empty",
        };
        self.verifications.with_label_values(&[label]).inc();
    }

    /// Record a failed mirror anchor
    pub fn record_mirror_failure(&self) {
        self.mirror_failures.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
