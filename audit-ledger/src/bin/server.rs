//! Ledger server binary

use anyhow::Context;
use audit_ledger::{Config, Ledger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    if std::env::var("LEDGER_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!("Starting audit ledger server");

    let config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path))?,
        Err(_) => Config::from_env().context("invalid LEDGER_* environment")?,
    };

    let ledger = Ledger::open(config).await.context("failed to open ledger")?;

    let health = ledger.health()?;
    tracing::info!(
        chains = health.chains.len(),
        total_blocks = health.total_blocks,
        "Ledger opened successfully"
    );

    // Startup integrity sweep; findings are logged, never fatal
    for chain in &health.chains {
        let report = ledger.validate(&chain.chain_id, 0)?;
        if !report.verification.is_valid {
            tracing::error!(
                chain_id = %chain.chain_id,
                block_number = ?report.verification.failing_block_number,
                message = %report.verification.message,
                "Integrity check failed"
            );
        }
    }

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down ledger server");
    ledger.shutdown().await?;
    Ok(())
}
