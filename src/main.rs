//! Fabric Indexer binary.
//!
//! Reads its configuration from the environment (see
//! `IndexerConfig::from_env`), tails the block files under `LEDGER_DIR` and
//! mirrors every configured channel into the selected storage until Ctrl+C.

use fabric_indexer::utils::logging;
use fabric_indexer::{
    ChannelOutcome, DirectoryLedger, IndexerConfig, LedgerSource, Result, Supervisor,
    TelemetryConfig, connect_storage, init_telemetry,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let telemetry = TelemetryConfig::default()
        .with_log_filter(std::env::var("LOG").unwrap_or_else(|_| "info".to_string()));
    let _guard = init_telemetry(telemetry);

    let config = IndexerConfig::from_env()?;
    let ledger_dir = std::env::var("LEDGER_DIR").unwrap_or_else(|_| "./ledger".to_string());

    let ledger = Arc::new(DirectoryLedger::new(
        &ledger_dir,
        config.poll_interval_ms,
        config.subscription_buffer,
    ));
    logging::log_startup(
        &config.channels,
        &config.storage.describe(),
        &format!("{} ({ledger_dir})", ledger.source_name()),
    );

    let storage = connect_storage(&config.storage).await?;
    logging::log(
        logging::LogLevel::Success,
        &format!("Connected to {} storage", storage.name()),
    );

    let supervisor = Supervisor::new(config, ledger, storage);
    supervisor.install_ctrl_c_handler();

    logging::log_section("Indexing");
    let outcomes = supervisor.run().await;

    logging::log_section("Summary");
    let mut failed = 0;
    for (channel, outcome) in &outcomes {
        match outcome {
            ChannelOutcome::Stopped => {
                logging::log(logging::LogLevel::Info, &format!("{channel}: stopped"));
            }
            ChannelOutcome::Failed(error) => {
                failed += 1;
                logging::log(logging::LogLevel::Error, &format!("{channel}: {error}"));
            }
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
