//! Writes a growing chain of synthetic blocks into a ledger directory, one
//! block every few seconds, for driving the indexer locally.

use std::path::{Path, PathBuf};
use std::time::Duration;

use fabric_indexer::core::decoder::decode_header;
use fabric_indexer::core::proto::ConfigGroup;
use fabric_indexer::generator::{BlockBuilder, EndorserTx, NsRwSet, header_hash};
use tokio::time::interval;

async fn write_block(dir: &Path, number: u64, raw: &[u8]) -> std::io::Result<()> {
    let path = dir.join(format!("{number}.block"));
    let staging = path.with_extension("tmp");
    tokio::fs::write(&staging, raw).await?;
    tokio::fs::rename(&staging, &path).await
}

/// Highest contiguous block already present, with its header hash.
async fn chain_end(dir: &Path) -> Result<(u64, Vec<u8>), Box<dyn std::error::Error>> {
    let mut next = 0;
    let mut previous_hash = Vec::new();
    while let Ok(raw) = tokio::fs::read(dir.join(format!("{next}.block"))).await {
        previous_hash = header_hash(&decode_header(&raw)?);
        next += 1;
    }
    Ok((next, previous_hash))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let ledger_dir = std::env::var("LEDGER_DIR").unwrap_or_else(|_| "./ledger".to_string());
    let channel = std::env::var("CHANNEL").unwrap_or_else(|_| "mychannel".to_string());
    let interval_secs: u64 = std::env::var("BLOCK_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);

    let dir: PathBuf = Path::new(&ledger_dir).join(&channel);
    tokio::fs::create_dir_all(&dir).await?;

    let (mut number, mut previous_hash) = chain_end(&dir).await?;
    println!("Writing blocks for {channel} into {} from block {number}", dir.display());

    let mut ticker = interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;

        let builder = BlockBuilder::new(&channel, number)
            .previous_hash(previous_hash.clone())
            .timestamp(chrono::Utc::now().timestamp());
        let builder = if number == 0 {
            builder.config("genesis", 0, ConfigGroup::default())
        } else {
            let asset = format!("\u{0}asset\u{0}{number}\u{0}");
            builder.endorser(
                EndorserTx::new(format!("gen-{number}")).namespace(
                    NsRwSet::new("basic")
                        .read("counter")
                        .write(asset, format!("{{\"value\":{number}}}").into_bytes())
                        .write("counter", number.to_string().into_bytes()),
                ),
            )
        };

        previous_hash = header_hash(&builder.header());
        write_block(&dir, number, &builder.build()).await?;
        println!("New block for indexer: {number}");
        number += 1;
    }
}
