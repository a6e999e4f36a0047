//! File-backed ledger source.
//!
//! Blocks live in `<root>/<channel>/<number>.block`, one wire-encoded block
//! per file. Subscriptions poll for the next file at a fixed interval and
//! never end on their own. Writers must create block files atomically
//! (write elsewhere, then rename) and in block order, so the files of a
//! channel always form a gapless run starting at block 0.

use super::{BlockSubscription, ChainTip, LedgerSource, deliver};
use crate::core::decoder::decode_header;
use crate::utils::error::{IndexerError, Result};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Polling ledger source over a directory of block files.
///
/// # Example
///
/// ```no_run
/// use fabric_indexer::{DirectoryLedger, LedgerSource};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let ledger = DirectoryLedger::new("/var/ledger", 1000, 64);
/// let tip = ledger.query_chain_tip("mychannel").await?;
/// println!("height {}", tip.height);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryLedger {
    root: PathBuf,
    poll_interval: Duration,
    buffer: usize,
}

impl DirectoryLedger {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, poll_interval_ms: u64, buffer: usize) -> Self {
        Self {
            root: root.into(),
            poll_interval: Duration::from_millis(poll_interval_ms),
            buffer,
        }
    }

    /// Path of block `number` of `channel`.
    #[must_use]
    pub fn block_path(&self, channel: &str, number: u64) -> PathBuf {
        block_path(&self.root, channel, number)
    }
}

fn block_path(root: &Path, channel: &str, number: u64) -> PathBuf {
    root.join(channel).join(format!("{number}.block"))
}

async fn read_block(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn block_exists(root: &Path, channel: &str, number: u64) -> Result<bool> {
    Ok(tokio::fs::try_exists(block_path(root, channel, number)).await?)
}

/// Number of block files of `channel`, found by galloping then bisecting
/// over file existence. Block contents are never read.
async fn count_blocks(root: &Path, channel: &str) -> Result<u64> {
    if !block_exists(root, channel, 0).await? {
        return Ok(0);
    }

    let mut present = 0u64;
    let mut step = 1u64;
    let mut absent = loop {
        let candidate = present.saturating_add(step);
        if candidate == present || !block_exists(root, channel, candidate).await? {
            break candidate;
        }
        present = candidate;
        step = step.saturating_mul(2);
    };

    while absent - present > 1 {
        let mid = present + (absent - present) / 2;
        if block_exists(root, channel, mid).await? {
            present = mid;
        } else {
            absent = mid;
        }
    }
    Ok(present + 1)
}

#[async_trait]
impl LedgerSource for DirectoryLedger {
    async fn query_chain_tip(&self, channel: &str) -> Result<ChainTip> {
        let dir = self.root.join(channel);
        if !tokio::fs::try_exists(&dir).await? {
            return Err(IndexerError::LedgerError(format!(
                "no ledger directory for channel '{channel}' at {}",
                dir.display()
            )));
        }

        let height = count_blocks(&self.root, channel).await?;
        if height == 0 {
            return Ok(ChainTip::default());
        }

        let raw = read_block(&block_path(&self.root, channel, height - 1))
            .await?
            .ok_or_else(|| {
                IndexerError::LedgerError(format!(
                    "block {} of channel '{channel}' disappeared",
                    height - 1
                ))
            })?;
        Ok(ChainTip::from_header(height, &decode_header(&raw)?))
    }

    async fn fetch_block(&self, channel: &str, number: u64) -> Result<Option<Vec<u8>>> {
        read_block(&self.block_path(channel, number)).await
    }

    async fn subscribe_blocks(&self, channel: &str, from: u64) -> Result<BlockSubscription> {
        let (sender, registration, subscription) = BlockSubscription::channel(self.buffer);
        let root = self.root.clone();
        let channel = channel.to_string();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut next = from;
            loop {
                match read_block(&block_path(&root, &channel, next)).await {
                    Ok(Some(raw)) => {
                        if !deliver(&sender, &registration, Ok(raw)).await {
                            return;
                        }
                        next += 1;
                    }
                    Ok(None) => {
                        tokio::select! {
                            () = registration.cancelled() => return,
                            () = tokio::time::sleep(poll_interval) => {}
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %channel, block_number = next, error = %e, "Failed to read block file");
                        let _ = deliver(&sender, &registration, Err(e)).await;
                        return;
                    }
                }
            }
        });

        Ok(subscription)
    }

    fn source_name(&self) -> &str {
        "directory"
    }
}
