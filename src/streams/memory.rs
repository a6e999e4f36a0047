//! In-process ledger source.
//!
//! Blocks are appended per channel by the caller; subscriptions tail the
//! channel until it is closed with [`MemoryLedger::close_channel`], after
//! which they end once every block was delivered.

use super::{BlockSubscription, ChainTip, LedgerSource, deliver};
use crate::core::decoder::decode_header;
use crate::utils::error::{IndexerError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Notify, RwLock};

#[derive(Debug, Default)]
struct ChannelLog {
    blocks: Vec<Vec<u8>>,
    closed: bool,
}

#[derive(Debug, Default)]
struct Shared {
    channels: RwLock<HashMap<String, ChannelLog>>,
    appended: Notify,
}

/// Memory-backed ledger.
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    shared: Arc<Shared>,
    buffer: usize,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(64)
    }
}

impl MemoryLedger {
    /// Creates an empty ledger whose subscriptions buffer `buffer` blocks.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            buffer,
        }
    }

    /// Appends raw blocks to `channel`, creating it if needed.
    pub async fn append(&self, channel: &str, blocks: impl IntoIterator<Item = Vec<u8>>) {
        self.shared
            .channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .blocks
            .extend(blocks);
        self.shared.appended.notify_waiters();
    }

    /// Marks `channel` as finished: subscriptions end after the last block.
    pub async fn close_channel(&self, channel: &str) {
        self.shared
            .channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .closed = true;
        self.shared.appended.notify_waiters();
    }

    /// Number of blocks stored for `channel`.
    pub async fn height(&self, channel: &str) -> u64 {
        self.shared
            .channels
            .read()
            .await
            .get(channel)
            .map_or(0, |log| log.blocks.len() as u64)
    }
}

#[async_trait]
impl LedgerSource for MemoryLedger {
    async fn query_chain_tip(&self, channel: &str) -> Result<ChainTip> {
        let channels = self.shared.channels.read().await;
        let log = channels
            .get(channel)
            .ok_or_else(|| IndexerError::LedgerError(format!("unknown channel '{channel}'")))?;

        match log.blocks.last() {
            Some(raw) => Ok(ChainTip::from_header(
                log.blocks.len() as u64,
                &decode_header(raw)?,
            )),
            None => Ok(ChainTip::default()),
        }
    }

    async fn fetch_block(&self, channel: &str, number: u64) -> Result<Option<Vec<u8>>> {
        let channels = self.shared.channels.read().await;
        Ok(channels.get(channel).and_then(|log| {
            usize::try_from(number)
                .ok()
                .and_then(|index| log.blocks.get(index).cloned())
        }))
    }

    async fn subscribe_blocks(&self, channel: &str, from: u64) -> Result<BlockSubscription> {
        let (sender, registration, subscription) = BlockSubscription::channel(self.buffer);
        let shared = Arc::clone(&self.shared);
        let channel = channel.to_string();
        let mut next = usize::try_from(from)
            .map_err(|_| IndexerError::LedgerError(format!("block {from} out of range")))?;

        tokio::spawn(async move {
            loop {
                let appended = shared.appended.notified();
                tokio::pin!(appended);
                appended.as_mut().enable();

                let (block, closed) = {
                    let channels = shared.channels.read().await;
                    channels.get(&channel).map_or((None, false), |log| {
                        (log.blocks.get(next).cloned(), log.closed)
                    })
                };

                match block {
                    Some(raw) => {
                        if !deliver(&sender, &registration, Ok(raw)).await {
                            return;
                        }
                        next += 1;
                    }
                    None if closed => return,
                    None => {
                        tokio::select! {
                            () = registration.cancelled() => return,
                            () = &mut appended => {}
                        }
                    }
                }
            }
        });

        Ok(subscription)
    }

    fn source_name(&self) -> &str {
        "memory"
    }
}
