//! Per-channel synchronization engine.
//!
//! The engine resumes from the channel's last-synced marker, subscribes to
//! the ledger from the block after it and tails new blocks until it is
//! cancelled or the ledger closes the stream. Every block is decoded and
//! fully written before the next notification is taken; cancellation is
//! only observed between blocks.

use crate::core::decoder::BlockDecoder;
use crate::storage::StorageBackend;
use crate::streams::LedgerSource;
use crate::utils::error::Result;
use crate::utils::logging;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Observable lifecycle of a [`SyncEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Reading the chain tip and the last-synced marker.
    Resuming,
    /// Subscribed and indexing blocks as they arrive.
    Tailing,
    Stopped,
}

/// Synchronizes one channel from a ledger source into storage.
pub struct SyncEngine {
    channel: String,
    ledger: Arc<dyn LedgerSource>,
    storage: Arc<dyn StorageBackend>,
    cancel: CancellationToken,
    state: watch::Sender<SyncState>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        ledger: Arc<dyn LedgerSource>,
        storage: Arc<dyn StorageBackend>,
        cancel: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Resuming);
        Self {
            channel: channel.into(),
            ledger,
            storage,
            cancel,
            state,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Subscribes to state changes of this engine.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Computes the block number the subscription starts at.
    ///
    /// A stored record matching the chain tip hash only means the channel is
    /// caught up; the engine keeps tailing either way.
    ///
    /// # Errors
    ///
    /// Propagates ledger and storage errors.
    pub async fn resume_point(&self) -> Result<u64> {
        let tip = self.ledger.query_chain_tip(&self.channel).await?;

        if !tip.current_block_hash.is_empty()
            && !self
                .storage
                .query_block_by_hash(&self.channel, &tip.current_block_hash)
                .await?
                .is_empty()
        {
            tracing::info!(
                channel = %self.channel,
                height = tip.height,
                "Channel already synced, tailing new blocks"
            );
        }

        let from = match self.storage.get_last_entry(&self.channel).await? {
            Some(last) => last.block_number + 1,
            None => 0,
        };
        tracing::info!(channel = %self.channel, from = from, height = tip.height, "Resume point");
        Ok(from)
    }

    /// Runs the engine until cancellation, stream close, or the first error.
    ///
    /// # Errors
    ///
    /// Returns the first decode, storage or ledger error. The block that
    /// failed is not marked as synced.
    pub async fn run(&self) -> Result<()> {
        self.state.send_replace(SyncState::Resuming);
        let result = self.sync().await;
        self.state.send_replace(SyncState::Stopped);
        result
    }

    async fn sync(&self) -> Result<()> {
        let from = self.resume_point().await?;
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let mut subscription = self.ledger.subscribe_blocks(&self.channel, from).await?;
        self.state.send_replace(SyncState::Tailing);
        logging::log(
            logging::LogLevel::Info,
            &format!(
                "Tailing channel {} from block {from} ({})",
                self.channel,
                self.ledger.source_name()
            ),
        );

        let mut next_expected = from;
        let outcome = loop {
            let item = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    tracing::info!(channel = %self.channel, "Cancellation received");
                    break Ok(());
                }
                item = subscription.next() => item,
            };

            match item {
                None => {
                    tracing::info!(channel = %self.channel, "Block stream closed by the ledger");
                    break Ok(());
                }
                Some(Err(e)) => break Err(e),
                Some(Ok(raw)) => {
                    if let Err(e) = self.process_block(&raw, &mut next_expected).await {
                        break Err(e);
                    }
                }
            }
        };

        let drained = subscription.unregister();
        if drained > 0 {
            tracing::debug!(channel = %self.channel, drained = drained, "Discarded buffered blocks");
        }
        outcome
    }

    async fn process_block(&self, raw: &[u8], next_expected: &mut u64) -> Result<()> {
        let block = BlockDecoder::decode_block(raw)?;

        if block.number < *next_expected {
            tracing::debug!(
                channel = %self.channel,
                block_number = block.number,
                "Skipping already indexed block"
            );
            return Ok(());
        }
        if block.number > *next_expected {
            tracing::warn!(
                channel = %self.channel,
                expected = *next_expected,
                block_number = block.number,
                "Gap in block stream"
            );
        }

        self.storage
            .insert_block(&self.channel, block.number, &block.txs)
            .await?;
        *next_expected = block.number + 1;

        logging::log_block(&self.channel, block.number, block.txs.len());
        Ok(())
    }
}
