//! Ledger sources the sync engine reads blocks from.
//!
//! A [`LedgerSource`] answers chain-tip queries, fetches single blocks and
//! opens ordered block subscriptions. Subscriptions are delivered through a
//! [`BlockSubscription`], which the engine unregisters on shutdown.

use crate::core::proto::BlockHeader;
use crate::utils::error::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod directory;
pub mod memory;

pub use directory::DirectoryLedger;
pub use memory::MemoryLedger;

/// Current state of a channel's chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainTip {
    /// Hex-encoded data hash of the highest block.
    pub current_block_hash: String,
    /// Hex-encoded previous hash of the highest block.
    pub previous_block_hash: String,
    /// Number of blocks in the chain.
    pub height: u64,
}

impl ChainTip {
    /// Tip of a chain of `height` blocks whose last block has `header`.
    #[must_use]
    pub fn from_header(height: u64, header: &BlockHeader) -> Self {
        Self {
            current_block_hash: hex::encode(&header.data_hash),
            previous_block_hash: hex::encode(&header.previous_hash),
            height,
        }
    }
}

/// Unified interface for ledger block sources.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    async fn query_chain_tip(&self, channel: &str) -> Result<ChainTip>;

    /// Returns the raw block `number`, or `None` if the ledger does not have
    /// it yet.
    async fn fetch_block(&self, channel: &str, number: u64) -> Result<Option<Vec<u8>>>;

    /// Opens a subscription delivering raw blocks in order, starting at
    /// `from` (inclusive), one notification per block.
    async fn subscribe_blocks(&self, channel: &str, from: u64) -> Result<BlockSubscription>;

    /// Get a human-readable name for this source (for logging)
    fn source_name(&self) -> &str;
}

/// Sending half handed to a source's producer task.
pub type BlockSender = mpsc::Sender<Result<Vec<u8>>>;

/// A live, ordered stream of raw blocks.
///
/// `next` yields `None` once the source closed the stream.
#[derive(Debug)]
pub struct BlockSubscription {
    receiver: mpsc::Receiver<Result<Vec<u8>>>,
    registration: CancellationToken,
}

impl BlockSubscription {
    /// Creates a subscription with room for `buffer` undelivered blocks.
    ///
    /// The producer must stop once the returned token is cancelled.
    #[must_use]
    pub fn channel(buffer: usize) -> (BlockSender, CancellationToken, Self) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let registration = CancellationToken::new();
        let subscription = Self {
            receiver,
            registration: registration.clone(),
        };
        (sender, registration, subscription)
    }

    /// Waits for the next block notification.
    pub async fn next(&mut self) -> Option<Result<Vec<u8>>> {
        self.receiver.recv().await
    }

    /// Unregisters from the source and discards buffered notifications
    /// without processing them. Returns how many were discarded.
    pub fn unregister(mut self) -> usize {
        self.registration.cancel();
        self.receiver.close();

        let mut drained = 0;
        while self.receiver.try_recv().is_ok() {
            drained += 1;
        }
        drained
    }
}

impl Drop for BlockSubscription {
    fn drop(&mut self) {
        self.registration.cancel();
    }
}

/// Sends `item` unless the subscription is unregistered first. Returns
/// `false` when the producer should stop.
pub(crate) async fn deliver(
    sender: &BlockSender,
    registration: &CancellationToken,
    item: Result<Vec<u8>>,
) -> bool {
    tokio::select! {
        () = registration.cancelled() => false,
        sent = sender.send(item) => sent.is_ok(),
    }
}
