#![allow(dead_code)]

use async_trait::async_trait;
use fabric_indexer::utils::error::Result;
use fabric_indexer::{MemoryStorage, StorageBackend, Tx};
use std::sync::Mutex;
use std::time::Duration;

/// Memory storage that records which blocks were written through
/// `insert_block`.
#[derive(Default)]
pub struct RecordingStorage {
    pub inner: MemoryStorage,
    pub written_blocks: Mutex<Vec<u64>>,
}

impl RecordingStorage {
    pub fn written(&self) -> Vec<u64> {
        self.written_blocks.lock().unwrap().clone()
    }
}

#[async_trait]
impl StorageBackend for RecordingStorage {
    async fn init(&self, channel: &str) -> Result<()> {
        self.inner.init(channel).await
    }

    async fn insert(&self, channel: &str, tx: &Tx) -> Result<()> {
        self.inner.insert(channel, tx).await
    }

    async fn get_by_tx_id(&self, channel: &str, tx_id: &str) -> Result<Vec<Tx>> {
        self.inner.get_by_tx_id(channel, tx_id).await
    }

    async fn get_by_block_number(&self, channel: &str, block_number: u64) -> Result<Vec<Tx>> {
        self.inner.get_by_block_number(channel, block_number).await
    }

    async fn get_by_payload_substring(&self, channel: &str, needle: &str) -> Result<Vec<Tx>> {
        self.inner.get_by_payload_substring(channel, needle).await
    }

    async fn query_block_by_hash(&self, channel: &str, block_hash: &str) -> Result<Vec<Tx>> {
        self.inner.query_block_by_hash(channel, block_hash).await
    }

    async fn query_all(&self, channel: &str) -> Result<Vec<Tx>> {
        self.inner.query_all(channel).await
    }

    async fn get_last_entry(&self, channel: &str) -> Result<Option<Tx>> {
        self.inner.get_last_entry(channel).await
    }

    async fn update_last_entry(&self, channel: &str, tx: &Tx) -> Result<()> {
        self.inner.update_last_entry(channel, tx).await
    }

    async fn insert_block(&self, channel: &str, block_number: u64, txs: &[Tx]) -> Result<()> {
        self.written_blocks.lock().unwrap().push(block_number);
        self.inner.insert_block(channel, block_number, txs).await
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Polls `check` until it returns true, panicking after five seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
