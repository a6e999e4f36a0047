//! In-process, document-store style backend.
//!
//! Each channel is a collection of records plus a natural-key index and the
//! last-entry pointer. Nothing survives the process.

use super::StorageBackend;
use crate::types::Tx;
use crate::utils::error::{IndexerError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

type NaturalKey = (u64, String, String);

#[derive(Debug, Default)]
struct Collection {
    txs: Vec<Tx>,
    index: HashMap<NaturalKey, usize>,
    last: Option<NaturalKey>,
}

impl Collection {
    fn filtered(&self, predicate: impl Fn(&Tx) -> bool) -> Vec<Tx> {
        self.txs.iter().filter(|tx| predicate(tx)).cloned().collect()
    }

    fn last_block_number(&self) -> Option<u64> {
        self.last.as_ref().map(|(block_number, _, _)| *block_number)
    }
}

/// Memory-backed storage.
///
/// # Example
///
/// ```
/// use fabric_indexer::{MemoryStorage, StorageBackend};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = MemoryStorage::new();
/// storage.init("mychannel").await?;
/// assert!(storage.get_last_entry("mychannel").await?.is_none());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    channels: RwLock<HashMap<String, Collection>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn read<T>(&self, channel: &str, f: impl FnOnce(&Collection) -> T) -> Result<T> {
        let channels = self.channels.read().await;
        let collection = channels.get(channel).ok_or_else(|| not_initialized(channel))?;
        Ok(f(collection))
    }
}

fn not_initialized(channel: &str) -> IndexerError {
    IndexerError::StorageError(format!("channel '{channel}' is not initialized"))
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn init(&self, channel: &str) -> Result<()> {
        self.channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default();
        Ok(())
    }

    async fn insert(&self, channel: &str, tx: &Tx) -> Result<()> {
        let mut channels = self.channels.write().await;
        let collection = channels
            .get_mut(channel)
            .ok_or_else(|| not_initialized(channel))?;

        let key = tx.natural_key();
        match collection.index.get(&key) {
            Some(&position) => collection.txs[position] = tx.clone(),
            None => {
                collection.index.insert(key, collection.txs.len());
                collection.txs.push(tx.clone());
            }
        }
        Ok(())
    }

    async fn get_by_tx_id(&self, channel: &str, tx_id: &str) -> Result<Vec<Tx>> {
        self.read(channel, |c| c.filtered(|tx| tx.tx_id == tx_id))
            .await
    }

    async fn get_by_block_number(&self, channel: &str, block_number: u64) -> Result<Vec<Tx>> {
        self.read(channel, |c| c.filtered(|tx| tx.block_number == block_number))
            .await
    }

    async fn get_by_payload_substring(&self, channel: &str, needle: &str) -> Result<Vec<Tx>> {
        self.read(channel, |c| {
            c.filtered(|tx| tx.payload.matches_key_substring(needle))
        })
        .await
    }

    async fn query_block_by_hash(&self, channel: &str, block_hash: &str) -> Result<Vec<Tx>> {
        self.read(channel, |c| c.filtered(|tx| tx.block_hash == block_hash))
            .await
    }

    async fn query_all(&self, channel: &str) -> Result<Vec<Tx>> {
        self.read(channel, |c| c.txs.clone()).await
    }

    async fn get_last_entry(&self, channel: &str) -> Result<Option<Tx>> {
        self.read(channel, |c| {
            c.last
                .as_ref()
                .and_then(|key| c.index.get(key))
                .map(|&position| c.txs[position].clone())
        })
        .await
    }

    async fn update_last_entry(&self, channel: &str, tx: &Tx) -> Result<()> {
        let mut channels = self.channels.write().await;
        let collection = channels
            .get_mut(channel)
            .ok_or_else(|| not_initialized(channel))?;

        let key = tx.natural_key();
        if !collection.index.contains_key(&key) {
            return Err(IndexerError::StorageError(format!(
                "cannot point last entry of '{channel}' at record {} that was never inserted",
                tx.tx_id
            )));
        }
        if collection
            .last_block_number()
            .is_some_and(|current| current > tx.block_number)
        {
            return Ok(());
        }
        collection.last = Some(key);
        Ok(())
    }

    async fn get_block_range(&self, channel: &str, from: u64, to: u64) -> Result<Vec<Tx>> {
        self.read(channel, |c| {
            let mut txs = c.filtered(|tx| (from..=to).contains(&tx.block_number));
            txs.sort_by_key(|tx| tx.block_number);
            txs
        })
        .await
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
