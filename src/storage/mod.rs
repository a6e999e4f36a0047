//! Storage contract and backends.
//!
//! Every operation is scoped by channel: each channel owns a disjoint
//! storage unit, created by [`StorageBackend::init`]. Reads never report
//! "not found" as an error; they return `None` or an empty `Vec`.
//!
//! The last-synced marker is a denormalized single-row-per-channel pointer,
//! upserted after the records of a block are inserted, so the resume point
//! is read without aggregating over the records table.

pub mod memory;
pub mod postgres;

use crate::config::StorageConfig;
use crate::types::Tx;
use crate::utils::error::{IndexerError, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::MemoryStorage;
pub use postgres::PostgresStorage;

/// Abstract interface for storage operations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Creates the channel's storage unit and its secondary indexes.
    /// Idempotent.
    async fn init(&self, channel: &str) -> Result<()>;

    /// Inserts one record. Re-inserting the same
    /// `(block_number, tx_id, namespace)` overwrites the stored record.
    async fn insert(&self, channel: &str, tx: &Tx) -> Result<()>;

    async fn get_by_tx_id(&self, channel: &str, tx_id: &str) -> Result<Vec<Tx>>;

    async fn get_by_block_number(&self, channel: &str, block_number: u64) -> Result<Vec<Tx>>;

    /// Records with at least one payload key containing `needle`.
    ///
    /// Matching runs over the index form of the keys (composite keys become
    /// `objectType:attr1:...`).
    async fn get_by_payload_substring(&self, channel: &str, needle: &str) -> Result<Vec<Tx>>;

    async fn query_block_by_hash(&self, channel: &str, block_hash: &str) -> Result<Vec<Tx>>;

    async fn query_all(&self, channel: &str) -> Result<Vec<Tx>>;

    /// The record the last-synced marker points at, or `None` if the channel
    /// was never synced.
    async fn get_last_entry(&self, channel: &str) -> Result<Option<Tx>>;

    /// Moves the last-synced marker to `tx`, which must already be stored.
    /// The marker never moves to a lower block number.
    async fn update_last_entry(&self, channel: &str, tx: &Tx) -> Result<()>;

    /// Writes all records of one block, then advances the marker to the last
    /// of them. A block without records leaves the marker untouched.
    async fn insert_block(&self, channel: &str, block_number: u64, txs: &[Tx]) -> Result<()> {
        check_block_records(block_number, txs)?;
        for tx in txs {
            self.insert(channel, tx).await?;
        }
        if let Some(last) = txs.last() {
            self.update_last_entry(channel, last).await?;
        }
        Ok(())
    }

    /// Records of blocks `from..=to`, by block number.
    async fn get_block_range(&self, channel: &str, from: u64, to: u64) -> Result<Vec<Tx>> {
        let mut out = Vec::new();
        for block_number in from..=to {
            out.extend(self.get_by_block_number(channel, block_number).await?);
        }
        Ok(out)
    }

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Rejects records that do not belong to block `block_number`.
pub(crate) fn check_block_records(block_number: u64, txs: &[Tx]) -> Result<()> {
    match txs.iter().find(|tx| tx.block_number != block_number) {
        Some(tx) => Err(IndexerError::StorageError(format!(
            "record {} belongs to block {}, not {block_number}",
            tx.tx_id, tx.block_number
        ))),
        None => Ok(()),
    }
}

/// Builds the backend selected by `config`.
///
/// # Errors
///
/// Returns `IndexerError::ConnectionError` if the `PostgreSQL` server is
/// unreachable and `IndexerError::DatabaseError` for other connect failures.
pub async fn connect_storage(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::Postgres {
            database_url,
            max_connections,
            table_prefix,
        } => {
            let storage =
                PostgresStorage::with_options(database_url, *max_connections, table_prefix)
                    .await?;
            Ok(Arc::new(storage))
        }
        StorageConfig::Memory => Ok(Arc::new(MemoryStorage::new())),
    }
}
