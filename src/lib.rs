//! `fabric-indexer` - a change-data-capture indexer for permissioned ledgers.
//!
//! The indexer consumes immutable ledger blocks channel by channel, extracts
//! the state changes carried by each block's transaction envelopes and
//! read/write-sets, and mirrors them into a queryable storage backend.
//!
//! # Quick Start
//!
//! ```no_run
//! use fabric_indexer::{
//!     DirectoryLedger, IndexerConfigBuilder, Supervisor, connect_storage,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     dotenvy::dotenv().ok();
//!
//!     let config = IndexerConfigBuilder::new()
//!         .with_channels(["mychannel", "audit"])
//!         .with_database(std::env::var("DATABASE_URL")?)
//!         .build()?;
//!
//!     let storage = connect_storage(&config.storage).await?;
//!     let ledger = Arc::new(DirectoryLedger::new(
//!         "/var/ledger",
//!         config.poll_interval_ms,
//!         config.subscription_buffer,
//!     ));
//!
//!     let supervisor = Supervisor::new(config, ledger, storage);
//!     supervisor.install_ctrl_c_handler();
//!     for (channel, outcome) in supervisor.run().await {
//!         println!("{channel}: {outcome:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! 1. **`LedgerSource`** - Chain tip, single block fetch and ordered block
//!    subscriptions
//! 2. **`SyncEngine`** - One per channel: resumes from the last-synced marker
//!    and tails the subscription
//! 3. **`BlockDecoder`** - Turns a raw block into ordered `Tx` records,
//!    distinguishing configuration blocks from state-changing ones
//! 4. **`StorageBackend`** - Per-channel storage with point, range and payload
//!    key lookups, plus the denormalized last-entry pointer
//! 5. **`Supervisor`** - Runs all engines concurrently and isolates failures
//!
//! # Features
//!
//! - **Resumable**: restarts continue from the last fully indexed block
//! - **Idempotent writes**: re-inserting a record overwrites it
//! - **Multiple backends**: `PostgreSQL` via `SQLx`, or in-process memory
//! - **Config blocks**: channel configuration and updates rendered as JSON

pub use config::{IndexerConfig, IndexerConfigBuilder, RestartConfig, StorageConfig};
pub use core::decoder::{BlockDecoder, DecodedBlock};
pub use core::engine::{SyncEngine, SyncState};
pub use core::supervisor::{ChannelOutcome, Supervisor};
pub use storage::{MemoryStorage, PostgresStorage, StorageBackend, connect_storage};
pub use streams::{BlockSubscription, ChainTip, DirectoryLedger, LedgerSource, MemoryLedger};
pub use telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
pub use types::{BlockView, Payload, Tx, WriteKv, pack_txs_to_blocks};
pub use utils::error::{IndexerError, Result};

pub mod config;
pub mod core;
pub mod generator;
pub mod storage;
pub mod streams;
pub mod telemetry;
pub mod types;
pub mod utils;
