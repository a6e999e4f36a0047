mod common;

use async_trait::async_trait;
use common::eventually;
use fabric_indexer::generator::generate_chain;
use fabric_indexer::utils::error::{IndexerError, Result};
use fabric_indexer::{
    BlockSubscription, ChainTip, ChannelOutcome, IndexerConfig, IndexerConfigBuilder,
    LedgerSource, MemoryLedger, MemoryStorage, RestartConfig, StorageBackend, Supervisor, Tx,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

fn config(channels: &[&str], restart: RestartConfig) -> IndexerConfig {
    IndexerConfigBuilder::new()
        .with_channels(channels.iter().copied())
        .with_memory_storage()
        .with_restart(restart)
        .build()
        .unwrap()
}

fn fast_restarts(max_restarts: u32) -> RestartConfig {
    RestartConfig {
        max_restarts,
        initial_backoff_ms: 1,
        backoff_multiplier: 1.0,
        max_backoff_ms: 1,
        jitter: false,
    }
}

/// Ledger whose first subscriptions fail with a transient error.
struct FlakyLedger {
    inner: MemoryLedger,
    failures_left: AtomicU32,
    subscriptions: AtomicU32,
}

impl FlakyLedger {
    fn new(inner: MemoryLedger, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            subscriptions: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl LedgerSource for FlakyLedger {
    async fn query_chain_tip(&self, channel: &str) -> Result<ChainTip> {
        self.inner.query_chain_tip(channel).await
    }

    async fn fetch_block(&self, channel: &str, number: u64) -> Result<Option<Vec<u8>>> {
        self.inner.fetch_block(channel, number).await
    }

    async fn subscribe_blocks(&self, channel: &str, from: u64) -> Result<BlockSubscription> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(IndexerError::LedgerError("peer unavailable".into()));
        }
        self.inner.subscribe_blocks(channel, from).await
    }

    fn source_name(&self) -> &str {
        "flaky"
    }
}

/// Storage that refuses to initialize one channel.
struct BrokenInitStorage {
    inner: MemoryStorage,
    broken: &'static str,
}

#[async_trait]
impl StorageBackend for BrokenInitStorage {
    async fn init(&self, channel: &str) -> Result<()> {
        if channel == self.broken {
            return Err(IndexerError::StorageError("schema creation refused".into()));
        }
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

    fn name(&self) -> &'static str {
        "broken-init"
    }
}

#[tokio::test]
async fn test_failing_channel_does_not_affect_siblings() {
    let ledger = Arc::new(MemoryLedger::new(4));
    ledger.append("good", generate_chain("good", 3)).await;
    ledger.close_channel("good").await;

    ledger.append("bad", generate_chain("bad", 2)).await;

    let storage = Arc::new(MemoryStorage::new());
    let supervisor = Supervisor::new(
        config(&["bad", "good"], RestartConfig::default()),
        ledger.clone(),
        storage.clone(),
    );
    let cancel = supervisor.cancellation_token();

    let run = tokio::spawn(async move { supervisor.run().await });

    // the bad channel breaks only once it is tailing
    eventually(|| {
        let storage = storage.clone();
        async move { storage.get_last_entry("bad").await.ok().flatten().is_some() }
    })
    .await;
    ledger.append("bad", [vec![0x0A, 0x05, 0x08]]).await;

    eventually(|| {
        let storage = storage.clone();
        async move {
            storage
                .get_last_entry("good")
                .await
                .ok()
                .flatten()
                .is_some_and(|tx| tx.block_number == 2)
        }
    })
    .await;

    let outcomes = run.await.unwrap();
    assert!(!cancel.is_cancelled());
    assert_eq!(outcomes["good"], ChannelOutcome::Stopped);
    assert!(matches!(&outcomes["bad"], ChannelOutcome::Failed(msg) if msg.contains("Decoding error")));
    assert_eq!(storage.query_all("good").await.unwrap().len(), 3);
    assert_eq!(storage.get_last_entry("bad").await.unwrap().unwrap().block_number, 1);
}

#[tokio::test]
async fn test_shutdown_waits_for_every_worker() {
    let ledger = Arc::new(MemoryLedger::new(4));
    ledger.append("alpha", generate_chain("alpha", 2)).await;
    ledger.append("beta", generate_chain("beta", 3)).await;

    let storage = Arc::new(MemoryStorage::new());
    let supervisor = Arc::new(Supervisor::new(
        config(&["alpha", "beta"], RestartConfig::default()),
        ledger,
        storage.clone(),
    ));
    let run = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    eventually(|| {
        let storage = storage.clone();
        async move {
            let alpha = storage.get_last_entry("alpha").await.ok().flatten();
            let beta = storage.get_last_entry("beta").await.ok().flatten();
            alpha.is_some_and(|tx| tx.block_number == 1)
                && beta.is_some_and(|tx| tx.block_number == 2)
        }
    })
    .await;

    supervisor.shutdown();
    let outcomes = run.await.unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.values().all(|o| *o == ChannelOutcome::Stopped));
}

#[tokio::test]
async fn test_storage_init_failure_is_reported_per_channel() {
    let ledger = Arc::new(MemoryLedger::new(4));
    for channel in ["broken", "fine"] {
        ledger.append(channel, generate_chain(channel, 2)).await;
        ledger.close_channel(channel).await;
    }
    let storage = Arc::new(BrokenInitStorage {
        inner: MemoryStorage::new(),
        broken: "broken",
    });

    let supervisor = Supervisor::new(
        config(&["broken", "fine"], RestartConfig::default()),
        ledger,
        storage.clone(),
    );
    let outcomes = supervisor.run().await;

    assert!(
        matches!(&outcomes["broken"], ChannelOutcome::Failed(msg) if msg.contains("schema creation refused"))
    );
    assert_eq!(outcomes["fine"], ChannelOutcome::Stopped);
    assert_eq!(storage.query_all("fine").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_transient_failures_are_restarted() {
    let inner = MemoryLedger::new(4);
    inner.append("mychannel", generate_chain("mychannel", 3)).await;
    inner.close_channel("mychannel").await;
    let ledger = Arc::new(FlakyLedger::new(inner, 2));
    let storage = Arc::new(MemoryStorage::new());

    let supervisor = Supervisor::new(
        config(&["mychannel"], fast_restarts(3)),
        ledger.clone(),
        storage.clone(),
    );
    let outcomes = supervisor.run().await;

    assert_eq!(outcomes["mychannel"], ChannelOutcome::Stopped);
    assert_eq!(ledger.subscriptions.load(Ordering::SeqCst), 3);
    assert_eq!(storage.query_all("mychannel").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_restart_budget_exhaustion() {
    let inner = MemoryLedger::new(4);
    inner.append("mychannel", generate_chain("mychannel", 1)).await;
    let ledger = Arc::new(FlakyLedger::new(inner, 10));

    let supervisor = Supervisor::new(
        config(&["mychannel"], fast_restarts(2)),
        ledger.clone(),
        Arc::new(MemoryStorage::new()),
    );
    let outcomes = supervisor.run().await;

    assert!(matches!(
        &outcomes["mychannel"],
        ChannelOutcome::Failed(msg) if msg.contains("Retry exhausted after 3 attempts")
    ));
    assert_eq!(ledger.subscriptions.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_permanent_failures_are_not_restarted() {
    let inner = MemoryLedger::new(4);
    inner.append("mychannel", [vec![0xFF; 4]]).await;
    let ledger = Arc::new(FlakyLedger::new(inner, 0));

    let supervisor = Supervisor::new(
        config(&["mychannel"], fast_restarts(5)),
        ledger.clone(),
        Arc::new(MemoryStorage::new()),
    );
    let outcomes = supervisor.run().await;

    assert!(matches!(&outcomes["mychannel"], ChannelOutcome::Failed(_)));
    // the malformed tip fails before any subscription
    assert_eq!(ledger.subscriptions.load(Ordering::SeqCst), 0);
}
