mod common;

use common::{RecordingStorage, eventually};
use fabric_indexer::generator::generate_chain;
use fabric_indexer::{
    BlockDecoder, IndexerError, MemoryLedger, MemoryStorage, StorageBackend, SyncEngine,
    SyncState, Tx,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CHANNEL: &str = "mychannel";

async fn closed_ledger(blocks: &[Vec<u8>]) -> Arc<MemoryLedger> {
    let ledger = Arc::new(MemoryLedger::new(4));
    ledger.append(CHANNEL, blocks.to_vec()).await;
    ledger.close_channel(CHANNEL).await;
    ledger
}

fn decode_all(blocks: &[Vec<u8>]) -> Vec<Tx> {
    blocks
        .iter()
        .flat_map(|raw| BlockDecoder::decode(raw).unwrap())
        .collect()
}

#[tokio::test]
async fn test_resume_indexes_only_missing_blocks() {
    let chain = generate_chain(CHANNEL, 8);
    let storage = Arc::new(RecordingStorage::default());
    storage.init(CHANNEL).await.unwrap();

    // first run sees blocks 0..=4
    let first = SyncEngine::new(
        CHANNEL,
        closed_ledger(&chain[..5]).await,
        storage.clone(),
        CancellationToken::new(),
    );
    first.run().await.unwrap();
    assert_eq!(storage.get_last_entry(CHANNEL).await.unwrap().unwrap().block_number, 4);

    // second run sees the full chain
    let second = SyncEngine::new(
        CHANNEL,
        closed_ledger(&chain).await,
        storage.clone(),
        CancellationToken::new(),
    );
    second.run().await.unwrap();

    assert_eq!(storage.written(), (0..8).collect::<Vec<u64>>());
    assert_eq!(storage.query_all(CHANNEL).await.unwrap(), decode_all(&chain));
    assert_eq!(storage.get_last_entry(CHANNEL).await.unwrap().unwrap().block_number, 7);
}

#[tokio::test]
async fn test_restart_after_crash_before_marker() {
    let chain = generate_chain(CHANNEL, 6);

    let clean = Arc::new(MemoryStorage::new());
    clean.init(CHANNEL).await.unwrap();
    SyncEngine::new(CHANNEL, closed_ledger(&chain).await, clean.clone(), CancellationToken::new())
        .run()
        .await
        .unwrap();

    let crashed = Arc::new(MemoryStorage::new());
    crashed.init(CHANNEL).await.unwrap();
    SyncEngine::new(
        CHANNEL,
        closed_ledger(&chain[..4]).await,
        crashed.clone(),
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    // block 4 records land, the marker upsert never happens
    for tx in BlockDecoder::decode(&chain[4]).unwrap() {
        crashed.insert(CHANNEL, &tx).await.unwrap();
    }
    assert_eq!(crashed.get_last_entry(CHANNEL).await.unwrap().unwrap().block_number, 3);

    let restarted = SyncEngine::new(
        CHANNEL,
        closed_ledger(&chain).await,
        crashed.clone(),
        CancellationToken::new(),
    );
    assert_eq!(restarted.resume_point().await.unwrap(), 4);
    restarted.run().await.unwrap();

    assert_eq!(
        crashed.query_all(CHANNEL).await.unwrap(),
        clean.query_all(CHANNEL).await.unwrap()
    );
    assert_eq!(
        crashed.get_last_entry(CHANNEL).await.unwrap(),
        clean.get_last_entry(CHANNEL).await.unwrap()
    );
}

#[tokio::test]
async fn test_synced_channel_keeps_tailing() {
    let chain = generate_chain(CHANNEL, 5);
    let ledger = Arc::new(MemoryLedger::new(4));
    ledger.append(CHANNEL, chain[..3].to_vec()).await;

    let storage = Arc::new(MemoryStorage::new());
    storage.init(CHANNEL).await.unwrap();
    for raw in &chain[..3] {
        let block = BlockDecoder::decode_block(raw).unwrap();
        storage.insert_block(CHANNEL, block.number, &block.txs).await.unwrap();
    }

    let cancel = CancellationToken::new();
    let engine = Arc::new(SyncEngine::new(
        CHANNEL,
        ledger.clone(),
        storage.clone(),
        cancel.clone(),
    ));
    let mut state = engine.state();
    let worker = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run().await }
    });

    state.wait_for(|s| *s == SyncState::Tailing).await.unwrap();
    ledger.append(CHANNEL, chain[3..].to_vec()).await;

    eventually(|| {
        let storage = storage.clone();
        async move {
            storage
                .get_last_entry(CHANNEL)
                .await
                .unwrap()
                .is_some_and(|tx| tx.block_number == 4)
        }
    })
    .await;

    cancel.cancel();
    worker.await.unwrap().unwrap();
    assert_eq!(*state.borrow(), SyncState::Stopped);
    assert_eq!(storage.query_all(CHANNEL).await.unwrap(), decode_all(&chain));
}

#[tokio::test]
async fn test_cancellation_stops_idle_engine() {
    let ledger = Arc::new(MemoryLedger::new(4));
    ledger.append(CHANNEL, generate_chain(CHANNEL, 1)).await;
    let storage = Arc::new(MemoryStorage::new());
    storage.init(CHANNEL).await.unwrap();

    let cancel = CancellationToken::new();
    let engine = Arc::new(SyncEngine::new(CHANNEL, ledger, storage.clone(), cancel.clone()));
    let mut state = engine.state();
    let worker = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run().await }
    });

    state.wait_for(|s| *s == SyncState::Tailing).await.unwrap();
    eventually(|| {
        let storage = storage.clone();
        async move { storage.get_last_entry(CHANNEL).await.unwrap().is_some() }
    })
    .await;

    cancel.cancel();
    worker.await.unwrap().unwrap();
    assert_eq!(*state.borrow(), SyncState::Stopped);
}

#[tokio::test]
async fn test_malformed_chain_tip_fails_resume() {
    let mut blocks = generate_chain(CHANNEL, 3);
    blocks.push(vec![0xFF, 0xFF, 0xFF]);
    let storage = Arc::new(MemoryStorage::new());
    storage.init(CHANNEL).await.unwrap();

    let ledger = Arc::new(MemoryLedger::new(4));
    ledger.append(CHANNEL, blocks).await;
    ledger.close_channel(CHANNEL).await;

    // the chain tip is the malformed block itself
    let engine = SyncEngine::new(CHANNEL, ledger, storage.clone(), CancellationToken::new());
    let err = engine.run().await.unwrap_err();
    assert!(matches!(err, IndexerError::DecodingError(_)));
    assert!(storage.query_all(CHANNEL).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_block_midstream_keeps_marker() {
    let chain = generate_chain(CHANNEL, 3);
    let ledger = Arc::new(MemoryLedger::new(4));
    ledger.append(CHANNEL, chain.clone()).await;

    let storage = Arc::new(MemoryStorage::new());
    storage.init(CHANNEL).await.unwrap();

    let engine = Arc::new(SyncEngine::new(
        CHANNEL,
        ledger.clone(),
        storage.clone(),
        CancellationToken::new(),
    ));
    let mut state = engine.state();
    let worker = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.run().await }
    });
    state.wait_for(|s| *s == SyncState::Tailing).await.unwrap();

    ledger.append(CHANNEL, [vec![0x0A, 0x02, 0x08]]).await;
    let result = worker.await.unwrap();

    assert!(matches!(result, Err(IndexerError::DecodingError(_))));
    assert_eq!(storage.get_last_entry(CHANNEL).await.unwrap().unwrap().block_number, 2);
    assert_eq!(*state.borrow(), SyncState::Stopped);
}

#[tokio::test]
async fn test_zero_record_blocks_do_not_move_marker() {
    use fabric_indexer::generator::{BlockBuilder, EndorserTx, NsRwSet};

    let blocks = vec![
        BlockBuilder::new(CHANNEL, 0)
            .endorser(EndorserTx::new("w").namespace(NsRwSet::new("ns").write("k", vec![1])))
            .build(),
        BlockBuilder::new(CHANNEL, 1)
            .endorser(EndorserTx::new("r").namespace(NsRwSet::new("ns").read("k")))
            .build(),
    ];
    let storage = Arc::new(MemoryStorage::new());
    storage.init(CHANNEL).await.unwrap();

    SyncEngine::new(CHANNEL, closed_ledger(&blocks).await, storage.clone(), CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert_eq!(storage.query_all(CHANNEL).await.unwrap().len(), 1);
    assert_eq!(storage.get_last_entry(CHANNEL).await.unwrap().unwrap().block_number, 0);
}
