use criterion::{Criterion, criterion_group, criterion_main};
use fabric_indexer::generator::generate_chain;
use fabric_indexer::{
    BlockDecoder, DecodedBlock, MemoryStorage, PostgresStorage, StorageBackend,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

const CHANNEL: &str = "benchchannel";

async fn setup_postgres() -> Option<Arc<dyn StorageBackend>> {
    let _ = dotenvy::dotenv();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let storage = PostgresStorage::with_options(&database_url, 5, "fabric_indexer_bench")
        .await
        .expect("Failed to connect");
    storage.init(CHANNEL).await.expect("Failed to initialize");
    Some(Arc::new(storage))
}

fn decoded_chain(count: u64) -> Vec<DecodedBlock> {
    generate_chain(CHANNEL, count)
        .iter()
        .map(|raw| BlockDecoder::decode_block(raw).unwrap())
        .collect()
}

fn bench_backend(c: &mut Criterion, rt: &Runtime, name: &str, storage: Arc<dyn StorageBackend>) {
    let blocks = decoded_chain(256);
    let mut group = c.benchmark_group(format!("storage/{name}"));

    group.bench_function("insert_block", |b| {
        b.to_async(rt).iter_custom(|iters| {
            let storage = storage.clone();
            let blocks = blocks.clone();
            async move {
                let start = std::time::Instant::now();
                for i in 0..iters {
                    let block = &blocks[(i % blocks.len() as u64) as usize];
                    storage
                        .insert_block(CHANNEL, block.number, &block.txs)
                        .await
                        .unwrap();
                }
                start.elapsed()
            }
        })
    });

    group.bench_function("get_last_entry", |b| {
        b.to_async(rt).iter(|| async {
            storage.get_last_entry(CHANNEL).await.unwrap();
        })
    });

    group.bench_function("get_by_payload_substring", |b| {
        b.to_async(rt).iter(|| async {
            storage.get_by_payload_substring(CHANNEL, "key12").await.unwrap();
        })
    });

    group.finish();
}

fn storage_benchmark(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let memory: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
    rt.block_on(memory.init(CHANNEL)).unwrap();
    bench_backend(c, &rt, "memory", memory);

    match rt.block_on(setup_postgres()) {
        Some(postgres) => bench_backend(c, &rt, "postgres", postgres),
        None => eprintln!("DATABASE_URL not set, skipping postgres benchmarks"),
    }
}

criterion_group!(benches, storage_benchmark);
criterion_main!(benches);
