//! # Courier-MQ Paging Benchmarks
//!
//! | Area | Measured |
//! |------|----------|
//! | mq-01 Paging | send to a paging address, drain, reclaim |
//! | mq-01 Paging | resident send and ack below the limit |
//! | mq-02 Large Message | body segmentation and reassembly |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mq_01_paging::{
    AddressFullPolicy, AddressSettings, AddressSettingsRepository, InMemoryPagingStoreFactory,
    PagingApi, PagingConfig, PagingManager, SendContext,
};
use mq_02_large_message::{
    BufferProgress, ChunkFrame, ChunkSplitter, LargeMessageBuffer, LargeMessageHeader,
};
use rand::RngCore;
use shared_types::{Address, Message, QueueName};
use std::io::Cursor;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn manager(max_size: i64) -> Arc<PagingManager> {
    let settings = AddressSettings::new()
        .with_max_size(max_size)
        .with_page_size(1024 * 1024)
        .with_policy(AddressFullPolicy::Page);
    let manager = PagingManager::new(
        PagingConfig::default(),
        Arc::new(InMemoryPagingStoreFactory::new()),
        Arc::new(AddressSettingsRepository::new(settings)),
    )
    .unwrap();
    manager.start().unwrap();
    Arc::new(manager)
}

async fn send_and_drain(manager: &PagingManager, count: usize, body: &[u8]) {
    let address = Address::new("bench").unwrap();
    let sub = manager
        .bind_queue(address.clone(), QueueName::new("bench.q").unwrap())
        .unwrap();
    let ctx = SendContext::detached();
    for _ in 0..count {
        let message = Message::new(manager.next_message_id(), address.clone(), body.to_vec());
        manager.send(message, &ctx).await.unwrap();
    }
    while let Some(delivery) = sub.next_deliverable().unwrap() {
        sub.acknowledge(delivery.id).unwrap();
    }
    black_box(manager.reclaim_all().unwrap());
}

// ============================================================================
// MQ-01: Paging
// ============================================================================

fn bench_paging(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("mq-01-paging");

    for body_size in [256usize, 4096] {
        let body = vec![0xAB; body_size];
        let count = 1000;
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("paged_send_drain", body_size), &body, |b, body| {
            b.to_async(&rt)
                .iter(|| async move { send_and_drain(&manager(0), count, body).await })
        });
        group.bench_with_input(BenchmarkId::new("resident_send_drain", body_size), &body, |b, body| {
            b.to_async(&rt)
                .iter(|| async move { send_and_drain(&manager(-1), count, body).await })
        });
    }

    group.finish();
}

// ============================================================================
// MQ-02: Large Message
// ============================================================================

fn bench_chunking(c: &mut Criterion) {
    let mut group = c.benchmark_group("mq-02-large-message");
    let mut body = vec![0u8; 4 * 1024 * 1024];
    rand::thread_rng().fill_bytes(&mut body);
    group.throughput(Throughput::Bytes(body.len() as u64));

    for chunk_size in [4 * 1024usize, 100 * 1024, 1024 * 1024] {
        group.bench_with_input(BenchmarkId::new("split", chunk_size), &chunk_size, |b, &size| {
            b.iter(|| {
                let frames = ChunkSplitter::new(Cursor::new(body.as_slice()), size).count();
                black_box(frames)
            })
        });

        group.bench_with_input(BenchmarkId::new("reassemble", chunk_size), &chunk_size, |b, &size| {
            b.iter(|| {
                let mut buffer = LargeMessageBuffer::in_memory(body.len());
                let header = LargeMessageHeader::new(Address::new("bench").unwrap());
                buffer.apply(ChunkFrame::Begin { header }).unwrap();
                for frame in ChunkSplitter::new(Cursor::new(body.as_slice()), size) {
                    if buffer.apply(frame.unwrap()).unwrap() == BufferProgress::Complete {
                        break;
                    }
                }
                black_box(buffer.into_body().unwrap().len())
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_paging, bench_chunking);
criterion_main!(benches);
