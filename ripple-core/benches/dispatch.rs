//! Benchmarks for ripple-core dispatch
//!
//! Run with: cargo bench

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ripple_core::reactive::{Handler, UpdateCoalescer, UpdateEmitter};
use ripple_core::schedule::TaskQueue;
use ripple_core::store::{Collection, SetIndex};
use serde_json::{json, Value};

fn subscribed_emitter(keys: usize) -> (Collection<Value>, TaskQueue, UpdateEmitter, Arc<AtomicUsize>) {
    let users = Collection::<Value>::new();
    let queue = TaskQueue::new();
    let emitter = UpdateEmitter::new(UpdateCoalescer::new(&users), queue.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    for key in 0..keys {
        let calls = calls.clone();
        let handler = Handler::new(move || {
            calls.fetch_add(1, Ordering::Relaxed);
        });
        emitter.subscribe_on_key(key as i64, &handler);
    }

    (users, queue, emitter, calls)
}

// =============================================================================
// DISPATCH BENCHMARKS
// =============================================================================

/// Few changed keys against a large table: walks the updated keys.
fn bench_dispatch_sparse_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_sparse");

    for subscribed in [100usize, 1_000, 10_000] {
        group.bench_with_input(
            BenchmarkId::new("subscribed", subscribed),
            &subscribed,
            |b, &subscribed| {
                let (users, queue, _emitter, calls) = subscribed_emitter(subscribed);
                b.iter(|| {
                    for id in 0..4i64 {
                        users.upsert_one(json!({"id": id})).ok();
                    }
                    black_box(queue.flush());
                });
                black_box(calls.load(Ordering::Relaxed));
            },
        );
    }

    group.finish();
}

/// Most of the table changes at once: walks the subscription table.
fn bench_dispatch_dense_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_dense");

    for subscribed in [100usize, 1_000] {
        group.bench_with_input(
            BenchmarkId::new("subscribed", subscribed),
            &subscribed,
            |b, &subscribed| {
                let (users, queue, _emitter, _calls) = subscribed_emitter(subscribed);
                let batch: Vec<Value> = (0..subscribed as i64).map(|id| json!({"id": id})).collect();
                b.iter(|| {
                    users.upsert_many(batch.clone()).ok();
                    black_box(queue.flush());
                });
            },
        );
    }

    group.finish();
}

// =============================================================================
// COALESCING BENCHMARKS
// =============================================================================

fn bench_coalesce_writes(c: &mut Criterion) {
    let index = SetIndex::new();
    let queue = TaskQueue::new();
    let emitter = UpdateEmitter::new(UpdateCoalescer::new(&index), queue.clone());
    emitter.subscribe_on_key("team", &Handler::new(|| {}));

    c.bench_function("coalesce_100_writes", |b| {
        b.iter(|| {
            for pk in 0..100i64 {
                index.add_pks("team", [black_box(pk)]);
            }
            black_box(queue.flush())
        })
    });
}

criterion_group!(
    dispatch_benches,
    bench_dispatch_sparse_updates,
    bench_dispatch_dense_updates,
);

criterion_group!(coalesce_benches, bench_coalesce_writes);

criterion_main!(dispatch_benches, coalesce_benches);
