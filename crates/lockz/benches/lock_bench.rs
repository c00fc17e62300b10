// Benchmarks for the lock protocol
// Measures record encoding and an uncontended lock/unlock cycle on the memory store

use chrono::TimeDelta;
use criterion::{Criterion, criterion_group, criterion_main};
use lockz::{BasicOptions, LockRecord, Locker, LockerOptions, MemoryStore};
use std::hint::black_box;

fn bench_record_encode(c: &mut Criterion) {
    let record = LockRecord::new("0f9d2c3e-6a1b-4c8d-9e7f-2b3a4c5d6e7f");

    c.bench_function("record_encode", |b| {
        b.iter(|| black_box(&record).encode())
    });
}

fn bench_record_decode(c: &mut Criterion) {
    let bytes = LockRecord::new("0f9d2c3e-6a1b-4c8d-9e7f-2b3a4c5d6e7f")
        .encode()
        .unwrap();

    c.bench_function("record_decode", |b| {
        b.iter(|| LockRecord::decode(black_box(&bytes)))
    });
}

fn bench_lock_unlock_cycle(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let locker = runtime.block_on(async {
        let opts = LockerOptions::new()
            .with_basic(
                BasicOptions::new()
                    .with_session_ttl(TimeDelta::zero())
                    .with_extend_limit(10),
            )
            .with_memory(MemoryStore::new());
        Locker::new(opts).unwrap()
    });

    let locker = &locker;
    c.bench_function("lock_unlock_uncontended", |b| {
        b.to_async(&runtime).iter(move || async move {
            let acquired = locker.lock(black_box("bench/key")).await.unwrap();
            assert!(acquired);
            locker.unlock("bench/key").await.unwrap();
        })
    });
}

criterion_group!(
    benches,
    bench_record_encode,
    bench_record_decode,
    bench_lock_unlock_cycle
);
criterion_main!(benches);
