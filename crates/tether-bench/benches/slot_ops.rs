//! Criterion micro-benchmarks for the slot and handle tables.

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use tether_core::{HostObject, NativeRef, ObjectId, ValueKind};
use tether_slots::{HandleTable, SlotTable};

const N: usize = 10_000;

/// Benchmark: Insert 10K values into an empty slot table.
fn bench_slot_insert_10k(c: &mut Criterion) {
    c.bench_function("slot_insert_10k", |b| {
        b.iter(|| {
            let mut table: SlotTable<ObjectId, u64> = SlotTable::with_capacity(N);
            for i in 0..N as u64 {
                black_box(table.insert(i));
            }
            table
        });
    });
}

/// Benchmark: Look up every id in a 10K slot table.
fn bench_slot_get_10k(c: &mut Criterion) {
    let mut table: SlotTable<ObjectId, u64> = SlotTable::with_capacity(N);
    let ids: Vec<ObjectId> = (0..N as u64).map(|i| table.insert(i)).collect();

    c.bench_function("slot_get_10k", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for id in &ids {
                sum += table.get(*id).copied().unwrap_or(0);
            }
            black_box(sum)
        });
    });
}

/// Benchmark: Remove then reinsert 10K values, exercising free-list reuse.
fn bench_slot_churn_10k(c: &mut Criterion) {
    c.bench_function("slot_churn_10k", |b| {
        b.iter_batched(
            || {
                let mut table: SlotTable<ObjectId, u64> = SlotTable::with_capacity(N);
                let ids: Vec<ObjectId> = (0..N as u64).map(|i| table.insert(i)).collect();
                (table, ids)
            },
            |(mut table, ids)| {
                for id in ids {
                    black_box(table.remove(id));
                }
                for i in 0..N as u64 {
                    black_box(table.insert(i));
                }
                table
            },
            BatchSize::LargeInput,
        );
    });
}

/// Benchmark: One inc/dec pair on each of 10K handles.
fn bench_handle_inc_dec_10k(c: &mut Criterion) {
    let mut table: HandleTable<dyn HostObject> = HandleTable::with_capacity(N);
    let ids: Vec<_> = (0..N as u64)
        .filter_map(|i| table.allocate(NativeRef(i), ValueKind::Object).ok())
        .collect();

    c.bench_function("handle_inc_dec_10k", |b| {
        b.iter(|| {
            for id in &ids {
                if let Some(slot) = table.get_mut(*id) {
                    let _ = black_box(slot.counted.inc());
                    let _ = black_box(slot.counted.dec());
                }
            }
        });
    });
}

criterion_group!(
    benches,
    bench_slot_insert_10k,
    bench_slot_get_10k,
    bench_slot_churn_10k,
    bench_handle_inc_dec_10k
);
criterion_main!(benches);
