//! Channel round-trip benchmarks.

use criterion::{criterion_group, criterion_main, Criterion};
use prefork_ipc::{FifoChannel, Priority, PriorityHeap};
use std::hint::black_box;

/// Benchmark FIFO enqueue/dequeue pairs.
fn bench_fifo_roundtrip(c: &mut Criterion) {
    let name = format!("/pfk_bench_fifo_{}", std::process::id());
    let chan = FifoChannel::<u64>::create(&name, 1024).unwrap();

    c.bench_function("fifo_enqueue_dequeue", |b| {
        b.iter(|| {
            chan.enqueue(black_box(42)).unwrap();
            black_box(chan.dequeue().unwrap());
        });
    });

    chan.unlink().unwrap();
}

/// Benchmark heap round-trips at different fill levels.
fn bench_heap_roundtrip(c: &mut Criterion) {
    let name = format!("/pfk_bench_heap_{}", std::process::id());
    let heap = PriorityHeap::<u64>::create(&name, 1024).unwrap();

    c.bench_function("heap_enqueue_dequeue_empty", |b| {
        b.iter(|| {
            heap.enqueue(black_box(7), Priority::Normal).unwrap();
            black_box(heap.dequeue().unwrap());
        });
    });

    // Pre-fill so every operation sifts through a populated heap.
    for i in 0..512u64 {
        let priority = match i % 4 {
            0 => Priority::Low,
            1 => Priority::Normal,
            2 => Priority::High,
            _ => Priority::Urgent,
        };
        heap.enqueue(i, priority).unwrap();
    }

    c.bench_function("heap_enqueue_dequeue_filled", |b| {
        b.iter(|| {
            heap.enqueue(black_box(7), Priority::Normal).unwrap();
            black_box(heap.dequeue().unwrap());
        });
    });

    heap.unlink().unwrap();
}

criterion_group!(benches, bench_fifo_roundtrip, bench_heap_roundtrip);
criterion_main!(benches);
