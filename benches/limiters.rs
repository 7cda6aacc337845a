//! # Limiter and Pool Benchmarks
//!
//! Run with: `cargo bench`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use workgate::{
    AtomicCounter, BatchConfig, BatchProcessor, Job, JobError, MemoryOrdering,
    PerClientRateLimiter, PoolConfig, SlidingWindow, TokenBucket, TokenBucketConfig, WorkerPool,
};

/// Single-threaded admission for each limiter.
fn bench_allow(c: &mut Criterion) {
    let mut group = c.benchmark_group("allow");
    group.throughput(Throughput::Elements(1));

    group.bench_function("token_bucket", |b| {
        let bucket = TokenBucket::new(1_000_000, Duration::from_micros(1)).unwrap();
        b.iter(|| std::hint::black_box(bucket.allow()));
    });

    group.bench_function("token_bucket_empty", |b| {
        let bucket = TokenBucket::new(1, Duration::from_secs(3600)).unwrap();
        bucket.allow();
        b.iter(|| std::hint::black_box(bucket.allow()));
    });

    group.bench_function("sliding_window", |b| {
        let window = SlidingWindow::new(1_000, Duration::from_millis(10)).unwrap();
        b.iter(|| std::hint::black_box(window.allow()));
    });

    group.finish();
}

/// Token bucket under each memory ordering.
fn bench_memory_orderings(c: &mut Criterion) {
    let mut group = c.benchmark_group("memory_orderings");

    let orderings = [
        ("Relaxed", MemoryOrdering::Relaxed),
        ("AcquireRelease", MemoryOrdering::AcquireRelease),
        ("Sequential", MemoryOrdering::Sequential),
    ];

    for (name, ordering) in orderings {
        group.bench_function(name, |b| {
            let config = TokenBucketConfig::new(1_000_000, Duration::from_micros(1))
                .with_ordering(ordering);
            let bucket = TokenBucket::with_config(config).unwrap();
            b.iter(|| std::hint::black_box(bucket.allow()));
        });
    }

    group.finish();
}

/// Contended admission on one bucket.
fn bench_concurrent_allow(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_allow");

    for num_threads in [2, 4, 8] {
        group.throughput(Throughput::Elements(num_threads as u64 * 1000));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}_threads", num_threads)),
            &num_threads,
            |b, &num_threads| {
                let bucket = Arc::new(TokenBucket::new(1_000_000, Duration::from_micros(1)).unwrap());

                b.iter_custom(|iters| {
                    let mut total = Duration::ZERO;
                    for _ in 0..iters {
                        bucket.reset();
                        let start = Instant::now();

                        let handles: Vec<_> = (0..num_threads)
                            .map(|_| {
                                let bucket = bucket.clone();
                                thread::spawn(move || {
                                    for _ in 0..1000 {
                                        bucket.allow();
                                    }
                                })
                            })
                            .collect();
                        for handle in handles {
                            handle.join().unwrap();
                        }

                        total += start.elapsed();
                    }
                    total
                });
            },
        );
    }

    group.finish();
}

/// Lookup cost of the per-client registry.
fn bench_per_client(c: &mut Criterion) {
    let mut group = c.benchmark_group("per_client");

    group.bench_function("existing_client", |b| {
        let limiter = PerClientRateLimiter::<u64>::with_rate(1_000_000, Duration::from_micros(1)).unwrap();
        limiter.allow(&7);
        b.iter(|| std::hint::black_box(limiter.allow(&7)));
    });

    group.bench_function("spread_over_1000_clients", |b| {
        let limiter = PerClientRateLimiter::<u64>::with_rate(1_000_000, Duration::from_micros(1)).unwrap();
        let mut client = 0u64;
        b.iter(|| {
            client = (client + 1) % 1000;
            std::hint::black_box(limiter.allow(&client))
        });
    });

    group.finish();
}

fn bench_atomic_counter(c: &mut Criterion) {
    let mut group = c.benchmark_group("atomic_counter");

    group.bench_function("increment", |b| {
        let counter = AtomicCounter::new(0);
        b.iter(|| std::hint::black_box(counter.increment()));
    });

    group.bench_function("update", |b| {
        let counter = AtomicCounter::new(0);
        b.iter(|| std::hint::black_box(counter.update(|v| Some(v.wrapping_add(3)))));
    });

    group.finish();
}

/// End-to-end throughput of trivial jobs through a pool.
fn bench_pool_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool_throughput");
    group.sample_size(20);

    for workers in [1, 4] {
        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            let pool = Arc::new(
                WorkerPool::new(PoolConfig::new(workers, 256, 256), |job: &Job<u64>| {
                    Ok::<_, JobError>(job.payload.wrapping_mul(31))
                })
                .unwrap(),
            );
            pool.start().unwrap();
            let results = pool.results();

            b.iter(|| {
                let producer = {
                    let pool = pool.clone();
                    thread::spawn(move || {
                        for i in 0..1000 {
                            pool.submit(Job::new(i, i)).unwrap();
                        }
                    })
                };
                for _ in 0..1000 {
                    std::hint::black_box(results.recv().unwrap());
                }
                producer.join().unwrap();
            });

            pool.stop().unwrap();
        });
    }

    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");
    group.sample_size(20);

    group.bench_function("100_jobs_4_workers", |b| {
        let batch = BatchProcessor::new(BatchConfig::new(4, Duration::from_secs(10)), |job: &Job<u64>| {
            Ok::<_, JobError>(job.payload + 1)
        })
        .unwrap();

        b.iter(|| {
            let jobs = (0..100).map(|i| Job::new(i, i)).collect();
            std::hint::black_box(batch.process_batch(jobs).unwrap())
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_allow,
    bench_memory_orderings,
    bench_concurrent_allow,
    bench_per_client,
    bench_atomic_counter,
    bench_pool_throughput,
    bench_batch
);
criterion_main!(benches);
