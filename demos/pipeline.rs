//! End-to-end walkthrough: limiters, a gated worker pool and a deadline batch.
//!
//! Run with: `cargo run --example pipeline`

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use workgate::{
    AdaptiveConfig, AdaptiveRateLimiter, BatchConfig, BatchProcessor, Job, JobError,
    PerClientRateLimiter, PoolConfig, SlidingWindow, TokenBucket, WorkerPool,
};

fn main() {
    println!("=== Workgate Pipeline Example ===\n");

    token_bucket_example();
    println!("{}", "=".repeat(50));

    per_client_example();
    println!("{}", "=".repeat(50));

    gated_pool_example();
    println!("{}", "=".repeat(50));

    batch_example();
    println!("{}", "=".repeat(50));

    adaptive_example();
}

fn token_bucket_example() {
    println!("1. Token Bucket vs Sliding Window:");

    let bucket = TokenBucket::new(3, Duration::from_millis(100)).unwrap();
    let window = SlidingWindow::new(3, Duration::from_millis(300)).unwrap();

    for i in 1..=5 {
        println!(
            "   Request {}: bucket {}  window {}",
            i,
            if bucket.allow() { "✓" } else { "✗" },
            if window.allow() { "✓" } else { "✗" }
        );
    }

    thread::sleep(Duration::from_millis(150));
    println!("   After 150ms: bucket has {} token(s), window retry in {:?}", bucket.available_tokens(), window.retry_after());
    println!("\n{}\n", bucket.metrics());
}

fn per_client_example() {
    println!("2. Per-Client Limits:");

    let limiter = PerClientRateLimiter::<&str>::with_rate(2, Duration::from_secs(1)).unwrap();
    for client in ["alice", "bob", "alice", "alice", "bob", "carol"] {
        let verdict = if limiter.allow(&client) { "allowed" } else { "BLOCKED" };
        println!("   {:<6} {}", client, verdict);
    }

    println!("\n{}\n", limiter.stats());
}

fn gated_pool_example() {
    println!("3. Worker Pool behind a Token Bucket:");

    let gate = Arc::new(TokenBucket::new(5, Duration::from_millis(20)).unwrap());
    let pool = WorkerPool::new(PoolConfig::new(3, 8, 8), |job: &Job<String>| {
        thread::sleep(Duration::from_millis(10));
        if job.payload.is_empty() {
            Err(JobError::failed("empty payload"))
        } else {
            Ok(job.payload.to_uppercase())
        }
    })
    .unwrap()
    .with_rate_limiter(gate);

    pool.start().unwrap();
    let start = Instant::now();

    let words = ["alpha", "beta", "", "gamma", "delta", "epsilon", "zeta", "eta", "", "theta"];
    let results = pool.results();
    let consumer = thread::spawn(move || {
        for result in results.iter() {
            match &result.output {
                Ok(upper) => println!("   job {:>2} -> {}", result.id(), upper),
                Err(error) => println!("   job {:>2} failed: {}", result.id(), error),
            }
        }
    });

    for (id, word) in words.iter().enumerate() {
        pool.submit(Job::new(id as u64, word.to_string())).unwrap();
    }
    thread::sleep(Duration::from_millis(100));
    pool.stop().unwrap();
    consumer.join().unwrap();

    println!("   Submitted {} jobs in {:?}", words.len(), start.elapsed());
    println!("\n{}\n", pool.stats());
}

fn batch_example() {
    println!("4. Batch with Deadline:");

    let batch = BatchProcessor::new(BatchConfig::new(2, Duration::from_millis(350)), |job: &Job<u64>| {
        thread::sleep(Duration::from_millis(100 * job.payload));
        Ok::<_, JobError>(job.payload * job.payload)
    })
    .unwrap();

    let jobs = (1..=6).map(|i| Job::new(i, i)).collect();
    let report = batch.process_batch_report(jobs).unwrap();

    println!(
        "   Collected {}/{} results in {:?} (timed out: {})",
        report.results.len(),
        report.expected,
        report.elapsed,
        report.timed_out
    );
    for result in &report.results {
        println!("   job {} -> {:?}", result.id(), result.output);
    }
    println!();
}

fn adaptive_example() {
    println!("5. Adaptive Rate Limiter:");

    let limiter = AdaptiveRateLimiter::new(
        AdaptiveConfig::new(
            Duration::from_millis(50),
            Duration::from_millis(10),
            Duration::from_millis(400),
        )
        .with_min_adjust_interval(Duration::from_millis(20)),
    )
    .unwrap();

    println!("   Start interval: {:?}", limiter.current_interval());

    for round in 1..=4 {
        thread::sleep(Duration::from_millis(25));
        for _ in 0..10 {
            limiter.record_error();
        }
        println!("   After error round {}: {:?}", round, limiter.current_interval());
    }

    for round in 1..=4 {
        thread::sleep(Duration::from_millis(25));
        for _ in 0..10 {
            limiter.record_success();
        }
        println!("   After success round {}: {:?}", round, limiter.current_interval());
    }

    println!("   {:?}", limiter.stats());
    limiter.stop();
}
