//! # Workgate - Admission Control and Bounded Job Execution
//!
//! Building blocks for running work concurrently without overrunning
//! yourself or the services you call:
//!
//! - **Atomics**: [`AtomicCounter`] and [`AtomicFlag`], lock-free bookkeeping
//!   with a configurable [`MemoryOrdering`]
//! - **Rate limiters** behind one [`RateLimiter`] trait:
//!   [`TokenBucket`], [`SlidingWindow`] and [`AdaptiveRateLimiter`], plus
//!   [`PerClientRateLimiter`] for one bucket per client identity
//! - **Execution**: [`WorkerPool`] with backpressure and an optional rate
//!   limiter in front, and [`BatchProcessor`] for deadline-bounded batches
//!
//! ## Data Flow
//!
//! ```text
//!     producer
//!        │
//!        ▼
//!     ┌──────────────┐   allow / wait    ┌──────────────────────────────┐
//!     │  RateLimiter │ ◄──────────────── │ submit / try_submit          │
//!     └──────────────┘                   └──────────────┬───────────────┘
//!                                                       ▼
//!                                         ┌──────────────────────────┐
//!                                         │ job queue (bounded)      │
//!                                         └────────────┬─────────────┘
//!                                                      ▼
//!                                         ┌──────────────────────────┐
//!                                         │ workers (fixed count)    │
//!                                         └────────────┬─────────────┘
//!                                                      ▼
//!                                         ┌──────────────────────────┐
//!                                         │ result channel (bounded) │ ──► consumer / BatchProcessor
//!                                         └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ### Rate limiting
//!
//! ```rust
//! use workgate::{RateLimiter, TokenBucket};
//! use std::time::Duration;
//!
//! // Burst of 5, then one request every 200ms.
//! let limiter = TokenBucket::new(5, Duration::from_millis(200)).unwrap();
//!
//! if limiter.allow() {
//!     // handle the request
//! } else {
//!     // reject, or block with limiter.wait()
//! }
//! ```
//!
//! ### Gated worker pool
//!
//! ```rust
//! use workgate::{Job, JobError, PoolConfig, TokenBucket, WorkerPool};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let gate = Arc::new(TokenBucket::new(10, Duration::from_millis(10)).unwrap());
//! let pool = WorkerPool::new(PoolConfig::new(4, 32, 32), |job: &Job<String>| {
//!     Ok::<_, JobError>(job.payload.len())
//! })
//! .unwrap()
//! .with_rate_limiter(gate);
//!
//! pool.start().unwrap();
//! pool.submit(Job::new(1, "hello".to_string())).unwrap();
//! assert_eq!(pool.results().recv().unwrap().output, Ok(5));
//! pool.stop().unwrap();
//! ```
//!
//! ### Batch with a deadline
//!
//! ```rust
//! use workgate::{BatchConfig, BatchProcessor, Job, JobError};
//! use std::time::Duration;
//!
//! let batch = BatchProcessor::new(BatchConfig::new(4, Duration::from_secs(2)), |job: &Job<u32>| {
//!     Ok::<_, JobError>(job.payload * 2)
//! })
//! .unwrap();
//!
//! let report = batch
//!     .process_batch_report((0..10).map(|i| Job::new(i, i as u32)).collect())
//!     .unwrap();
//! assert!(report.is_complete());
//! ```
//!
//! ## Thread Safety
//!
//! Every limiter, the registry and the pool are `Send + Sync` and meant to
//! be shared through `Arc`; see [`SharedTokenBucket`] and friends.
//!
//! ## Logging
//!
//! Lifecycle events (pool start/stop, rate retunes) are emitted through
//! [`tracing`] at `info`, abnormal paths at `warn`, and hot-path detail at
//! `debug`. Install any subscriber to see them.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_op_in_unsafe_fn)]

mod atomic;
mod error;
mod pool;
mod rate_limiter;
mod utils;

pub use atomic::{AtomicCounter, AtomicFlag, MemoryOrdering};
pub use error::{JobError, Result, WorkgateError};
pub use pool::{
    BatchConfig, BatchProcessor, BatchReport, Job, JobProcessor, JobResult, PoolConfig, PoolStats,
    WorkerPool,
};
pub use rate_limiter::{
    AdaptiveConfig, AdaptiveRateLimiter, AdaptiveStats, HealthStatus, ManagerStats,
    PerClientRateLimiter, RateLimiter, RateLimiterMetrics, SlidingWindow, SlidingWindowConfig,
    TokenBucket, TokenBucketConfig,
};
pub use utils::{cpu_relax, CACHE_LINE_SIZE};

use std::sync::Arc;
use std::time::Duration;

/// A token bucket wrapped in `Arc` for sharing across threads.
///
/// ```rust
/// use workgate::{SharedTokenBucket, TokenBucket};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let shared: SharedTokenBucket = Arc::new(TokenBucket::new(100, Duration::from_millis(10)).unwrap());
/// let clone = shared.clone();
/// std::thread::spawn(move || {
///     clone.allow();
/// })
/// .join()
/// .unwrap();
/// ```
pub type SharedTokenBucket = Arc<TokenBucket>;

/// Any rate limiter behind `Arc`, as accepted by
/// [`WorkerPool::with_rate_limiter`].
pub type SharedRateLimiter = Arc<dyn RateLimiter>;

/// A per-client registry wrapped in `Arc`.
pub type SharedClientLimiter<K> = Arc<PerClientRateLimiter<K>>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use workgate::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for typical use.
    //!
    //! ```rust
    //! use workgate::prelude::*;
    //! use std::time::Duration;
    //!
    //! let bucket = TokenBucket::new(10, Duration::from_millis(100)).unwrap();
    //! let config = PoolConfig::new(2, 8, 8);
    //! let job = Job::new(1, "payload");
    //! assert!(bucket.allow());
    //! ```

    pub use crate::{
        AdaptiveRateLimiter, AtomicCounter, AtomicFlag, BatchConfig, BatchProcessor, Job,
        JobError, JobProcessor, JobResult, PerClientRateLimiter, PoolConfig, RateLimiter,
        SharedRateLimiter, SharedTokenBucket, SlidingWindow, TokenBucket, TokenBucketConfig,
        WorkerPool, WorkgateError,
    };
}

/// Fluent construction of a [`TokenBucket`].
///
/// ```rust
/// use workgate::{MemoryOrdering, TokenBucketBuilder};
/// use std::time::Duration;
///
/// let bucket = TokenBucketBuilder::new()
///     .capacity(100)
///     .refill_interval(Duration::from_millis(10))
///     .memory_ordering(MemoryOrdering::Relaxed)
///     .build()
///     .unwrap();
/// assert_eq!(bucket.capacity(), 100);
///
/// let invalid = TokenBucketBuilder::new()
///     .refill_interval(Duration::ZERO)
///     .build();
/// assert!(invalid.is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct TokenBucketBuilder {
    config: TokenBucketConfig,
}

impl TokenBucketBuilder {
    /// Starts from [`TokenBucketConfig::default`] (10 tokens, one per 100ms).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the burst capacity.
    pub fn capacity(mut self, capacity: u64) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Sets the time between single-token refills.
    pub fn refill_interval(mut self, interval: Duration) -> Self {
        self.config.refill_interval = interval;
        self
    }

    /// Sustains `requests_per_second` with a burst of the same size.
    pub fn per_second(mut self, requests_per_second: u32) -> Self {
        let ordering = self.config.ordering;
        self.config = TokenBucketConfig::per_second(requests_per_second).with_ordering(ordering);
        self
    }

    /// Sets the memory ordering of the token counter.
    pub fn memory_ordering(mut self, ordering: MemoryOrdering) -> Self {
        self.config.ordering = ordering;
        self
    }

    /// Validates the settings and builds the bucket.
    ///
    /// # Errors
    ///
    /// [`WorkgateError::InvalidConfig`] if the settings are rejected.
    pub fn build(self) -> Result<TokenBucket> {
        TokenBucket::with_config(self.config)
    }

    /// Builds the bucket already wrapped in `Arc`.
    pub fn build_shared(self) -> Result<SharedTokenBucket> {
        self.build().map(Arc::new)
    }
}
