//! # Job Execution
//!
//! ```text
//!     pool/
//!     ├── mod.rs          (You are here)
//!     ├── job.rs          (Job, JobResult, JobProcessor)
//!     ├── config.rs       (PoolConfig, BatchConfig)
//!     ├── worker_pool.rs  (fixed-size worker pool)
//!     └── batch.rs        (deadline-bounded batch runs)
//! ```
//!
//! A [`WorkerPool`] is long-lived: start it once, feed it for as long as
//! needed, stop it once. A [`BatchProcessor`] builds a fresh pool for every
//! batch and tears it down when the batch finishes or runs out of time.

mod batch;
mod config;
mod job;
mod worker_pool;

pub use batch::{BatchProcessor, BatchReport};
pub use config::{BatchConfig, PoolConfig};
pub use job::{Job, JobProcessor, JobResult};
pub use worker_pool::{PoolStats, WorkerPool};
