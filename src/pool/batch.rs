//! # Batch Processing
//!
//! Runs a fixed set of jobs on a fresh [`WorkerPool`] under an overall
//! deadline and returns whatever finished in time.
//!
//! ```text
//!     process_batch(jobs)
//!         │
//!         ├─► new pool, start
//!         ├─► feeder thread ── submit(job) ... ──► job queue
//!         ├─► collect results ◄── result channel
//!         │      until all arrived  OR  deadline passed
//!         └─► stop pool, return collected results (possibly partial)
//! ```
//!
//! Stopping waits for jobs that are already running, so a timed-out batch
//! returns after its slowest in-flight job, not exactly at the deadline.
//! Results that land after the deadline are discarded with the pool.

use super::config::BatchConfig;
use super::job::{Job, JobProcessor, JobResult};
use super::worker_pool::WorkerPool;
use crate::error::{Result, WorkgateError};
use crate::rate_limiter::RateLimiter;
use crossbeam_channel::RecvTimeoutError;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Best-effort batch runner with a deadline.
///
/// ```rust
/// use workgate::{BatchConfig, BatchProcessor, Job, JobError};
/// use std::time::Duration;
///
/// let processor = BatchProcessor::new(
///     BatchConfig::new(4, Duration::from_secs(5)),
///     |job: &Job<String>| Ok::<_, JobError>(job.payload.to_uppercase()),
/// )
/// .unwrap();
///
/// let jobs = vec![Job::new(1, "a".to_string()), Job::new(2, "b".to_string())];
/// let results = processor.process_batch(jobs).unwrap();
/// assert_eq!(results.len(), 2);
/// ```
pub struct BatchProcessor<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    config: BatchConfig,
    processor: Arc<dyn JobProcessor<T, R>>,
    gate: Option<Arc<dyn RateLimiter>>,
}

impl<T, R> BatchProcessor<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Creates a batch runner.
    ///
    /// # Errors
    ///
    /// [`WorkgateError::InvalidConfig`] if `config` is rejected.
    pub fn new<P>(config: BatchConfig, processor: P) -> Result<Self>
    where
        P: JobProcessor<T, R>,
    {
        config.validate().map_err(WorkgateError::InvalidConfig)?;
        Ok(Self {
            config,
            processor: Arc::new(processor),
            gate: None,
        })
    }

    /// Gates job submission of every batch through `gate`.
    pub fn with_rate_limiter(mut self, gate: Arc<dyn RateLimiter>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Overall time budget per batch.
    #[inline]
    pub fn deadline(&self) -> Duration {
        self.config.deadline
    }

    /// Runs `jobs` and returns the results collected before the deadline.
    ///
    /// Results arrive in completion order, not submission order.
    pub fn process_batch(&self, jobs: Vec<Job<T>>) -> Result<Vec<JobResult<T, R>>> {
        self.process_batch_report(jobs).map(|report| report.results)
    }

    /// Like [`process_batch`](Self::process_batch), with timing and completeness details.
    ///
    /// # Errors
    ///
    /// [`WorkgateError::Spawn`] if the pool or feeder thread cannot start.
    /// Individual job failures are reported inside the results.
    pub fn process_batch_report(&self, jobs: Vec<Job<T>>) -> Result<BatchReport<T, R>> {
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let expected = jobs.len();

        let mut pool =
            WorkerPool::from_shared(self.config.pool.clone(), Arc::clone(&self.processor))?;
        if let Some(gate) = &self.gate {
            pool = pool.with_rate_limiter(Arc::clone(gate));
        }
        pool.start()?;

        let receiver = pool.results();
        let mut results = Vec::with_capacity(expected);

        let timed_out = thread::scope(|scope| -> Result<bool> {
            let pool = &pool;
            thread::Builder::new()
                .name(format!("{}-feeder", self.config.pool.thread_name))
                .spawn_scoped(scope, move || {
                    for job in jobs {
                        let id = job.id;
                        if let Err(error) = pool.submit(job) {
                            debug!("Batch feeder stopped at job {}: {}", id, error);
                            break;
                        }
                    }
                })?;

            let mut timed_out = false;
            while results.len() < expected {
                match receiver.recv_deadline(deadline) {
                    Ok(result) => results.push(result),
                    Err(RecvTimeoutError::Timeout) => {
                        timed_out = true;
                        break;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }

            // Also wakes the feeder if it is blocked on a full queue.
            pool.stop()?;
            Ok(timed_out)
        })?;

        let elapsed = started.elapsed();
        if timed_out {
            warn!(
                "Batch deadline of {:?} reached with {}/{} results",
                self.config.deadline,
                results.len(),
                expected
            );
        } else {
            debug!("Batch of {} jobs finished in {:?}", expected, elapsed);
        }

        Ok(BatchReport {
            results,
            expected,
            timed_out,
            elapsed,
        })
    }
}

impl<T, R> std::fmt::Debug for BatchProcessor<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("workers", &self.config.pool.workers)
            .field("deadline", &self.config.deadline)
            .field("gated", &self.gate.is_some())
            .finish()
    }
}

/// Outcome of one batch.
#[derive(Debug)]
pub struct BatchReport<T, R> {
    /// Results collected before the deadline, in completion order.
    pub results: Vec<JobResult<T, R>>,

    /// Number of jobs in the batch.
    pub expected: usize,

    /// True if the deadline passed before every result arrived.
    pub timed_out: bool,

    /// Wall time from submission start until the pool stopped.
    pub elapsed: Duration,
}

impl<T, R> BatchReport<T, R> {
    /// Returns true if every job produced a result.
    pub fn is_complete(&self) -> bool {
        self.results.len() == self.expected
    }

    /// Jobs that produced no result before the deadline.
    pub fn missing(&self) -> usize {
        self.expected.saturating_sub(self.results.len())
    }

    /// Collected results whose job succeeded.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    /// Collected results whose job failed.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}
