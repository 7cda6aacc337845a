//! Worker pool and batch settings.

use std::time::Duration;

/// Worker pool settings.
///
/// Queue capacities of zero are allowed and make the channel a rendezvous
/// point: `submit` then blocks until a worker is ready to receive.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker threads started by `start`.
    pub workers: usize,

    /// Jobs that can wait in the queue before `submit` blocks.
    pub job_queue_capacity: usize,

    /// Results that can wait before workers block on publishing.
    pub result_queue_capacity: usize,

    /// Prefix for worker thread names; workers are `<prefix>-<index>`.
    pub thread_name: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            workers,
            job_queue_capacity: 100,
            result_queue_capacity: 100,
            thread_name: "workgate-worker".to_string(),
        }
    }
}

impl PoolConfig {
    /// Creates a config with explicit worker count and queue capacities.
    pub fn new(workers: usize, job_queue_capacity: usize, result_queue_capacity: usize) -> Self {
        Self {
            workers,
            job_queue_capacity,
            result_queue_capacity,
            ..Self::default()
        }
    }

    /// Sets the worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets both queue capacities.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.job_queue_capacity = capacity;
        self.result_queue_capacity = capacity;
        self
    }

    /// Sets the worker thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.workers == 0 {
            return Err("workers must be greater than 0");
        }
        if self.thread_name.is_empty() {
            return Err("thread_name must not be empty");
        }
        Ok(())
    }
}

/// Batch settings: the pool every batch runs on, plus the overall deadline.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Pool created afresh for each batch.
    pub pool: PoolConfig,

    /// Time budget for a whole batch, measured from the start of submission.
    pub deadline: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default().with_thread_name("workgate-batch"),
            deadline: Duration::from_secs(30),
        }
    }
}

impl BatchConfig {
    /// Creates a config with `workers` threads and the given deadline.
    pub fn new(workers: usize, deadline: Duration) -> Self {
        Self {
            pool: PoolConfig::default()
                .with_workers(workers)
                .with_thread_name("workgate-batch"),
            deadline,
        }
    }

    /// Replaces the pool settings.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        self.pool.validate()?;
        if self.deadline.is_zero() {
            return Err("deadline must be greater than 0");
        }
        Ok(())
    }
}
