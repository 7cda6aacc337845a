//! # Error Types
//!
//! Two families of errors flow out of this crate:
//!
//! - [`WorkgateError`]: misuse, configuration and admission failures raised
//!   by the limiters and the pool themselves.
//! - [`JobError`]: a single job's failure, carried inside a
//!   [`JobResult`](crate::JobResult). It never aborts the pool.

/// Errors returned by rate limiters, worker pools and batch processors.
#[derive(Debug, thiserror::Error)]
pub enum WorkgateError {
    /// A configuration value failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The pool has been stopped and no longer accepts jobs.
    #[error("worker pool is closed")]
    Closed,

    /// `start` was called on a pool that is already running.
    #[error("worker pool already started")]
    AlreadyStarted,

    /// `stop` was called on a pool that was never started.
    #[error("worker pool not started")]
    NotStarted,

    /// `stop` was called more than once.
    #[error("worker pool already stopped")]
    AlreadyStopped,

    /// The job queue is full (only returned by non-blocking submission).
    #[error("job queue is full")]
    QueueFull,

    /// The admission gate rejected the request.
    #[error("rate limited")]
    RateLimited,

    /// The limiter was stopped and has no tokens left to hand out.
    #[error("rate limiter stopped")]
    LimiterStopped,

    /// The limiter has zero capacity and can never admit anything.
    #[error("rate limiter has zero capacity")]
    ZeroCapacity,

    /// The operating system refused to spawn a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, WorkgateError>;

/// Failure of an individual job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// The job's processor returned an error.
    #[error("job failed: {0}")]
    Failed(String),

    /// The job's processor panicked; the worker survived.
    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// Builds a [`JobError::Failed`] from anything printable.
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }

    /// Returns true if the failure came from a panic.
    pub fn is_panic(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }
}
