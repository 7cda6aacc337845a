//! Jobs, their results, and the processor trait workers run them through.

use crate::error::JobError;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// A unit of work: an identifier plus an opaque payload.
///
/// Identifiers only need to be unique within one batch; the pool never
/// interprets them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job<T> {
    /// Caller-chosen identifier.
    pub id: u64,

    /// Input handed to the processor.
    pub payload: T,
}

impl<T> Job<T> {
    /// Creates a job.
    pub fn new(id: u64, payload: T) -> Self {
        Self { id, payload }
    }
}

/// Outcome of one job, carrying the job it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct JobResult<T, R> {
    /// The originating job.
    pub job: Job<T>,

    /// Processor output, or why there is none.
    pub output: Result<R, JobError>,
}

impl<T, R> JobResult<T, R> {
    /// Identifier of the originating job.
    #[inline]
    pub fn id(&self) -> u64 {
        self.job.id
    }

    /// Returns true if the processor produced an output.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.output.is_ok()
    }

    /// The failure, if any.
    pub fn error(&self) -> Option<&JobError> {
        self.output.as_ref().err()
    }
}

/// Application-supplied transform run by pool workers.
///
/// Any `Fn(&Job<T>) -> Result<R, JobError>` closure that can be shared
/// across threads is a processor:
///
/// ```rust
/// use workgate::{Job, JobError, JobProcessor};
///
/// let double = |job: &Job<u32>| -> Result<u32, JobError> { Ok(job.payload * 2) };
/// assert_eq!(double.process(&Job::new(1, 21)), Ok(42));
/// ```
pub trait JobProcessor<T, R>: Send + Sync + 'static {
    /// Transforms one job. Errors are reported in the job's result.
    fn process(&self, job: &Job<T>) -> Result<R, JobError>;
}

impl<T, R, F> JobProcessor<T, R> for F
where
    F: Fn(&Job<T>) -> Result<R, JobError> + Send + Sync + 'static,
{
    fn process(&self, job: &Job<T>) -> Result<R, JobError> {
        self(job)
    }
}

/// Runs the processor, turning a panic into [`JobError::Panicked`].
pub(crate) fn run_job<T, R, P>(processor: &P, job: Job<T>) -> JobResult<T, R>
where
    P: JobProcessor<T, R> + ?Sized,
{
    let output = match panic::catch_unwind(AssertUnwindSafe(|| processor.process(&job))) {
        Ok(output) => output,
        Err(cause) => Err(JobError::Panicked(panic_message(cause.as_ref()))),
    };
    JobResult { job, output }
}

fn panic_message(cause: &(dyn Any + Send)) -> String {
    if let Some(message) = cause.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = cause.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_processor() {
        let processor = |job: &Job<String>| -> Result<usize, JobError> { Ok(job.payload.len()) };
        let result = run_job(&processor, Job::new(3, "hello".to_string()));

        assert_eq!(result.id(), 3);
        assert_eq!(result.output, Ok(5));
        assert!(result.error().is_none());
    }

    #[test]
    fn test_failure_is_carried() {
        let processor = |job: &Job<i32>| -> Result<i32, JobError> {
            if job.payload < 0 {
                Err(JobError::failed("negative input"))
            } else {
                Ok(job.payload)
            }
        };

        let result = run_job(&processor, Job::new(1, -4));
        assert!(!result.is_ok());
        assert_eq!(result.error(), Some(&JobError::Failed("negative input".into())));
        assert_eq!(result.job.payload, -4);
    }

    #[test]
    fn test_panic_is_caught() {
        let processor = |job: &Job<u8>| -> Result<u8, JobError> {
            if job.payload == 0 {
                panic!("division by zero");
            }
            Ok(100 / job.payload)
        };

        let result = run_job(&processor, Job::new(9, 0));
        assert_eq!(
            result.output,
            Err(JobError::Panicked("division by zero".to_string()))
        );

        let formatted = |_: &Job<u8>| -> Result<u8, JobError> { panic!("code {}", 7) };
        let result = run_job(&formatted, Job::new(10, 1));
        assert_eq!(result.output, Err(JobError::Panicked("code 7".to_string())));
    }
}
