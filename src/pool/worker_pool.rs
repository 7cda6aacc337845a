//! # Worker Pool
//!
//! A fixed number of worker threads pulling jobs from a bounded queue and
//! publishing results on a bounded channel.
//!
//! ```text
//!                 submit / try_submit
//!     producer ──► [gate] ──► ┌───────────────┐     ┌──────────┐
//!                             │   job queue   │ ──► │ worker 0 │ ──┐
//!                             │  (bounded)    │ ──► │ worker 1 │ ──┼──► result channel ──► results()
//!                             └───────────────┘ ──► │ worker N │ ──┘     (bounded)
//!                                                   └──────────┘
//!                                                        ▲
//!     stop() ── drops shutdown sender ───────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! `new` → `start` → (`submit` ...) → `stop`. Misuse is reported instead of
//! being undefined: a second `start` is [`AlreadyStarted`], `stop` before
//! `start` is [`NotStarted`], a second `stop` is [`AlreadyStopped`] and
//! submitting after `stop` is [`Closed`].
//!
//! ## Shutdown
//!
//! Shutdown is signalled by dropping the only sender of a zero-capacity
//! channel, which makes every `recv` on it ready at once. Each worker
//! selects between that signal and the job queue; when both are ready the
//! choice is random, so a worker may take a few more queued jobs before it
//! notices. Jobs still queued once every worker has exited are abandoned
//! and counted in [`PoolStats::abandoned`]. A job already running always
//! finishes; its result is published unless the result channel is full at
//! shutdown, in which case it is dropped and counted.
//!
//! The result channel closes once the last worker exits, so a consumer can
//! simply iterate [`WorkerPool::results`] until it ends.
//!
//! [`AlreadyStarted`]: WorkgateError::AlreadyStarted
//! [`NotStarted`]: WorkgateError::NotStarted
//! [`AlreadyStopped`]: WorkgateError::AlreadyStopped
//! [`Closed`]: WorkgateError::Closed

use super::config::PoolConfig;
use super::job::{run_job, Job, JobProcessor, JobResult};
use crate::atomic::{AtomicCounter, AtomicFlag};
use crate::error::{Result, WorkgateError};
use crate::rate_limiter::RateLimiter;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest a gated `submit` sleeps before rechecking for shutdown.
const GATE_WAIT_SLICE: Duration = Duration::from_millis(10);

/// Fixed-size pool of worker threads.
///
/// ```rust
/// use workgate::{Job, JobError, PoolConfig, WorkerPool};
///
/// let pool = WorkerPool::new(PoolConfig::new(2, 16, 16), |job: &Job<u64>| {
///     Ok::<_, JobError>(job.payload * job.payload)
/// })
/// .unwrap();
///
/// pool.start().unwrap();
/// for i in 0..4 {
///     pool.submit(Job::new(i, i)).unwrap();
/// }
///
/// let results = pool.results();
/// let mut squares: Vec<u64> = (0..4).map(|_| results.recv().unwrap().output.unwrap()).collect();
/// squares.sort();
/// assert_eq!(squares, vec![0, 1, 4, 9]);
///
/// pool.stop().unwrap();
/// ```
pub struct WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    config: PoolConfig,
    processor: Arc<dyn JobProcessor<T, R>>,
    gate: Option<Arc<dyn RateLimiter>>,

    job_tx: Sender<Job<T>>,
    job_rx: Receiver<Job<T>>,

    /// Handed to the workers by `start`; the pool keeps no sender afterwards.
    result_tx: Mutex<Option<Sender<JobResult<T, R>>>>,
    result_rx: Receiver<JobResult<T, R>>,

    /// Dropped by `stop` to wake every worker.
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,

    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicFlag,
    stopped: AtomicFlag,
    counters: Arc<PoolCounters>,
}

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicCounter,
    completed: AtomicCounter,
    failed: AtomicCounter,
    panicked: AtomicCounter,
    dropped_results: AtomicCounter,
    abandoned: AtomicCounter,
    live_workers: AtomicCounter,
}

impl<T, R> WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Creates a stopped pool. No threads run until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// [`WorkgateError::InvalidConfig`] if `config` is rejected.
    pub fn new<P>(config: PoolConfig, processor: P) -> Result<Self>
    where
        P: JobProcessor<T, R>,
    {
        Self::from_shared(config, Arc::new(processor))
    }

    /// Creates a pool around a processor that other pools may also use.
    pub(crate) fn from_shared(
        config: PoolConfig,
        processor: Arc<dyn JobProcessor<T, R>>,
    ) -> Result<Self> {
        config.validate().map_err(WorkgateError::InvalidConfig)?;

        let (job_tx, job_rx) = bounded(config.job_queue_capacity);
        let (result_tx, result_rx) = bounded(config.result_queue_capacity);
        let (shutdown_tx, shutdown_rx) = bounded(0);

        Ok(Self {
            config,
            processor,
            gate: None,
            job_tx,
            job_rx,
            result_tx: Mutex::new(Some(result_tx)),
            result_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
            started: AtomicFlag::new(),
            stopped: AtomicFlag::new(),
            counters: Arc::new(PoolCounters::default()),
        })
    }

    /// Puts a rate limiter in front of the job queue.
    ///
    /// [`submit`](Self::submit) waits on it; [`try_submit`](Self::try_submit)
    /// fails with [`WorkgateError::RateLimited`] when it refuses.
    pub fn with_rate_limiter(mut self, gate: Arc<dyn RateLimiter>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Launches the worker threads.
    ///
    /// # Errors
    ///
    /// - [`WorkgateError::AlreadyStarted`] on a second call
    /// - [`WorkgateError::Spawn`] if a thread cannot be created; workers
    ///   spawned before the failure keep running until `stop`
    pub fn start(&self) -> Result<()> {
        if self.started.test_and_set() {
            return Err(WorkgateError::AlreadyStarted);
        }

        let result_tx = lock(&self.result_tx)
            .take()
            .ok_or(WorkgateError::AlreadyStarted)?;

        let mut handles = lock(&self.handles);
        for index in 0..self.config.workers {
            let worker = Worker {
                index,
                jobs: self.job_rx.clone(),
                results: result_tx.clone(),
                shutdown: self.shutdown_rx.clone(),
                processor: Arc::clone(&self.processor),
                counters: Arc::clone(&self.counters),
            };

            let handle = thread::Builder::new()
                .name(format!("{}-{}", self.config.thread_name, index))
                .spawn(move || worker.run())?;
            handles.push(handle);
        }

        info!(
            "Worker pool started ({} workers, job queue {}, result queue {})",
            self.config.workers, self.config.job_queue_capacity, self.config.result_queue_capacity
        );
        Ok(())
    }

    /// Enqueues a job, blocking while the queue is full.
    ///
    /// With a rate limiter attached, waits for admission first. A `stop`
    /// while waiting on the limiter or blocked on a full queue wakes the
    /// caller with [`WorkgateError::Closed`].
    ///
    /// Jobs submitted before `start` wait in the queue; once it is full,
    /// `submit` blocks until the pool starts.
    pub fn submit(&self, job: Job<T>) -> Result<()> {
        if self.stopped.is_set() {
            return Err(WorkgateError::Closed);
        }

        if let Some(gate) = &self.gate {
            self.wait_for_gate(gate.as_ref())?;
        }

        let id = job.id;
        select! {
            send(self.job_tx, job) -> sent => sent.map_err(|_| WorkgateError::Closed)?,
            recv(self.shutdown_rx) -> _ => {
                debug!("Submit of job {} interrupted by shutdown", id);
                return Err(WorkgateError::Closed);
            }
        }

        self.counters.submitted.increment();
        Ok(())
    }

    /// Waits for admission in slices so that `stop` can interrupt the wait.
    fn wait_for_gate(&self, gate: &dyn RateLimiter) -> Result<()> {
        while !gate.wait_timeout(GATE_WAIT_SLICE)? {
            if self.stopped.is_set() {
                debug!("Gate wait interrupted by shutdown");
                return Err(WorkgateError::Closed);
            }
        }
        Ok(())
    }

    /// Enqueues a job without blocking.
    ///
    /// # Errors
    ///
    /// - [`WorkgateError::Closed`] after `stop`
    /// - [`WorkgateError::RateLimited`] if the attached limiter refuses
    /// - [`WorkgateError::QueueFull`] if the job queue has no room
    pub fn try_submit(&self, job: Job<T>) -> Result<()> {
        if self.stopped.is_set() {
            return Err(WorkgateError::Closed);
        }

        if let Some(gate) = &self.gate {
            if !gate.allow() {
                return Err(WorkgateError::RateLimited);
            }
        }

        match self.job_tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted.increment();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(WorkgateError::QueueFull),
            Err(TrySendError::Disconnected(_)) => Err(WorkgateError::Closed),
        }
    }

    /// Receiving end of the result channel.
    ///
    /// Every clone shares one queue, so each result is delivered exactly
    /// once. The channel ends after `stop` once the buffered results are read.
    pub fn results(&self) -> Receiver<JobResult<T, R>> {
        self.result_rx.clone()
    }

    /// Signals shutdown and joins every worker.
    ///
    /// # Errors
    ///
    /// - [`WorkgateError::NotStarted`] if `start` never ran
    /// - [`WorkgateError::AlreadyStopped`] on a second call
    pub fn stop(&self) -> Result<()> {
        if !self.started.is_set() {
            return Err(WorkgateError::NotStarted);
        }
        if self.stopped.test_and_set() {
            return Err(WorkgateError::AlreadyStopped);
        }

        debug!("Signalling shutdown to {} workers", self.config.workers);
        drop(lock(&self.shutdown_tx).take());

        let handles = std::mem::take(&mut *lock(&self.handles));
        for handle in handles {
            if handle.join().is_err() {
                warn!("Worker thread terminated abnormally");
            }
        }

        let abandoned = self.job_rx.try_iter().count();
        if abandoned > 0 {
            warn!("Worker pool stopped with {} queued jobs abandoned", abandoned);
            self.counters.abandoned.add(abandoned as i64);
        }

        info!(
            "Worker pool stopped ({} completed, {} failed)",
            self.counters.completed.get(),
            self.counters.failed.get()
        );
        Ok(())
    }

    /// Returns true between `start` and `stop`.
    pub fn is_running(&self) -> bool {
        self.started.is_set() && !self.stopped.is_set()
    }

    /// Configured worker count.
    #[inline]
    pub fn workers(&self) -> usize {
        self.config.workers
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        let get = |counter: &AtomicCounter| counter.get().max(0) as u64;
        PoolStats {
            workers: self.config.workers,
            live_workers: get(&self.counters.live_workers) as usize,
            submitted: get(&self.counters.submitted),
            completed: get(&self.counters.completed),
            failed: get(&self.counters.failed),
            panicked: get(&self.counters.panicked),
            dropped_results: get(&self.counters.dropped_results),
            abandoned: get(&self.counters.abandoned),
            queued_jobs: self.job_rx.len(),
            pending_results: self.result_rx.len(),
        }
    }
}

impl<T, R> Drop for WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn drop(&mut self) {
        if self.is_running() {
            debug!("Stopping worker pool on drop");
            let _ = self.stop();
        }
    }
}

impl<T, R> std::fmt::Debug for WorkerPool<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.config.workers)
            .field("running", &self.is_running())
            .field("gated", &self.gate.is_some())
            .field("queued_jobs", &self.job_rx.len())
            .finish()
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Worker<T, R> {
    index: usize,
    jobs: Receiver<Job<T>>,
    results: Sender<JobResult<T, R>>,
    shutdown: Receiver<()>,
    processor: Arc<dyn JobProcessor<T, R>>,
    counters: Arc<PoolCounters>,
}

impl<T, R> Worker<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn run(self) {
        let _live = LiveWorker::enter(&self.counters.live_workers);
        debug!("Worker {} running", self.index);

        loop {
            let next = select! {
                recv(self.shutdown) -> _ => None,
                recv(self.jobs) -> job => job.ok(),
            };
            let Some(job) = next else {
                break;
            };

            let result = run_job(self.processor.as_ref(), job);
            match &result.output {
                Ok(_) => {
                    self.counters.completed.increment();
                }
                Err(error) => {
                    self.counters.failed.increment();
                    if error.is_panic() {
                        self.counters.panicked.increment();
                        warn!("Worker {} caught panic in job {}: {}", self.index, result.id(), error);
                    }
                }
            }

            if !self.publish(result) {
                break;
            }
        }

        debug!("Worker {} exiting", self.index);
    }

    /// Sends a result, giving up only if shutdown arrives while the channel is full.
    fn publish(&self, result: JobResult<T, R>) -> bool {
        let id = result.id();
        match self.results.try_send(result) {
            Ok(()) => true,
            Err(TrySendError::Disconnected(_)) => false,
            Err(TrySendError::Full(result)) => {
                let delivered = select! {
                    send(self.results, result) -> sent => sent.is_ok(),
                    recv(self.shutdown) -> _ => false,
                };
                if !delivered {
                    warn!(
                        "Worker {} dropped result of job {}: result channel full at shutdown",
                        self.index, id
                    );
                    self.counters.dropped_results.increment();
                }
                delivered
            }
        }
    }
}

/// Counts a worker as live for as long as it is held.
struct LiveWorker<'a>(&'a AtomicCounter);

impl<'a> LiveWorker<'a> {
    fn enter(counter: &'a AtomicCounter) -> Self {
        counter.increment();
        Self(counter)
    }
}

impl Drop for LiveWorker<'_> {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Counters of a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured worker count.
    pub workers: usize,

    /// Worker threads currently running.
    pub live_workers: usize,

    /// Jobs accepted into the queue.
    pub submitted: u64,

    /// Jobs whose processor returned `Ok`.
    pub completed: u64,

    /// Jobs whose processor returned an error or panicked.
    pub failed: u64,

    /// Subset of `failed` that panicked.
    pub panicked: u64,

    /// Results discarded because the result channel was full at shutdown.
    pub dropped_results: u64,

    /// Jobs left in the queue when the pool stopped.
    pub abandoned: u64,

    /// Jobs waiting in the queue right now.
    pub queued_jobs: usize,

    /// Results waiting to be received right now.
    pub pending_results: usize,
}

impl PoolStats {
    /// Jobs processed so far, successful or not.
    pub fn processed(&self) -> u64 {
        self.completed + self.failed
    }

    /// Multi-line, human-readable report.
    pub fn summary(&self) -> String {
        format!(
            "Worker Pool Stats:\n\
             ├─ Workers: {}/{} live\n\
             ├─ Jobs:\n\
             │  ├─ Submitted: {}\n\
             │  ├─ Completed: {}\n\
             │  ├─ Failed: {} ({} panicked)\n\
             │  └─ Abandoned: {}\n\
             └─ Queues:\n\
                ├─ Queued Jobs: {}\n\
                ├─ Pending Results: {}\n\
                └─ Dropped Results: {}",
            self.live_workers,
            self.workers,
            self.submitted,
            self.completed,
            self.failed,
            self.panicked,
            self.abandoned,
            self.queued_jobs,
            self.pending_results,
            self.dropped_results,
        )
    }
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JobError;
    use crate::rate_limiter::TokenBucket;
    use crossbeam_channel::unbounded;
    use std::time::{Duration, Instant};

    fn echo(job: &Job<u64>) -> std::result::Result<u64, JobError> {
        Ok(job.payload)
    }

    #[test]
    fn test_conservation() {
        let pool = Arc::new(WorkerPool::new(PoolConfig::new(4, 8, 8), echo).unwrap());
        pool.start().unwrap();

        let producer = {
            let pool = pool.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    pool.submit(Job::new(i, i * 10)).unwrap();
                }
            })
        };

        let results = pool.results();
        let mut ids: Vec<u64> = (0..50)
            .map(|_| {
                let result = results.recv_timeout(Duration::from_secs(5)).unwrap();
                assert_eq!(result.output, Ok(result.job.id * 10));
                result.id()
            })
            .collect();
        producer.join().unwrap();

        ids.sort_unstable();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());

        pool.stop().unwrap();
        let stats = pool.stats();
        assert_eq!(stats.submitted, 50);
        assert_eq!(stats.completed, 50);
        assert_eq!(stats.abandoned, 0);
        assert!(results.recv().is_err());
    }

    #[test]
    fn test_submit_blocks_on_full_queue() {
        let (release_tx, release_rx) = unbounded::<()>();
        let processor = move |job: &Job<u64>| -> std::result::Result<u64, JobError> {
            release_rx.recv().map_err(JobError::failed)?;
            Ok(job.payload)
        };

        let pool = Arc::new(WorkerPool::new(PoolConfig::new(1, 1, 16), processor).unwrap());
        pool.start().unwrap();

        // Job 0 occupies the worker, job 1 fills the queue.
        pool.submit(Job::new(0, 0)).unwrap();
        thread::sleep(Duration::from_millis(50));
        pool.submit(Job::new(1, 1)).unwrap();

        let (done_tx, done_rx) = unbounded();
        let blocked = {
            let pool = pool.clone();
            thread::spawn(move || {
                pool.submit(Job::new(2, 2)).unwrap();
                done_tx.send(Instant::now()).unwrap();
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(done_rx.try_recv().is_err(), "submit returned while the queue was full");

        let released_at = Instant::now();
        release_tx.send(()).unwrap();
        let returned_at = done_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(returned_at >= released_at);
        blocked.join().unwrap();

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        let results = pool.results();
        for _ in 0..3 {
            assert!(results.recv_timeout(Duration::from_secs(2)).unwrap().is_ok());
        }
        pool.stop().unwrap();
    }

    #[test]
    fn test_lifecycle_errors() {
        let pool = WorkerPool::new(PoolConfig::new(2, 4, 4), echo).unwrap();

        assert!(matches!(pool.stop(), Err(WorkgateError::NotStarted)));
        pool.start().unwrap();
        assert!(matches!(pool.start(), Err(WorkgateError::AlreadyStarted)));
        assert!(pool.is_running());

        pool.stop().unwrap();
        assert!(!pool.is_running());
        assert!(matches!(pool.stop(), Err(WorkgateError::AlreadyStopped)));
        assert!(matches!(pool.submit(Job::new(1, 1)), Err(WorkgateError::Closed)));
        assert!(matches!(pool.try_submit(Job::new(1, 1)), Err(WorkgateError::Closed)));
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            WorkerPool::new(PoolConfig::new(0, 4, 4), echo),
            Err(WorkgateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let processor = |job: &Job<u64>| -> std::result::Result<u64, JobError> {
            if job.payload == 2 {
                panic!("bad payload");
            }
            Ok(job.payload)
        };

        let pool = WorkerPool::new(PoolConfig::new(1, 8, 8), processor).unwrap();
        pool.start().unwrap();
        for i in 0..5 {
            pool.submit(Job::new(i, i)).unwrap();
        }

        let results = pool.results();
        let mut collected: Vec<_> = (0..5)
            .map(|_| results.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        collected.sort_by_key(|r| r.id());

        assert_eq!(
            collected[2].output,
            Err(JobError::Panicked("bad payload".to_string()))
        );
        assert_eq!(collected.iter().filter(|r| r.is_ok()).count(), 4);

        let stats = pool.stats();
        assert_eq!(stats.live_workers, 1);
        assert_eq!(stats.panicked, 1);
        assert_eq!(stats.failed, 1);
        pool.stop().unwrap();
        assert_eq!(pool.stats().live_workers, 0);
    }

    #[test]
    fn test_try_submit_queue_full() {
        let pool = WorkerPool::new(PoolConfig::new(1, 2, 8), echo).unwrap();

        assert!(pool.try_submit(Job::new(0, 0)).is_ok());
        assert!(pool.try_submit(Job::new(1, 1)).is_ok());
        assert!(matches!(
            pool.try_submit(Job::new(2, 2)),
            Err(WorkgateError::QueueFull)
        ));
        assert_eq!(pool.stats().queued_jobs, 2);

        pool.start().unwrap();
        let results = pool.results();
        for _ in 0..2 {
            results.recv_timeout(Duration::from_secs(2)).unwrap();
        }
        pool.stop().unwrap();
    }

    #[test]
    fn test_rate_limiter_gate() {
        let gate = Arc::new(TokenBucket::new(2, Duration::from_secs(60)).unwrap());
        let pool = WorkerPool::new(PoolConfig::new(1, 8, 8), echo)
            .unwrap()
            .with_rate_limiter(gate);

        assert!(pool.try_submit(Job::new(0, 0)).is_ok());
        assert!(pool.try_submit(Job::new(1, 1)).is_ok());
        assert!(matches!(
            pool.try_submit(Job::new(2, 2)),
            Err(WorkgateError::RateLimited)
        ));
        assert_eq!(pool.stats().submitted, 2);
    }

    #[test]
    fn test_gated_submit_waits_for_token() {
        let gate = Arc::new(TokenBucket::new(1, Duration::from_millis(50)).unwrap());
        let pool = WorkerPool::new(PoolConfig::new(1, 8, 8), echo)
            .unwrap()
            .with_rate_limiter(gate);
        pool.start().unwrap();

        let start = Instant::now();
        for i in 0..3 {
            pool.submit(Job::new(i, i)).unwrap();
        }
        // First token is free, the next two take one interval each.
        assert!(start.elapsed() >= Duration::from_millis(90));
        pool.stop().unwrap();
    }

    #[test]
    fn test_stop_accounts_for_queued_jobs() {
        let processor = |job: &Job<u64>| -> std::result::Result<u64, JobError> {
            thread::sleep(Duration::from_millis(30));
            Ok(job.payload)
        };

        let pool = WorkerPool::new(PoolConfig::new(1, 16, 16), processor).unwrap();
        pool.start().unwrap();
        for i in 0..6 {
            pool.submit(Job::new(i, i)).unwrap();
        }
        thread::sleep(Duration::from_millis(10));
        pool.stop().unwrap();

        let stats = pool.stats();
        assert!(stats.completed >= 1);
        assert_eq!(stats.completed + stats.abandoned, 6);
        assert_eq!(stats.queued_jobs, 0);
        assert_eq!(pool.results().try_iter().count() as u64, stats.completed);
    }

    #[test]
    fn test_stop_unblocks_submitter() {
        let (release_tx, release_rx) = unbounded::<()>();
        let processor = move |job: &Job<u64>| -> std::result::Result<u64, JobError> {
            let _ = release_rx.recv_timeout(Duration::from_millis(500));
            Ok(job.payload)
        };

        let pool = Arc::new(WorkerPool::new(PoolConfig::new(1, 1, 4), processor).unwrap());
        pool.start().unwrap();
        pool.submit(Job::new(0, 0)).unwrap();
        thread::sleep(Duration::from_millis(30));
        pool.submit(Job::new(1, 1)).unwrap();

        let blocked = {
            let pool = pool.clone();
            thread::spawn(move || pool.submit(Job::new(2, 2)))
        };
        thread::sleep(Duration::from_millis(50));

        let stopper = {
            let pool = pool.clone();
            thread::spawn(move || pool.stop())
        };
        // The blocked submit is woken by shutdown, possibly racing a freed slot.
        let outcome = blocked.join().unwrap();
        assert!(matches!(outcome, Ok(()) | Err(WorkgateError::Closed)));

        drop(release_tx);
        stopper.join().unwrap().unwrap();
    }

    #[test]
    fn test_stop_interrupts_gate_wait() {
        let gate = Arc::new(TokenBucket::new(1, Duration::from_secs(3600)).unwrap());
        let pool = Arc::new(
            WorkerPool::new(PoolConfig::new(1, 4, 4), echo)
                .unwrap()
                .with_rate_limiter(gate),
        );
        pool.start().unwrap();
        pool.submit(Job::new(0, 0)).unwrap();

        let waiting = {
            let pool = pool.clone();
            thread::spawn(move || pool.submit(Job::new(1, 1)))
        };
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        pool.stop().unwrap();
        let outcome = waiting.join().unwrap();

        assert!(matches!(outcome, Err(WorkgateError::Closed)));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.stats().submitted, 1);
    }

    #[test]
    fn test_drop_stops_running_pool() {
        let pool = WorkerPool::new(PoolConfig::new(3, 4, 4), echo).unwrap();
        pool.start().unwrap();
        let results = pool.results();
        drop(pool);

        // All workers exited, so the result channel is closed.
        assert!(results.recv_timeout(Duration::from_secs(2)).is_err());
    }

    #[test]
    fn test_stats_summary() {
        let pool = WorkerPool::new(PoolConfig::new(2, 4, 4), echo).unwrap();
        let summary = pool.stats().summary();
        assert!(summary.contains("Workers: 0/2 live"));
        assert!(summary.contains("Submitted: 0"));
    }
}
