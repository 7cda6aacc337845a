//! # Token Bucket
//!
//! A capacity-bounded bucket that gains one token per refill tick and loses
//! one per admitted request. Bursts up to `capacity` pass immediately; after
//! that the sustained rate is one request per `refill_interval`.
//!
//! ```text
//!     capacity = 5, refill_interval = 100ms
//!
//!     t=0ms     [●●●●●]   starts full
//!     5 allows  [     ]   burst spent
//!     t=100ms   [●    ]   one tick, one token
//!     t=250ms   [●●   ]   second tick (t=200) landed, t=300 not yet
//!     t=2s      [●●●●●]   ticks that land on a full bucket are dropped
//! ```
//!
//! ## Lazy Refill
//!
//! There is no timer thread per bucket. Every access computes how many ticks
//! have elapsed since the last claimed tick, claims them with a single CAS on
//! the tick timestamp, and adds one token per tick (capped at capacity). Only
//! the thread that wins the timestamp CAS adds tokens, so a tick is never
//! counted twice. The observable state is identical to a bucket driven by a
//! ticker that silently discards ticks while full.
//!
//! ## Blocking
//!
//! [`TokenBucket::wait`] retries the lock-free path and parks on a condvar
//! until the next tick is due. [`TokenBucket::add_tokens`] and
//! [`TokenBucket::stop`] wake parked waiters early.

use super::{config::TokenBucketConfig, metrics::RateLimiterMetrics, RateLimiter};
use crate::atomic::{AtomicCounter, AtomicFlag};
use crate::error::{Result, WorkgateError};
use crate::utils::{Backoff, CacheAligned};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Backoff steps for the token CAS loop.
const TOKEN_BACKOFF_STEPS: u32 = 8;

/// Minimum interval between last-access timestamp updates (nanoseconds).
///
/// The timestamp only feeds idle detection, so 100ms granularity is plenty
/// and keeps the hot path from writing a shared cache line on every call.
const LAST_ACCESS_UPDATE_INTERVAL_NS: i64 = 100_000_000;

/// Lock-free token bucket.
///
/// ## Example
///
/// ```rust
/// use workgate::{RateLimiter, TokenBucket};
/// use std::time::Duration;
///
/// let bucket = TokenBucket::new(3, Duration::from_secs(60)).unwrap();
/// assert!(bucket.allow());
/// assert!(bucket.allow());
/// assert!(bucket.allow());
/// assert!(!bucket.allow()); // burst spent, next token in a minute
/// ```
pub struct TokenBucket {
    /// Available tokens, always within `[0, capacity]`.
    tokens: CacheAligned<AtomicCounter>,

    /// Nanoseconds since `epoch` of the most recently claimed tick.
    last_tick_ns: CacheAligned<AtomicCounter>,

    /// Nanoseconds since `epoch` of the most recent access.
    last_access_ns: AtomicCounter,

    /// Per-instance time origin.
    epoch: Instant,

    capacity: i64,
    refill_interval_ns: i64,

    /// Set once refilling has been halted.
    stopped: AtomicFlag,

    consecutive_rejections: AtomicCounter,
    max_wait_time_ns: AtomicCounter,
    total_acquired: AtomicCounter,
    total_rejected: AtomicCounter,
    total_refills: AtomicCounter,

    /// Parking spot for `wait` callers.
    waiters: Mutex<()>,
    wakeup: Condvar,
}

impl TokenBucket {
    /// Creates a full bucket of `capacity` tokens refilled one per `refill_interval`.
    ///
    /// # Errors
    ///
    /// [`WorkgateError::InvalidConfig`] if `refill_interval` is zero or does
    /// not fit in `i64` nanoseconds.
    pub fn new(capacity: u64, refill_interval: Duration) -> Result<Self> {
        Self::with_config(TokenBucketConfig::new(capacity, refill_interval))
    }

    /// Creates a bucket from a full configuration.
    pub fn with_config(config: TokenBucketConfig) -> Result<Self> {
        config.validate().map_err(WorkgateError::InvalidConfig)?;

        let ordering = config.ordering;
        let capacity = config.capacity as i64;

        Ok(Self {
            tokens: CacheAligned::new(AtomicCounter::with_ordering(capacity, ordering)),
            last_tick_ns: CacheAligned::new(AtomicCounter::with_ordering(0, ordering)),
            last_access_ns: AtomicCounter::with_ordering(0, ordering),
            epoch: Instant::now(),
            capacity,
            refill_interval_ns: config.refill_interval.as_nanos() as i64,
            stopped: AtomicFlag::with_ordering(false, ordering),
            consecutive_rejections: AtomicCounter::with_ordering(0, ordering),
            max_wait_time_ns: AtomicCounter::with_ordering(0, ordering),
            total_acquired: AtomicCounter::with_ordering(0, ordering),
            total_rejected: AtomicCounter::with_ordering(0, ordering),
            total_refills: AtomicCounter::with_ordering(0, ordering),
            waiters: Mutex::new(()),
            wakeup: Condvar::new(),
        })
    }

    /// Takes one token if one is available right now.
    ///
    /// Never blocks. On failure the token count is untouched.
    #[inline]
    pub fn allow(&self) -> bool {
        let now_ns = self.now_ns();
        self.touch(now_ns);
        self.refill_if_needed(now_ns);

        if self.try_take(1) {
            self.on_acquisition(1);
            true
        } else {
            self.on_rejection();
            false
        }
    }

    /// Takes `n` tokens at once, or none at all.
    ///
    /// `n == 0` always succeeds; `n > capacity` always fails.
    pub fn try_acquire_n(&self, n: u64) -> bool {
        if n == 0 {
            return true;
        }
        if n > self.capacity as u64 {
            self.on_rejection();
            return false;
        }

        let now_ns = self.now_ns();
        self.touch(now_ns);
        self.refill_if_needed(now_ns);

        if self.try_take(n as i64) {
            self.on_acquisition(n);
            true
        } else {
            self.on_rejection();
            false
        }
    }

    /// Blocks until a token is available, then consumes it.
    ///
    /// # Errors
    ///
    /// - [`WorkgateError::ZeroCapacity`] if the bucket can never hold a token
    /// - [`WorkgateError::LimiterStopped`] if refilling was stopped and the
    ///   remaining tokens are gone
    pub fn wait(&self) -> Result<()> {
        self.wait_until(None).map(|_| ())
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    ///
    /// Returns `Ok(false)` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.wait_until(Some(Instant::now() + timeout))
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Result<bool> {
        if self.capacity == 0 {
            return Err(WorkgateError::ZeroCapacity);
        }

        let started = Instant::now();
        loop {
            let now_ns = self.now_ns();
            self.touch(now_ns);
            self.refill_if_needed(now_ns);

            if self.try_take(1) {
                self.on_acquisition(1);
                let waited = started.elapsed().as_nanos().min(i64::MAX as u128) as i64;
                self.max_wait_time_ns.fetch_max(waited);
                return Ok(true);
            }

            if self.stopped.is_set() {
                return Err(WorkgateError::LimiterStopped);
            }

            let next_tick_ns = self
                .last_tick_ns
                .value
                .get()
                .saturating_add(self.refill_interval_ns);
            let mut park = Duration::from_nanos(next_tick_ns.saturating_sub(now_ns).max(1) as u64);

            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                park = park.min(deadline - now);
            }

            let guard = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = self.wakeup.wait_timeout(guard, park);
        }
    }

    /// Halts refilling.
    ///
    /// Ticks that were already due are credited first; after that the bucket
    /// only drains. Parked waiters are woken so they can observe the stop.
    pub fn stop(&self) {
        self.refill_if_needed(self.now_ns());
        if !self.stopped.test_and_set() {
            debug!(
                "Token bucket stopped with {} tokens left",
                self.tokens.value.get()
            );
        }
        self.notify_waiters();
    }

    /// Returns true once [`stop`](Self::stop) has been called.
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.is_set()
    }

    /// Current token count, after crediting any due ticks.
    pub fn available_tokens(&self) -> u64 {
        self.refill_if_needed(self.now_ns());
        self.tokens.value.get().max(0) as u64
    }

    /// Maximum tokens the bucket can hold.
    #[inline]
    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    /// Time between refill ticks.
    #[inline]
    pub fn refill_interval(&self) -> Duration {
        Duration::from_nanos(self.refill_interval_ns as u64)
    }

    /// Adds `n` tokens out of band, capped at capacity.
    pub fn add_tokens(&self, n: u64) {
        let n = n.min(self.capacity as u64) as i64;
        let capacity = self.capacity;
        let added = self
            .tokens
            .value
            .update(|current| (current < capacity).then(|| (current + n).min(capacity)));
        if added.is_ok() {
            self.notify_waiters();
        }
    }

    /// Refills to capacity and clears all statistics. Does not undo `stop`.
    pub fn reset(&self) {
        let now_ns = self.now_ns();
        self.tokens.value.set(self.capacity);
        self.last_tick_ns.value.set(now_ns);
        self.last_access_ns.set(now_ns);
        self.consecutive_rejections.set(0);
        self.max_wait_time_ns.set(0);
        self.total_acquired.set(0);
        self.total_rejected.set(0);
        self.total_refills.set(0);
        self.notify_waiters();
    }

    /// Returns true if the bucket has not been touched for `idle`.
    pub fn is_inactive(&self, idle: Duration) -> bool {
        let idle_ns = idle.as_nanos().min(i64::MAX as u128) as i64;
        self.now_ns().saturating_sub(self.last_access_ns.get()) > idle_ns
    }

    /// Snapshot of the bucket's counters.
    pub fn metrics(&self) -> RateLimiterMetrics {
        RateLimiterMetrics {
            total_acquired: self.total_acquired.get() as u64,
            total_rejected: self.total_rejected.get() as u64,
            total_refills: self.total_refills.get() as u64,
            current_tokens: self.tokens.value.get().max(0) as u64,
            capacity: self.capacity as u64,
            consecutive_rejections: self.consecutive_rejections.get() as u64,
            max_wait_time_ns: self.max_wait_time_ns.get() as u64,
        }
    }

    #[inline(always)]
    fn now_ns(&self) -> i64 {
        self.epoch.elapsed().as_nanos().min(i64::MAX as u128) as i64
    }

    #[inline]
    fn touch(&self, now_ns: i64) {
        let last = self.last_access_ns.get();
        if now_ns.saturating_sub(last) > LAST_ACCESS_UPDATE_INTERVAL_NS {
            self.last_access_ns.set(now_ns);
        }
    }

    /// Decrements the token count by `n` iff at least `n` tokens are present.
    #[inline]
    fn try_take(&self, n: i64) -> bool {
        let mut backoff = Backoff::new(TOKEN_BACKOFF_STEPS);
        loop {
            let current = self.tokens.value.get();
            if current < n {
                return false;
            }

            match self.tokens.value.compare_exchange_weak(current, current - n) {
                Ok(_) => return true,
                Err(actual) if actual < n => return false,
                Err(_) => backoff.backoff(),
            }
        }
    }

    /// Claims every tick that has elapsed since the last claimed one.
    #[inline]
    fn refill_if_needed(&self, now_ns: i64) {
        if self.stopped.is_set() {
            return;
        }

        let last_tick = self.last_tick_ns.value.get();
        let elapsed = now_ns.saturating_sub(last_tick);
        if elapsed < self.refill_interval_ns {
            return;
        }

        let ticks = elapsed / self.refill_interval_ns;
        let claimed_until = last_tick + ticks * self.refill_interval_ns;

        // Losing this race means another thread claimed the same ticks.
        if self.last_tick_ns.value.compare_and_swap(last_tick, claimed_until) {
            self.perform_refill(ticks);
        }
    }

    /// Adds one token per tick, dropping ticks that would overflow capacity.
    fn perform_refill(&self, ticks: i64) {
        let capacity = self.capacity;
        let add = ticks.min(capacity);
        if add == 0 {
            return;
        }

        let outcome = self
            .tokens
            .value
            .update(|current| (current < capacity).then(|| (current + add).min(capacity)));

        if let Ok(previous) = outcome {
            let added = (previous + add).min(capacity) - previous;
            self.total_refills.add(added);
            debug!("Refilled {} tokens ({} ticks)", added, ticks);
            self.notify_waiters();
        }
    }

    #[inline]
    fn on_acquisition(&self, n: u64) {
        self.total_acquired.add(n as i64);
        if self.consecutive_rejections.get() > 0 {
            self.consecutive_rejections.set(0);
        }
    }

    #[inline]
    fn on_rejection(&self) {
        self.total_rejected.increment();
        self.consecutive_rejections.increment();
    }

    fn notify_waiters(&self) {
        let _guard = self.waiters.lock().unwrap_or_else(PoisonError::into_inner);
        self.wakeup.notify_all();
    }
}

impl RateLimiter for TokenBucket {
    fn allow(&self) -> bool {
        TokenBucket::allow(self)
    }

    fn wait(&self) -> Result<()> {
        TokenBucket::wait(self)
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        TokenBucket::wait_timeout(self, timeout)
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_interval", &self.refill_interval())
            .field("tokens", &self.tokens.value.get())
            .field("stopped", &self.stopped.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic::MemoryOrdering;
    use std::sync::Arc;
    use std::thread;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_basic_acquisition() {
        let bucket = TokenBucket::new(10, HOUR).unwrap();

        for _ in 0..10 {
            assert!(bucket.allow());
        }
        assert!(!bucket.allow());

        let metrics = bucket.metrics();
        assert_eq!(metrics.total_acquired, 10);
        assert_eq!(metrics.total_rejected, 1);
        assert_eq!(metrics.consecutive_rejections, 1);
    }

    #[test]
    fn test_zero_capacity() {
        let bucket = TokenBucket::new(0, Duration::from_millis(1)).unwrap();
        thread::sleep(Duration::from_millis(5));
        assert!(!bucket.allow());
        assert_eq!(bucket.available_tokens(), 0);
        assert!(matches!(bucket.wait(), Err(WorkgateError::ZeroCapacity)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        assert!(matches!(
            TokenBucket::new(5, Duration::ZERO),
            Err(WorkgateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_interval_beyond_tick_clock_rejected() {
        assert!(matches!(
            TokenBucket::new(1, Duration::from_secs(10_000_000_000)),
            Err(WorkgateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_longest_interval_waits_without_refill() {
        let longest = Duration::from_nanos(i64::MAX as u64);
        let bucket = TokenBucket::new(1, longest).unwrap();
        assert_eq!(bucket.refill_interval(), longest);
        assert!(bucket.allow());

        let start = Instant::now();
        assert!(!bucket.wait_timeout(Duration::from_millis(50)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert_eq!(bucket.available_tokens(), 0);
        assert_eq!(bucket.metrics().total_refills, 0);
    }

    #[test]
    fn test_bulk_acquisition() {
        let bucket = TokenBucket::new(10, HOUR).unwrap();

        assert!(bucket.try_acquire_n(5));
        assert!(bucket.try_acquire_n(3));
        assert!(!bucket.try_acquire_n(5));
        assert!(bucket.try_acquire_n(2));
        assert!(bucket.try_acquire_n(0));
        assert!(!bucket.try_acquire_n(11));
    }

    #[test]
    fn test_refill_one_token_per_tick() {
        let bucket = TokenBucket::new(10, Duration::from_millis(50)).unwrap();
        assert!(bucket.try_acquire_n(10));
        assert_eq!(bucket.available_tokens(), 0);

        thread::sleep(Duration::from_millis(160));

        let available = bucket.available_tokens();
        assert!((2..=4).contains(&available), "got {}", available);
    }

    #[test]
    fn test_refill_never_exceeds_capacity() {
        let bucket = TokenBucket::new(3, Duration::from_millis(5)).unwrap();
        assert!(bucket.allow());

        thread::sleep(Duration::from_millis(100));

        assert_eq!(bucket.available_tokens(), 3);
        assert_eq!(bucket.metrics().total_refills, 1);
    }

    #[test]
    fn test_stop_halts_refill() {
        let bucket = TokenBucket::new(2, Duration::from_millis(50)).unwrap();
        assert!(bucket.allow());
        bucket.stop();
        assert!(bucket.is_stopped());

        thread::sleep(Duration::from_millis(150));

        // Only the token that was never spent remains.
        assert!(bucket.allow());
        assert!(!bucket.allow());
        assert!(matches!(bucket.wait(), Err(WorkgateError::LimiterStopped)));
    }

    #[test]
    fn test_wait_blocks_until_tick() {
        let bucket = TokenBucket::new(1, Duration::from_millis(80)).unwrap();
        assert!(bucket.allow());

        let start = Instant::now();
        bucket.wait().unwrap();
        let waited = start.elapsed();

        assert!(waited >= Duration::from_millis(60), "waited {:?}", waited);
        assert!(waited < Duration::from_secs(2));
        assert!(bucket.metrics().max_wait_time_ns > 0);
    }

    #[test]
    fn test_wait_timeout_expires() {
        let bucket = TokenBucket::new(1, HOUR).unwrap();
        assert!(bucket.allow());
        assert!(!bucket.wait_timeout(Duration::from_millis(30)).unwrap());
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let bucket = Arc::new(TokenBucket::new(1, HOUR).unwrap());
        assert!(bucket.allow());

        let waiter = {
            let bucket = bucket.clone();
            thread::spawn(move || bucket.wait())
        };

        thread::sleep(Duration::from_millis(30));
        bucket.stop();

        assert!(matches!(
            waiter.join().unwrap(),
            Err(WorkgateError::LimiterStopped)
        ));
    }

    #[test]
    fn test_add_tokens_wakes_waiter_and_caps() {
        let bucket = Arc::new(TokenBucket::new(4, HOUR).unwrap());
        assert!(bucket.try_acquire_n(4));

        let waiter = {
            let bucket = bucket.clone();
            thread::spawn(move || bucket.wait())
        };

        thread::sleep(Duration::from_millis(20));
        bucket.add_tokens(100);
        waiter.join().unwrap().unwrap();

        assert_eq!(bucket.available_tokens(), 3);
    }

    #[test]
    fn test_reset() {
        let bucket = TokenBucket::new(5, HOUR).unwrap();
        assert!(bucket.try_acquire_n(5));
        assert!(!bucket.allow());

        bucket.reset();

        assert_eq!(bucket.available_tokens(), 5);
        let metrics = bucket.metrics();
        assert_eq!(metrics.total_acquired, 0);
        assert_eq!(metrics.total_rejected, 0);
    }

    #[test]
    fn test_is_inactive() {
        let bucket = TokenBucket::new(5, HOUR).unwrap();
        assert!(!bucket.is_inactive(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(30));
        assert!(bucket.is_inactive(Duration::from_millis(10)));
    }

    #[test]
    fn test_concurrent_acquire_never_oversubscribes() {
        let config = TokenBucketConfig::new(100, HOUR).with_ordering(MemoryOrdering::Sequential);
        let bucket = Arc::new(TokenBucket::with_config(config).unwrap());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let bucket = bucket.clone();
                thread::spawn(move || (0..200).filter(|_| bucket.allow()).count())
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(total, 100);
        assert_eq!(bucket.available_tokens(), 0);
        assert_eq!(bucket.metrics().total_rejected, 1900);
    }

    #[test]
    fn test_concurrent_refill_bound() {
        let bucket = Arc::new(TokenBucket::new(5, Duration::from_micros(200)).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let bucket = bucket.clone();
                thread::spawn(move || {
                    for _ in 0..2_000 {
                        bucket.allow();
                        let available = bucket.available_tokens();
                        assert!(available <= 5);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert!(bucket.available_tokens() <= 5);
    }

    #[test]
    fn test_trait_object() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(TokenBucket::new(1, HOUR).unwrap());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }
}
