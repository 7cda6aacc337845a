//! # Sliding Window
//!
//! Exact trailing-window admission: a request is admitted iff fewer than
//! `limit` requests were admitted during the last `window`.
//!
//! ```text
//!     limit = 3, window = 1s
//!
//!     time ─────────────────────────────────────────────►
//!            ●      ●   ●        ✗          ●
//!           0.0    0.2 0.4      0.8        1.1
//!                                │          │
//!                       3 in [-0.2, 0.8]    0.0 expired, 2 in [0.1, 1.1]
//!                       → rejected          → admitted
//! ```
//!
//! Each admitted request stores its timestamp in a queue; each `allow` first
//! drops timestamps older than `now - window`. Work per call is O(retained),
//! bounded by `limit`. All mutation happens under one mutex per instance.

use super::{config::SlidingWindowConfig, RateLimiter};
use crate::error::{Result, WorkgateError};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

/// Floor for the sleep inside [`SlidingWindow::wait`].
const MIN_WAIT_SLICE: Duration = Duration::from_micros(100);

/// Exact sliding-window rate limiter.
///
/// ```rust
/// use workgate::SlidingWindow;
/// use std::time::Duration;
///
/// let window = SlidingWindow::new(2, Duration::from_secs(1)).unwrap();
/// assert!(window.allow());
/// assert!(window.allow());
/// assert!(!window.allow());
/// assert_eq!(window.request_count(), 2);
/// ```
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    /// Admission timestamps, oldest first.
    requests: Mutex<VecDeque<Instant>>,
}

impl SlidingWindow {
    /// Creates a limiter admitting `limit` requests per trailing `window`.
    ///
    /// # Errors
    ///
    /// [`WorkgateError::InvalidConfig`] if `window` is zero.
    pub fn new(limit: usize, window: Duration) -> Result<Self> {
        Self::with_config(SlidingWindowConfig::new(limit, window))
    }

    /// Creates a limiter from a configuration.
    pub fn with_config(config: SlidingWindowConfig) -> Result<Self> {
        config.validate().map_err(WorkgateError::InvalidConfig)?;
        Ok(Self {
            limit: config.limit,
            window: config.window,
            requests: Mutex::new(VecDeque::with_capacity(config.limit.min(1024))),
        })
    }

    /// Expires old entries and admits the request if the window has room.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub(crate) fn allow_at(&self, now: Instant) -> bool {
        let mut requests = self.lock();
        Self::expire(&mut requests, now, self.window);

        if requests.len() < self.limit {
            requests.push_back(now);
            true
        } else {
            false
        }
    }

    /// Number of retained timestamps as of the most recent `allow`.
    ///
    /// Does not expire anything itself.
    pub fn request_count(&self) -> usize {
        self.lock().len()
    }

    /// Time until the window would have room again, `Duration::ZERO` if it has room now.
    ///
    /// With a zero `limit` there is never room; the full window is returned.
    pub fn retry_after(&self) -> Duration {
        self.retry_after_at(Instant::now())
    }

    pub(crate) fn retry_after_at(&self, now: Instant) -> Duration {
        let requests = self.lock();
        let live = requests
            .iter()
            .skip_while(|&&at| now.saturating_duration_since(at) > self.window)
            .count();

        if live < self.limit {
            return Duration::ZERO;
        }

        match requests.get(requests.len() - live) {
            Some(&oldest) => (oldest + self.window).saturating_duration_since(now),
            None => self.window,
        }
    }

    /// Blocks until the request is admitted.
    ///
    /// # Errors
    ///
    /// [`WorkgateError::ZeroCapacity`] if `limit` is zero.
    pub fn wait(&self) -> Result<()> {
        self.wait_until(None).map(|_| ())
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning `Ok(false)`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        self.wait_until(Some(Instant::now() + timeout))
    }

    fn wait_until(&self, deadline: Option<Instant>) -> Result<bool> {
        if self.limit == 0 {
            return Err(WorkgateError::ZeroCapacity);
        }

        loop {
            if self.allow() {
                return Ok(true);
            }

            let mut pause = self.retry_after().max(MIN_WAIT_SLICE);
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(false);
                }
                pause = pause.min(deadline - now);
            }

            debug!("Sliding window full, retrying in {:?}", pause);
            thread::sleep(pause);
        }
    }

    /// Maximum admissions per window.
    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Window length.
    #[inline]
    pub fn window(&self) -> Duration {
        self.window
    }

    fn expire(requests: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&oldest) = requests.front() {
            if now.saturating_duration_since(oldest) > window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RateLimiter for SlidingWindow {
    fn allow(&self) -> bool {
        SlidingWindow::allow(self)
    }

    fn wait(&self) -> Result<()> {
        SlidingWindow::wait(self)
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        SlidingWindow::wait_timeout(self, timeout)
    }
}

impl std::fmt::Debug for SlidingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindow")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("request_count", &self.request_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_admits_up_to_limit() {
        let window = SlidingWindow::new(3, Duration::from_secs(60)).unwrap();
        assert!(window.allow());
        assert!(window.allow());
        assert!(window.allow());
        assert!(!window.allow());
        assert_eq!(window.request_count(), 3);
    }

    #[test]
    fn test_expiry_is_exact() {
        let window = SlidingWindow::new(3, ms(1000)).unwrap();
        let t0 = Instant::now();

        assert!(window.allow_at(t0));
        assert!(window.allow_at(t0 + ms(200)));
        assert!(window.allow_at(t0 + ms(400)));
        assert!(!window.allow_at(t0 + ms(800)));

        // t0 is exactly on the window edge and still counts.
        assert!(!window.allow_at(t0 + ms(1000)));

        // One past the edge: t0 expires, the other two remain.
        assert!(window.allow_at(t0 + ms(1001)));
        assert_eq!(window.request_count(), 3);
    }

    #[test]
    fn test_rejection_does_not_record() {
        let window = SlidingWindow::new(1, ms(100)).unwrap();
        let t0 = Instant::now();

        assert!(window.allow_at(t0));
        for i in 1..50 {
            assert!(!window.allow_at(t0 + ms(i)));
        }
        assert_eq!(window.request_count(), 1);
        assert!(window.allow_at(t0 + ms(101)));
    }

    #[test]
    fn test_request_count_does_not_expire() {
        let window = SlidingWindow::new(5, ms(10)).unwrap();
        let t0 = Instant::now();
        assert!(window.allow_at(t0));
        assert!(window.allow_at(t0));

        std::thread::sleep(ms(30));
        assert_eq!(window.request_count(), 2);

        assert!(window.allow());
        assert_eq!(window.request_count(), 1);
    }

    #[test]
    fn test_retry_after() {
        let window = SlidingWindow::new(2, ms(1000)).unwrap();
        let t0 = Instant::now();

        assert_eq!(window.retry_after_at(t0), Duration::ZERO);
        assert!(window.allow_at(t0));
        assert!(window.allow_at(t0 + ms(300)));

        assert_eq!(window.retry_after_at(t0 + ms(400)), ms(600));
        assert_eq!(window.retry_after_at(t0 + ms(900)), ms(100));
        assert_eq!(window.retry_after_at(t0 + ms(1001)), Duration::ZERO);
    }

    #[test]
    fn test_zero_limit() {
        let window = SlidingWindow::new(0, ms(100)).unwrap();
        assert!(!window.allow());
        assert_eq!(window.retry_after(), ms(100));
        assert!(matches!(window.wait(), Err(WorkgateError::ZeroCapacity)));
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(matches!(
            SlidingWindow::new(3, Duration::ZERO),
            Err(WorkgateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_wait_admits_after_expiry() {
        let window = SlidingWindow::new(1, ms(60)).unwrap();
        assert!(window.allow());

        let start = Instant::now();
        window.wait().unwrap();
        assert!(start.elapsed() >= ms(50));
        assert_eq!(window.request_count(), 1);
    }

    #[test]
    fn test_wait_timeout() {
        let window = SlidingWindow::new(1, ms(80)).unwrap();
        assert!(window.allow());

        let start = Instant::now();
        assert!(!window.wait_timeout(ms(20)).unwrap());
        assert!(start.elapsed() >= ms(20));

        assert!(window.wait_timeout(Duration::from_secs(2)).unwrap());
        assert!(matches!(
            SlidingWindow::new(0, ms(10)).unwrap().wait_timeout(ms(10)),
            Err(WorkgateError::ZeroCapacity)
        ));
    }

    #[test]
    fn test_concurrent_never_exceeds_limit() {
        let window = Arc::new(SlidingWindow::new(50, Duration::from_secs(60)).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let window = window.clone();
                std::thread::spawn(move || (0..100).filter(|_| window.allow()).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 50);
        assert_eq!(window.request_count(), 50);
    }
}
