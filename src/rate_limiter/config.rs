//! # Rate Limiter Configuration
//!
//! Settings for the three admission strategies. Each config is a plain
//! `Clone + Debug` struct with sensible defaults, named constructors and
//! chainable `with_*` setters, plus a `validate()` that the fallible
//! constructors call.
//!
//! ```text
//!     TokenBucketConfig           SlidingWindowConfig        AdaptiveConfig
//!     ┌──────────────────┐        ┌──────────────────┐       ┌─────────────────────┐
//!     │ capacity  (burst)│        │ limit            │       │ initial_interval    │
//!     │ refill_interval  │        │ window           │       │ min / max interval  │
//!     │ ordering         │        └──────────────────┘       │ sample + time gates │
//!     └──────────────────┘                                   │ thresholds, factors │
//!                                                            └─────────────────────┘
//! ```

use crate::atomic::MemoryOrdering;
use std::time::Duration;

/// Token bucket settings.
///
/// The bucket starts full, gains one token every `refill_interval` and never
/// holds more than `capacity` tokens.
#[derive(Debug, Clone)]
pub struct TokenBucketConfig {
    /// Maximum tokens the bucket can hold (burst size). Zero disables admission.
    pub capacity: u64,

    /// Time between two single-token refills.
    pub refill_interval: Duration,

    /// Memory ordering for the token counter.
    pub ordering: MemoryOrdering,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            refill_interval: Duration::from_millis(100),
            ordering: MemoryOrdering::AcquireRelease,
        }
    }
}

impl TokenBucketConfig {
    /// Creates a config with explicit capacity and refill interval.
    pub fn new(capacity: u64, refill_interval: Duration) -> Self {
        Self {
            capacity,
            refill_interval,
            ordering: MemoryOrdering::default(),
        }
    }

    /// Sustains `requests_per_second` with a burst of the same size.
    ///
    /// ```rust
    /// use workgate::TokenBucketConfig;
    /// use std::time::Duration;
    ///
    /// let config = TokenBucketConfig::per_second(10);
    /// assert_eq!(config.capacity, 10);
    /// assert_eq!(config.refill_interval, Duration::from_millis(100));
    /// ```
    pub fn per_second(requests_per_second: u32) -> Self {
        Self::new(
            requests_per_second as u64,
            Duration::from_secs(1) / requests_per_second.max(1),
        )
    }

    /// Sustains `requests_per_minute` with a burst of the same size.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self::new(
            requests_per_minute as u64,
            Duration::from_secs(60) / requests_per_minute.max(1),
        )
    }

    /// Sets the burst capacity.
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the memory ordering strategy.
    pub fn with_ordering(mut self, ordering: MemoryOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - `refill_interval` is zero (a bucket that refills infinitely fast)
    /// - `capacity` does not fit the signed token counter
    /// - `refill_interval` does not fit the signed tick clock
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.refill_interval.is_zero() {
            return Err("refill_interval must be greater than 0");
        }

        if self.capacity > i64::MAX as u64 {
            return Err("capacity exceeds i64::MAX");
        }

        if self.refill_interval.as_nanos() > i64::MAX as u128 {
            return Err("refill_interval exceeds i64::MAX nanoseconds");
        }

        Ok(())
    }

    /// Sustained admissions per second once the burst is spent.
    pub fn effective_rate_per_second(&self) -> f64 {
        if self.refill_interval.is_zero() {
            0.0
        } else {
            1.0 / self.refill_interval.as_secs_f64()
        }
    }
}

/// Sliding window settings: at most `limit` admissions in any trailing `window`.
#[derive(Debug, Clone)]
pub struct SlidingWindowConfig {
    /// Maximum admissions retained within the window.
    pub limit: usize,

    /// Length of the trailing window.
    pub window: Duration,
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(1),
        }
    }
}

impl SlidingWindowConfig {
    /// Creates a config for `limit` requests per `window`.
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.window.is_zero() {
            return Err("window must be greater than 0");
        }
        Ok(())
    }
}

/// Adaptive limiter settings.
///
/// The limiter hands out one token per `interval`. The interval starts at
/// `initial_interval` and is retuned from success/error feedback, but never
/// leaves `[min_interval, max_interval]`.
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// Starting refill interval.
    pub initial_interval: Duration,

    /// Fastest allowed pace.
    pub min_interval: Duration,

    /// Slowest allowed pace.
    pub max_interval: Duration,

    /// Observations required before an adjustment is evaluated.
    pub min_sample_count: u64,

    /// Minimum time between two adjustments.
    pub min_adjust_interval: Duration,

    /// Error rate above which the limiter slows down.
    pub slowdown_error_rate: f64,

    /// Error rate below which the limiter speeds up.
    pub speedup_error_rate: f64,

    /// Interval multiplier applied when slowing down.
    pub slowdown_factor: f64,

    /// Interval multiplier applied when speeding up.
    pub speedup_factor: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            min_sample_count: 10,
            min_adjust_interval: Duration::from_secs(5),
            slowdown_error_rate: 0.10,
            speedup_error_rate: 0.05,
            slowdown_factor: 1.5,
            speedup_factor: 0.8,
        }
    }
}

impl AdaptiveConfig {
    /// Creates a config with the given interval bounds and default policy.
    pub fn new(initial_interval: Duration, min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            initial_interval,
            min_interval,
            max_interval,
            ..Default::default()
        }
    }

    /// Sets the sample count gate.
    pub fn with_min_sample_count(mut self, count: u64) -> Self {
        self.min_sample_count = count;
        self
    }

    /// Sets the time gate between adjustments.
    pub fn with_min_adjust_interval(mut self, interval: Duration) -> Self {
        self.min_adjust_interval = interval;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.min_interval.is_zero() {
            return Err("min_interval must be greater than 0");
        }
        if self.min_interval > self.max_interval {
            return Err("min_interval must not exceed max_interval");
        }
        if self.initial_interval < self.min_interval || self.initial_interval > self.max_interval {
            return Err("initial_interval must lie within [min_interval, max_interval]");
        }
        if self.max_interval.as_nanos() > i64::MAX as u128 {
            return Err("max_interval is too large");
        }
        if self.min_sample_count == 0 {
            return Err("min_sample_count must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.speedup_error_rate)
            || !(0.0..=1.0).contains(&self.slowdown_error_rate)
        {
            return Err("error rate thresholds must lie within [0, 1]");
        }
        if self.speedup_error_rate > self.slowdown_error_rate {
            return Err("speedup_error_rate must not exceed slowdown_error_rate");
        }
        if self.slowdown_factor < 1.0 {
            return Err("slowdown_factor must be at least 1.0");
        }
        if !(self.speedup_factor > 0.0 && self.speedup_factor <= 1.0) {
            return Err("speedup_factor must lie within (0, 1]");
        }
        Ok(())
    }
}
