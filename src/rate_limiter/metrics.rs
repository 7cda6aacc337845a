//! # Token Bucket Metrics
//!
//! Point-in-time snapshots of a [`TokenBucket`](crate::TokenBucket)'s
//! counters plus a coarse health classification.
//!
//! ```text
//!     Metrics Snapshot:
//!     ┌─────────────────────────────────────┐
//!     │  Success Rate: 85%                  │
//!     │  Tokens: 3/10                       │
//!     │  Consecutive Rejections: 0          │
//!     │  Max Wait: 1.5ms                    │
//!     │  Health: Healthy                    │
//!     └─────────────────────────────────────┘
//! ```

use std::fmt;

/// Snapshot of a token bucket's counters.
///
/// ```rust
/// use workgate::TokenBucket;
/// use std::time::Duration;
///
/// let bucket = TokenBucket::new(5, Duration::from_secs(1)).unwrap();
/// for _ in 0..6 {
///     bucket.allow();
/// }
///
/// let metrics = bucket.metrics();
/// assert_eq!(metrics.total_acquired, 5);
/// assert_eq!(metrics.total_rejected, 1);
/// ```
#[derive(Debug, Clone)]
pub struct RateLimiterMetrics {
    /// Tokens successfully consumed.
    pub total_acquired: u64,

    /// Admission attempts that found no token.
    pub total_rejected: u64,

    /// Tokens actually added by refill ticks (ticks landing on a full bucket are not counted).
    pub total_refills: u64,

    /// Tokens available when the snapshot was taken.
    pub current_tokens: u64,

    /// Bucket capacity.
    pub capacity: u64,

    /// Rejections since the last successful acquisition.
    pub consecutive_rejections: u64,

    /// Longest time a `wait` call spent blocked, in nanoseconds.
    pub max_wait_time_ns: u64,
}

impl RateLimiterMetrics {
    /// Fraction of attempts that were admitted (1.0 when nothing was attempted).
    #[inline]
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            1.0
        } else {
            self.total_acquired as f64 / total as f64
        }
    }

    /// Fraction of attempts that were rejected.
    #[inline]
    pub fn rejection_rate(&self) -> f64 {
        1.0 - self.success_rate()
    }

    /// Attempts seen so far.
    #[inline]
    pub fn total_requests(&self) -> u64 {
        self.total_acquired + self.total_rejected
    }

    /// Fraction of capacity currently spent (0.0 = full bucket).
    #[inline]
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            1.0 - (self.current_tokens as f64 / self.capacity as f64)
        }
    }

    /// Longest observed wait in milliseconds.
    #[inline]
    pub fn max_wait_time_ms(&self) -> f64 {
        self.max_wait_time_ns as f64 / 1_000_000.0
    }

    /// Success rate below 50% or an empty bucket.
    #[inline]
    pub fn is_under_pressure(&self) -> bool {
        self.success_rate() < 0.5 || self.current_tokens == 0
    }

    /// More than 10 consecutive rejections or over 30% rejected overall.
    #[inline]
    pub fn is_under_sustained_pressure(&self) -> bool {
        self.consecutive_rejections > 10 || self.rejection_rate() > 0.3
    }

    /// Classifies the snapshot.
    pub fn health_status(&self) -> HealthStatus {
        if self.is_under_sustained_pressure() {
            HealthStatus::Critical
        } else if self.is_under_pressure() {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Multi-line, human-readable report.
    pub fn summary(&self) -> String {
        format!(
            "TokenBucket Metrics:\n\
             ├─ Capacity:\n\
             │  ├─ Available Tokens: {}/{}\n\
             │  └─ Utilization: {:.2}%\n\
             ├─ Counters:\n\
             │  ├─ Total Acquired: {}\n\
             │  ├─ Total Rejected: {}\n\
             │  ├─ Total Refills: {}\n\
             │  └─ Consecutive Rejections: {}\n\
             └─ Health:\n\
                ├─ Success Rate: {:.2}%\n\
                ├─ Max Wait Time: {:.3}ms\n\
                └─ Status: {:?}",
            self.current_tokens,
            self.capacity,
            self.utilization() * 100.0,
            self.total_acquired,
            self.total_rejected,
            self.total_refills,
            self.consecutive_rejections,
            self.success_rate() * 100.0,
            self.max_wait_time_ms(),
            self.health_status(),
        )
    }
}

impl fmt::Display for RateLimiterMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Three-level health classification of a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Admitting normally.
    Healthy,

    /// Bucket empty or most recent attempts rejected.
    Degraded,

    /// Demand persistently exceeds the configured rate.
    Critical,
}

impl HealthStatus {
    /// Returns true for anything other than [`HealthStatus::Healthy`].
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Short operator-facing recommendation.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Degraded => "Monitor closely, consider raising capacity",
            Self::Critical => "Immediate action required: raise the rate or shed load",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "Healthy"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Critical => write!(f, "Critical"),
        }
    }
}
