//! # Rate Limiters
//!
//! Three admission algorithms behind one trait, plus a per-client registry.
//!
//! ```text
//!     rate_limiter/
//!     ├── mod.rs             (RateLimiter trait)
//!     ├── config.rs          (configs and validation)
//!     ├── token_bucket.rs    (lock-free bucket, lazy refill)
//!     ├── sliding_window.rs  (exact trailing window)
//!     ├── adaptive.rs        (feedback-tuned single-token limiter)
//!     ├── manager.rs         (per-client registry of token buckets)
//!     └── metrics.rs         (token bucket snapshots and health)
//! ```
//!
//! ## Choosing an Algorithm
//!
//! | Limiter | Burst | Memory | Blocking `wait` |
//! |---------|-------|--------|-----------------|
//! | [`TokenBucket`] | up to `capacity` | O(1) | condvar until next tick |
//! | [`SlidingWindow`] | up to `limit` | O(limit) | sleeps until oldest entry expires |
//! | [`AdaptiveRateLimiter`] | 1 | O(1) + 1 thread | channel receive |

mod adaptive;
mod config;
mod manager;
mod metrics;
mod sliding_window;
mod token_bucket;

pub use adaptive::{AdaptiveRateLimiter, AdaptiveStats};
pub use config::{AdaptiveConfig, SlidingWindowConfig, TokenBucketConfig};
pub use manager::{ManagerStats, PerClientRateLimiter};
pub use metrics::{HealthStatus, RateLimiterMetrics};
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use crate::error::Result;
use std::time::Duration;

/// Admission control shared by every limiter in this crate.
///
/// Implementations are safe to share across threads; the worker pool holds
/// its gate as `Arc<dyn RateLimiter>`.
///
/// ```rust
/// use workgate::{RateLimiter, SlidingWindow, TokenBucket};
/// use std::time::Duration;
///
/// fn drain(limiter: &dyn RateLimiter) -> usize {
///     (0..10).filter(|_| limiter.allow()).count()
/// }
///
/// let bucket = TokenBucket::new(4, Duration::from_secs(60)).unwrap();
/// let window = SlidingWindow::new(6, Duration::from_secs(60)).unwrap();
/// assert_eq!(drain(&bucket), 4);
/// assert_eq!(drain(&window), 6);
/// ```
pub trait RateLimiter: Send + Sync {
    /// Admits the caller if capacity is available right now. Never blocks.
    fn allow(&self) -> bool;

    /// Blocks until the caller is admitted.
    ///
    /// Returns an error only when admission can never happen, such as a
    /// stopped or zero-capacity limiter.
    fn wait(&self) -> Result<()>;

    /// Like [`wait`](Self::wait), but returns `Ok(false)` once `timeout`
    /// passes without admission.
    fn wait_timeout(&self, timeout: Duration) -> Result<bool>;
}
