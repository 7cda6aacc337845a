//! # Adaptive Rate Limiter
//!
//! A single-token limiter whose refill interval is retuned from caller
//! feedback. Callers report outcomes with
//! [`record_success`](AdaptiveRateLimiter::record_success) and
//! [`record_error`](AdaptiveRateLimiter::record_error); once enough samples
//! have accumulated and enough time has passed, the error rate decides the
//! next interval.
//!
//! ```text
//!     error rate        action                    clamp
//!     ───────────       ───────────────────       ─────────────────
//!     > 10%             interval × 1.5 (slower)   ≤ max_interval
//!     5% ..= 10%        unchanged
//!     < 5%              interval × 0.8 (faster)   ≥ min_interval
//! ```
//!
//! ## Refill Thread
//!
//! ```text
//!              retune(Duration)
//!     adjust ─────────────────────┐
//!                                 ▼
//!                       ┌──────────────────┐  try_send(())  ┌────────────┐
//!     ticker ─────────► │  refill thread   │ ─────────────► │ token chan │ ──► allow / wait
//!                       │  select! { .. }  │                │  (cap. 1)  │
//!     shutdown ───────► └──────────────────┘                └────────────┘
//! ```
//!
//! The ticker is owned by the refill thread and replaced there when a retune
//! message arrives. Callers only ever block on the token channel, which
//! lives for the whole life of the limiter, so swapping tickers cannot
//! strand a waiter. A tick still pending on the old ticker is discarded.

use super::{config::AdaptiveConfig, RateLimiter};
use crate::atomic::{AtomicCounter, AtomicFlag, FlagGuard};
use crate::error::{Result, WorkgateError};
use crossbeam_channel::{bounded, select, tick, unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// What woke the refill thread.
enum RefillEvent {
    Tick,
    Retune(Duration),
    Shutdown,
}

/// Rate limiter that speeds up while calls succeed and backs off on errors.
///
/// ```rust
/// use workgate::{AdaptiveConfig, AdaptiveRateLimiter};
/// use std::time::Duration;
///
/// let limiter = AdaptiveRateLimiter::new(AdaptiveConfig::new(
///     Duration::from_millis(50),
///     Duration::from_millis(10),
///     Duration::from_millis(500),
/// ))
/// .unwrap();
///
/// if limiter.allow() {
///     // call the downstream service, then report the outcome
///     limiter.record_success();
/// }
/// limiter.stop();
/// ```
pub struct AdaptiveRateLimiter {
    config: AdaptiveConfig,

    tokens: Receiver<()>,
    retune_tx: Sender<Duration>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    refill_handle: Mutex<Option<JoinHandle<()>>>,

    current_interval_ns: AtomicCounter,
    successes: AtomicCounter,
    errors: AtomicCounter,
    adjustments: AtomicCounter,

    last_adjustment: Mutex<Instant>,
    adjusting: AtomicFlag,
}

impl AdaptiveRateLimiter {
    /// Creates the limiter and starts its refill thread.
    ///
    /// The token slot starts full, so the first `allow` succeeds.
    ///
    /// # Errors
    ///
    /// - [`WorkgateError::InvalidConfig`] if the configuration is rejected
    /// - [`WorkgateError::Spawn`] if the refill thread cannot be started
    pub fn new(config: AdaptiveConfig) -> Result<Self> {
        config.validate().map_err(WorkgateError::InvalidConfig)?;

        let (token_tx, tokens) = bounded(1);
        let (retune_tx, retune_rx) = unbounded();
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        // Cannot fail: the channel is empty and we hold the receiver.
        let _ = token_tx.try_send(());

        let initial = config.initial_interval;
        let handle = thread::Builder::new()
            .name("workgate-adaptive".to_string())
            .spawn(move || run_refill(token_tx, retune_rx, shutdown_rx, initial))?;

        info!("Started adaptive limiter (interval: {:?})", initial);

        Ok(Self {
            current_interval_ns: AtomicCounter::new(initial.as_nanos() as i64),
            config,
            tokens,
            retune_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            refill_handle: Mutex::new(Some(handle)),
            successes: AtomicCounter::new(0),
            errors: AtomicCounter::new(0),
            adjustments: AtomicCounter::new(0),
            last_adjustment: Mutex::new(Instant::now()),
            adjusting: AtomicFlag::new(),
        })
    }

    /// Takes the token if it is there. Never blocks.
    #[inline]
    pub fn allow(&self) -> bool {
        self.tokens.try_recv().is_ok()
    }

    /// Blocks until the next token.
    ///
    /// # Errors
    ///
    /// [`WorkgateError::LimiterStopped`] once the limiter is stopped and the
    /// last token has been taken.
    pub fn wait(&self) -> Result<()> {
        self.tokens.recv().map_err(|_| WorkgateError::LimiterStopped)
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`, returning `Ok(false)`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        match self.tokens.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(WorkgateError::LimiterStopped),
        }
    }

    /// Reports a successful downstream call.
    pub fn record_success(&self) {
        self.successes.increment();
        self.maybe_adjust();
    }

    /// Reports a failed downstream call.
    pub fn record_error(&self) {
        self.errors.increment();
        self.maybe_adjust();
    }

    /// The interval currently driving the refill ticker.
    pub fn current_interval(&self) -> Duration {
        Duration::from_nanos(self.current_interval_ns.get().max(0) as u64)
    }

    /// Snapshot of the feedback counters.
    pub fn stats(&self) -> AdaptiveStats {
        AdaptiveStats {
            current_interval: self.current_interval(),
            pending_successes: self.successes.get().max(0) as u64,
            pending_errors: self.errors.get().max(0) as u64,
            adjustments: self.adjustments.get().max(0) as u64,
        }
    }

    /// Stops the refill thread and waits for it to exit.
    ///
    /// A token already in the slot can still be taken. Calling `stop` again
    /// is a no-op.
    pub fn stop(&self) {
        let shutdown = self
            .shutdown_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        // Dropping the sender wakes the refill thread.
        drop(shutdown);

        let handle = self
            .refill_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
            debug!("Adaptive limiter refill thread stopped");
        }
    }

    fn maybe_adjust(&self) {
        let Some(_guard) = FlagGuard::try_acquire(&self.adjusting) else {
            return;
        };

        let successes = self.successes.get();
        let errors = self.errors.get();
        let samples = successes + errors;
        if samples < 0 || (samples as u64) < self.config.min_sample_count {
            return;
        }

        let mut last_adjustment = self
            .last_adjustment
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        if now.duration_since(*last_adjustment) < self.config.min_adjust_interval {
            return;
        }

        let error_rate = errors as f64 / samples as f64;
        let current = self.current_interval();
        let next = self.next_interval(current, error_rate);

        // Subtract what was read so concurrent reports are not lost.
        self.successes.add(-successes);
        self.errors.add(-errors);
        *last_adjustment = now;

        if next != current {
            self.current_interval_ns.set(next.as_nanos() as i64);
            self.adjustments.increment();
            info!(
                "Adaptive limiter retuned {:?} -> {:?} (error rate {:.1}% over {} samples)",
                current,
                next,
                error_rate * 100.0,
                samples
            );
            // Fails only after stop(), when there is no ticker left to retune.
            let _ = self.retune_tx.send(next);
        }
    }

    fn next_interval(&self, current: Duration, error_rate: f64) -> Duration {
        if error_rate > self.config.slowdown_error_rate {
            current
                .mul_f64(self.config.slowdown_factor)
                .min(self.config.max_interval)
        } else if error_rate < self.config.speedup_error_rate {
            current
                .mul_f64(self.config.speedup_factor)
                .max(self.config.min_interval)
        } else {
            current
        }
    }
}

fn run_refill(
    token_tx: Sender<()>,
    retune_rx: Receiver<Duration>,
    shutdown_rx: Receiver<()>,
    initial: Duration,
) {
    let mut ticker = tick(initial);

    loop {
        let event = select! {
            recv(shutdown_rx) -> _ => RefillEvent::Shutdown,
            recv(retune_rx) -> msg => match msg {
                Ok(interval) => RefillEvent::Retune(interval),
                Err(_) => RefillEvent::Shutdown,
            },
            recv(ticker) -> _ => RefillEvent::Tick,
        };

        match event {
            RefillEvent::Tick => {
                // Full slot: the tick is dropped.
                let _ = token_tx.try_send(());
            }
            RefillEvent::Retune(interval) => {
                ticker = tick(interval);
                debug!("Refill ticker replaced (interval: {:?})", interval);
            }
            RefillEvent::Shutdown => break,
        }
    }
}

impl RateLimiter for AdaptiveRateLimiter {
    fn allow(&self) -> bool {
        AdaptiveRateLimiter::allow(self)
    }

    fn wait(&self) -> Result<()> {
        AdaptiveRateLimiter::wait(self)
    }

    fn wait_timeout(&self, timeout: Duration) -> Result<bool> {
        AdaptiveRateLimiter::wait_timeout(self, timeout)
    }
}

impl Drop for AdaptiveRateLimiter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for AdaptiveRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveRateLimiter")
            .field("current_interval", &self.current_interval())
            .field("min_interval", &self.config.min_interval)
            .field("max_interval", &self.config.max_interval)
            .finish()
    }
}

/// Feedback counters of an [`AdaptiveRateLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptiveStats {
    /// Interval currently in force.
    pub current_interval: Duration,

    /// Successes recorded since the last evaluation.
    pub pending_successes: u64,

    /// Errors recorded since the last evaluation.
    pub pending_errors: u64,

    /// Evaluations that changed the interval.
    pub adjustments: u64,
}
