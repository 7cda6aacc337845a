//! # Lock-Free Scalar State
//!
//! [`AtomicCounter`] and [`AtomicFlag`] are the bookkeeping primitives the
//! rest of the crate is built on: token counts, pool occupancy, success and
//! error tallies, lifecycle flags.
//!
//! ```text
//!     Read-modify-write via CAS:
//!
//!     load ──► compute ──► compare_and_swap ──► ok? ──Yes──► done
//!                ▲                               │
//!                └────────────── No (retry) ◄────┘
//! ```
//!
//! Every operation is a single atomic instruction (or a bounded CAS loop for
//! [`AtomicCounter::update`]); nothing here blocks or allocates.

use crate::utils::Backoff;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Memory ordering strategy for atomic operations.
///
/// ## Quick Guide
///
/// - `Relaxed` for pure statistics where exact cross-thread ordering is irrelevant
/// - `AcquireRelease` (default) for state that guards other data
/// - `Sequential` when a single total order over all operations is required
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryOrdering {
    /// Fastest, no synchronization beyond atomicity.
    Relaxed,

    /// Acquire on loads, Release on stores, AcqRel on read-modify-write.
    #[default]
    AcquireRelease,

    /// Sequentially consistent everywhere.
    Sequential,
}

impl MemoryOrdering {
    #[inline(always)]
    pub(crate) fn load(&self) -> Ordering {
        match self {
            Self::Relaxed => Ordering::Relaxed,
            Self::AcquireRelease => Ordering::Acquire,
            Self::Sequential => Ordering::SeqCst,
        }
    }

    #[inline(always)]
    pub(crate) fn store(&self) -> Ordering {
        match self {
            Self::Relaxed => Ordering::Relaxed,
            Self::AcquireRelease => Ordering::Release,
            Self::Sequential => Ordering::SeqCst,
        }
    }

    #[inline(always)]
    pub(crate) fn rmw(&self) -> Ordering {
        match self {
            Self::Relaxed => Ordering::Relaxed,
            Self::AcquireRelease => Ordering::AcqRel,
            Self::Sequential => Ordering::SeqCst,
        }
    }

    #[inline(always)]
    pub(crate) fn cas_failure(&self) -> Ordering {
        match self {
            Self::Relaxed => Ordering::Relaxed,
            Self::AcquireRelease => Ordering::Acquire,
            Self::Sequential => Ordering::SeqCst,
        }
    }
}

/// Maximum backoff step for [`AtomicCounter::update`] before yielding.
const UPDATE_BACKOFF_STEPS: u32 = 6;

/// A signed, lock-free counter.
///
/// # Example
///
/// ```rust
/// use workgate::AtomicCounter;
/// use std::sync::Arc;
/// use std::thread;
///
/// let counter = Arc::new(AtomicCounter::new(0));
/// let handles: Vec<_> = (0..4)
///     .map(|_| {
///         let counter = counter.clone();
///         thread::spawn(move || {
///             for _ in 0..100 {
///                 counter.increment();
///             }
///         })
///     })
///     .collect();
/// for h in handles {
///     h.join().unwrap();
/// }
/// assert_eq!(counter.get(), 400);
/// ```
pub struct AtomicCounter {
    value: AtomicI64,
    ordering: MemoryOrdering,
}

impl AtomicCounter {
    /// Creates a counter holding `initial` with the default ordering.
    #[inline]
    pub const fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            ordering: MemoryOrdering::AcquireRelease,
        }
    }

    /// Creates a counter with an explicit memory ordering.
    #[inline]
    pub const fn with_ordering(initial: i64, ordering: MemoryOrdering) -> Self {
        Self {
            value: AtomicI64::new(initial),
            ordering,
        }
    }

    /// Adds one and returns the new value.
    #[inline]
    pub fn increment(&self) -> i64 {
        self.add(1)
    }

    /// Subtracts one and returns the new value.
    #[inline]
    pub fn decrement(&self) -> i64 {
        self.add(-1)
    }

    /// Adds `delta` (wrapping on overflow) and returns the new value.
    #[inline]
    pub fn add(&self, delta: i64) -> i64 {
        self.value
            .fetch_add(delta, self.ordering.rmw())
            .wrapping_add(delta)
    }

    /// Reads the current value.
    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(self.ordering.load())
    }

    /// Overwrites the current value.
    #[inline]
    pub fn set(&self, value: i64) {
        self.value.store(value, self.ordering.store())
    }

    /// Stores `new` iff the current value equals `expected`.
    ///
    /// Returns `true` when the exchange happened. Callers that need a
    /// read-modify-write must loop on failure; see [`update`](Self::update).
    #[inline]
    pub fn compare_and_swap(&self, expected: i64, new: i64) -> bool {
        self.value
            .compare_exchange(expected, new, self.ordering.rmw(), self.ordering.cas_failure())
            .is_ok()
    }

    /// Weak CAS that may fail spuriously. Returns the observed value on failure.
    #[inline]
    pub(crate) fn compare_exchange_weak(&self, expected: i64, new: i64) -> Result<i64, i64> {
        self.value
            .compare_exchange_weak(expected, new, self.ordering.rmw(), self.ordering.cas_failure())
    }

    /// Applies `f` atomically with a CAS retry loop.
    ///
    /// `f` returns `None` to abort without writing. Returns the previous
    /// value on success, or the last observed value on abort.
    pub fn update<F>(&self, mut f: F) -> Result<i64, i64>
    where
        F: FnMut(i64) -> Option<i64>,
    {
        let mut backoff = Backoff::new(UPDATE_BACKOFF_STEPS);
        let mut current = self.get();
        loop {
            let next = match f(current) {
                Some(next) => next,
                None => return Err(current),
            };
            match self.compare_exchange_weak(current, next) {
                Ok(prev) => return Ok(prev),
                Err(actual) => {
                    current = actual;
                    backoff.backoff();
                }
            }
        }
    }

    /// Raises the value to `candidate` if it is larger. Returns the previous value.
    #[inline]
    pub fn fetch_max(&self, candidate: i64) -> i64 {
        self.value.fetch_max(candidate, self.ordering.rmw())
    }

    /// Sets the value back to zero and returns what it held.
    #[inline]
    pub fn reset(&self) -> i64 {
        self.value.swap(0, self.ordering.rmw())
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

impl std::fmt::Debug for AtomicCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AtomicCounter").field(&self.get()).finish()
    }
}

/// A lock-free boolean flag.
///
/// [`test_and_set`](Self::test_and_set) is the building block for
/// "only one thread may do this" sections such as lifecycle transitions.
pub struct AtomicFlag {
    value: AtomicBool,
    ordering: MemoryOrdering,
}

impl AtomicFlag {
    /// Creates a cleared flag.
    #[inline]
    pub const fn new() -> Self {
        Self {
            value: AtomicBool::new(false),
            ordering: MemoryOrdering::AcquireRelease,
        }
    }

    /// Creates a flag with an explicit initial state and ordering.
    #[inline]
    pub const fn with_ordering(initial: bool, ordering: MemoryOrdering) -> Self {
        Self {
            value: AtomicBool::new(initial),
            ordering,
        }
    }

    /// Raises the flag.
    #[inline]
    pub fn set(&self) {
        self.value.store(true, self.ordering.store())
    }

    /// Lowers the flag.
    #[inline]
    pub fn clear(&self) {
        self.value.store(false, self.ordering.store())
    }

    /// Reads the flag.
    #[inline]
    pub fn is_set(&self) -> bool {
        self.value.load(self.ordering.load())
    }

    /// Raises the flag and returns whether it was already raised.
    ///
    /// Exactly one of any number of racing callers observes `false`.
    #[inline]
    pub fn test_and_set(&self) -> bool {
        self.value.swap(true, self.ordering.rmw())
    }

    /// Lowers the flag only if it is raised. Returns `true` if this call lowered it.
    #[inline]
    pub fn clear_if_set(&self) -> bool {
        self.value
            .compare_exchange(true, false, self.ordering.rmw(), self.ordering.cas_failure())
            .is_ok()
    }
}

impl Default for AtomicFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AtomicFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("AtomicFlag").field(&self.is_set()).finish()
    }
}

/// RAII guard that lowers a flag when dropped.
///
/// Pairs with [`AtomicFlag::test_and_set`] so the flag is always reset,
/// even if the guarded section returns early or panics.
pub(crate) struct FlagGuard<'a> {
    flag: &'a AtomicFlag,
}

impl<'a> FlagGuard<'a> {
    /// Acquires the flag, or returns `None` if another holder has it.
    pub(crate) fn try_acquire(flag: &'a AtomicFlag) -> Option<Self> {
        if flag.test_and_set() {
            None
        } else {
            Some(Self { flag })
        }
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.clear();
    }
}
