//! # Spinning and Layout Helpers
//!
//! Small platform-aware pieces used by the lock-free code paths:
//!
//! - [`cpu_relax`]: a spin-loop hint for CAS retry loops
//! - [`CacheAligned`]: pads hot atomics onto their own cache line
//! - [`Backoff`]: exponential spinning that degrades to `yield_now`
//!
//! ```text
//!     Without alignment (false sharing):
//!     ┌───────────── cache line ─────────────┐
//!     │ tokens │ last_tick │ ... other data  │  ◄── every core fights over it
//!     └──────────────────────────────────────┘
//!
//!     With CacheAligned:
//!     ┌──────── line 0 ────────┐┌──────── line 1 ────────┐
//!     │ tokens   (padding...)  ││ last_tick (padding...) │
//!     └────────────────────────┘└────────────────────────┘
//! ```

/// Cache line size for the target architecture.
#[cfg(target_arch = "x86_64")]
pub const CACHE_LINE_SIZE: usize = 64;

/// Cache line size for the target architecture.
///
/// Apple Silicon and several ARM server cores prefetch line pairs, so 128
/// bytes avoids false sharing there.
#[cfg(target_arch = "aarch64")]
pub const CACHE_LINE_SIZE: usize = 128;

/// Cache line size for the target architecture.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const CACHE_LINE_SIZE: usize = 64;

/// Hints to the CPU that we are in a spin-wait loop.
///
/// Lowers power draw and frees pipeline resources for a sibling
/// hyper-thread while a CAS loop retries.
#[inline(always)]
pub fn cpu_relax() {
    std::hint::spin_loop();
}

/// Wrapper that aligns its contents to a cache line.
#[cfg_attr(target_arch = "aarch64", repr(C, align(128)))]
#[cfg_attr(not(target_arch = "aarch64"), repr(C, align(64)))]
pub(crate) struct CacheAligned<T> {
    pub(crate) value: T,
}

impl<T> CacheAligned<T> {
    #[inline(always)]
    pub(crate) const fn new(value: T) -> Self {
        Self { value }
    }
}

impl<T: Default> Default for CacheAligned<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CacheAligned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.value.fmt(f)
    }
}

/// Exponential backoff for contended CAS loops.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    step: u32,
    max_step: u32,
}

impl Backoff {
    pub(crate) fn new(max_step: u32) -> Self {
        Self { step: 0, max_step }
    }

    #[inline]
    pub(crate) fn backoff(&mut self) {
        if self.step < 4 {
            // 1, 2, 4, 8 pause iterations
            for _ in 0..(1u32 << self.step) {
                cpu_relax();
            }
        } else {
            std::thread::yield_now();
        }
        self.step = (self.step + 1).min(self.max_step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    #[test]
    fn test_cache_line_size() {
        assert!(CACHE_LINE_SIZE >= 32);
        assert!(CACHE_LINE_SIZE <= 256);
        assert!(CACHE_LINE_SIZE.is_power_of_two());
    }

    #[test]
    fn test_cache_aligned() {
        let aligned = CacheAligned::new(AtomicU64::new(7));
        assert_eq!(std::mem::align_of_val(&aligned), CACHE_LINE_SIZE);
        assert_eq!(aligned.value.load(std::sync::atomic::Ordering::Relaxed), 7);
    }

    #[test]
    fn test_backoff_saturates() {
        let mut backoff = Backoff::new(3);
        for _ in 0..10 {
            backoff.backoff();
        }
        assert_eq!(backoff.step, 3);
    }
}
