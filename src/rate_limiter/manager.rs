//! # Per-Client Rate Limiter
//!
//! A registry that hands every client identity its own [`TokenBucket`],
//! created on first use with the registry's shared configuration.
//!
//! ```text
//!     Client Requests:
//!     "tenant-a" ──┐
//!     "tenant-b" ──┼──► PerClientRateLimiter ──► one TokenBucket per key
//!     "tenant-c" ──┘            │
//!                               ▼
//!                      ┌─────────────────┐
//!                      │  DashMap        │
//!                      │  ┌───────────┐  │
//!                      │  │ key → TB  │  │  shard read lock:  lookup
//!                      │  │ key → TB  │  │  shard write lock: first insert
//!                      │  └───────────┘  │
//!                      └─────────────────┘
//! ```
//!
//! ## Creation
//!
//! Lookups take the shard's read lock, so clients that already have a
//! bucket never contend with each other. A miss falls through to the entry
//! API, which takes the shard's write lock and checks again before
//! inserting. Concurrent first calls for the same key therefore construct
//! exactly one bucket.
//!
//! Buckets are never evicted automatically; [`PerClientRateLimiter::clear`]
//! is the only way to drop them.

use super::{config::TokenBucketConfig, token_bucket::TokenBucket};
use crate::atomic::AtomicCounter;
use crate::error::{Result, WorkgateError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Expected number of distinct clients, used to pre-size the map.
const INITIAL_CLIENT_CAPACITY: usize = 256;

/// Registry of token buckets keyed by client identity.
///
/// ```rust
/// use workgate::{PerClientRateLimiter, TokenBucketConfig};
/// use std::time::Duration;
///
/// let limiter = PerClientRateLimiter::new(TokenBucketConfig::new(2, Duration::from_secs(60)))
///     .unwrap();
///
/// assert!(limiter.allow(&"alice"));
/// assert!(limiter.allow(&"alice"));
/// assert!(!limiter.allow(&"alice"));
///
/// // Client `bob` has a separate budget.
/// assert!(limiter.allow(&"bob"));
/// assert_eq!(limiter.active_clients(), 2);
/// ```
pub struct PerClientRateLimiter<K>
where
    K: Eq + Hash + Clone + Debug,
{
    limiters: DashMap<K, Arc<TokenBucket>, ahash::RandomState>,

    /// Template for every bucket the registry creates.
    config: TokenBucketConfig,

    total_created: AtomicCounter,
    total_cleared: AtomicCounter,
    total_allowed: AtomicCounter,
    total_rejected: AtomicCounter,
}

impl<K> PerClientRateLimiter<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Creates an empty registry whose buckets all use `config`.
    ///
    /// # Errors
    ///
    /// [`WorkgateError::InvalidConfig`] if `config` is rejected.
    pub fn new(config: TokenBucketConfig) -> Result<Self> {
        config.validate().map_err(WorkgateError::InvalidConfig)?;

        // More shards = less contention, capped to keep the map small.
        let num_shards = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(8)
            .next_power_of_two()
            .clamp(2, 64);

        Ok(Self {
            limiters: DashMap::with_capacity_and_hasher_and_shard_amount(
                INITIAL_CLIENT_CAPACITY,
                ahash::RandomState::new(),
                num_shards,
            ),
            config,
            total_created: AtomicCounter::new(0),
            total_cleared: AtomicCounter::new(0),
            total_allowed: AtomicCounter::new(0),
            total_rejected: AtomicCounter::new(0),
        })
    }

    /// Shorthand for a registry of `capacity`-token buckets refilled every `refill_interval`.
    pub fn with_rate(capacity: u64, refill_interval: Duration) -> Result<Self> {
        Self::new(TokenBucketConfig::new(capacity, refill_interval))
    }

    /// Returns the client's bucket, creating it on first use.
    pub fn get_limiter(&self, client: &K) -> Result<Arc<TokenBucket>> {
        // Fast path: shard read lock only.
        if let Some(limiter) = self.limiters.get(client) {
            return Ok(limiter.clone());
        }

        // Slow path: shard write lock, then look again.
        match self.limiters.entry(client.clone()) {
            Entry::Occupied(occupied) => Ok(occupied.get().clone()),
            Entry::Vacant(vacant) => {
                let limiter = Arc::new(TokenBucket::with_config(self.config.clone())?);
                vacant.insert(limiter.clone());

                let created = self.total_created.increment();
                debug!("Created rate limiter for client {:?} (total: {})", client, created);

                Ok(limiter)
            }
        }
    }

    /// Admits one request for `client` if its bucket has a token.
    pub fn allow(&self, client: &K) -> bool {
        let allowed = self
            .get_limiter(client)
            .map(|limiter| limiter.allow())
            .unwrap_or(false);

        if allowed {
            self.total_allowed.increment();
        } else {
            self.total_rejected.increment();
        }
        allowed
    }

    /// Blocks until `client`'s bucket yields a token.
    ///
    /// # Errors
    ///
    /// Whatever [`TokenBucket::wait`] returns for the client's bucket.
    pub fn wait(&self, client: &K) -> Result<()> {
        self.get_limiter(client)?.wait()?;
        self.total_allowed.increment();
        Ok(())
    }

    /// Number of clients that currently have a bucket.
    #[inline]
    pub fn active_clients(&self) -> usize {
        self.limiters.len()
    }

    /// Number of clients whose bucket has not been touched for `idle`.
    pub fn idle_clients(&self, idle: Duration) -> usize {
        self.limiters
            .iter()
            .filter(|entry| entry.value().is_inactive(idle))
            .count()
    }

    /// The configuration every client bucket is created with.
    #[inline]
    pub fn config(&self) -> &TokenBucketConfig {
        &self.config
    }

    /// Registry-wide counters.
    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            active_clients: self.active_clients(),
            total_created: self.total_created.get().max(0) as u64,
            total_cleared: self.total_cleared.get().max(0) as u64,
            total_allowed: self.total_allowed.get().max(0) as u64,
            total_rejected: self.total_rejected.get().max(0) as u64,
        }
    }

    /// Drops every client bucket.
    ///
    /// Handles returned earlier by [`get_limiter`](Self::get_limiter) stay
    /// usable but are no longer tracked; the next call for that client
    /// creates a fresh bucket.
    pub fn clear(&self) {
        let count = self.limiters.len();
        self.limiters.clear();
        self.total_cleared.add(count as i64);
        info!("Cleared {} client rate limiters", count);
    }
}

impl<K> Debug for PerClientRateLimiter<K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerClientRateLimiter")
            .field("active_clients", &self.active_clients())
            .field("capacity", &self.config.capacity)
            .field("refill_interval", &self.config.refill_interval)
            .finish()
    }
}

/// Counters of a [`PerClientRateLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    /// Clients that currently have a bucket.
    pub active_clients: usize,

    /// Buckets created since the registry was built.
    pub total_created: u64,

    /// Buckets dropped by `clear`.
    pub total_cleared: u64,

    /// Requests admitted across all clients.
    pub total_allowed: u64,

    /// Requests rejected across all clients.
    pub total_rejected: u64,
}

impl ManagerStats {
    /// Fraction of requests rejected (0.0 when nothing was requested).
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_allowed + self.total_rejected;
        if total == 0 {
            0.0
        } else {
            self.total_rejected as f64 / total as f64
        }
    }

    /// Multi-line, human-readable report.
    pub fn summary(&self) -> String {
        format!(
            "Per-Client Rate Limiter Stats:\n\
             ├─ Clients:\n\
             │  ├─ Active Clients: {}\n\
             │  ├─ Total Created: {}\n\
             │  └─ Total Cleared: {}\n\
             └─ Requests:\n\
                ├─ Allowed: {}\n\
                ├─ Rejected: {}\n\
                └─ Rejection Rate: {:.2}%",
            self.active_clients,
            self.total_created,
            self.total_cleared,
            self.total_allowed,
            self.total_rejected,
            self.rejection_rate() * 100.0,
        )
    }
}

impl std::fmt::Display for ManagerStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}
