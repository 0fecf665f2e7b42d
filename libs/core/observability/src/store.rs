//! Cached pricing/inventory store
//!
//! The dominant pattern in this exporter: a collector owns a store whose
//! content is expensive to build (paginated provider APIs), so scrapes are
//! served from a published snapshot and the content is rebuilt at most
//! once per refresh interval. Only one refresh runs at a time; a
//! successful rebuild replaces the published content atomically, a failed
//! one retains the previous content until the next attempt.

use std::future::Future;
use std::sync::{RwLock, RwLockReadGuard};

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct Clock {
    last_refresh: Option<DateTime<Utc>>,
    next_refresh: DateTime<Utc>,
}

/// A concurrently readable snapshot with deadline-gated refresh.
///
/// Readers take the read lock for the duration of a lookup; the lock is
/// never held across an await point. Refreshes build a full replacement
/// value outside any lock and swap it in under the write lock.
pub struct CachedStore<T> {
    data: RwLock<T>,
    clock: RwLock<Clock>,
    refresh_gate: Mutex<()>,
    interval: TimeDelta,
}

impl<T> CachedStore<T> {
    pub fn new(initial: T, interval: TimeDelta) -> Self {
        Self {
            data: RwLock::new(initial),
            clock: RwLock::new(Clock {
                last_refresh: None,
                next_refresh: DateTime::<Utc>::MIN_UTC,
            }),
            refresh_gate: Mutex::new(()),
            interval,
        }
    }

    /// Read access to the published snapshot. Poisoning is recovered: a
    /// panicked writer never blocks future scrapes.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// When the store was last successfully populated, if ever.
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.read_clock().last_refresh
    }

    /// The deadline after which the next scrape triggers a refresh.
    pub fn next_refresh(&self) -> DateTime<Utc> {
        self.read_clock().next_refresh
    }

    /// Whether the store has ever been populated.
    pub fn ready(&self) -> bool {
        self.read_clock().last_refresh.is_some()
    }

    fn read_clock(&self) -> Clock {
        *self
            .clock
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rebuild the content via `populate` if the store is unpopulated or
    /// past its deadline. Returns `Ok(true)` when a refresh ran,
    /// `Ok(false)` on a cache hit. Concurrent callers serialize on the
    /// refresh gate; whoever arrives second sees fresh content and hits
    /// the cache.
    pub async fn refresh_if_stale<E, F, Fut>(&self, populate: F) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _gate = self.refresh_gate.lock().await;

        let clock = self.read_clock();
        if clock.last_refresh.is_some() && Utc::now() < clock.next_refresh {
            return Ok(false);
        }

        // Build the replacement outside any lock; on failure the previous
        // content stays published.
        let fresh = populate().await?;

        let now = Utc::now();
        {
            let mut data = self
                .data
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *data = fresh;
        }
        {
            let mut clock = self
                .clock
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            clock.last_refresh = Some(now);
            clock.next_refresh = now + self.interval;
        }
        Ok(true)
    }
}
