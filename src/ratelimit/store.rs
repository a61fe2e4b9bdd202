//! Window stores: per-key counter state with expiry.

use std::mem::size_of;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::counter::{CounterEntry, WindowHit};
use crate::error::Result;

/// Per-entry bookkeeping beyond the key bytes themselves.
const ENTRY_OVERHEAD_BYTES: usize = size_of::<String>() + size_of::<CounterEntry>();

/// Diagnostic view of a store. Never consulted when making decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of keys currently tracked, live or stale
    pub tracked_keys: usize,
    /// Rough estimate of the heap used by tracked entries
    pub approx_memory_bytes: usize,
}

/// Trait for counter stores backing a limiter or slow-down modulator.
///
/// Each named policy owns its own store instances; a store is never shared
/// between policies.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Record one hit for `key` and report the state of its window.
    ///
    /// The read-modify-write must be atomic per key.
    async fn increment(&self, key: &str) -> Result<WindowHit>;

    /// Forget everything recorded for `key`.
    async fn reset_key(&self, key: &str) -> Result<()>;

    /// Drop entries whose window has closed. Returns how many were removed.
    fn sweep(&self) -> usize;

    /// Get the diagnostic stats for this store.
    fn stats(&self) -> StoreStats;

    /// The window length this store counts over.
    fn window(&self) -> Duration;
}

/// In-process window store for single-instance deployments.
///
/// Entries live in a sharded concurrent map. An increment holds the shard's
/// write lock for the whole read-modify-write, so concurrent hits on the same
/// key from different worker threads are never lost.
#[derive(Debug)]
pub struct MemoryWindowStore {
    /// Counter entries indexed by caller key
    entries: DashMap<String, CounterEntry>,
    /// Length of every window opened by this store
    window: Duration,
    clock: Arc<dyn Clock>,
}

impl MemoryWindowStore {
    /// Create a store using the system clock.
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            window,
            clock,
        }
    }

    /// Get the current count for a key, if it has a live window.
    pub fn current_count(&self, key: &str) -> Option<u64> {
        let now = self.clock.now_millis();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count())
    }

    /// Get the number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl WindowStore for MemoryWindowStore {
    async fn increment(&self, key: &str) -> Result<WindowHit> {
        let now = self.clock.now_millis();

        let hit = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => occupied.get_mut().register_hit(now, self.window),
            Entry::Vacant(vacant) => {
                let entry = vacant.insert(CounterEntry::open(now, self.window));
                entry.snapshot(now)
            }
        };

        trace!(
            key = key,
            total_hits = hit.total_hits,
            reset_at_ms = hit.reset_at_ms,
            "Recorded hit"
        );

        Ok(hit)
    }

    async fn reset_key(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!(removed = removed, remaining = self.entries.len(), "Swept expired windows");
        }
        removed
    }

    fn stats(&self) -> StoreStats {
        let key_bytes: usize = self.entries.iter().map(|entry| entry.key().len()).sum();
        let tracked_keys = self.entries.len();
        StoreStats {
            tracked_keys,
            approx_memory_bytes: key_bytes + tracked_keys * ENTRY_OVERHEAD_BYTES,
        }
    }

    fn window(&self) -> Duration {
        self.window
    }
}
