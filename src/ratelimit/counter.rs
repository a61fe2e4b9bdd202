//! Fixed-window counter state.

use std::time::Duration;

/// Counter state for a single key within one fixed window.
///
/// The count only grows while the window is open. Once `window_reset_at_ms`
/// has passed the entry is stale: the next hit starts a fresh window and the
/// sweeper may drop it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterEntry {
    /// Hits recorded since the window opened
    count: u64,
    /// Epoch milliseconds at which the window closes
    window_reset_at_ms: u64,
}

/// Outcome of recording one hit against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHit {
    /// Hits in the current window, including this one
    pub total_hits: u64,
    /// Epoch milliseconds at which the current window closes
    pub reset_at_ms: u64,
    /// Whole seconds until the window closes, rounded up
    pub time_to_expire_secs: u64,
}

impl CounterEntry {
    /// Open a new window at `now_ms` with a single hit recorded.
    pub fn open(now_ms: u64, window: Duration) -> Self {
        Self {
            count: 1,
            window_reset_at_ms: now_ms.saturating_add(window.as_millis() as u64),
        }
    }

    /// Whether the window has closed at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.window_reset_at_ms
    }

    /// Record a hit, opening a fresh window first if this one has closed.
    pub fn register_hit(&mut self, now_ms: u64, window: Duration) -> WindowHit {
        if self.is_expired(now_ms) {
            *self = Self::open(now_ms, window);
        } else {
            self.count += 1;
        }
        self.snapshot(now_ms)
    }

    /// Get the current count.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Get the epoch millisecond at which the window closes.
    pub fn window_reset_at_ms(&self) -> u64 {
        self.window_reset_at_ms
    }

    /// Describe the entry as seen at `now_ms`.
    pub fn snapshot(&self, now_ms: u64) -> WindowHit {
        let remaining_ms = self.window_reset_at_ms.saturating_sub(now_ms);
        WindowHit {
            total_hits: self.count,
            reset_at_ms: self.window_reset_at_ms,
            time_to_expire_secs: remaining_ms.div_ceil(1000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_open_starts_at_one() {
        let entry = CounterEntry::open(10_000, HOUR);

        assert_eq!(entry.count(), 1);
        assert_eq!(entry.window_reset_at_ms(), 10_000 + 3_600_000);
        assert_eq!(entry.snapshot(10_000).time_to_expire_secs, 3600);
    }

    #[test]
    fn test_hits_within_window_accumulate() {
        let mut entry = CounterEntry::open(0, HOUR);

        for expected in 2..=5 {
            let hit = entry.register_hit(1_000, HOUR);
            assert_eq!(hit.total_hits, expected);
            assert_eq!(hit.reset_at_ms, 3_600_000);
        }
    }

    #[test]
    fn test_hit_after_expiry_reopens_window() {
        let mut entry = CounterEntry::open(0, HOUR);
        entry.register_hit(10, HOUR);

        let hit = entry.register_hit(3_600_000, HOUR);

        assert_eq!(hit.total_hits, 1);
        assert_eq!(hit.reset_at_ms, 7_200_000);
    }

    #[test]
    fn test_time_to_expire_rounds_up() {
        let entry = CounterEntry::open(0, Duration::from_millis(1_500));

        assert_eq!(entry.snapshot(0).time_to_expire_secs, 2);
        assert_eq!(entry.snapshot(1_499).time_to_expire_secs, 1);
        assert_eq!(entry.snapshot(1_500).time_to_expire_secs, 0);
    }

    #[test]
    fn test_expiry_boundary() {
        let entry = CounterEntry::open(0, Duration::from_secs(1));

        assert!(!entry.is_expired(999));
        assert!(entry.is_expired(1_000));
    }
}
