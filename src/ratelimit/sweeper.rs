//! Background eviction of expired windows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::store::WindowStore;

/// Handle to the background sweep task.
///
/// The task stops when [`Sweeper::shutdown`] is called or the handle is
/// dropped.
#[derive(Debug)]
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Sweep `stores` every `period` on the current tokio runtime.
    ///
    /// Sweeps run one at a time on a single task; a slow sweep delays the
    /// next tick rather than overlapping with it.
    pub fn spawn(stores: Vec<Arc<dyn WindowStore>>, period: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        info!(
            stores = stores.len(),
            interval_ms = period.as_millis() as u64,
            "Starting window sweeper"
        );

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed: usize = stores.iter().map(|store| store.sweep()).sum();
                        debug!(removed = removed, "Window sweep completed");
                    }
                    // Fires on shutdown and when the handle is dropped.
                    _ = stop.changed() => break,
                }
            }

            info!("Window sweeper stopped");
        });

        Self { shutdown, handle }
    }

    /// Stop sweeping and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::store::MemoryWindowStore;

    const WINDOW: Duration = Duration::from_secs(12);

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_expired_entries() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryWindowStore::with_clock(WINDOW, Arc::new(clock.clone())));
        store.increment("user:a").await.unwrap();
        store.increment("user:b").await.unwrap();

        let stores: Vec<Arc<dyn WindowStore>> = vec![store.clone()];
        let sweeper = Sweeper::spawn(stores, Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.len(), 2);

        clock.advance(WINDOW);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(store.is_empty());

        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_live_entries() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryWindowStore::with_clock(WINDOW, Arc::new(clock.clone())));
        store.increment("user:stale").await.unwrap();
        clock.advance(Duration::from_secs(6));
        store.increment("user:live").await.unwrap();

        let stores: Vec<Arc<dyn WindowStore>> = vec![store.clone()];
        let sweeper = Sweeper::spawn(stores, Duration::from_secs(1));

        clock.advance(Duration::from_secs(6));
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(store.len(), 1);
        assert_eq!(store.current_count("user:live"), Some(1));

        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let clock = ManualClock::new(0);
        let store = Arc::new(MemoryWindowStore::with_clock(WINDOW, Arc::new(clock.clone())));

        let stores: Vec<Arc<dyn WindowStore>> = vec![store.clone()];
        let sweeper = Sweeper::spawn(stores, Duration::from_secs(1));
        sweeper.shutdown().await;

        store.increment("user:a").await.unwrap();
        clock.advance(WINDOW);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(store.len(), 1);
    }
}
