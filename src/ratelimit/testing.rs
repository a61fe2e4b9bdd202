//! Store doubles for exercising fail-open paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::counter::WindowHit;
use super::store::{StoreStats, WindowStore};
use crate::error::{Result, TurnstileError};

/// A store whose every increment fails.
#[derive(Debug)]
pub(crate) struct FailingStore {
    window: Duration,
    attempts: AtomicU64,
}

impl FailingStore {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            window,
            attempts: AtomicU64::new(0),
        }
    }

    pub(crate) fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WindowStore for FailingStore {
    async fn increment(&self, _key: &str) -> Result<WindowHit> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TurnstileError::Store("counter backend unavailable".to_string()))
    }

    async fn reset_key(&self, _key: &str) -> Result<()> {
        Err(TurnstileError::Store("counter backend unavailable".to_string()))
    }

    fn sweep(&self) -> usize {
        0
    }

    fn stats(&self) -> StoreStats {
        StoreStats::default()
    }

    fn window(&self) -> Duration {
        self.window
    }
}
