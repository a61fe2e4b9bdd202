//! Progressive slow-down for callers past a soft threshold.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::key::{resolve_key, KeyFn, RequestContext};
use super::store::{StoreStats, WindowStore};
use crate::error::{Result, TurnstileError};

/// Delay settings for a slow-down modulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlowDownPolicy {
    /// Requests per window served without delay
    pub delay_after: u64,
    /// Extra delay added for each request past `delay_after`
    pub delay_step: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl SlowDownPolicy {
    /// Create a policy, failing on a zero step or a cap below one step.
    pub fn new(delay_after: u64, delay_step: Duration, max_delay: Duration) -> Result<Self> {
        if delay_step.is_zero() {
            return Err(TurnstileError::Config(
                "slow-down delay step must be positive".to_string(),
            ));
        }
        if max_delay < delay_step {
            return Err(TurnstileError::Config(format!(
                "slow-down max delay {:?} is below the delay step {:?}",
                max_delay, delay_step
            )));
        }

        Ok(Self {
            delay_after,
            delay_step,
            max_delay,
        })
    }

    /// Delay owed by the `total_hits`-th request of a window.
    ///
    /// Zero up to `delay_after`, then one step per extra request, capped.
    pub fn delay_for(&self, total_hits: u64) -> Duration {
        let excess = total_hits.saturating_sub(self.delay_after);
        if excess == 0 {
            return Duration::ZERO;
        }

        let steps = u32::try_from(excess).unwrap_or(u32::MAX);
        self.delay_step
            .checked_mul(steps)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Computes artificial latency from a caller's recent request count.
///
/// Counts independently of the hard limiter, in a store of its own.
pub struct SlowDown {
    name: &'static str,
    policy: SlowDownPolicy,
    store: Arc<dyn WindowStore>,
    key_fn: KeyFn,
}

impl SlowDown {
    /// Create a modulator using the default key derivation.
    pub fn new(name: &'static str, policy: SlowDownPolicy, store: Arc<dyn WindowStore>) -> Self {
        Self {
            name,
            policy,
            store,
            key_fn: resolve_key,
        }
    }

    /// Replace the key derivation; use the paired limiter's.
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    /// Record the request and return how long the caller should wait.
    ///
    /// Never sleeps. Store faults are logged and cost no delay.
    pub async fn delay(&self, ctx: &RequestContext) -> Duration {
        let key = (self.key_fn)(ctx);

        match self.store.increment(&key).await {
            Ok(hit) => {
                let delay = self.policy.delay_for(hit.total_hits);
                if !delay.is_zero() {
                    debug!(
                        policy = self.name,
                        key = %key,
                        total_hits = hit.total_hits,
                        delay_ms = delay.as_millis() as u64,
                        "Slowing down caller"
                    );
                }
                delay
            }
            Err(e) => {
                warn!(
                    policy = self.name,
                    key = %key,
                    error = %e,
                    "Slow-down store failed, skipping delay"
                );
                Duration::ZERO
            }
        }
    }

    /// Compute the delay and suspend the current task for it.
    pub async fn throttle(&self, ctx: &RequestContext) -> Duration {
        let delay = self.delay(ctx).await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }

    /// Get the delay settings.
    pub fn policy(&self) -> &SlowDownPolicy {
        &self.policy
    }

    /// Get the store backing this modulator.
    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    /// Get the diagnostic stats of the backing store.
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }
}

impl fmt::Debug for SlowDown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlowDown")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
