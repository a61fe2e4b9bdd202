//! Hard request limits over a fixed window.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::counter::WindowHit;
use super::key::{resolve_key, KeyFn, RequestContext};
use super::store::{StoreStats, WindowStore};
use crate::error::{Result, TurnstileError};

/// Error code carried in every rejection body.
pub const RATE_LIMIT_EXCEEDED: &str = "Rate limit exceeded";

/// Immutable limit settings for one named limiter.
#[derive(Clone)]
pub struct Policy {
    /// Name used in logs and stats
    pub name: &'static str,
    /// Requests admitted per window
    pub max: u64,
    /// Window length
    pub window: Duration,
    /// Human-readable message returned with rejections
    pub message: String,
    /// How a request maps to a quota key
    pub key_fn: KeyFn,
}

impl Policy {
    /// Create a policy using the default key derivation.
    ///
    /// Fails if `max` or `window` is zero.
    pub fn new(
        name: &'static str,
        max: u64,
        window: Duration,
        message: impl Into<String>,
    ) -> Result<Self> {
        if max == 0 {
            return Err(TurnstileError::Config(format!(
                "policy '{}': max must be positive",
                name
            )));
        }
        if window.is_zero() {
            return Err(TurnstileError::Config(format!(
                "policy '{}': window must be positive",
                name
            )));
        }

        Ok(Self {
            name,
            max,
            window,
            message: message.into(),
            key_fn: resolve_key,
        })
    }

    /// Replace the key derivation.
    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("max", &self.max)
            .field("window", &self.window)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// Outcome of a limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Requests allowed per window
    pub limit: u64,
    /// Hits recorded in the current window, including this one
    pub total_hits: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Epoch milliseconds at which the window closes; zero when unknown
    pub reset_at_ms: u64,
    /// Seconds to wait before retrying, set only on rejection
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    /// Judge a recorded hit against `limit`.
    pub fn from_hit(limit: u64, hit: WindowHit) -> Self {
        let admitted = hit.total_hits <= limit;
        Self {
            admitted,
            limit,
            total_hits: hit.total_hits,
            remaining: limit.saturating_sub(hit.total_hits),
            reset_at_ms: hit.reset_at_ms,
            retry_after_secs: (!admitted).then_some(hit.time_to_expire_secs),
        }
    }

    /// Decision used when the store could not be consulted.
    ///
    /// The window reset is unknown and reported as zero.
    pub fn fail_open(limit: u64) -> Self {
        Self {
            admitted: true,
            limit,
            total_hits: 0,
            remaining: limit,
            reset_at_ms: 0,
            retry_after_secs: None,
        }
    }

    /// Window reset as epoch seconds, rounded up.
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }
}

/// A rejected request: the decision plus the message for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Name of the policy that rejected the request
    pub policy: &'static str,
    /// Message for the caller
    pub message: String,
    /// The decision that caused the rejection
    pub decision: Decision,
}

impl Rejection {
    /// Seconds the caller should wait before retrying.
    pub fn retry_after_secs(&self) -> u64 {
        self.decision.retry_after_secs.unwrap_or_default()
    }
}

/// Rate limiter applying one policy over its own window store.
pub struct RateLimiter {
    policy: Policy,
    store: Arc<dyn WindowStore>,
}

impl RateLimiter {
    /// Create a limiter. The store must not be shared with another policy.
    pub fn new(policy: Policy, store: Arc<dyn WindowStore>) -> Self {
        Self { policy, store }
    }

    /// Count the request against the caller's quota and decide.
    ///
    /// Store faults are logged and the request is admitted.
    pub async fn check(&self, ctx: &RequestContext) -> Decision {
        let key = (self.policy.key_fn)(ctx);

        match self.store.increment(&key).await {
            Ok(hit) => {
                let decision = Decision::from_hit(self.policy.max, hit);
                if !decision.admitted {
                    debug!(
                        policy = self.policy.name,
                        key = %key,
                        total_hits = decision.total_hits,
                        retry_after = ?decision.retry_after_secs,
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Err(e) => {
                warn!(
                    policy = self.policy.name,
                    key = %key,
                    error = %e,
                    "Rate limit store failed, admitting request"
                );
                Decision::fail_open(self.policy.max)
            }
        }
    }

    /// Build the rejection for a decision, if it was not admitted.
    pub fn rejection(&self, decision: &Decision) -> Option<Rejection> {
        (!decision.admitted).then(|| Rejection {
            policy: self.policy.name,
            message: self.policy.message.clone(),
            decision: *decision,
        })
    }

    /// Forget a caller's quota under this policy.
    pub async fn reset(&self, ctx: &RequestContext) -> Result<()> {
        let key = (self.policy.key_fn)(ctx);
        self.store.reset_key(&key).await
    }

    /// Get the policy for this limiter.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Get the store backing this limiter.
    pub fn store(&self) -> &Arc<dyn WindowStore> {
        &self.store
    }

    /// Get the diagnostic stats of the backing store.
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
