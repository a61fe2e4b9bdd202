//! The fixed table of named policies bound to route families.
//!
//! The registry is built once at startup and never mutated. Every limiter and
//! every slow-down modulator gets a store of its own, so quotas under
//! different policies never interfere.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::clock::{Clock, SystemClock};
use super::key::RequestContext;
use super::limiter::{Decision, Policy, RateLimiter, Rejection};
use super::slowdown::SlowDown;
use super::store::{MemoryWindowStore, StoreStats, WindowStore};
use super::sweeper::Sweeper;
use crate::config::{PoliciesConfig, PolicySpec};
use crate::error::{Result, TurnstileError};

/// Sweeps run this many times per shortest window.
const SWEEPS_PER_WINDOW: u32 = 12;

/// Names of the route-family policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyName {
    /// Every public API route
    GeneralApi,
    /// Audit job submission
    AuditSubmission,
    /// Credit purchase and deduction
    CreditOperations,
    /// AI-assisted analysis
    AiAnalysis,
}

impl PolicyName {
    /// All policies, in registry order.
    pub const ALL: [PolicyName; 4] = [
        PolicyName::GeneralApi,
        PolicyName::AuditSubmission,
        PolicyName::CreditOperations,
        PolicyName::AiAnalysis,
    ];

    /// Get the policy name as used in configuration and URLs.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyName::GeneralApi => "general_api",
            PolicyName::AuditSubmission => "audit_submission",
            PolicyName::CreditOperations => "credit_operations",
            PolicyName::AiAnalysis => "ai_analysis",
        }
    }

    fn index(&self) -> usize {
        match self {
            PolicyName::GeneralApi => 0,
            PolicyName::AuditSubmission => 1,
            PolicyName::CreditOperations => 2,
            PolicyName::AiAnalysis => 3,
        }
    }

    fn spec<'a>(&self, config: &'a PoliciesConfig) -> &'a PolicySpec {
        match self {
            PolicyName::GeneralApi => &config.general_api,
            PolicyName::AuditSubmission => &config.audit_submission,
            PolicyName::CreditOperations => &config.credit_operations,
            PolicyName::AiAnalysis => &config.ai_analysis,
        }
    }
}

impl fmt::Display for PolicyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyName {
    type Err = TurnstileError;

    fn from_str(s: &str) -> Result<Self> {
        PolicyName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| TurnstileError::Config(format!("unknown policy '{}'", s)))
    }
}

/// A request that passed its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// The limiter's decision, for quota headers
    pub decision: Decision,
    /// Slow-down delay the request waited out
    pub delay: Duration,
}

/// A limiter and its optional slow-down modulator.
#[derive(Debug)]
pub struct PolicyEntry {
    limiter: RateLimiter,
    slowdown: Option<SlowDown>,
}

impl PolicyEntry {
    /// Pair a limiter with an optional modulator.
    pub fn new(limiter: RateLimiter, slowdown: Option<SlowDown>) -> Self {
        Self { limiter, slowdown }
    }

    /// Get the hard limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Get the slow-down modulator, if configured.
    pub fn slowdown(&self) -> Option<&SlowDown> {
        self.slowdown.as_ref()
    }

    /// Run the limiter and, only if it admits, wait out the slow-down delay.
    ///
    /// A rejected request is never delayed.
    pub async fn admit(&self, ctx: &RequestContext) -> std::result::Result<Admission, Rejection> {
        let decision = self.limiter.check(ctx).await;
        if let Some(rejection) = self.limiter.rejection(&decision) {
            return Err(rejection);
        }

        let delay = match &self.slowdown {
            Some(slowdown) => slowdown.throttle(ctx).await,
            None => Duration::ZERO,
        };

        Ok(Admission { decision, delay })
    }

    fn stores(&self) -> impl Iterator<Item = &Arc<dyn WindowStore>> {
        std::iter::once(self.limiter.store()).chain(self.slowdown.iter().map(|slowdown| slowdown.store()))
    }
}

/// Diagnostic stats for one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyStats {
    /// Policy name
    pub policy: PolicyName,
    /// Keys tracked by the hard limiter
    pub limiter: StoreStats,
    /// Keys tracked by the slow-down modulator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slow_down: Option<StoreStats>,
}

/// Process-wide table of named policies.
#[derive(Debug)]
pub struct PolicyRegistry {
    /// Entries in `PolicyName::ALL` order
    entries: Vec<PolicyEntry>,
    sweep_interval: Duration,
}

impl PolicyRegistry {
    /// Build the registry with the built-in limits.
    pub fn standard() -> Result<Self> {
        Self::from_config(&PoliciesConfig::default())
    }

    /// Build the registry from configuration, with in-memory stores.
    pub fn from_config(config: &PoliciesConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build the registry with in-memory stores reading time from `clock`.
    pub fn with_clock(config: &PoliciesConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_store_factory(config, |window| -> Arc<dyn WindowStore> {
            Arc::new(MemoryWindowStore::with_clock(window, Arc::clone(&clock)))
        })
    }

    /// Build the registry, creating one fresh store per limiter and per
    /// modulator through `new_store`.
    ///
    /// Fails on any invalid policy.
    pub fn with_store_factory<F>(config: &PoliciesConfig, new_store: F) -> Result<Self>
    where
        F: Fn(Duration) -> Arc<dyn WindowStore>,
    {
        let mut entries = Vec::with_capacity(PolicyName::ALL.len());

        for name in PolicyName::ALL {
            let spec = name.spec(config);
            let policy =
                Policy::new(name.as_str(), spec.max, spec.window(), spec.message.clone())?;
            let slowdown = spec
                .slow_down
                .map(|sd| sd.to_policy())
                .transpose()?
                .map(|sd| {
                    SlowDown::new(name.as_str(), sd, new_store(spec.window()))
                        .with_key_fn(policy.key_fn)
                });

            info!(
                policy = %name,
                max = spec.max,
                window_ms = spec.window_ms,
                slow_down = slowdown.is_some(),
                "Registered rate limit policy"
            );

            let limiter = RateLimiter::new(policy, new_store(spec.window()));
            entries.push(PolicyEntry::new(limiter, slowdown));
        }

        let shortest = entries
            .iter()
            .flat_map(|entry| entry.stores())
            .map(|store| store.window())
            .min()
            .unwrap_or(Duration::from_secs(3600));
        let sweep_interval = shortest / SWEEPS_PER_WINDOW;

        Ok(Self {
            entries,
            sweep_interval,
        })
    }

    /// Get the entry for a policy.
    pub fn get(&self, name: PolicyName) -> &PolicyEntry {
        &self.entries[name.index()]
    }

    /// Count a request against a policy's hard limit.
    pub async fn check(&self, name: PolicyName, ctx: &RequestContext) -> Decision {
        self.get(name).limiter().check(ctx).await
    }

    /// Slow-down delay owed under a policy; zero if it has no modulator.
    pub async fn delay(&self, name: PolicyName, ctx: &RequestContext) -> Duration {
        match self.get(name).slowdown() {
            Some(slowdown) => slowdown.delay(ctx).await,
            None => Duration::ZERO,
        }
    }

    /// Apply a policy: hard limit first, then any slow-down delay.
    pub async fn admit(
        &self,
        name: PolicyName,
        ctx: &RequestContext,
    ) -> std::result::Result<Admission, Rejection> {
        self.get(name).admit(ctx).await
    }

    /// Per-policy store stats.
    pub fn stats(&self) -> Vec<PolicyStats> {
        PolicyName::ALL
            .into_iter()
            .map(|name| {
                let entry = self.get(name);
                PolicyStats {
                    policy: name,
                    limiter: entry.limiter().stats(),
                    slow_down: entry.slowdown().map(SlowDown::stats),
                }
            })
            .collect()
    }

    /// Every store in the registry.
    pub fn stores(&self) -> Vec<Arc<dyn WindowStore>> {
        self.entries
            .iter()
            .flat_map(|entry| entry.stores())
            .cloned()
            .collect()
    }

    /// Sweep every store once. Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        self.entries
            .iter()
            .flat_map(|entry| entry.stores())
            .map(|store| store.sweep())
            .sum()
    }

    /// Interval between background sweeps, well below the shortest window.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Start the background sweeper over every store in the registry.
    pub fn spawn_sweeper(&self) -> Sweeper {
        Sweeper::spawn(self.stores(), self.sweep_interval)
    }
}
