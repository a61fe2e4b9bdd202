//! Rate limiting logic and state management.

mod clock;
mod counter;
mod key;
mod limiter;
mod registry;
mod slowdown;
mod store;
mod sweeper;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CounterEntry, WindowHit};
pub use key::{resolve_key, ClientKey, KeyFn, RequestContext};
pub use limiter::{Decision, Policy, RateLimiter, Rejection, RATE_LIMIT_EXCEEDED};
pub use registry::{Admission, PolicyEntry, PolicyName, PolicyRegistry, PolicyStats};
pub use slowdown::{SlowDown, SlowDownPolicy};
pub use store::{MemoryWindowStore, StoreStats, WindowStore};
pub use sweeper::Sweeper;
