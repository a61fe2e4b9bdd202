//! HTTP surface: policy middleware, rejection responses and the decision
//! service.

mod middleware;
mod response;
mod server;
mod service;

pub use middleware::{
    enforce_policy, request_context, AuthenticatedUser, PolicyGuard, X_FORWARDED_FOR,
};
pub use response::{
    apply_quota_headers, RejectionBody, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
};
pub use server::{router, HttpServer};
pub use service::{AppState, X_AUTHENTICATED_USER};
