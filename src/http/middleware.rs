//! Axum middleware applying a named policy in front of route handlers.
//!
//! ```ignore
//! let guard = PolicyGuard::new(registry.clone(), PolicyName::AuditSubmission);
//! let audits = Router::new()
//!     .route("/audits", post(submit_audit))
//!     .route_layer(middleware::from_fn_with_state(guard, enforce_policy));
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderName;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::response::apply_quota_headers;
use crate::ratelimit::{PolicyName, PolicyRegistry, RequestContext};

/// Originating client chain set by proxies.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Identity established by an upstream authentication layer.
///
/// Auth middleware inserts this into the request extensions; limiter keys
/// then follow the user rather than the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Middleware state: the registry and the policy this route family uses.
#[derive(Debug, Clone)]
pub struct PolicyGuard {
    registry: Arc<PolicyRegistry>,
    policy: PolicyName,
}

impl PolicyGuard {
    /// Guard routes with `policy` from `registry`.
    pub fn new(registry: Arc<PolicyRegistry>, policy: PolicyName) -> Self {
        Self { registry, policy }
    }

    /// Get the guarded policy.
    pub fn policy(&self) -> PolicyName {
        self.policy
    }
}

/// Identity-relevant parts of an incoming request.
pub fn request_context(request: &Request) -> RequestContext {
    RequestContext {
        user_id: request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.0.clone()),
        forwarded_for: request
            .headers()
            .get(X_FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        peer_addr: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip()),
    }
}

/// Rate limiting middleware.
///
/// Rejected requests get the 429 response and never reach the handler.
/// Admitted requests wait out any slow-down delay, run, and carry the quota
/// headers on the way out.
pub async fn enforce_policy(
    State(guard): State<PolicyGuard>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = request_context(&request);

    match guard.registry.admit(guard.policy, &ctx).await {
        Ok(admission) => {
            let mut response = next.run(request).await;
            apply_quota_headers(response.headers_mut(), &admission.decision);
            response
        }
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::{RejectionBody, X_RATELIMIT_REMAINING};
    use axum::body::Body;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{middleware, Router};
    use tower::ServiceExt;

    fn create_test_app(policy: PolicyName) -> Router {
        let registry = Arc::new(PolicyRegistry::standard().unwrap());
        Router::new()
            .route("/gated", post(|| async { "done" }))
            .route_layer(middleware::from_fn_with_state(
                PolicyGuard::new(registry, policy),
                enforce_policy,
            ))
    }

    fn gated_request(client: &str) -> Request {
        axum::http::Request::post("/gated")
            .header(X_FORWARDED_FOR, client)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_request_context_extraction() {
        let mut request = axum::http::Request::get("/")
            .header(X_FORWARDED_FOR, "203.0.113.4, 10.0.0.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 1], 5000))));

        let ctx = request_context(&request);
        assert_eq!(ctx.user_id, None);
        assert_eq!(ctx.forwarded_client(), Some("203.0.113.4"));
        assert_eq!(ctx.peer_addr, Some("10.0.0.1".parse().unwrap()));

        request
            .extensions_mut()
            .insert(AuthenticatedUser("abc".to_string()));
        assert_eq!(request_context(&request).user_id.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_admitted_response_carries_quota_headers() {
        let app = create_test_app(PolicyName::GeneralApi);

        let response = app.oneshot(gated_request("198.51.100.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "100");
        assert_eq!(response.headers()[&X_RATELIMIT_REMAINING], "99");
        assert!(response.headers().contains_key("x-ratelimit-reset"));
    }

    #[tokio::test]
    async fn test_rejects_after_limit() {
        let app = create_test_app(PolicyName::AiAnalysis);

        for remaining in (0..25).rev() {
            let response = app
                .clone()
                .oneshot(gated_request("198.51.100.1"))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                response.headers()[&X_RATELIMIT_REMAINING],
                remaining.to_string().as_str()
            );
        }

        let response = app
            .clone()
            .oneshot(gated_request("198.51.100.1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: RejectionBody = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.error, "Rate limit exceeded");
        assert!(body.retry_after > 3590 && body.retry_after <= 3600);

        // A different client still gets through.
        let response = app.oneshot(gated_request("198.51.100.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_down_applies_before_handler() {
        let app = create_test_app(PolicyName::AuditSubmission);

        for _ in 0..5 {
            app.clone().oneshot(gated_request("198.51.100.1")).await.unwrap();
        }

        let started = tokio::time::Instant::now();
        let response = app.oneshot(gated_request("198.51.100.1")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(started.elapsed() >= std::time::Duration::from_secs(1));
    }
}
