//! Admission decision endpoints for gateways that consult Turnstile out of
//! process.

use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::middleware::request_context;
use super::response::apply_quota_headers;
use crate::ratelimit::{PolicyName, PolicyRegistry, PolicyStats};

/// Caller identity asserted by a trusted gateway.
pub const X_AUTHENTICATED_USER: HeaderName = HeaderName::from_static("x-authenticated-user");

/// Shared state of the decision service.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The process-wide policy table
    pub registry: Arc<PolicyRegistry>,
}

impl AppState {
    /// Create the service state.
    pub fn new(registry: Arc<PolicyRegistry>) -> Self {
        Self { registry }
    }
}

/// Apply a named policy to the calling client.
///
/// Responds 204 with quota headers once any slow-down delay has elapsed, 429
/// when the client is over its limit, and 404 for unknown policies.
#[instrument(skip_all, fields(policy = %policy))]
pub async fn admit(
    State(state): State<AppState>,
    Path(policy): Path<String>,
    request: Request,
) -> Response {
    let name = match policy.parse::<PolicyName>() {
        Ok(name) => name,
        Err(e) => {
            warn!(error = %e, "Admission check for unknown policy");
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Unknown policy", "message": e.to_string() })),
            )
                .into_response();
        }
    };

    let mut ctx = request_context(&request);
    if let Some(user) = request
        .headers()
        .get(X_AUTHENTICATED_USER)
        .and_then(|value| value.to_str().ok())
    {
        ctx.user_id = Some(user.to_string());
    }

    match state.registry.admit(name, &ctx).await {
        Ok(admission) => {
            debug!(
                remaining = admission.decision.remaining,
                delay_ms = admission.delay.as_millis() as u64,
                "Request admitted"
            );
            let mut response = StatusCode::NO_CONTENT.into_response();
            apply_quota_headers(response.headers_mut(), &admission.decision);
            response
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// Per-policy store statistics.
pub async fn stats(State(state): State<AppState>) -> Json<Vec<PolicyStats>> {
    Json(state.registry.stats())
}

/// Liveness probe.
pub async fn health() -> &'static str {
    "ok"
}
