//! Quota headers and the standard "too many requests" response.

use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::ratelimit::{Decision, Rejection, RATE_LIMIT_EXCEEDED};

/// Requests allowed per window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Window reset, in epoch seconds.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    /// Fixed error code
    pub error: String,
    /// Policy-specific message
    pub message: String,
    /// Seconds until the window resets
    pub retry_after: u64,
}

impl From<&Rejection> for RejectionBody {
    fn from(rejection: &Rejection) -> Self {
        Self {
            error: RATE_LIMIT_EXCEEDED.to_string(),
            message: rejection.message.clone(),
            retry_after: rejection.retry_after_secs(),
        }
    }
}

/// Attach the quota headers for `decision`.
///
/// The reset header is omitted when the reset time is unknown.
pub fn apply_quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    if decision.reset_at_ms > 0 {
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at_secs()));
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = RejectionBody::from(&self);
        let retry_after = body.retry_after;

        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        apply_quota_headers(headers, &self.decision);
        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after));
        response
    }
}
