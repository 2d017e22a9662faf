//! Per-key rate limiting with quota headers on every admitted or rejected
//! response.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::auth::request_key;
use crate::Error;
use crate::api::error::ApiError;
use crate::ratelimit::{BudgetClass, Decision, RateLimiter};

/// Paths that are never counted.
const EXEMPT_PATHS: &[&str] = &["/", "/health", "/health/ready", "/health/live"];

/// Key used for requests without an API key.
const ANONYMOUS: &str = "anonymous";

pub fn is_exempt(path: &str) -> bool {
    EXEMPT_PATHS.contains(&path)
}

/// Every `POST` under `/api/v1` uploads or processes media and is counted
/// against the upload budget; everything else is general.
pub fn budget_class_for(method: &Method, path: &str) -> BudgetClass {
    if method == Method::POST && path.starts_with("/api/v1/") {
        BudgetClass::Upload
    } else {
        BudgetClass::General
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset_seconds));
}

/// Admit or reject a request before it reaches authentication or routing.
pub async fn rate_limit(State(limiter): State<Arc<RateLimiter>>, request: Request, next: Next) -> Response {
    let path = request.uri().path();
    if is_exempt(path) {
        return next.run(request).await;
    }

    let class = budget_class_for(request.method(), path);
    let key = request_key(&request)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .unwrap_or(ANONYMOUS)
        .to_string();
    let decision = limiter.admit(&key, class);

    if !decision.allowed {
        let prefix: String = key.chars().take(4).collect();
        tracing::warn!(key_prefix = %prefix, class = %class, "Rate limit exceeded");
        let mut response = ApiError::from(Error::QuotaExceeded {
            retry_after: decision.reset_seconds,
        })
        .into_response();
        let headers = response.headers_mut();
        apply_headers(headers, &decision);
        headers.insert("Retry-After", HeaderValue::from(decision.reset_seconds));
        return response;
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}
