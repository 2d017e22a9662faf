//! API key authentication for the `/api/v1` routes.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::Error;
use crate::api::error::ApiError;

/// Header carrying the client's API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Set of accepted API keys.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    api_keys: Arc<Vec<String>>,
}

impl ApiKeyAuth {
    pub fn new(api_keys: Vec<String>) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
        }
    }

    /// Check if an API key is valid.
    pub fn is_valid(&self, key: &str) -> bool {
        self.api_keys.iter().any(|k| k == key)
    }

    /// Classify the key sent with a request.
    pub fn check(&self, key: Option<&str>) -> Result<(), Error> {
        match key.map(str::trim).filter(|k| !k.is_empty()) {
            None => Err(Error::Unauthorized),
            Some(key) if self.is_valid(key) => Ok(()),
            Some(_) => Err(Error::Forbidden),
        }
    }
}

/// The raw `X-API-Key` value of a request, if any.
pub fn request_key(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
}

/// Middleware function for API key authentication.
///
/// A missing key is 401, an unknown key 403.
pub async fn api_key_auth(State(auth): State<ApiKeyAuth>, request: Request, next: Next) -> Response {
    match auth.check(request_key(&request)) {
        Ok(()) => next.run(request).await,
        Err(Error::Unauthorized) => {
            tracing::warn!(path = %request.uri().path(), "Request missing API key");
            let mut response = ApiError::from(Error::Unauthorized).into_response();
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("ApiKey"));
            response
        }
        Err(e) => {
            let prefix: String = request_key(&request)
                .unwrap_or_default()
                .chars()
                .take(4)
                .collect();
            tracing::warn!(key_prefix = %prefix, "Invalid API key attempted");
            ApiError::from(e).into_response()
        }
    }
}
