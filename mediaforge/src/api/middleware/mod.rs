//! API middleware: API key authentication, per-key rate limiting and
//! request-scoped artifact ownership.

pub mod auth;
pub mod job_scope;
pub mod rate_limit;

pub use auth::{API_KEY_HEADER, ApiKeyAuth, api_key_auth};
pub use job_scope::job_scope;
pub use rate_limit::{budget_class_for, is_exempt, rate_limit};
