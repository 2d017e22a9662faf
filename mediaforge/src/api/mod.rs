//! REST API server module.
//!
//! Multipart and JSON endpoints for every transform, artifact downloads,
//! remote storage uploads and health probes.

pub mod error;
pub mod middleware;
pub mod models;
pub mod multipart;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
