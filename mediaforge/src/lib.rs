//! mediaforge library crate.
//!
//! An HTTP media-editing service: typed transform requests are turned into
//! ffmpeg invocations, gated by per-key rate limits, and their results kept as
//! short-lived downloadable artifacts.

pub mod api;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod logging;
pub mod media;
pub mod ratelimit;
pub mod runner;
pub mod service;
pub mod storage;
pub mod subtitle;
pub mod transform;

pub use error::{Error, Result};
