//! Request and response bodies of the HTTP API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::UploadResult;

/// Remote copy of a result, flattened into transform responses.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoteCopy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r2_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r2_url: Option<String>,
}

impl From<Option<UploadResult>> for RemoteCopy {
    fn from(upload: Option<UploadResult>) -> Self {
        match upload {
            Some(UploadResult { key, url }) => Self {
                r2_key: Some(key),
                r2_url: Some(url),
            },
            None => Self::default(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CaptionResponse {
    pub success: bool,
    pub filename: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar_filename: Option<String>,
    #[serde(flatten)]
    pub remote: RemoteCopy,
}

#[derive(Debug, Serialize)]
pub struct FrameExtractionResponse {
    pub success: bool,
    pub frame_count: usize,
    pub filename: String,
    pub message: String,
    #[serde(flatten)]
    pub remote: RemoteCopy,
}

#[derive(Debug, Serialize)]
pub struct LastFrameResponse {
    pub success: bool,
    pub filename: String,
    pub video_duration: f64,
    pub message: String,
    #[serde(flatten)]
    pub remote: RemoteCopy,
}

/// Response of every `/videos` transform.
#[derive(Debug, Serialize)]
pub struct VideoResponse {
    pub success: bool,
    pub filename: String,
    pub message: String,
    #[serde(flatten)]
    pub remote: RemoteCopy,
}

#[derive(Debug, Serialize)]
pub struct R2UploadResponse {
    pub success: bool,
    pub key: String,
    pub url: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `healthy` when the engine is installed, `degraded` otherwise.
    pub status: String,
    pub timestamp: String,
    pub ffmpeg_available: bool,
    pub version: String,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: BTreeMap<String, bool>,
}

/// One URL-referenced input of a concatenation.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentBody {
    pub url: String,
    pub start: f64,
    pub end: f64,
}

/// JSON body of `POST /videos/concat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConcatBody {
    pub segments: Vec<SegmentBody>,
    #[serde(default)]
    pub upload: bool,
    #[serde(default)]
    pub upload_location: Option<String>,
}

/// Query of `POST /storage/r2/upload/output/{name}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KeyPrefixQuery {
    #[serde(default)]
    pub key_prefix: Option<String>,
}
