//! Remote object storage for finished artifacts (Cloudflare R2 or any
//! S3-compatible endpoint).

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::R2Settings;
use crate::media::Extension;
use crate::{Error, Result};

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResult {
    pub key: String,
    pub url: String,
}

/// Pushes a local file to remote storage.
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    /// Upload `path`. `filename` only supplies the extension and content type;
    /// `key_prefix` is appended to the configured global prefix.
    async fn upload(&self, path: &Path, filename: &str, key_prefix: &str) -> Result<UploadResult>;
}

/// Object key `<global>/<prefix>/<uuid>.<ext>`, skipping empty segments.
pub fn object_key(global_prefix: Option<&str>, key_prefix: &str, filename: &str) -> String {
    let ext = Extension::from_filename(filename).unwrap_or_else(|| Extension::from_static("bin"));
    let mut parts: Vec<&str> = [global_prefix.unwrap_or(""), key_prefix]
        .into_iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect();
    let leaf = format!("{}.{ext}", Uuid::new_v4().simple());
    parts.push(&leaf);
    parts.join("/")
}

/// Public URL of `key`.
///
/// Uses `R2_PUBLIC_BASE_URL` when set, the bucket's account host otherwise,
/// and falls back to path-style addressing on an explicit endpoint.
pub fn public_url(settings: &R2Settings, bucket: &str, key: &str) -> Result<String> {
    let base = match (&settings.public_base_url, &settings.account_id, &settings.endpoint_url) {
        (Some(base), _, _) => base.clone(),
        (None, Some(account), _) => format!("https://{bucket}.{account}.r2.cloudflarestorage.com"),
        (None, None, Some(endpoint)) => format!("{}/{bucket}", endpoint.trim_end_matches('/')),
        (None, None, None) => return Err(Error::storage("no public URL base is configured")),
    };
    Ok(format!(
        "{}/{}",
        base.trim_end_matches('/'),
        key.trim_start_matches('/')
    ))
}

/// [`ObjectUploader`] backed by `aws-sdk-s3`.
#[derive(Debug, Clone)]
pub struct R2Uploader {
    client: Client,
    bucket: String,
    settings: R2Settings,
}

impl R2Uploader {
    /// Build a client from the R2 settings.
    ///
    /// Returns a `Storage` error naming the missing keys when the settings are
    /// incomplete.
    pub async fn new(settings: R2Settings) -> Result<Self> {
        let missing = missing_keys(&settings);
        if !missing.is_empty() {
            return Err(Error::storage(format!(
                "R2 is not configured (missing: {})",
                missing.join(", ")
            )));
        }
        let (Some(endpoint), Some(access_key), Some(secret), Some(bucket)) = (
            settings.endpoint(),
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            settings.bucket.clone(),
        ) else {
            return Err(Error::storage("R2 is not configured"));
        };

        let credentials = Credentials::new(access_key, secret, None, None, "mediaforge-r2");
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(true)
            .build();

        info!(endpoint = %endpoint, bucket = %bucket, "R2 uploader configured");
        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket,
            settings,
        })
    }
}

fn missing_keys(settings: &R2Settings) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if settings.endpoint().is_none() {
        missing.push("R2_ACCOUNT_ID or R2_ENDPOINT_URL");
    }
    if settings.access_key_id.is_none() {
        missing.push("R2_ACCESS_KEY_ID");
    }
    if settings.secret_access_key.is_none() {
        missing.push("R2_SECRET_ACCESS_KEY");
    }
    if settings.bucket.is_none() {
        missing.push("R2_BUCKET");
    }
    missing
}

#[async_trait]
impl ObjectUploader for R2Uploader {
    async fn upload(&self, path: &Path, filename: &str, key_prefix: &str) -> Result<UploadResult> {
        let key = object_key(self.settings.key_prefix.as_deref(), key_prefix, filename);
        let url = public_url(&self.settings, &self.bucket, &key)?;

        let body = ByteStream::from_path(path).await.map_err(|e| {
            warn!(path = %path.display(), error = %e, "cannot read artifact for upload");
            Error::storage("could not read artifact for upload")
        })?;
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body);
        if let Some(ext) = Extension::from_filename(filename) {
            request = request.content_type(ext.mime_type());
        }

        request.send().await.map_err(|e| {
            warn!(key = %key, error = %e, "R2 upload failed");
            Error::storage(format!("failed to upload to R2: {e}"))
        })?;

        info!(key = %key, "artifact uploaded to R2");
        Ok(UploadResult { key, url })
    }
}
