//! Streaming download of URL-referenced inputs into managed temp artifacts.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use super::{Extension, MediaAsset, MediaKind};
use crate::artifacts::{ArtifactManager, DirectoryClass, ExtensionPolicy};
use crate::{Error, Result};

/// Install the process-wide rustls crypto provider once.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Shared client for segment downloads.
pub fn build_http_client(connect_timeout: Duration) -> Result<reqwest::Client> {
    install_rustls_provider();
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .user_agent(concat!("mediaforge/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))
}

/// Extension for a downloaded video: the URL's own when it is allowed,
/// otherwise `mp4`.
pub fn extension_for_url(url: &Url, policy: &ExtensionPolicy) -> Extension {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(Extension::from_filename)
        .filter(|ext| policy.is_allowed(MediaKind::Video, ext))
        .unwrap_or_else(|| Extension::from_static("mp4"))
}

/// Downloads remote videos with a byte cap.
#[derive(Debug, Clone)]
pub struct SegmentFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl SegmentFetcher {
    pub fn new(client: reqwest::Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }

    /// Stream `raw_url` into a fresh temp artifact.
    ///
    /// Failures are reported against `field`; a partial file is removed.
    pub async fn fetch(
        &self,
        raw_url: &str,
        field: &str,
        artifacts: &ArtifactManager,
        policy: &ExtensionPolicy,
    ) -> Result<MediaAsset> {
        let url = Url::parse(raw_url.trim())
            .map_err(|_| Error::validation(field, format!("'{raw_url}' is not a valid URL")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::validation(field, "only http and https URLs are supported"));
        }

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::validation(field, format!("could not fetch {url}: {}", e.without_url())))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::validation(field, format!("fetching {url} returned HTTP {status}")));
        }
        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(Error::PayloadTooLarge {
                limit: self.max_bytes,
            });
        }

        let extension = extension_for_url(&url, policy);
        let path = artifacts.allocate(DirectoryClass::Temp, &extension);
        match self.write_body(response, &path, field).await {
            Ok(size) => {
                debug!(url = %url, bytes = size, "segment downloaded");
                Ok(MediaAsset::new(path, extension, MediaKind::Video, size))
            }
            Err(e) => {
                warn!(url = %url, error = %e, "segment download failed");
                artifacts.discard(&path).await;
                Err(e)
            }
        }
    }

    async fn write_body(&self, response: reqwest::Response, path: &Path, field: &str) -> Result<u64> {
        let mut file = tokio::fs::File::create(path)
            .await
            .map_err(|e| Error::io_path("creating download file", path, e))?;
        let mut written: u64 = 0;
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| Error::validation(field, format!("download interrupted: {}", e.without_url())))?;
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(Error::PayloadTooLarge {
                    limit: self.max_bytes,
                });
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| Error::io_path("writing download file", path, e))?;
        }
        file.flush()
            .await
            .map_err(|e| Error::io_path("writing download file", path, e))?;

        if written == 0 {
            return Err(Error::validation(field, "remote file is empty"));
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::StatusCode;
    use axum::routing::get;
    use tokio::net::TcpListener;

    use super::*;
    use crate::artifacts::ArtifactSettings;

    async fn serve() -> String {
        let app = Router::new()
            .route("/clip.mov", get(|| async { vec![7u8; 2048] }))
            .route("/clip.exe", get(|| async { vec![1u8; 16] }))
            .route("/missing.mp4", get(|| async { StatusCode::NOT_FOUND }))
            .route("/big.mp4", get(|| async { vec![0u8; 64 * 1024] }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn manager(dir: &Path) -> ArtifactManager {
        ArtifactManager::new(ArtifactSettings {
            temp_root: dir.join("temp"),
            output_root: dir.join("output"),
            retention: Duration::from_secs(60),
            grace: Duration::ZERO,
        })
    }

    fn fetcher(max_bytes: u64) -> SegmentFetcher {
        SegmentFetcher::new(build_http_client(Duration::from_secs(5)).unwrap(), max_bytes)
    }

    #[test]
    fn url_extension_falls_back_to_mp4() {
        let policy = ExtensionPolicy::default();
        let ext = |raw: &str| extension_for_url(&Url::parse(raw).unwrap(), &policy).to_string();
        assert_eq!(ext("https://cdn.test/a/b/clip.MOV?sig=1"), "mov");
        assert_eq!(ext("https://cdn.test/stream"), "mp4");
        assert_eq!(ext("https://cdn.test/run.exe"), "mp4");
        assert_eq!(ext("https://cdn.test/"), "mp4");
    }

    #[tokio::test]
    async fn downloads_into_temp_root() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let artifacts = manager(dir.path());
        artifacts.prepare().await.unwrap();

        let asset = fetcher(1024 * 1024)
            .fetch(&format!("{base}/clip.mov"), "segments", &artifacts, &ExtensionPolicy::default())
            .await
            .unwrap();
        assert_eq!(asset.size_bytes, 2048);
        assert_eq!(asset.extension.as_str(), "mov");
        assert!(asset.path.starts_with(dir.path().join("temp")));
        assert_eq!(std::fs::metadata(&asset.path).unwrap().len(), 2048);

        let other = fetcher(1024 * 1024)
            .fetch(&format!("{base}/clip.exe"), "segments", &artifacts, &ExtensionPolicy::default())
            .await
            .unwrap();
        assert_eq!(other.extension.as_str(), "mp4");
    }

    #[tokio::test]
    async fn failures_leave_no_files() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let artifacts = manager(dir.path());
        artifacts.prepare().await.unwrap();
        let policy = ExtensionPolicy::default();

        let err = fetcher(1024)
            .fetch(&format!("{base}/big.mp4"), "segments", &artifacts, &policy)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { limit: 1024 }));

        let err = fetcher(1024)
            .fetch(&format!("{base}/missing.mp4"), "segments", &artifacts, &policy)
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("segments"));

        for bad in ["ftp://host/a.mp4", "not a url"] {
            let err = fetcher(1024)
                .fetch(bad, "segments", &artifacts, &policy)
                .await
                .unwrap_err();
            assert_eq!(err.field(), Some("segments"));
        }

        assert!(artifacts.is_empty());
        assert_eq!(std::fs::read_dir(dir.path().join("temp")).unwrap().count(), 0);
    }
}
