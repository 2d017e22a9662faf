#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, header};
use tempfile::TempDir;
use tower::ServiceExt;

use mediaforge::api::AppState;
use mediaforge::api::routes::create_router;
use mediaforge::artifacts::ArtifactManager;
use mediaforge::config::AppConfig;
use mediaforge::service::MediaService;

pub const API_KEY: &str = "test-key";
const BOUNDARY: &str = "mediaforge-test-boundary";

/// A router over temp roots, with extra environment overrides.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub dir: TempDir,
}

impl TestApp {
    pub async fn new(overrides: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let mut env: HashMap<String, String> = HashMap::new();
        env.insert("API_KEYS".into(), API_KEY.into());
        env.insert("TEMP_DIR".into(), dir.path().join("temp").display().to_string());
        env.insert("OUTPUT_DIR".into(), dir.path().join("output").display().to_string());
        env.insert("LOG_DIR".into(), dir.path().join("logs").display().to_string());
        env.insert("RATE_LIMIT_UPLOAD_REQUESTS".into(), "100".into());
        for (key, value) in overrides {
            env.insert(key.to_string(), value.to_string());
        }

        let config = Arc::new(AppConfig::from_map(&env).unwrap());
        let artifacts = Arc::new(ArtifactManager::new(config.artifacts.clone()));
        artifacts.prepare().await.unwrap();
        let service = MediaService::from_config(&config, artifacts).unwrap();
        let state = AppState::new(config, Arc::new(service));
        Self {
            router: create_router(state.clone()),
            state,
            dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub fn temp_root(&self) -> PathBuf {
        self.dir.path().join("temp")
    }

    pub fn output_root(&self) -> PathBuf {
        self.dir.path().join("output")
    }
}

/// Number of entries directly under `dir`.
pub fn entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

pub fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(key) = key {
        builder = builder.header("X-API-Key", key);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-API-Key", API_KEY)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// One multipart part: `(name, filename, content)`.
pub type Part<'a> = (&'a str, Option<&'a str>, &'a [u8]);

pub fn post_multipart(uri: &str, parts: &[Part<'_>]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-API-Key", API_KEY)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
