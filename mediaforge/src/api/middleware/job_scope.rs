//! Ties each API request to the files it allocates.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::artifacts::with_job_scope;

/// Run the rest of the request inside an artifact job scope, so the
/// retention sweep never removes an upload or engine output the request is
/// still working on. A client that disconnects drops the scope with it.
pub async fn job_scope(request: Request, next: Next) -> Response {
    with_job_scope(next.run(request)).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::Router;
    use axum::body::Body;
    use axum::extract::State;
    use axum::middleware;
    use axum::routing::post;
    use tower::ServiceExt;

    use super::*;
    use crate::artifacts::{ArtifactManager, ArtifactSettings, DirectoryClass};
    use crate::media::Extension;

    /// Allocates an input, lets the sweeper run, and reports whether the
    /// input survived.
    async fn allocate_then_sweep(State(artifacts): State<Arc<ArtifactManager>>) -> String {
        let path = artifacts.allocate(DirectoryClass::Temp, &Extension::from_static("mp4"));
        std::fs::write(&path, b"upload").unwrap();
        artifacts.sweep().await;
        path.exists().to_string()
    }

    async fn survived(scoped: bool) -> String {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(ArtifactManager::new(ArtifactSettings {
            temp_root: dir.path().join("temp"),
            output_root: dir.path().join("output"),
            retention: Duration::ZERO,
            grace: Duration::ZERO,
        }));
        artifacts.prepare().await.unwrap();

        let mut router = Router::new().route("/job", post(allocate_then_sweep));
        if scoped {
            router = router.route_layer(middleware::from_fn(job_scope));
        }
        let response = router
            .with_state(artifacts)
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/job")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 16).await.unwrap();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn sweep_spares_allocations_of_running_requests() {
        assert_eq!(survived(true).await, "true");
        assert_eq!(survived(false).await, "false");
    }
}
