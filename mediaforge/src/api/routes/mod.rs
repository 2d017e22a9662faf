//! API route modules.
//!
//! Organizes routes by resource type. Everything under `/api/v1` requires an
//! API key; the whole tree is rate limited except the health probes.

pub mod captions;
pub mod download;
pub mod frames;
pub mod health;
pub mod storage;
pub mod videos;

use axum::Router;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{DefaultBodyLimit, Multipart};
use axum::middleware;

use crate::Error;
use crate::api::error::{ApiError, ApiResult};
use crate::api::middleware::{api_key_auth, job_scope, rate_limit};
use crate::api::models::RemoteCopy;
use crate::api::multipart::{FilePart, Intake, UploadForm};
use crate::api::server::AppState;
use crate::config::AppConfig;
use crate::service::TransformOutcome;
use crate::transform::TransformRequest;

/// Most file parts any endpoint accepts (append: video, intro, outro).
const MAX_FILE_PARTS: u64 = 3;
/// Allowance for text fields and multipart framing.
const FORM_OVERHEAD: u64 = 1024 * 1024;

fn body_limit(config: &AppConfig) -> usize {
    let limit = config
        .max_upload_bytes
        .saturating_mul(MAX_FILE_PARTS)
        .saturating_add(FORM_OVERHEAD);
    usize::try_from(limit).unwrap_or(usize::MAX)
}

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .nest("/captions", captions::router())
        .nest("/frames", frames::router())
        .nest("/videos", videos::router())
        .nest("/storage", storage::router())
        .route_layer(middleware::from_fn(job_scope))
        .route_layer(middleware::from_fn_with_state(
            state.auth.clone(),
            api_key_auth,
        ));

    Router::new()
        .merge(health::router())
        .nest("/api/v1", api)
        .layer(DefaultBodyLimit::max(body_limit(&state.config)))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit,
        ))
        .with_state(state)
}

/// Read a multipart body, storing the listed file parts as temp artifacts.
pub(crate) async fn read_form(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
    parts: &[FilePart],
) -> ApiResult<UploadForm> {
    let multipart = multipart.map_err(|e| Error::validation("body", e.body_text()))?;
    let intake = Intake {
        artifacts: state.service.artifacts(),
        policy: &state.config.extensions,
        max_bytes: state.config.max_upload_bytes,
    };
    Ok(UploadForm::read(multipart, parts, &intake).await?)
}

/// Build a request from `form` and run it.
///
/// If `build` or the upload fields fail validation, every stored file is
/// removed before the error is returned.
pub(crate) async fn run_form<F>(state: &AppState, mut form: UploadForm, build: F) -> ApiResult<TransformOutcome>
where
    F: FnOnce(&UploadForm) -> crate::Result<TransformRequest>,
{
    let prepared = form
        .upload_options()
        .and_then(|upload| build(&form).map(|request| (request, upload)));
    let (request, upload) = match prepared {
        Ok(prepared) => prepared,
        Err(e) => {
            form.discard(state.service.artifacts()).await;
            return Err(e.into());
        }
    };
    form.release();
    Ok(state.service.execute(request, &upload).await?)
}

/// Remote copy fields of a response.
///
/// A failed upload is reported as the request's error; the local artifact
/// stays downloadable under the name given in `details.filename`.
pub(crate) fn remote_copy(outcome: &mut TransformOutcome) -> ApiResult<RemoteCopy> {
    match outcome.upload.take() {
        None => Ok(RemoteCopy::default()),
        Some(Ok(result)) => Ok(Some(result).into()),
        Some(Err(e)) => {
            tracing::warn!(artifact = %outcome.filename, error = %e, "Upload of finished artifact failed");
            Err(ApiError::from(e).with_details(serde_json::json!({ "filename": outcome.filename })))
        }
    }
}
