//! Frame routes: sample frames into a ZIP archive, or grab the last frame.

use axum::{
    Json, Router,
    extract::{Multipart, State, multipart::MultipartRejection},
    routing::{get, post},
};

use super::download::download_output;
use super::{read_form, remote_copy, run_form};
use crate::api::error::ApiResult;
use crate::api::models::{FrameExtractionResponse, LastFrameResponse};
use crate::api::multipart::FilePart;
use crate::api::server::AppState;
use crate::transform::{FrameExtractRequest, ImageFormat, LastFrameRequest, TransformRequest};

const DEFAULT_FPS: f64 = 1.0;
const DEFAULT_QUALITY: u8 = 2;

/// Create the frames router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/extract", post(extract_frames))
        .route("/last", post(last_frame))
        .route("/download/{name}", get(download_output))
}

async fn extract_frames(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<FrameExtractionResponse>> {
    let form = read_form(&state, multipart, &[FilePart::video("video")]).await?;
    let mut fps = DEFAULT_FPS;
    let mut outcome = run_form(&state, form, |form| {
        fps = form.parse("fps", DEFAULT_FPS)?;
        Ok(TransformRequest::FrameExtract(FrameExtractRequest {
            fps,
            format: form.parse("format", ImageFormat::Jpg)?,
            quality: form.parse("quality", DEFAULT_QUALITY)?,
            video: form.require_file("video")?,
        }))
    })
    .await?;

    let remote = remote_copy(&mut outcome)?;
    let frame_count = outcome.frame_count.unwrap_or_default();
    Ok(Json(FrameExtractionResponse {
        success: true,
        frame_count,
        filename: outcome.filename,
        message: format!("Extracted {frame_count} frames at {fps} fps"),
        remote,
    }))
}

async fn last_frame(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<LastFrameResponse>> {
    let form = read_form(&state, multipart, &[FilePart::video("video")]).await?;
    let mut outcome = run_form(&state, form, |form| {
        Ok(TransformRequest::LastFrame(LastFrameRequest {
            format: form.parse("format", ImageFormat::Jpg)?,
            quality: form.parse("quality", DEFAULT_QUALITY)?,
            video: form.require_file("video")?,
        }))
    })
    .await?;

    let remote = remote_copy(&mut outcome)?;
    Ok(Json(LastFrameResponse {
        success: true,
        filename: outcome.filename,
        video_duration: outcome.source_duration.unwrap_or_default(),
        message: "Last frame extracted successfully".to_string(),
        remote,
    }))
}
