//! Video routes: concatenation, audio mixing, reframing, watermarking and
//! audio extraction.

use axum::{
    Json, Router,
    extract::{Multipart, State, multipart::MultipartRejection, rejection::JsonRejection},
    routing::{get, post},
};

use super::download::download_output;
use super::{read_form, remote_copy, run_form};
use crate::api::error::ApiResult;
use crate::api::models::{ConcatBody, VideoResponse};
use crate::api::multipart::FilePart;
use crate::api::server::AppState;
use crate::media::MediaAsset;
use crate::service::{TransformOutcome, UploadOptions};
use crate::transform::synthesizer::MAX_SEGMENTS;
use crate::transform::{
    AppendRequest, AspectPadRequest, AudioExtractRequest, AudioFormat, AudioMuxRequest,
    ConcatRequest, ConcatSegment, TransformRequest, VerticalCropRequest, WatermarkPosition,
    WatermarkRequest,
};
use crate::Error;

const DEFAULT_WATERMARK_OPACITY: f64 = 0.8;
const DEFAULT_WATERMARK_SCALE: f64 = 0.15;

/// Create the videos router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/concat", post(concat))
        .route("/audio", post(audio_mux))
        .route("/aspect", post(aspect_pad))
        .route("/crop/vertical", post(vertical_crop))
        .route("/watermark", post(watermark))
        .route("/append", post(append))
        .route("/audio/extract", post(extract_audio))
        .route("/download/{name}", get(download_output))
}

fn respond(mut outcome: TransformOutcome, message: &str) -> ApiResult<Json<VideoResponse>> {
    let remote = remote_copy(&mut outcome)?;
    Ok(Json(VideoResponse {
        success: true,
        filename: outcome.filename,
        message: message.to_string(),
        remote,
    }))
}

/// `POST /videos/concat` with URL-referenced segments.
async fn concat(
    State(state): State<AppState>,
    payload: std::result::Result<Json<ConcatBody>, JsonRejection>,
) -> ApiResult<Json<VideoResponse>> {
    let Json(body) = payload.map_err(|e| Error::validation("body", e.body_text()))?;
    if body.segments.is_empty() || body.segments.len() > MAX_SEGMENTS {
        return Err(Error::validation(
            "segments",
            format!("between 1 and {MAX_SEGMENTS} segments are required"),
        )
        .into());
    }
    tracing::info!(segments = body.segments.len(), upload = body.upload, "Concat request");

    let mut segments = Vec::with_capacity(body.segments.len());
    for segment in &body.segments {
        match state
            .service
            .fetch_segment(&segment.url, "segments", &state.config.extensions)
            .await
        {
            Ok(asset) => segments.push(ConcatSegment {
                asset,
                start: segment.start,
                end: segment.end,
            }),
            Err(e) => {
                let fetched: Vec<MediaAsset> = segments.into_iter().map(|s| s.asset).collect();
                state.service.discard_inputs(&fetched).await;
                return Err(e.into());
            }
        }
    }

    let upload = UploadOptions {
        enabled: body.upload,
        location: body.upload_location.unwrap_or_default(),
    };
    let outcome = state
        .service
        .execute(TransformRequest::Concat(ConcatRequest { segments }), &upload)
        .await?;
    respond(outcome, "Videos concatenated successfully")
}

async fn audio_mux(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<VideoResponse>> {
    let parts = [FilePart::video("video"), FilePart::audio("audio")];
    let form = read_form(&state, multipart, &parts).await?;
    let outcome = run_form(&state, form, |form| {
        Ok(TransformRequest::AudioMux(AudioMuxRequest {
            replace: form.flag("replace_audio")?,
            loop_audio: form.flag("loop_audio")?,
            video: form.require_file("video")?,
            audio: form.require_file("audio")?,
        }))
    })
    .await?;
    respond(outcome, "Audio added successfully")
}

async fn aspect_pad(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<VideoResponse>> {
    let form = read_form(&state, multipart, &[FilePart::video("video")]).await?;
    let outcome = run_form(&state, form, |form| {
        Ok(TransformRequest::AspectPad(AspectPadRequest {
            ratio: form.require_text("ratio")?.to_string(),
            pad_color: form.text("pad_color").map(str::to_string),
            video: form.require_file("video")?,
        }))
    })
    .await?;
    respond(outcome, "Aspect ratio changed successfully")
}

async fn vertical_crop(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<VideoResponse>> {
    let form = read_form(&state, multipart, &[FilePart::video("video")]).await?;
    let outcome = run_form(&state, form, |form| {
        Ok(TransformRequest::VerticalCrop(VerticalCropRequest {
            ratio: form.text("ratio").unwrap_or_default().to_string(),
            video: form.require_file("video")?,
        }))
    })
    .await?;
    respond(outcome, "Video cropped successfully")
}

async fn watermark(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<VideoResponse>> {
    let parts = [FilePart::video("video"), FilePart::image("logo")];
    let form = read_form(&state, multipart, &parts).await?;
    let outcome = run_form(&state, form, |form| {
        Ok(TransformRequest::Watermark(WatermarkRequest {
            position: form.parse("position", WatermarkPosition::BottomRight)?,
            opacity: form.parse("opacity", DEFAULT_WATERMARK_OPACITY)?,
            scale: form.parse("scale", DEFAULT_WATERMARK_SCALE)?,
            video: form.require_file("video")?,
            logo: form.require_file("logo")?,
        }))
    })
    .await?;
    respond(outcome, "Watermark added successfully")
}

async fn append(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<VideoResponse>> {
    let parts = [
        FilePart::video("video"),
        FilePart::video("intro"),
        FilePart::video("outro"),
    ];
    let form = read_form(&state, multipart, &parts).await?;
    let outcome = run_form(&state, form, |form| {
        Ok(TransformRequest::Append(AppendRequest {
            video: form.require_file("video")?,
            intro: form.file("intro"),
            outro: form.file("outro"),
        }))
    })
    .await?;
    respond(outcome, "Clips appended successfully")
}

async fn extract_audio(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<VideoResponse>> {
    let form = read_form(&state, multipart, &[FilePart::video("video")]).await?;
    let outcome = run_form(&state, form, |form| {
        Ok(TransformRequest::AudioExtract(AudioExtractRequest {
            format: form.parse("format", AudioFormat::Mp3)?,
            video: form.require_file("video")?,
        }))
    })
    .await?;
    respond(outcome, "Audio extracted successfully")
}
