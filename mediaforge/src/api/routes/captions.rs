//! Caption routes: burn timed captions into a video, or one caption into an image.

use axum::{
    Json, Router,
    extract::{Multipart, State, multipart::MultipartRejection},
    routing::{get, post},
};

use super::download::download_output;
use super::{read_form, remote_copy, run_form};
use crate::api::error::ApiResult;
use crate::api::models::CaptionResponse;
use crate::api::multipart::{FilePart, UploadForm};
use crate::api::server::AppState;
use crate::subtitle::color::ColorSpec;
use crate::subtitle::{CaptionRenderMode, CaptionStyle, FontSize, parse_cues};
use crate::transform::{CaptionImageRequest, CaptionVideoRequest, TransformRequest};
use crate::Result;

/// Create the captions router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/video", post(caption_video))
        .route("/image", post(caption_image))
        .route("/download/{name}", get(download_output))
}

/// Apply the form's style fields on top of the configured defaults.
fn caption_style(form: &UploadForm, defaults: &CaptionStyle) -> Result<CaptionStyle> {
    let mut style = defaults.clone();
    if let Some(px) = form.parse_opt::<u32>("font_size")? {
        style.font_size = FontSize::Px(px);
    }
    style.font_color = form.parse("font_color", style.font_color)?;
    if let Some(bg) = form.parse_opt::<ColorSpec>("bg_color")? {
        style.background_color = bg.color;
        if let Some(opacity) = bg.opacity {
            style.background_opacity = opacity;
        }
    }
    if let Some(opacity) = form.parse_opt::<f64>("bg_opacity")? {
        style.background_opacity = opacity;
    }
    style.position = form.parse("position", style.position)?;
    style.validate()?;
    Ok(style)
}

async fn caption_video(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<CaptionResponse>> {
    let form = read_form(&state, multipart, &[FilePart::video("video")]).await?;
    let defaults = state.config.caption_style.clone();
    let mut outcome = run_form(&state, form, |form| {
        let cues = parse_cues(form.require_text("captions_json")?)?;
        let style = caption_style(form, &defaults)?;
        let mode = form.parse("mode", CaptionRenderMode::Subtitles)?;
        let sidecar = form.flag("sidecar")?;
        tracing::info!(
            cues = cues.len(),
            mode = %mode,
            position = %style.position,
            sidecar,
            "Video caption request"
        );
        Ok(TransformRequest::CaptionVideo(CaptionVideoRequest {
            video: form.require_file("video")?,
            cues,
            style,
            mode,
            sidecar,
        }))
    })
    .await?;

    let remote = remote_copy(&mut outcome)?;
    Ok(Json(CaptionResponse {
        success: true,
        filename: outcome.filename,
        message: "Video captioned successfully".to_string(),
        sidecar_filename: outcome.sidecar_filename,
        remote,
    }))
}

async fn caption_image(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<CaptionResponse>> {
    let form = read_form(&state, multipart, &[FilePart::image("image")]).await?;
    let defaults = state.config.caption_style.clone();
    let mut outcome = run_form(&state, form, |form| {
        let text = form.require_text("text")?.to_string();
        let style = caption_style(form, &defaults)?;
        let offset = (form.parse("x_offset", 0i64)?, form.parse("y_offset", 0i64)?);
        Ok(TransformRequest::CaptionImage(CaptionImageRequest {
            image: form.require_file("image")?,
            text,
            style,
            offset,
        }))
    })
    .await?;

    let remote = remote_copy(&mut outcome)?;
    Ok(Json(CaptionResponse {
        success: true,
        filename: outcome.filename,
        message: "Image captioned successfully".to_string(),
        sidecar_filename: None,
        remote,
    }))
}
