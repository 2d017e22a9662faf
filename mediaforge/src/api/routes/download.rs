//! Streaming downloads of finished artifacts.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use tokio_util::io::ReaderStream;

use crate::Error;
use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::artifacts::DirectoryClass;
use crate::media::Extension;

/// `GET .../download/{name}`.
///
/// The artifact is leased until the last byte is sent, so the retention sweep
/// cannot delete it mid-transfer. Names that do not resolve to a live output
/// are 404.
pub async fn download_output(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Response> {
    let lease = state
        .service
        .artifacts()
        .resolve_for_download(DirectoryClass::Output, &name)?;
    let file = tokio::fs::File::open(lease.path()).await.map_err(|e| {
        tracing::warn!(artifact = %name, error = %e, "Artifact vanished before download");
        Error::not_found("file")
    })?;
    let length = file.metadata().await.ok().map(|m| m.len());

    let content_type = Extension::from_filename(lease.name())
        .map(|ext| ext.mime_type())
        .unwrap_or("application/octet-stream");
    let disposition = format!("attachment; filename=\"{}\"", lease.name());

    tracing::debug!(artifact = %name, "Streaming download");
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _held = &lease;
        chunk
    });

    let mut response = Body::from_stream(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    if let Some(length) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(response)
}
