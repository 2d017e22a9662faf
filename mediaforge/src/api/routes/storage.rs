//! Remote storage routes: push a client file or a finished output to R2.

use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State, multipart::MultipartRejection},
    routing::post,
};

use super::read_form;
use crate::api::error::ApiResult;
use crate::api::models::{KeyPrefixQuery, R2UploadResponse};
use crate::api::multipart::FilePart;
use crate::api::server::AppState;

/// Create the storage router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/r2/upload", post(upload_file))
        .route("/r2/upload/output/{name}", post(upload_output))
}

/// Upload a client-supplied media file. The local copy is deleted afterwards.
async fn upload_file(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<R2UploadResponse>> {
    let mut form = read_form(&state, multipart, &[FilePart::any_media("file")]).await?;
    let asset = match form.require_file("file") {
        Ok(asset) => asset,
        Err(e) => {
            form.discard(state.service.artifacts()).await;
            return Err(e.into());
        }
    };
    let filename = form
        .original_name("file")
        .unwrap_or_else(|| asset.file_name())
        .to_string();
    let key_prefix = form.text("key_prefix").unwrap_or_default().to_string();
    form.release();

    let result = state
        .service
        .upload_input(asset, &filename, &key_prefix)
        .await?;
    Ok(Json(R2UploadResponse {
        success: true,
        key: result.key,
        url: result.url,
        message: "File uploaded to R2 successfully".to_string(),
    }))
}

/// Upload an output artifact that is still within its retention period.
async fn upload_output(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<KeyPrefixQuery>,
) -> ApiResult<Json<R2UploadResponse>> {
    let key_prefix = query.key_prefix.unwrap_or_default();
    let result = state.service.upload_output(&name, &key_prefix).await?;
    Ok(Json(R2UploadResponse {
        success: true,
        key: result.key,
        url: result.url,
        message: "Output file uploaded to R2 successfully".to_string(),
    }))
}
