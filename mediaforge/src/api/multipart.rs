//! Streaming multipart intake.
//!
//! File parts are checked against the extension allow-list before a single
//! byte is written, then streamed into freshly allocated temp artifacts with
//! a byte cap. Text parts are kept for typed lookups.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use axum::extract::Multipart;
use axum::extract::multipart::{Field, MultipartError};
use axum::http::StatusCode;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::artifacts::{ArtifactManager, DirectoryClass, ExtensionPolicy};
use crate::media::{Extension, MediaAsset, MediaKind};
use crate::service::UploadOptions;
use crate::{Error, Result};

/// A file part the endpoint accepts and the media kinds it may hold.
#[derive(Debug, Clone, Copy)]
pub struct FilePart {
    pub name: &'static str,
    pub kinds: &'static [MediaKind],
}

impl FilePart {
    pub const fn video(name: &'static str) -> Self {
        Self {
            name,
            kinds: &[MediaKind::Video],
        }
    }

    pub const fn image(name: &'static str) -> Self {
        Self {
            name,
            kinds: &[MediaKind::Image],
        }
    }

    pub const fn audio(name: &'static str) -> Self {
        Self {
            name,
            kinds: &[MediaKind::Audio],
        }
    }

    pub const fn any_media(name: &'static str) -> Self {
        Self {
            name,
            kinds: &[MediaKind::Video, MediaKind::Image, MediaKind::Audio],
        }
    }
}

/// Limits and destinations for one intake.
pub struct Intake<'a> {
    pub artifacts: &'a ArtifactManager,
    pub policy: &'a ExtensionPolicy,
    pub max_bytes: u64,
}

/// A parsed multipart request.
#[derive(Debug, Default)]
pub struct UploadForm {
    files: HashMap<&'static str, (MediaAsset, String)>,
    fields: HashMap<String, String>,
}

fn multipart_error(e: MultipartError, max_bytes: u64) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge { limit: max_bytes }
    } else {
        Error::validation("body", format!("malformed multipart body: {}", e.body_text()))
    }
}

impl UploadForm {
    /// Read every part of `multipart`.
    ///
    /// On error every file written so far is removed.
    pub async fn read(mut multipart: Multipart, parts: &[FilePart], intake: &Intake<'_>) -> Result<Self> {
        let mut form = Self::default();
        loop {
            let next = multipart
                .next_field()
                .await
                .map_err(|e| multipart_error(e, intake.max_bytes));
            let field = match next {
                Ok(Some(field)) => field,
                Ok(None) => break,
                Err(e) => {
                    form.discard(intake.artifacts).await;
                    return Err(e);
                }
            };
            if let Err(e) = form.accept(field, parts, intake).await {
                form.discard(intake.artifacts).await;
                return Err(e);
            }
        }
        Ok(form)
    }

    async fn accept(&mut self, field: Field<'_>, parts: &[FilePart], intake: &Intake<'_>) -> Result<()> {
        let Some(name) = field.name().map(str::to_string) else {
            return Ok(());
        };

        if let Some(part) = parts.iter().find(|p| p.name == name) {
            if self.files.contains_key(part.name) {
                return Err(Error::validation(part.name, "only one file may be sent"));
            }
            let original = field.file_name().unwrap_or_default().to_string();
            if original.is_empty() {
                return Err(Error::validation(part.name, "expected a file upload"));
            }
            let asset = store_file(field, part, &original, intake).await?;
            self.files.insert(part.name, (asset, original));
            return Ok(());
        }

        if field.file_name().is_some() {
            debug!(field = %name, "ignoring unexpected file part");
            return Ok(());
        }
        let value = field
            .text()
            .await
            .map_err(|e| multipart_error(e, intake.max_bytes))?;
        self.fields.insert(name, value);
        Ok(())
    }

    /// A file part, if it was sent.
    ///
    /// The form keeps ownership until [`release`](Self::release), so a later
    /// validation failure still removes it.
    pub fn file(&self, name: &str) -> Option<MediaAsset> {
        self.files.get(name).map(|(asset, _)| asset.clone())
    }

    /// A mandatory file part.
    pub fn require_file(&self, name: &str) -> Result<MediaAsset> {
        self.file(name)
            .ok_or_else(|| Error::validation(name, "file is required"))
    }

    /// Client-side name of a file part, used only for its extension.
    pub fn original_name(&self, name: &str) -> Option<&str> {
        self.files.get(name).map(|(_, original)| original.as_str())
    }

    /// A text part, trimmed; blank counts as absent.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// A mandatory text part.
    pub fn require_text(&self, name: &str) -> Result<&str> {
        self.text(name)
            .ok_or_else(|| Error::validation(name, "field is required"))
    }

    /// A text part parsed as `T`, or `default` when absent.
    pub fn parse<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.text(name) {
            Some(raw) => raw
                .parse()
                .map_err(|e| Error::validation(name, format!("invalid value '{raw}': {e}"))),
            None => Ok(default),
        }
    }

    /// A text part parsed as `T`, if present.
    pub fn parse_opt<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.text(name)
            .map(|raw| {
                raw.parse()
                    .map_err(|e| Error::validation(name, format!("invalid value '{raw}': {e}")))
            })
            .transpose()
    }

    /// A boolean flag in any of the usual form spellings.
    pub fn flag(&self, name: &str) -> Result<bool> {
        match self.text(name).map(str::to_ascii_lowercase).as_deref() {
            None => Ok(false),
            Some("true" | "1" | "yes" | "on") => Ok(true),
            Some("false" | "0" | "no" | "off") => Ok(false),
            Some(other) => Err(Error::validation(
                name,
                format!("expected a boolean, got '{other}'"),
            )),
        }
    }

    /// The common `upload` / `upload_location` fields.
    pub fn upload_options(&self) -> Result<UploadOptions> {
        Ok(UploadOptions {
            enabled: self.flag("upload")?,
            location: self.text("upload_location").unwrap_or_default().to_string(),
        })
    }

    /// Hand every file part over to whoever cloned it; nothing is deleted.
    pub fn release(&mut self) {
        self.files.clear();
    }

    #[cfg(test)]
    pub(crate) fn with_fields(fields: &[(&str, &str)]) -> Self {
        Self {
            files: HashMap::new(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    /// Delete every file part still held by the form.
    pub async fn discard(&mut self, artifacts: &ArtifactManager) {
        for (_, (asset, _)) in self.files.drain() {
            artifacts.discard(&asset.path).await;
        }
    }
}

async fn store_file(
    mut field: Field<'_>,
    part: &FilePart,
    original: &str,
    intake: &Intake<'_>,
) -> Result<MediaAsset> {
    let (kind, extension) = classify(part, original, intake.policy)?;
    let path = intake.artifacts.allocate(DirectoryClass::Temp, &extension);

    match write_field(&mut field, &path, part.name, intake.max_bytes).await {
        Ok(size) => {
            debug!(field = part.name, kind = %kind, bytes = size, "upload stored");
            Ok(MediaAsset::new(path, extension, kind, size))
        }
        Err(e) => {
            intake.artifacts.discard(&path).await;
            Err(e)
        }
    }
}

async fn write_field(field: &mut Field<'_>, path: &Path, name: &str, max_bytes: u64) -> Result<u64> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| Error::io_path("creating upload file", path, e))?;
    let mut written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| multipart_error(e, max_bytes))?
    {
        written += chunk.len() as u64;
        if written > max_bytes {
            return Err(Error::PayloadTooLarge { limit: max_bytes });
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::io_path("writing upload file", path, e))?;
    }
    file.flush()
        .await
        .map_err(|e| Error::io_path("writing upload file", path, e))?;
    if written == 0 {
        return Err(Error::validation(name, "file is empty"));
    }
    Ok(written)
}

fn classify(
    part: &FilePart,
    original: &str,
    policy: &ExtensionPolicy,
) -> Result<(MediaKind, Extension)> {
    if let [kind] = part.kinds {
        let ext = policy.check_filename(part.name, *kind, original)?;
        return Ok((*kind, ext));
    }
    let ext = Extension::from_filename(original)
        .ok_or_else(|| Error::validation(part.name, "file name has no extension"))?;
    part.kinds
        .iter()
        .find(|kind| policy.is_allowed(**kind, &ext))
        .map(|kind| (*kind, ext.clone()))
        .ok_or_else(|| Error::validation(part.name, format!("file type '.{ext}' not allowed")))
}
