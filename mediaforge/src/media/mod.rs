//! Media assets and the metadata read from them.

pub mod archive;
pub mod fetch;
pub mod probe;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub use probe::{MediaInfo, ProbeSet, Prober};

/// Broad class of a media file, used for extension allow-lists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

/// A validated, lowercase file extension without the leading dot.
///
/// Only ASCII alphanumerics are accepted, so an extension can never carry a
/// path separator or a traversal sequence into a generated file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Extension(String);

impl Extension {
    const MAX_LEN: usize = 8;

    /// Parse `"mp4"`, `".MP4"` and similar into a normalized extension.
    pub fn parse(raw: &str) -> Option<Self> {
        let ext = raw.trim().trim_start_matches('.').to_ascii_lowercase();
        let valid = !ext.is_empty()
            && ext.len() <= Self::MAX_LEN
            && ext.bytes().all(|b| b.is_ascii_alphanumeric());
        valid.then_some(Self(ext))
    }

    /// Extension from a literal known to be valid, such as `"mp4"`.
    pub fn from_static(ext: &'static str) -> Self {
        debug_assert!(Self::parse(ext).is_some_and(|e| e.0 == ext));
        Self(ext.to_string())
    }

    /// Extension of a client-supplied file name, if it has a usable one.
    pub fn from_filename(filename: &str) -> Option<Self> {
        let (_, ext) = filename.rsplit_once('.')?;
        Self::parse(ext)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Best-effort MIME type for download responses.
    pub fn mime_type(&self) -> &'static str {
        match self.0.as_str() {
            "mp4" => "video/mp4",
            "avi" => "video/x-msvideo",
            "mov" => "video/quicktime",
            "mkv" => "video/x-matroska",
            "webm" => "video/webm",
            "flv" => "video/x-flv",
            "wmv" => "video/x-ms-wmv",
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            "bmp" => "image/bmp",
            "webp" => "image/webp",
            "tiff" => "image/tiff",
            "mp3" => "audio/mpeg",
            "m4a" | "aac" => "audio/mp4",
            "wav" => "audio/wav",
            "flac" => "audio/flac",
            "ogg" | "opus" => "audio/ogg",
            "zip" => "application/zip",
            "srt" => "application/x-subrip",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Display for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An input file owned by the artifact manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub extension: Extension,
    pub kind: MediaKind,
    pub size_bytes: u64,
}

impl MediaAsset {
    pub fn new(path: PathBuf, extension: Extension, kind: MediaKind, size_bytes: u64) -> Self {
        Self {
            path,
            extension,
            kind,
            size_bytes,
        }
    }

    /// Build an asset from a file that already exists on disk.
    pub async fn from_existing(path: &Path, kind: MediaKind) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(Extension::parse)
            .ok_or_else(|| Error::validation("file", "file has no usable extension"))?;
        let size_bytes = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::io_path("reading metadata", path, e))?
            .len();
        Ok(Self::new(path.to_path_buf(), extension, kind, size_bytes))
    }

    /// Artifact name of this asset (the final path component).
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_normalizes_case_and_dot() {
        assert_eq!(Extension::parse(".MP4").unwrap().as_str(), "mp4");
        assert_eq!(Extension::parse("jpeg").unwrap().as_str(), "jpeg");
    }

    #[test]
    fn extension_rejects_separators() {
        assert!(Extension::parse("").is_none());
        assert!(Extension::parse("mp4/../x").is_none());
        assert!(Extension::parse("a.b").is_none());
        assert!(Extension::parse("toolongextension").is_none());
    }

    #[test]
    fn extension_from_filename_uses_last_dot() {
        assert_eq!(
            Extension::from_filename("holiday.final.MOV").unwrap().as_str(),
            "mov"
        );
        assert!(Extension::from_filename("noextension").is_none());
        assert!(Extension::from_filename("../../etc/passwd").is_none());
    }

    #[test]
    fn media_kind_parses_lowercase() {
        assert_eq!("video".parse::<MediaKind>().unwrap(), MediaKind::Video);
        assert_eq!(MediaKind::Audio.to_string(), "audio");
    }
}
