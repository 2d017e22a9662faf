//! Per-media-kind extension allow-lists.

use std::collections::BTreeSet;

use crate::media::{Extension, MediaKind};
use crate::{Error, Result};

/// Allow-lists consulted before any inbound asset is written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPolicy {
    video: BTreeSet<Extension>,
    image: BTreeSet<Extension>,
    audio: BTreeSet<Extension>,
}

impl Default for ExtensionPolicy {
    fn default() -> Self {
        Self {
            video: parse_set(".mp4,.avi,.mov,.mkv,.webm,.flv,.wmv"),
            image: parse_set(".jpg,.jpeg,.png,.gif,.bmp,.webp,.tiff"),
            audio: parse_set(".mp3,.wav,.aac,.m4a,.ogg,.flac,.opus"),
        }
    }
}

/// Parse a comma list such as `".mp4, .MOV,webm"`, skipping unusable entries.
pub fn parse_set(raw: &str) -> BTreeSet<Extension> {
    raw.split(',').filter_map(Extension::parse).collect()
}

impl ExtensionPolicy {
    pub fn new(
        video: BTreeSet<Extension>,
        image: BTreeSet<Extension>,
        audio: BTreeSet<Extension>,
    ) -> Self {
        Self {
            video,
            image,
            audio,
        }
    }

    pub fn allowed(&self, kind: MediaKind) -> &BTreeSet<Extension> {
        match kind {
            MediaKind::Video => &self.video,
            MediaKind::Image => &self.image,
            MediaKind::Audio => &self.audio,
        }
    }

    pub fn is_allowed(&self, kind: MediaKind, ext: &Extension) -> bool {
        self.allowed(kind).contains(ext)
    }

    /// Validate a client-supplied file name for `kind`.
    ///
    /// Only the extension of the name is used; the name itself never reaches
    /// the filesystem.
    pub fn check_filename(&self, field: &str, kind: MediaKind, filename: &str) -> Result<Extension> {
        let ext = Extension::from_filename(filename)
            .ok_or_else(|| Error::validation(field, "file name has no extension"))?;
        if !self.is_allowed(kind, &ext) {
            let allowed: Vec<String> = self
                .allowed(kind)
                .iter()
                .map(|e| format!(".{e}"))
                .collect();
            return Err(Error::validation(
                field,
                format!(
                    "extension .{ext} is not allowed for {kind}; allowed: {}",
                    allowed.join(", ")
                ),
            ));
        }
        Ok(ext)
    }
}
