//! Typed transform requests, one variant per endpoint.

use serde::{Deserialize, Serialize};

use crate::media::MediaAsset;
use crate::subtitle::{CaptionCue, CaptionRenderMode, CaptionStyle};

/// Still image container for frame output.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ImageFormat {
    #[default]
    #[strum(to_string = "jpg", serialize = "jpeg")]
    Jpg,
    Png,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Audio container/codec for extraction.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AudioFormat {
    #[default]
    Mp3,
    Aac,
    Wav,
    Flac,
    Opus,
}

impl AudioFormat {
    /// Encoder passed to `-c:a`.
    pub fn codec_arg(self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::Aac => "aac",
            Self::Wav => "pcm_s16le",
            Self::Flac => "flac",
            Self::Opus => "libopus",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "m4a",
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Opus => "opus",
        }
    }

    /// Bitrate for lossy codecs.
    pub fn bitrate(self) -> Option<&'static str> {
        match self {
            Self::Mp3 => Some("192k"),
            Self::Aac => Some("192k"),
            Self::Opus => Some("128k"),
            Self::Wav | Self::Flac => None,
        }
    }
}

/// Corner or center anchor for a watermark.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum WatermarkPosition {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
}

#[derive(Debug, Clone)]
pub struct CaptionVideoRequest {
    pub video: MediaAsset,
    pub cues: Vec<CaptionCue>,
    pub style: CaptionStyle,
    pub mode: CaptionRenderMode,
    /// Also produce a cue sheet artifact.
    pub sidecar: bool,
}

#[derive(Debug, Clone)]
pub struct CaptionImageRequest {
    pub image: MediaAsset,
    pub text: String,
    pub style: CaptionStyle,
    /// Box shift, or absolute top-left for the custom position.
    pub offset: (i64, i64),
}

#[derive(Debug, Clone)]
pub struct FrameExtractRequest {
    pub video: MediaAsset,
    /// Frames per second to sample.
    pub fps: f64,
    pub format: ImageFormat,
    /// `-q:v` value, 1 (best) to 31.
    pub quality: u8,
}

#[derive(Debug, Clone)]
pub struct LastFrameRequest {
    pub video: MediaAsset,
    pub format: ImageFormat,
    pub quality: u8,
}

/// One trimmed input of a concatenation, covering `[start, end)`.
#[derive(Debug, Clone)]
pub struct ConcatSegment {
    pub asset: MediaAsset,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone)]
pub struct ConcatRequest {
    pub segments: Vec<ConcatSegment>,
}

#[derive(Debug, Clone)]
pub struct AudioMuxRequest {
    pub video: MediaAsset,
    pub audio: MediaAsset,
    /// Replace the original track instead of mixing with it.
    pub replace: bool,
    /// Loop a short track instead of padding it with silence.
    pub loop_audio: bool,
}

#[derive(Debug, Clone)]
pub struct AspectPadRequest {
    pub video: MediaAsset,
    /// `W:H`, e.g. `16:9`.
    pub ratio: String,
    pub pad_color: Option<String>,
}

#[derive(Debug, Clone)]
pub struct VerticalCropRequest {
    pub video: MediaAsset,
    pub ratio: String,
}

#[derive(Debug, Clone)]
pub struct WatermarkRequest {
    pub video: MediaAsset,
    pub logo: MediaAsset,
    pub position: WatermarkPosition,
    /// Alpha-blend factor in `[0, 1]`.
    pub opacity: f64,
    /// Logo width as a fraction of the frame width, in `(0, 1]`.
    pub scale: f64,
}

#[derive(Debug, Clone)]
pub struct AppendRequest {
    pub video: MediaAsset,
    pub intro: Option<MediaAsset>,
    pub outro: Option<MediaAsset>,
}

#[derive(Debug, Clone)]
pub struct AudioExtractRequest {
    pub video: MediaAsset,
    pub format: AudioFormat,
}

/// A validated transform request. Consumed once by the synthesizer.
#[derive(Debug, Clone, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum TransformRequest {
    CaptionVideo(CaptionVideoRequest),
    CaptionImage(CaptionImageRequest),
    FrameExtract(FrameExtractRequest),
    LastFrame(LastFrameRequest),
    Concat(ConcatRequest),
    AudioMux(AudioMuxRequest),
    AspectPad(AspectPadRequest),
    VerticalCrop(VerticalCropRequest),
    Watermark(WatermarkRequest),
    Append(AppendRequest),
    AudioExtract(AudioExtractRequest),
}

impl TransformRequest {
    /// Every input asset with the request field that carried it.
    pub fn assets(&self) -> Vec<(&'static str, &MediaAsset)> {
        match self {
            Self::CaptionVideo(r) => vec![("video", &r.video)],
            Self::CaptionImage(r) => vec![("image", &r.image)],
            Self::FrameExtract(r) => vec![("video", &r.video)],
            Self::LastFrame(r) => vec![("video", &r.video)],
            Self::Concat(r) => r.segments.iter().map(|s| ("segments", &s.asset)).collect(),
            Self::AudioMux(r) => vec![("video", &r.video), ("audio", &r.audio)],
            Self::AspectPad(r) => vec![("video", &r.video)],
            Self::VerticalCrop(r) => vec![("video", &r.video)],
            Self::Watermark(r) => vec![("video", &r.video), ("logo", &r.logo)],
            Self::Append(r) => {
                let mut assets = vec![("video", &r.video)];
                if let Some(intro) = &r.intro {
                    assets.push(("intro", intro));
                }
                if let Some(outro) = &r.outro {
                    assets.push(("outro", outro));
                }
                assets
            }
            Self::AudioExtract(r) => vec![("video", &r.video)],
        }
    }

    /// Short name for logs, e.g. `aspect_pad`.
    pub fn kind(&self) -> &'static str {
        self.into()
    }
}
