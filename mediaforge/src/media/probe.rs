//! Metadata probing through `ffprobe`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use process_utils::engine_command;
use serde::Deserialize;
use tracing::{debug, warn};

use super::MediaAsset;
use crate::error::ProcessingError;
use crate::{Error, Result};

/// Stream-level facts the command synthesizer needs for layout math.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    /// Container duration in seconds; `None` for still images.
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Average frame rate of the first video stream.
    pub frame_rate: Option<f64>,
    /// Codec name of the first video stream, as ffprobe reports it.
    pub video_codec: Option<String>,
    pub has_video: bool,
    pub has_audio: bool,
}

impl MediaInfo {
    /// Frame dimensions, or a validation error naming `field`.
    pub fn dimensions(&self, field: &str) -> Result<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
            _ => Err(Error::validation(field, "media has no video dimensions")),
        }
    }

    /// Positive duration, or a validation error naming `field`.
    pub fn duration_secs(&self, field: &str) -> Result<f64> {
        self.duration
            .filter(|d| d.is_finite() && *d > 0.0)
            .ok_or_else(|| Error::validation(field, "could not determine media duration"))
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    let fps = num / den;
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

fn parse_seconds(raw: Option<&String>) -> Option<f64> {
    raw.and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parse `ffprobe -print_format json -show_format -show_streams` output.
pub fn parse_probe_json(raw: &str) -> Option<MediaInfo> {
    let output: ProbeOutput = serde_json::from_str(raw).ok()?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let has_audio = output
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let duration = output
        .format
        .as_ref()
        .and_then(|f| parse_seconds(f.duration.as_ref()))
        .or_else(|| video.and_then(|v| parse_seconds(v.duration.as_ref())));

    let frame_rate = video.and_then(|v| {
        v.avg_frame_rate
            .as_deref()
            .and_then(parse_rate)
            .or_else(|| v.r_frame_rate.as_deref().and_then(parse_rate))
    });

    Some(MediaInfo {
        duration,
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
        frame_rate,
        video_codec: video.and_then(|v| v.codec_name.clone()),
        has_video: video.is_some(),
        has_audio,
    })
}

/// Runs `ffprobe` against assets.
#[derive(Debug, Clone)]
pub struct Prober {
    ffprobe_path: String,
    timeout: Duration,
}

impl Prober {
    pub fn new(ffprobe_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            timeout,
        }
    }

    /// Probe one asset. An unreadable file is a validation error on `field`.
    pub async fn probe(&self, asset: &MediaAsset, field: &str) -> Result<MediaInfo> {
        let mut cmd = engine_command(&self.ffprobe_path);
        cmd.args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(&asset.path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Processing(ProcessingError::EngineMissing)
            } else {
                Error::io_path("spawning ffprobe", &asset.path, e)
            }
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(Error::io_path("waiting for ffprobe", &asset.path, e)),
            Err(_) => {
                warn!(asset = %asset.file_name(), "ffprobe timed out");
                return Err(ProcessingError::TimedOut {
                    after: self.timeout,
                }
                .into());
            }
        };

        if !output.status.success() {
            debug!(
                asset = %asset.file_name(),
                stderr = %String::from_utf8_lossy(&output.stderr),
                "ffprobe rejected input"
            );
            return Err(Error::validation(field, "file is not a readable media file"));
        }

        parse_probe_json(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| Error::validation(field, "file is not a readable media file"))
    }
}

/// Probe results for every asset a request references, keyed by path.
#[derive(Debug, Clone, Default)]
pub struct ProbeSet {
    infos: HashMap<PathBuf, MediaInfo>,
}

impl ProbeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, asset: &MediaAsset, info: MediaInfo) {
        self.infos.insert(asset.path.clone(), info);
    }

    pub fn contains(&self, asset: &MediaAsset) -> bool {
        self.infos.contains_key(&asset.path)
    }

    pub fn get(&self, asset: &MediaAsset) -> Result<&MediaInfo> {
        self.infos
            .get(&asset.path)
            .ok_or_else(|| Error::Other(format!("asset {} was not probed", asset.file_name())))
    }
}
