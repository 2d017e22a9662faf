//! Translation of transform requests into engine invocation plans.
//!
//! Every handler validates its parameters first and reserves output paths
//! last, so a rejected request never leaves a pending artifact behind. Apart
//! from probe results the synthesizer reads nothing from disk.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::crop::{CenterCropSelector, CropWindowSelector, select_window};
use super::geometry::{Ratio, floor_even, pad_dimensions, round_even};
use super::plan::{FilterSpec, InvocationPlan, PlanBuilder, PlanOutput};
use super::request::*;
use crate::artifacts::{ArtifactManager, DirectoryClass};
use crate::media::{Extension, MediaAsset, MediaInfo, ProbeSet};
use crate::subtitle::ass::static_text_filters;
use crate::subtitle::color::{ColorSpec, Rgb, ffmpeg_color};
use crate::subtitle::escape::FilterText;
use crate::subtitle::{
    CaptionPosition, CaptionRenderMode, FrameSize, MAX_CUE_CHARS, build_ass_document,
    build_cue_sheet, drawtext_filters,
};
use crate::{Error, Result};

/// Upper bound on frames a single extraction may produce.
pub const MAX_FRAMES: u64 = 10_000;
/// Highest accepted sampling rate for frame extraction.
pub const MAX_FPS: f64 = 30.0;
/// Most segments one concatenation accepts.
pub const MAX_SEGMENTS: usize = 20;
/// Distance of a corner watermark from the frame edges, in pixels.
pub const WATERMARK_MARGIN: u32 = 20;

const NORMALIZED_FPS: u32 = 30;
const NORMALIZED_SAMPLE_RATE: u32 = 48_000;

const VIDEO_ENCODE: [&str; 8] = [
    "-c:v", "libx264", "-preset", "veryfast", "-crf", "20", "-pix_fmt", "yuv420p",
];
const AUDIO_ENCODE: [&str; 4] = ["-c:a", "aac", "-b:a", "192k"];
const FASTSTART: [&str; 2] = ["-movflags", "+faststart"];
const KEEP_STREAMS: [&str; 4] = ["-map", "0:v:0", "-map", "0:a?"];

/// Containers whose video stream may be copied into an mp4 unchanged.
const COPYABLE_CONTAINERS: [&str; 2] = ["mp4", "mov"];
/// Video codecs the mp4 muxer accepts without re-encoding.
const MP4_VIDEO_CODECS: [&str; 4] = ["h264", "hevc", "mpeg4", "av1"];

/// Whether `asset`'s video stream can be stream-copied into an mp4 output.
fn can_copy_video(asset: &MediaAsset, info: &MediaInfo) -> bool {
    COPYABLE_CONTAINERS.contains(&asset.extension.as_str())
        && info
            .video_codec
            .as_deref()
            .is_some_and(|codec| MP4_VIDEO_CODECS.contains(&codec))
}

fn quality_arg(quality: u8) -> Result<String> {
    if (1..=31).contains(&quality) {
        Ok(quality.to_string())
    } else {
        Err(Error::validation("quality", "must be between 1 and 31"))
    }
}

/// One trimmed input of a normalized timeline.
#[derive(Debug, Clone, Copy)]
struct TimelinePart {
    input: usize,
    start: f64,
    end: f64,
    has_audio: bool,
}

/// Filter graph that trims every part, brings it to `width`x`height` at a
/// common frame rate and audio layout, and concatenates in order.
fn normalized_timeline(parts: &[TimelinePart], width: u32, height: u32) -> String {
    let audio_format = "aformat=sample_fmts=fltp:channel_layouts=stereo";
    let mut graph = Vec::with_capacity(parts.len() * 2 + 1);
    let mut labels = String::new();

    for (i, part) in parts.iter().enumerate() {
        let (start, end) = (part.start, part.end);
        graph.push(format!(
            "[{input}:v]trim=start={start:.3}:end={end:.3},setpts=PTS-STARTPTS,\
             scale={width}:{height}:force_original_aspect_ratio=decrease,\
             pad={width}:{height}:(ow-iw)/2:(oh-ih)/2:color=black,\
             fps={NORMALIZED_FPS},format=yuv420p,setsar=1[v{i}]",
            input = part.input,
        ));
        if part.has_audio {
            graph.push(format!(
                "[{input}:a]atrim=start={start:.3}:end={end:.3},asetpts=PTS-STARTPTS,\
                 aresample={NORMALIZED_SAMPLE_RATE},{audio_format}[a{i}]",
                input = part.input,
            ));
        } else {
            graph.push(format!(
                "anullsrc=channel_layout=stereo:sample_rate={NORMALIZED_SAMPLE_RATE},\
                 atrim=duration={:.3},{audio_format}[a{i}]",
                end - start,
            ));
        }
        labels.push_str(&format!("[v{i}][a{i}]"));
    }
    graph.push(format!("{labels}concat=n={}:v=1:a=1[v][a]", parts.len()));
    graph.join(";")
}

/// Overlay coordinates for a watermark anchor.
fn overlay_position(position: WatermarkPosition) -> (String, String) {
    let m = WATERMARK_MARGIN;
    match position {
        WatermarkPosition::TopLeft => (m.to_string(), m.to_string()),
        WatermarkPosition::TopRight => (format!("main_w-overlay_w-{m}"), m.to_string()),
        WatermarkPosition::BottomLeft => (m.to_string(), format!("main_h-overlay_h-{m}")),
        WatermarkPosition::BottomRight => (
            format!("main_w-overlay_w-{m}"),
            format!("main_h-overlay_h-{m}"),
        ),
        WatermarkPosition::Center => (
            "(main_w-overlay_w)/2".to_string(),
            "(main_h-overlay_h)/2".to_string(),
        ),
    }
}

/// Builds invocation plans for the external engine.
pub struct CommandSynthesizer {
    timeout: Duration,
    threads: u32,
    crop_selector: Arc<dyn CropWindowSelector>,
}

impl std::fmt::Debug for CommandSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSynthesizer")
            .field("timeout", &self.timeout)
            .field("threads", &self.threads)
            .field("crop_selector", &self.crop_selector.name())
            .finish()
    }
}

impl CommandSynthesizer {
    /// `threads == 0` leaves thread selection to the engine.
    pub fn new(timeout: Duration, threads: u32) -> Self {
        Self {
            timeout,
            threads,
            crop_selector: Arc::new(CenterCropSelector),
        }
    }

    /// Replace the centered crop heuristic used for vertical reframing.
    pub fn with_crop_selector(mut self, selector: Arc<dyn CropWindowSelector>) -> Self {
        self.crop_selector = selector;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn builder(&self, kind: &'static str, output: PlanOutput) -> PlanBuilder {
        PlanBuilder::new(kind, output, self.timeout).threads(self.threads)
    }

    /// Produce the plan for `request`.
    ///
    /// `probes` must hold metadata for every asset of the request. Output
    /// paths are reserved in `artifacts` but nothing is written.
    pub async fn synthesize(
        &self,
        request: &TransformRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        let plan = match request {
            TransformRequest::CaptionVideo(r) => self.caption_video(r, probes, artifacts)?,
            TransformRequest::CaptionImage(r) => self.caption_image(r, probes, artifacts)?,
            TransformRequest::FrameExtract(r) => self.frame_extract(r, probes, artifacts)?,
            TransformRequest::LastFrame(r) => self.last_frame(r, probes, artifacts)?,
            TransformRequest::Concat(r) => self.concat(r, probes, artifacts)?,
            TransformRequest::AudioMux(r) => self.audio_mux(r, probes, artifacts)?,
            TransformRequest::AspectPad(r) => self.aspect_pad(r, probes, artifacts)?,
            TransformRequest::VerticalCrop(r) => self.vertical_crop(r, probes, artifacts).await?,
            TransformRequest::Watermark(r) => self.watermark(r, probes, artifacts)?,
            TransformRequest::Append(r) => self.append(r, probes, artifacts)?,
            TransformRequest::AudioExtract(r) => self.audio_extract(r, probes, artifacts)?,
        };
        debug!(kind = plan.kind(), inputs = plan.inputs().len(), "invocation plan built");
        Ok(plan)
    }

    fn encoded_video(&self, kind: &'static str, output: std::path::PathBuf) -> PlanBuilder {
        self.builder(kind, PlanOutput::File(output))
    }

    fn caption_video(
        &self,
        r: &CaptionVideoRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        r.style.validate()?;
        if r.style.position == CaptionPosition::Custom {
            return Err(Error::validation(
                "position",
                "custom positioning is only supported for images",
            ));
        }
        if r.cues.is_empty() {
            return Err(Error::validation(
                "captions_json",
                "at least one caption is required",
            ));
        }
        let (width, height) = probes.get(&r.video)?.dimensions("video")?;
        let frame = FrameSize::new(width, height);

        let sidecar = r.sidecar.then(|| build_cue_sheet(&r.cues));
        let mut builder;
        match r.mode {
            CaptionRenderMode::Subtitles => {
                let document = build_ass_document(&r.cues, &r.style, frame);
                let output = artifacts.allocate(DirectoryClass::Output, &Extension::from_static("mp4"));
                let ass_path = artifacts.allocate(DirectoryClass::Temp, &Extension::from_static("ass"));
                let filter = format!(
                    "subtitles=filename={}",
                    FilterText::escape(&ass_path.to_string_lossy())
                );
                builder = self
                    .encoded_video("caption_video", output)
                    .support_file(ass_path, document)
                    .filter(FilterSpec::Simple(filter));
            }
            CaptionRenderMode::Drawtext => {
                let filters = drawtext_filters(&r.cues, &r.style, frame);
                let output = artifacts.allocate(DirectoryClass::Output, &Extension::from_static("mp4"));
                builder = self.encoded_video("caption_video", output);
                if !filters.is_empty() {
                    // One drawbox/drawtext pair per cue; long cue lists exceed
                    // what a single argument may carry.
                    let script = artifacts.allocate(DirectoryClass::Temp, &Extension::from_static("txt"));
                    builder = builder
                        .support_file(script.clone(), filters.join(","))
                        .filter(FilterSpec::Script(script));
                }
            }
        }
        if let Some(sheet) = sidecar {
            let path = artifacts.allocate(DirectoryClass::Output, &Extension::from_static("srt"));
            builder = builder.sidecar(path, sheet);
        }

        Ok(builder
            .input(&r.video.path)
            .args(KEEP_STREAMS)
            .args(VIDEO_ENCODE)
            .args(AUDIO_ENCODE)
            .args(FASTSTART)
            .build())
    }

    fn caption_image(
        &self,
        r: &CaptionImageRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        r.style.validate()?;
        let length = r.text.trim().chars().count();
        if length == 0 || r.text.chars().count() > MAX_CUE_CHARS {
            return Err(Error::validation(
                "text",
                format!("must be between 1 and {MAX_CUE_CHARS} characters"),
            ));
        }
        let (width, height) = probes.get(&r.image)?.dimensions("image")?;
        let filters = static_text_filters(&r.text, &r.style, FrameSize::new(width, height), r.offset);

        let output = artifacts.allocate(DirectoryClass::Output, &r.image.extension);
        let mut builder = self
            .builder("caption_image", PlanOutput::File(output))
            .input(&r.image.path)
            .filter(FilterSpec::Simple(filters.join(",")))
            .args(["-frames:v", "1", "-update", "1"]);
        if matches!(r.image.extension.as_str(), "jpg" | "jpeg") {
            builder = builder.args(["-q:v", "2"]);
        }
        Ok(builder.build())
    }

    fn frame_extract(
        &self,
        r: &FrameExtractRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        if !r.fps.is_finite() || r.fps <= 0.0 || r.fps > MAX_FPS {
            return Err(Error::validation(
                "fps",
                format!("must be greater than 0 and at most {MAX_FPS}"),
            ));
        }
        let quality = quality_arg(r.quality)?;
        let duration = probes.get(&r.video)?.duration_secs("video")?;
        let estimated = (duration * r.fps).ceil() as u64;
        if estimated > MAX_FRAMES {
            return Err(Error::validation(
                "fps",
                format!("would produce about {estimated} frames; at most {MAX_FRAMES} are allowed"),
            ));
        }

        let dir = artifacts.allocate_dir(DirectoryClass::Temp);
        let archive = artifacts.allocate(DirectoryClass::Output, &Extension::from_static("zip"));
        let pattern = format!("frame_%05d.{}", r.format.extension());
        let mut builder = self
            .builder(
                "frame_extract",
                PlanOutput::ImageSequence {
                    dir,
                    pattern,
                    archive,
                },
            )
            .input(&r.video.path)
            .filter(FilterSpec::Simple(format!("fps={}", r.fps)))
            .args(["-map", "0:v:0", "-an"]);
        if r.format == ImageFormat::Jpg {
            builder = builder.args(["-q:v".to_string(), quality]);
        }
        Ok(builder.build())
    }

    fn last_frame(
        &self,
        r: &LastFrameRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        let quality = quality_arg(r.quality)?;
        let info = probes.get(&r.video)?;
        let duration = info.duration_secs("video")?;
        // Step back one frame interval so the seek lands on the final frame.
        let back_off = match info.frame_rate {
            Some(fps) if fps.is_finite() && fps > 0.0 => 1.0 / fps + 0.001,
            _ => 0.1,
        };
        let seek = (duration - back_off).max(0.0);

        let output = artifacts.allocate(DirectoryClass::Output, &Extension::from_static(r.format.extension()));
        let mut builder = self
            .builder("last_frame", PlanOutput::File(output))
            .input_with(["-ss".to_string(), format!("{seek:.3}")], &r.video.path)
            .args(["-map", "0:v:0", "-frames:v", "1", "-update", "1"]);
        if r.format == ImageFormat::Jpg {
            builder = builder.args(["-q:v".to_string(), quality]);
        }
        Ok(builder.build())
    }

    fn concat(
        &self,
        r: &ConcatRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        if r.segments.is_empty() || r.segments.len() > MAX_SEGMENTS {
            return Err(Error::validation(
                "segments",
                format!("between 1 and {MAX_SEGMENTS} segments are required"),
            ));
        }

        let mut parts = Vec::with_capacity(r.segments.len());
        for (i, segment) in r.segments.iter().enumerate() {
            if !segment.start.is_finite() || segment.start < 0.0 {
                return Err(Error::validation(
                    "segments",
                    format!("segment {i} start must be a non-negative number"),
                ));
            }
            if !segment.end.is_finite() || segment.end <= segment.start {
                return Err(Error::validation(
                    "segments",
                    format!("segment {i} end must be greater than start"),
                ));
            }
            let info = probes.get(&segment.asset)?;
            let duration = info.duration_secs("segments")?;
            if segment.start >= duration {
                return Err(Error::validation(
                    "segments",
                    format!("segment {i} starts after the end of its video"),
                ));
            }
            parts.push(TimelinePart {
                input: i,
                start: segment.start,
                end: segment.end.min(duration),
                has_audio: info.has_audio,
            });
        }

        let (width, height) = probes.get(&r.segments[0].asset)?.dimensions("segments")?;
        let (width, height) = (floor_even(f64::from(width)), floor_even(f64::from(height)));
        let inputs: Vec<&MediaAsset> = r.segments.iter().map(|s| &s.asset).collect();
        self.timeline_plan("concat", &inputs, &parts, width, height, artifacts)
    }

    fn append(
        &self,
        r: &AppendRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        if r.intro.is_none() && r.outro.is_none() {
            return Err(Error::validation(
                "intro",
                "an intro or an outro video is required",
            ));
        }
        let main = probes.get(&r.video)?;
        let (width, height) = main.dimensions("video")?;
        let (width, height) = (floor_even(f64::from(width)), floor_even(f64::from(height)));

        let ordered = [("intro", r.intro.as_ref()), ("video", Some(&r.video)), ("outro", r.outro.as_ref())];
        let mut inputs = Vec::with_capacity(3);
        let mut parts = Vec::with_capacity(3);
        for (field, asset) in ordered {
            let Some(asset) = asset else { continue };
            let info = probes.get(asset)?;
            info.dimensions(field)?;
            parts.push(TimelinePart {
                input: inputs.len(),
                start: 0.0,
                end: info.duration_secs(field)?,
                has_audio: info.has_audio,
            });
            inputs.push(asset);
        }
        self.timeline_plan("append", &inputs, &parts, width, height, artifacts)
    }

    fn timeline_plan(
        &self,
        kind: &'static str,
        inputs: &[&MediaAsset],
        parts: &[TimelinePart],
        width: u32,
        height: u32,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        let graph = normalized_timeline(parts, width, height);
        let output = artifacts.allocate(DirectoryClass::Output, &Extension::from_static("mp4"));
        let mut builder = self.encoded_video(kind, output);
        for asset in inputs {
            builder = builder.input(&asset.path);
        }
        Ok(builder
            .filter(FilterSpec::Complex(graph))
            .args(["-map", "[v]", "-map", "[a]"])
            .args(VIDEO_ENCODE)
            .args(AUDIO_ENCODE)
            .args(FASTSTART)
            .build())
    }

    fn audio_mux(
        &self,
        r: &AudioMuxRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        let video = probes.get(&r.video)?;
        let duration = video.duration_secs("video")?;
        if !video.has_video {
            return Err(Error::validation("video", "file has no video stream"));
        }
        if !probes.get(&r.audio)?.has_audio {
            return Err(Error::validation("audio", "file has no audio stream"));
        }

        // A short track is padded with silence (or looped on request) and a
        // long one is cut, so the output always matches the video duration.
        let audio_options: Vec<String> = if r.loop_audio {
            vec!["-stream_loop".into(), "-1".into()]
        } else {
            Vec::new()
        };
        let (filter, audio_map) = if r.replace || !video.has_audio {
            if r.loop_audio {
                (FilterSpec::None, "1:a:0")
            } else {
                (FilterSpec::Complex("[1:a]apad[a]".to_string()), "[a]")
            }
        } else {
            (
                FilterSpec::Complex(
                    "[0:a][1:a]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[a]"
                        .to_string(),
                ),
                "[a]",
            )
        };

        let output = artifacts.allocate(DirectoryClass::Output, &Extension::from_static("mp4"));
        let mut builder = self
            .encoded_video("audio_mux", output)
            .input(&r.video.path)
            .input_with(audio_options, &r.audio.path)
            .filter(filter)
            .args(["-map", "0:v:0", "-map", audio_map]);
        builder = if can_copy_video(&r.video, video) {
            builder.args(["-c:v", "copy"])
        } else {
            builder.args(VIDEO_ENCODE)
        };
        Ok(builder
            .args(AUDIO_ENCODE)
            .args(["-t".to_string(), format!("{duration:.3}")])
            .args(FASTSTART)
            .build())
    }

    fn aspect_pad(
        &self,
        r: &AspectPadRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        let ratio = Ratio::parse(&r.ratio, "ratio")?;
        let pad = match r.pad_color.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(raw) => raw
                .parse::<ColorSpec>()
                .map_err(|e| Error::validation("pad_color", e))?,
            None => ColorSpec {
                color: Rgb::BLACK,
                opacity: None,
            },
        };
        let (width, height) = probes.get(&r.video)?.dimensions("video")?;
        let (tw, th) = pad_dimensions(width, height, ratio);
        let color = ffmpeg_color(pad.color, pad.opacity.unwrap_or(1.0));
        let filter = format!(
            "scale={tw}:{th}:force_original_aspect_ratio=decrease:force_divisible_by=2,\
             pad={tw}:{th}:(ow-iw)/2:(oh-ih)/2:color={color},setsar=1"
        );

        let output = artifacts.allocate(DirectoryClass::Output, &Extension::from_static("mp4"));
        Ok(self
            .encoded_video("aspect_pad", output)
            .input(&r.video.path)
            .filter(FilterSpec::Simple(filter))
            .args(KEEP_STREAMS)
            .args(VIDEO_ENCODE)
            .args(AUDIO_ENCODE)
            .args(FASTSTART)
            .build())
    }

    async fn vertical_crop(
        &self,
        r: &VerticalCropRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        let ratio = if r.ratio.trim().is_empty() {
            Ratio::VERTICAL
        } else {
            Ratio::parse(&r.ratio, "ratio")?
        };
        let info = probes.get(&r.video)?;
        let (width, height) = info.dimensions("video")?;
        let window = select_window(self.crop_selector.as_ref(), &r.video, info, ratio).await?;
        let rect = window.to_pixels(width, height);
        debug!(
            selector = self.crop_selector.name(),
            x = rect.x,
            y = rect.y,
            width = rect.width,
            height = rect.height,
            "crop window selected"
        );

        let output = artifacts.allocate(DirectoryClass::Output, &Extension::from_static("mp4"));
        Ok(self
            .encoded_video("vertical_crop", output)
            .input(&r.video.path)
            .filter(FilterSpec::Simple(format!(
                "crop={}:{}:{}:{},setsar=1",
                rect.width, rect.height, rect.x, rect.y
            )))
            .args(KEEP_STREAMS)
            .args(VIDEO_ENCODE)
            .args(AUDIO_ENCODE)
            .args(FASTSTART)
            .build())
    }

    fn watermark(
        &self,
        r: &WatermarkRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        if !(0.0..=1.0).contains(&r.opacity) {
            return Err(Error::validation("opacity", "must be within [0, 1]"));
        }
        if !r.scale.is_finite() || r.scale <= 0.0 || r.scale > 1.0 {
            return Err(Error::validation("scale", "must be greater than 0 and at most 1"));
        }
        let (width, _) = probes.get(&r.video)?.dimensions("video")?;
        probes.get(&r.logo)?.dimensions("logo")?;

        let logo_width = round_even(f64::from(width) * r.scale);
        let (x, y) = overlay_position(r.position);
        let graph = format!(
            "[1:v]scale={logo_width}:-2,format=rgba,colorchannelmixer=aa={opacity:.3}[wm];\
             [0:v][wm]overlay={x}:{y}:format=auto,format=yuv420p[v]",
            opacity = r.opacity,
        );

        let output = artifacts.allocate(DirectoryClass::Output, &Extension::from_static("mp4"));
        Ok(self
            .encoded_video("watermark", output)
            .input(&r.video.path)
            .input(&r.logo.path)
            .filter(FilterSpec::Complex(graph))
            .args(["-map", "[v]", "-map", "0:a?"])
            .args(VIDEO_ENCODE)
            .args(AUDIO_ENCODE)
            .args(FASTSTART)
            .build())
    }

    fn audio_extract(
        &self,
        r: &AudioExtractRequest,
        probes: &ProbeSet,
        artifacts: &ArtifactManager,
    ) -> Result<InvocationPlan> {
        if !probes.get(&r.video)?.has_audio {
            return Err(Error::validation("video", "video has no audio stream"));
        }
        let output = artifacts.allocate(DirectoryClass::Output, &Extension::from_static(r.format.extension()));
        let mut builder = self
            .builder("audio_extract", PlanOutput::File(output))
            .input(&r.video.path)
            .args(["-map", "0:a:0", "-vn", "-c:a", r.format.codec_arg()]);
        if let Some(bitrate) = r.format.bitrate() {
            builder = builder.args(["-b:a", bitrate]);
        }
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use super::*;
    use crate::artifacts::ArtifactSettings;
    use crate::media::MediaKind;
    use crate::subtitle::{CaptionCue, CaptionStyle, MAX_CUES};
    use crate::transform::geometry::CropWindow;

    struct Fixture {
        _dir: tempfile::TempDir,
        artifacts: ArtifactManager,
        probes: ProbeSet,
        synth: CommandSynthesizer,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let artifacts = ArtifactManager::new(ArtifactSettings {
                temp_root: dir.path().join("temp"),
                output_root: dir.path().join("output"),
                retention: Duration::from_secs(60),
                grace: Duration::from_secs(5),
            });
            Self {
                _dir: dir,
                artifacts,
                probes: ProbeSet::new(),
                synth: CommandSynthesizer::new(Duration::from_secs(30), 0),
            }
        }

        fn asset(&mut self, name: &str, kind: MediaKind, info: MediaInfo) -> MediaAsset {
            let ext = Path::new(name).extension().unwrap().to_str().unwrap();
            let asset = MediaAsset::new(
                PathBuf::from("/in").join(name),
                Extension::parse(ext).unwrap(),
                kind,
                1024,
            );
            self.probes.insert(&asset, info);
            asset
        }

        fn video(&mut self, name: &str, duration: f64, has_audio: bool) -> MediaAsset {
            self.asset(name, MediaKind::Video, video_info(1920, 1080, duration, has_audio))
        }

        async fn plan(&self, request: TransformRequest) -> Result<InvocationPlan> {
            self.synth.synthesize(&request, &self.probes, &self.artifacts).await
        }
    }

    fn video_info(width: u32, height: u32, duration: f64, has_audio: bool) -> MediaInfo {
        MediaInfo {
            duration: Some(duration),
            width: Some(width),
            height: Some(height),
            frame_rate: Some(25.0),
            video_codec: Some("h264".into()),
            has_video: true,
            has_audio,
        }
    }

    fn image_info(width: u32, height: u32) -> MediaInfo {
        MediaInfo {
            duration: None,
            width: Some(width),
            height: Some(height),
            frame_rate: None,
            video_codec: Some("png".into()),
            has_video: true,
            has_audio: false,
        }
    }

    fn audio_info(duration: f64) -> MediaInfo {
        MediaInfo {
            duration: Some(duration),
            width: None,
            height: None,
            frame_rate: None,
            video_codec: None,
            has_video: false,
            has_audio: true,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    fn cues() -> Vec<CaptionCue> {
        vec![
            CaptionCue {
                text: "Hello".into(),
                start: 0.0,
                end: 3.0,
            },
            CaptionCue {
                text: "Goodbye".into(),
                start: 4.0,
                end: 6.0,
            },
        ]
    }

    #[tokio::test]
    async fn subtitles_mode_writes_escaped_document_path() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 6.0, true);
        let plan = fx
            .plan(TransformRequest::CaptionVideo(CaptionVideoRequest {
                video,
                cues: cues(),
                style: CaptionStyle::default(),
                mode: CaptionRenderMode::Subtitles,
                sidecar: true,
            }))
            .await
            .unwrap();

        assert_eq!(plan.support_files().len(), 1);
        let doc = &plan.support_files()[0];
        assert!(doc.path.starts_with(fx.artifacts.root(DirectoryClass::Temp)));
        assert!(doc.contents.contains("Dialogue: 0,00:00:00.00,00:00:03.00"));
        match plan.filter() {
            FilterSpec::Simple(chain) => {
                assert!(chain.starts_with("subtitles=filename="));
                assert!(chain.ends_with(".ass"));
            }
            other => panic!("unexpected filter {other:?}"),
        }
        let sidecar = plan.sidecar().unwrap();
        assert!(sidecar.path.starts_with(fx.artifacts.root(DirectoryClass::Output)));
        assert!(sidecar.contents.starts_with("1\n00:00:00,00 --> 00:00:03,00\nHello"));
        assert_eq!(plan.artifact_path().extension().unwrap(), "mp4");
    }

    #[tokio::test]
    async fn drawtext_mode_gates_each_cue() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 6.0, true);
        let plan = fx
            .plan(TransformRequest::CaptionVideo(CaptionVideoRequest {
                video,
                cues: cues(),
                style: CaptionStyle::default(),
                mode: CaptionRenderMode::Drawtext,
                sidecar: false,
            }))
            .await
            .unwrap();
        let FilterSpec::Script(script) = plan.filter() else {
            panic!("expected a filter script");
        };
        assert_eq!(plan.support_files().len(), 1);
        let graph = &plan.support_files()[0];
        assert_eq!(&graph.path, script);
        assert!(graph.path.starts_with(fx.artifacts.root(DirectoryClass::Temp)));
        assert!(graph.contents.contains("gte(t\\,0.000)*lt(t\\,3.000)"));
        assert!(graph.contents.contains("gte(t\\,4.000)*lt(t\\,6.000)"));
        assert!(plan.sidecar().is_none());
    }

    #[tokio::test]
    async fn drawtext_mode_keeps_long_cue_lists_out_of_argv() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 2_000.0, false);
        let cues = (0..MAX_CUES)
            .map(|i| CaptionCue {
                text: format!("caption number {i} with some words"),
                start: i as f64,
                end: i as f64 + 0.5,
            })
            .collect();
        let plan = fx
            .plan(TransformRequest::CaptionVideo(CaptionVideoRequest {
                video,
                cues,
                style: CaptionStyle::default(),
                mode: CaptionRenderMode::Drawtext,
                sidecar: false,
            }))
            .await
            .unwrap();

        // Linux rejects any single argument longer than MAX_ARG_STRLEN.
        let longest = plan.to_args().iter().map(String::len).max().unwrap();
        assert!(longest < 4096, "longest argument is {longest} bytes");
        assert!(plan.support_files()[0].contents.len() > 128 * 1024);
    }

    #[tokio::test]
    async fn custom_position_is_rejected_for_video() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 6.0, true);
        let style = CaptionStyle {
            position: CaptionPosition::Custom,
            ..CaptionStyle::default()
        };
        let err = fx
            .plan(TransformRequest::CaptionVideo(CaptionVideoRequest {
                video,
                cues: cues(),
                style,
                mode: CaptionRenderMode::Subtitles,
                sidecar: false,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("position"));
        assert!(fx.artifacts.is_empty());
    }

    #[tokio::test]
    async fn caption_image_keeps_extension() {
        let mut fx = Fixture::new();
        let image = fx.asset("p.png", MediaKind::Image, image_info(800, 600));
        let plan = fx
            .plan(TransformRequest::CaptionImage(CaptionImageRequest {
                image,
                text: "Sale: 50% off".into(),
                style: CaptionStyle::default(),
                offset: (0, 0),
            }))
            .await
            .unwrap();
        assert_eq!(plan.artifact_path().extension().unwrap(), "png");
        let args = plan.to_args();
        assert_eq!(value_after(&args, "-frames:v"), Some("1"));
        assert!(value_after(&args, "-q:v").is_none());
        let FilterSpec::Simple(chain) = plan.filter() else {
            panic!("expected a simple chain");
        };
        assert!(chain.contains("Sale\\\\: 50% off"));
        assert!(!chain.contains("enable="));

        let too_long = TransformRequest::CaptionImage(CaptionImageRequest {
            image: fx.asset("q.png", MediaKind::Image, image_info(800, 600)),
            text: "x".repeat(MAX_CUE_CHARS + 1),
            style: CaptionStyle::default(),
            offset: (0, 0),
        });
        assert_eq!(fx.plan(too_long).await.unwrap_err().field(), Some("text"));

        let pushed_off_frame = TransformRequest::CaptionImage(CaptionImageRequest {
            image: fx.asset("r.png", MediaKind::Image, image_info(800, 600)),
            text: "edge".into(),
            style: CaptionStyle::default(),
            offset: (i64::MAX, i64::MIN),
        });
        assert!(fx.plan(pushed_off_frame).await.is_ok());
    }

    #[tokio::test]
    async fn frame_extract_validates_rate_and_budget() {
        let mut fx = Fixture::new();
        for fps in [0.0, -1.0, f64::NAN, f64::INFINITY, 30.5] {
            let video = fx.video("a.mp4", 10.0, false);
            let err = fx
                .plan(TransformRequest::FrameExtract(FrameExtractRequest {
                    video,
                    fps,
                    format: ImageFormat::Jpg,
                    quality: 2,
                }))
                .await
                .unwrap_err();
            assert_eq!(err.field(), Some("fps"), "{fps}");
        }

        let long = fx.video("long.mp4", 4000.0, false);
        let err = fx
            .plan(TransformRequest::FrameExtract(FrameExtractRequest {
                video: long,
                fps: 30.0,
                format: ImageFormat::Jpg,
                quality: 2,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("fps"));

        let video = fx.video("b.mp4", 10.0, false);
        let err = fx
            .plan(TransformRequest::FrameExtract(FrameExtractRequest {
                video: video.clone(),
                fps: 1.0,
                format: ImageFormat::Jpg,
                quality: 0,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("quality"));

        let plan = fx
            .plan(TransformRequest::FrameExtract(FrameExtractRequest {
                video,
                fps: 2.5,
                format: ImageFormat::Png,
                quality: 2,
            }))
            .await
            .unwrap();
        assert_eq!(plan.filter(), &FilterSpec::Simple("fps=2.5".into()));
        let PlanOutput::ImageSequence { pattern, archive, .. } = plan.output() else {
            panic!("expected an image sequence");
        };
        assert_eq!(pattern, "frame_%05d.png");
        assert_eq!(archive.extension().unwrap(), "zip");
        assert!(plan.to_args().last().unwrap().ends_with("frame_%05d.png"));
    }

    #[tokio::test]
    async fn last_frame_seeks_one_frame_before_end() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 10.0, true);
        let plan = fx
            .plan(TransformRequest::LastFrame(LastFrameRequest {
                video,
                format: ImageFormat::Jpg,
                quality: 3,
            }))
            .await
            .unwrap();
        assert_eq!(plan.inputs()[0].options, ["-ss", "9.959"]);
        let args = plan.to_args();
        assert_eq!(value_after(&args, "-q:v"), Some("3"));
        assert_eq!(plan.artifact_path().extension().unwrap(), "jpg");
    }

    #[tokio::test]
    async fn concat_trims_normalizes_and_clamps() {
        let mut fx = Fixture::new();
        let first = fx.video("a.mp4", 10.0, true);
        let second = fx.asset("b.mov", MediaKind::Video, video_info(1281, 721, 6.0, false));
        let plan = fx
            .plan(TransformRequest::Concat(ConcatRequest {
                segments: vec![
                    ConcatSegment {
                        asset: first,
                        start: 0.0,
                        end: 4.5,
                    },
                    ConcatSegment {
                        asset: second,
                        start: 2.0,
                        end: 8.0,
                    },
                ],
            }))
            .await
            .unwrap();

        let FilterSpec::Complex(graph) = plan.filter() else {
            panic!("expected a complex graph");
        };
        assert!(graph.contains("[0:v]trim=start=0.000:end=4.500,setpts=PTS-STARTPTS,scale=1920:1080"));
        assert!(graph.contains("[1:v]trim=start=2.000:end=6.000"));
        assert!(graph.contains("anullsrc=channel_layout=stereo:sample_rate=48000,atrim=duration=4.000"));
        assert!(graph.ends_with("[v0][a0][v1][a1]concat=n=2:v=1:a=1[v][a]"));
        assert_eq!(plan.inputs().len(), 2);
    }

    #[tokio::test]
    async fn concat_rejects_segments_past_the_end() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 3.0, true);
        let err = fx
            .plan(TransformRequest::Concat(ConcatRequest {
                segments: vec![ConcatSegment {
                    asset: video,
                    start: 3.0,
                    end: 5.0,
                }],
            }))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("segments"));

        let err = fx
            .plan(TransformRequest::Concat(ConcatRequest { segments: vec![] }))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("segments"));
    }

    #[tokio::test]
    async fn append_orders_intro_main_outro() {
        let mut fx = Fixture::new();
        let video = fx.video("main.mp4", 8.0, true);
        let intro = fx.asset("intro.mp4", MediaKind::Video, video_info(1280, 720, 2.0, true));
        let outro = fx.video("outro.mp4", 3.0, false);
        let plan = fx
            .plan(TransformRequest::Append(AppendRequest {
                video: video.clone(),
                intro: Some(intro.clone()),
                outro: Some(outro.clone()),
            }))
            .await
            .unwrap();
        let paths: Vec<_> = plan.inputs().iter().map(|i| i.path.clone()).collect();
        assert_eq!(paths, [intro.path, video.path.clone(), outro.path]);
        let FilterSpec::Complex(graph) = plan.filter() else {
            panic!("expected a complex graph");
        };
        assert!(graph.contains("[0:v]trim=start=0.000:end=2.000"));
        assert!(graph.contains("scale=1920:1080"));
        assert!(graph.contains("concat=n=3:v=1:a=1"));

        let err = fx
            .plan(TransformRequest::Append(AppendRequest {
                video,
                intro: None,
                outro: None,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("intro"));
    }

    #[tokio::test]
    async fn audio_mux_policies() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 12.0, true);
        let track = fx.asset("m.mp3", MediaKind::Audio, audio_info(5.0));

        let replace = fx
            .plan(TransformRequest::AudioMux(AudioMuxRequest {
                video: video.clone(),
                audio: track.clone(),
                replace: true,
                loop_audio: false,
            }))
            .await
            .unwrap();
        assert_eq!(replace.filter(), &FilterSpec::Complex("[1:a]apad[a]".into()));
        let args = replace.to_args();
        assert_eq!(value_after(&args, "-t"), Some("12.000"));
        assert_eq!(value_after(&args, "-c:v"), Some("copy"));

        let looped = fx
            .plan(TransformRequest::AudioMux(AudioMuxRequest {
                video: video.clone(),
                audio: track.clone(),
                replace: true,
                loop_audio: true,
            }))
            .await
            .unwrap();
        assert_eq!(looped.inputs()[1].options, ["-stream_loop", "-1"]);
        assert_eq!(looped.filter(), &FilterSpec::None);

        let mixed = fx
            .plan(TransformRequest::AudioMux(AudioMuxRequest {
                video,
                audio: track.clone(),
                replace: false,
                loop_audio: false,
            }))
            .await
            .unwrap();
        let FilterSpec::Complex(graph) = mixed.filter() else {
            panic!("expected a complex graph");
        };
        assert!(graph.contains("amix=inputs=2:duration=first"));

        let webm = fx.video("b.webm", 4.0, false);
        let encoded = fx
            .plan(TransformRequest::AudioMux(AudioMuxRequest {
                video: webm,
                audio: track,
                replace: false,
                loop_audio: false,
            }))
            .await
            .unwrap();
        // No original audio: mixing falls back to the new track alone.
        assert_eq!(encoded.filter(), &FilterSpec::Complex("[1:a]apad[a]".into()));
        assert_eq!(value_after(&encoded.to_args(), "-c:v"), Some("libx264"));
    }

    #[tokio::test]
    async fn audio_mux_copies_only_mp4_compatible_codecs() {
        let mut fx = Fixture::new();
        let track = fx.asset("m.mp3", MediaKind::Audio, audio_info(5.0));
        let h264_mov = fx.video("a.mov", 8.0, false);
        let prores_mov = fx.asset(
            "b.mov",
            MediaKind::Video,
            MediaInfo {
                video_codec: Some("prores".into()),
                ..video_info(1920, 1080, 8.0, false)
            },
        );

        let mux = |video: MediaAsset| {
            TransformRequest::AudioMux(AudioMuxRequest {
                video,
                audio: track.clone(),
                replace: true,
                loop_audio: false,
            })
        };
        let copied = fx.plan(mux(h264_mov)).await.unwrap();
        assert_eq!(value_after(&copied.to_args(), "-c:v"), Some("copy"));

        let encoded = fx.plan(mux(prores_mov)).await.unwrap();
        assert_eq!(value_after(&encoded.to_args(), "-c:v"), Some("libx264"));
    }

    #[tokio::test]
    async fn audio_mux_requires_an_audio_track() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 12.0, true);
        let silent = fx.video("silent.mp4", 3.0, false);
        let err = fx
            .plan(TransformRequest::AudioMux(AudioMuxRequest {
                video,
                audio: silent,
                replace: true,
                loop_audio: false,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("audio"));
    }

    #[tokio::test]
    async fn aspect_pad_builds_letterbox() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 5.0, true);
        let plan = fx
            .plan(TransformRequest::AspectPad(AspectPadRequest {
                video: video.clone(),
                ratio: "1:1".into(),
                pad_color: Some("white".into()),
            }))
            .await
            .unwrap();
        assert_eq!(
            plan.filter(),
            &FilterSpec::Simple(
                "scale=1920:1920:force_original_aspect_ratio=decrease:force_divisible_by=2,\
                 pad=1920:1920:(ow-iw)/2:(oh-ih)/2:color=0xFFFFFF,setsar=1"
                    .into()
            )
        );

        for (ratio, color, field) in [("16-9", None, "ratio"), ("4:3", Some("nope"), "pad_color")] {
            let err = fx
                .plan(TransformRequest::AspectPad(AspectPadRequest {
                    video: video.clone(),
                    ratio: ratio.into(),
                    pad_color: color.map(String::from),
                }))
                .await
                .unwrap_err();
            assert_eq!(err.field(), Some(field));
        }
    }

    struct LeftSelector;

    #[async_trait::async_trait]
    impl CropWindowSelector for LeftSelector {
        fn name(&self) -> &'static str {
            "left"
        }

        async fn select(&self, _: &MediaAsset, info: &MediaInfo, target: Ratio) -> Result<CropWindow> {
            let (w, h) = info.dimensions("video")?;
            let centered = CropWindow::centered(w, h, target);
            Ok(CropWindow { x: 0.0, ..centered })
        }
    }

    #[tokio::test]
    async fn vertical_crop_uses_selector() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 5.0, true);
        let request = TransformRequest::VerticalCrop(VerticalCropRequest {
            video,
            ratio: String::new(),
        });
        let centered = fx.plan(request.clone()).await.unwrap();
        assert_eq!(centered.filter(), &FilterSpec::Simple("crop=606:1080:656:0,setsar=1".into()));

        fx.synth = CommandSynthesizer::new(Duration::from_secs(30), 0)
            .with_crop_selector(Arc::new(LeftSelector));
        let left = fx.plan(request).await.unwrap();
        assert_eq!(left.filter(), &FilterSpec::Simple("crop=606:1080:0:0,setsar=1".into()));
    }

    #[tokio::test]
    async fn watermark_scales_and_positions_logo() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 5.0, true);
        let logo = fx.asset("logo.png", MediaKind::Image, image_info(400, 200));
        let plan = fx
            .plan(TransformRequest::Watermark(WatermarkRequest {
                video: video.clone(),
                logo: logo.clone(),
                position: WatermarkPosition::TopRight,
                opacity: 0.5,
                scale: 0.15,
            }))
            .await
            .unwrap();
        assert_eq!(
            plan.filter(),
            &FilterSpec::Complex(
                "[1:v]scale=288:-2,format=rgba,colorchannelmixer=aa=0.500[wm];\
                 [0:v][wm]overlay=main_w-overlay_w-20:20:format=auto,format=yuv420p[v]"
                    .into()
            )
        );

        for (opacity, scale, field) in [(1.5, 0.15, "opacity"), (0.5, 0.0, "scale"), (0.5, 1.2, "scale")] {
            let err = fx
                .plan(TransformRequest::Watermark(WatermarkRequest {
                    video: video.clone(),
                    logo: logo.clone(),
                    position: WatermarkPosition::Center,
                    opacity,
                    scale,
                }))
                .await
                .unwrap_err();
            assert_eq!(err.field(), Some(field));
        }
    }

    #[tokio::test]
    async fn audio_extract_maps_only_audio() {
        let mut fx = Fixture::new();
        let video = fx.video("a.mp4", 5.0, true);
        let plan = fx
            .plan(TransformRequest::AudioExtract(AudioExtractRequest {
                video,
                format: AudioFormat::Aac,
            }))
            .await
            .unwrap();
        let args = plan.to_args();
        assert_eq!(value_after(&args, "-map"), Some("0:a:0"));
        assert!(args.contains(&"-vn".to_string()));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(plan.artifact_path().extension().unwrap(), "m4a");

        let silent = fx.video("s.mp4", 5.0, false);
        let err = fx
            .plan(TransformRequest::AudioExtract(AudioExtractRequest {
                video: silent,
                format: AudioFormat::Wav,
            }))
            .await
            .unwrap_err();
        assert_eq!(err.field(), Some("video"));
    }

    #[tokio::test]
    async fn unprobed_assets_are_an_internal_error() {
        let fx = Fixture::new();
        let video = MediaAsset::new(
            PathBuf::from("/in/x.mp4"),
            Extension::parse("mp4").unwrap(),
            MediaKind::Video,
            1,
        );
        let err = fx
            .plan(TransformRequest::AudioExtract(AudioExtractRequest {
                video,
                format: AudioFormat::Mp3,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }
}
