//! Caption layout and subtitle document generation.
//!
//! Cues and a style go in; exact pixel layout, timestamps, colors and escaped
//! text come out, ready for the command synthesizer to embed.

pub mod ass;
pub mod color;
pub mod escape;
pub mod layout;
pub mod timecode;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};
use color::Rgb;

pub use ass::{build_ass_document, build_cue_sheet, drawtext_filters};
pub use layout::{CaptionLayout, FrameSize};

/// Hard cap on cues per request.
pub const MAX_CUES: usize = 2_000;
/// Hard cap on characters per cue.
pub const MAX_CUE_CHARS: usize = 500;

/// One timed caption entry. Cues may overlap; each is rendered on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionCue {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl CaptionCue {
    fn validate(&self, index: usize) -> Result<()> {
        let field = "captions_json";
        if self.text.trim().is_empty() {
            return Err(Error::validation(field, format!("cue {index} has empty text")));
        }
        if self.text.chars().count() > MAX_CUE_CHARS {
            return Err(Error::validation(
                field,
                format!("cue {index} exceeds {MAX_CUE_CHARS} characters"),
            ));
        }
        if !self.start.is_finite() || self.start < 0.0 {
            return Err(Error::validation(
                field,
                format!("cue {index} start must be a non-negative number"),
            ));
        }
        if !self.end.is_finite() || self.end <= self.start {
            return Err(Error::validation(
                field,
                format!("cue {index} end must be greater than start"),
            ));
        }
        Ok(())
    }
}

/// Parse and validate the `captions_json` form field.
pub fn parse_cues(raw: &str) -> Result<Vec<CaptionCue>> {
    let cues: Vec<CaptionCue> = serde_json::from_str(raw)
        .map_err(|e| Error::validation("captions_json", format!("invalid captions JSON: {e}")))?;
    if cues.is_empty() {
        return Err(Error::validation(
            "captions_json",
            "at least one caption is required",
        ));
    }
    if cues.len() > MAX_CUES {
        return Err(Error::validation(
            "captions_json",
            format!("at most {MAX_CUES} captions are allowed"),
        ));
    }
    for (i, cue) in cues.iter().enumerate() {
        cue.validate(i)?;
    }
    Ok(cues)
}

/// Vertical anchor of the caption box.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CaptionPosition {
    Top,
    Center,
    #[default]
    Bottom,
    /// Box placed at the request's explicit offsets (still images only).
    Custom,
}

/// How cues are burned into a video.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum CaptionRenderMode {
    /// ASS document rendered by the `subtitles` filter.
    #[default]
    Subtitles,
    /// One gated `drawbox` + `drawtext` chain per cue.
    Drawtext,
}

/// Font size policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FontSize {
    /// 1.4% of the frame height.
    #[default]
    Auto,
    Px(u32),
}

impl FontSize {
    pub const MIN_PX: u32 = 8;
    pub const MAX_PX: u32 = 72;
}

/// Caption styling. `Default` gives the service-wide defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionStyle {
    pub font: String,
    pub font_size: FontSize,
    pub font_color: Rgb,
    pub max_width_fraction: f64,
    pub line_height_factor: f64,
    pub margin_x_fraction: f64,
    pub margin_bottom_fraction: f64,
    pub background_color: Rgb,
    pub background_opacity: f64,
    pub position: CaptionPosition,
}

impl Default for CaptionStyle {
    fn default() -> Self {
        Self {
            font: "Sans".to_string(),
            font_size: FontSize::Auto,
            font_color: Rgb::WHITE,
            max_width_fraction: 0.72,
            line_height_factor: 1.2,
            margin_x_fraction: 0.06,
            margin_bottom_fraction: 0.12,
            background_color: Rgb::BLACK,
            background_opacity: 0.65,
            position: CaptionPosition::Bottom,
        }
    }
}

fn positive_at_most(field: &str, value: f64, max: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= max {
        Ok(())
    } else {
        Err(Error::validation(
            field,
            format!("must be greater than 0 and at most {max}"),
        ))
    }
}

fn within(field: &str, value: f64, max: f64) -> Result<()> {
    if (0.0..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::validation(field, format!("must be within [0, {max}]")))
    }
}

impl CaptionStyle {
    /// Check every numeric field against its domain.
    pub fn validate(&self) -> Result<()> {
        if let FontSize::Px(px) = self.font_size
            && !(FontSize::MIN_PX..=FontSize::MAX_PX).contains(&px)
        {
            return Err(Error::validation(
                "font_size",
                format!(
                    "must be between {} and {}",
                    FontSize::MIN_PX,
                    FontSize::MAX_PX
                ),
            ));
        }
        if self.font.trim().is_empty() {
            return Err(Error::validation("font", "must not be empty"));
        }
        positive_at_most("max_width", self.max_width_fraction, 1.0)?;
        positive_at_most("line_height", self.line_height_factor, 4.0)?;
        within("margin_x", self.margin_x_fraction, 0.45)?;
        within("margin_bottom", self.margin_bottom_fraction, 0.9)?;
        within("bg_opacity", self.background_opacity, 1.0)?;
        Ok(())
    }
}
