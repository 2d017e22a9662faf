//! Subtitle documents and per-cue filter expressions.

use std::fmt::Write as _;

use super::color::{ass_color, ffmpeg_color};
use super::escape::{AssText, FilterText, IntoFilterText};
use super::layout::{self, CaptionLayout, FrameSize};
use super::timecode::{TimeFormat, encode};
use super::{CaptionCue, CaptionPosition, CaptionStyle};

fn ass_alignment(position: CaptionPosition) -> u8 {
    // Numpad layout: 8 top-center, 5 middle-center, 2 bottom-center.
    match position {
        CaptionPosition::Top => 8,
        CaptionPosition::Center => 5,
        CaptionPosition::Bottom | CaptionPosition::Custom => 2,
    }
}

/// Build an ASS document that renders `cues` on a `frame`-sized video.
///
/// Text is pre-wrapped with the same layout rules as the filter renderer and
/// automatic wrapping is disabled, so both modes break lines identically.
pub fn build_ass_document(cues: &[CaptionCue], style: &CaptionStyle, frame: FrameSize) -> String {
    let reference = layout::compute(style, frame, "", (0, 0));
    let primary = ass_color(style.font_color, 1.0);
    let background = ass_color(style.background_color, style.background_opacity);

    let mut doc = String::new();
    doc.push_str("[Script Info]\n");
    doc.push_str("ScriptType: v4.00+\n");
    let _ = writeln!(doc, "PlayResX: {}", frame.width);
    let _ = writeln!(doc, "PlayResY: {}", frame.height);
    doc.push_str("WrapStyle: 2\n");
    doc.push_str("ScaledBorderAndShadow: yes\n\n");

    doc.push_str("[V4+ Styles]\n");
    doc.push_str(
        "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
         BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
         BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n",
    );
    // BorderStyle 3 draws an opaque box in OutlineColour; Outline is its padding.
    let _ = writeln!(
        doc,
        "Style: Default,{font},{size},{primary},{primary},{background},{background},\
         0,0,0,0,100,100,0,0,3,{padding},0,{alignment},{mx},{mx},{mv},1",
        font = style.font.replace(',', " "),
        size = reference.font_size,
        padding = reference.padding,
        alignment = ass_alignment(style.position),
        mx = reference.margin_x,
        mv = reference.margin_v,
    );
    doc.push('\n');

    doc.push_str("[Events]\n");
    doc.push_str("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");
    for cue in cues {
        let layout = layout::compute(style, frame, &cue.text, (0, 0));
        let _ = writeln!(
            doc,
            "Dialogue: 0,{},{},Default,,0,0,0,,{}",
            encode(cue.start, TimeFormat::Dot),
            encode(cue.end, TimeFormat::Dot),
            AssText::from_lines(&layout.lines),
        );
    }
    doc
}

/// Plain cue sheet with `HH:MM:SS,CC` timestamps, numbered from 1.
pub fn build_cue_sheet(cues: &[CaptionCue]) -> String {
    let mut sheet = String::new();
    for (i, cue) in cues.iter().enumerate() {
        let _ = writeln!(
            sheet,
            "{}\n{} --> {}\n{}\n",
            i + 1,
            encode(cue.start, TimeFormat::Comma),
            encode(cue.end, TimeFormat::Comma),
            cue.text.replace("\r\n", "\n").trim(),
        );
    }
    sheet
}

/// `enable` expression active on `[start, end)`.
fn enable_window(start: f64, end: f64) -> FilterText {
    format!("gte(t,{start:.3})*lt(t,{end:.3})").as_str().into_filter_text()
}

fn push_caption(
    filters: &mut Vec<String>,
    style: &CaptionStyle,
    layout: &CaptionLayout,
    enable: Option<&FilterText>,
) {
    if layout.lines.is_empty() {
        return;
    }
    let gate = enable
        .map(|e| format!(":enable={e}"))
        .unwrap_or_default();

    if style.background_opacity > 0.0 {
        filters.push(format!(
            "drawbox=x={}:y={}:w={}:h={}:color={}:t=fill{gate}",
            layout.box_x,
            layout.box_y,
            layout.box_width,
            layout.box_height,
            ffmpeg_color(style.background_color, style.background_opacity),
        ));
    }

    let font = FilterText::escape(&style.font);
    for (line, top) in layout.lines.iter().zip(layout.line_tops()) {
        filters.push(format!(
            "drawtext=text={}:expansion=none:font={font}:fontsize={}:fontcolor={}:x=(w-text_w)/2:y={top}{gate}",
            FilterText::escape(line),
            layout.font_size,
            style.font_color.to_hex(),
        ));
    }
}

/// Time-gated `drawbox`/`drawtext` filters, one group per cue.
pub fn drawtext_filters(cues: &[CaptionCue], style: &CaptionStyle, frame: FrameSize) -> Vec<String> {
    let mut filters = Vec::new();
    for cue in cues {
        let layout = layout::compute(style, frame, &cue.text, (0, 0));
        let enable = enable_window(cue.start, cue.end);
        push_caption(&mut filters, style, &layout, Some(&enable));
    }
    filters
}

/// Ungated filters for a single static caption on a still image.
pub fn static_text_filters(
    text: &str,
    style: &CaptionStyle,
    frame: FrameSize,
    offset: (i64, i64),
) -> Vec<String> {
    let layout = layout::compute(style, frame, text, offset);
    let mut filters = Vec::new();
    push_caption(&mut filters, style, &layout, None);
    filters
}
