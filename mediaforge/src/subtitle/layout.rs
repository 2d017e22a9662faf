//! Caption geometry: font size, wrapping, margins and the background box.
//!
//! Text width is estimated from an average glyph advance of 0.55 em, which
//! holds well for proportional sans fonts and is slightly pessimistic for
//! narrow ones.

use super::{CaptionPosition, CaptionStyle, FontSize};

/// Average glyph advance as a fraction of the font size.
pub const GLYPH_WIDTH_EM: f64 = 0.55;
/// Maximum rendered lines per cue.
pub const MAX_LINES: usize = 2;
/// Auto font size as a fraction of the frame height.
pub const AUTO_FONT_FRACTION: f64 = 0.014;

const ELLIPSIS: char = '\u{2026}';

/// Pixel dimensions of the frame being captioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Resolved pixel layout of one caption.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionLayout {
    pub font_size: u32,
    pub lines: Vec<String>,
    pub max_chars: usize,
    pub line_spacing: u32,
    pub margin_x: u32,
    pub margin_v: u32,
    pub padding: u32,
    pub box_x: i64,
    pub box_y: i64,
    pub box_width: u32,
    pub box_height: u32,
}

impl CaptionLayout {
    /// Top edge of each text line, in frame coordinates.
    pub fn line_tops(&self) -> impl Iterator<Item = i64> + '_ {
        (0..self.lines.len())
            .map(move |i| self.box_y + i64::from(self.padding) + i64::from(self.line_spacing) * i as i64)
    }
}

/// Font size in pixels for a frame of `height`.
pub fn resolve_font_size(font_size: FontSize, height: u32) -> u32 {
    match font_size {
        FontSize::Px(px) => px,
        FontSize::Auto => ((f64::from(height) * AUTO_FONT_FRACTION).round() as u32).max(1),
    }
}

/// Characters that fit in `fraction` of `width` at `font_size`.
pub fn max_chars_per_line(width: u32, fraction: f64, font_size: u32) -> usize {
    let glyph = f64::from(font_size.max(1)) * GLYPH_WIDTH_EM;
    ((f64::from(width) * fraction / glyph).floor() as usize).max(1)
}

/// Greedy word wrap to `max_chars` per line and at most `max_lines` lines.
///
/// Words longer than a line are split. `\n` forces a break. When the text does
/// not fit, the last line is cut at a word boundary if one exists within the
/// line (otherwise mid-word) and ends with `…`; the result never exceeds
/// `max_chars` characters per line.
pub fn wrap(text: &str, max_chars: usize, max_lines: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let max_lines = max_lines.max(1);

    let mut lines: Vec<String> = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        let mut current_len = 0usize;
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            let needed = if current_len == 0 {
                word.len()
            } else {
                current_len + 1 + word.len()
            };
            if needed <= max_chars {
                if current_len > 0 {
                    current.push(' ');
                    current_len += 1;
                }
                current.extend(word.iter());
                current_len += word.len();
                continue;
            }
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            while word.len() > max_chars {
                let rest = word.split_off(max_chars);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            current = word.iter().collect();
            current_len = word.len();
        }
        if current_len > 0 {
            lines.push(current);
        }
    }

    if lines.len() > max_lines {
        lines.truncate(max_lines);
        if let Some(last) = lines.last_mut() {
            *last = ellipsize(last, max_chars);
        }
    }
    lines
}

/// Shorten `line` so that it plus a trailing ellipsis fits in `max_chars`.
fn ellipsize(line: &str, max_chars: usize) -> String {
    let budget = max_chars.saturating_sub(1);
    let chars: Vec<char> = line.chars().collect();
    let mut kept: String = if chars.len() <= budget {
        line.to_string()
    } else {
        let cut: String = chars[..budget].iter().collect();
        match cut.rfind(' ') {
            Some(space) if space > 0 => cut[..space].to_string(),
            _ => cut,
        }
    };
    kept.truncate(kept.trim_end().len());
    kept.push(ELLIPSIS);
    kept
}

/// Lay out `text` on `frame` with `style`.
///
/// `offset` shifts the box; for [`CaptionPosition::Custom`] it is the absolute
/// top-left corner.
pub fn compute(style: &CaptionStyle, frame: FrameSize, text: &str, offset: (i64, i64)) -> CaptionLayout {
    let font_size = resolve_font_size(style.font_size, frame.height);
    let max_chars = max_chars_per_line(frame.width, style.max_width_fraction, font_size);
    let lines = wrap(text, max_chars, MAX_LINES);

    let line_spacing = ((style.line_height_factor * f64::from(font_size)).round() as u32).max(1);
    let margin_x = (f64::from(frame.width) * style.margin_x_fraction).round() as u32;
    let margin_v = (f64::from(frame.height) * style.margin_bottom_fraction).round() as u32;
    let padding = ((f64::from(font_size) * 0.3).round() as u32).max(4);

    let widest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);
    let text_width = (widest as f64 * f64::from(font_size) * GLYPH_WIDTH_EM).ceil() as u32;
    let text_height = match lines.len() {
        0 => 0,
        n => line_spacing * (n as u32 - 1) + font_size,
    };
    let box_width = text_width + 2 * padding;
    let box_height = text_height + 2 * padding;

    let frame_w = i64::from(frame.width);
    let frame_h = i64::from(frame.height);
    let bw = i64::from(box_width);
    let bh = i64::from(box_height);

    let (box_x, box_y) = match style.position {
        CaptionPosition::Custom => offset,
        position => {
            let y = match position {
                CaptionPosition::Top => i64::from(margin_v),
                CaptionPosition::Center => (frame_h - bh) / 2,
                _ => frame_h - i64::from(margin_v) - bh,
            };
            (
                ((frame_w - bw) / 2).saturating_add(offset.0),
                y.saturating_add(offset.1),
            )
        }
    };

    CaptionLayout {
        font_size,
        lines,
        max_chars,
        line_spacing,
        margin_x,
        margin_v,
        padding,
        box_x: box_x.clamp(0, (frame_w - bw).max(0)),
        box_y: box_y.clamp(0, (frame_h - bh).max(0)),
        box_width,
        box_height,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_font_is_one_point_four_percent_of_height() {
        assert_eq!(resolve_font_size(FontSize::Auto, 1080), 15);
        assert_eq!(resolve_font_size(FontSize::Auto, 1920), 27);
        assert_eq!(resolve_font_size(FontSize::Auto, 10), 1);
        assert_eq!(resolve_font_size(FontSize::Px(32), 1080), 32);
    }

    #[test]
    fn wraps_greedily() {
        let lines = wrap("the quick brown fox jumps", 10, 3);
        assert_eq!(lines, ["the quick", "brown fox", "jumps"]);
    }

    #[test]
    fn forced_breaks_and_long_words() {
        assert_eq!(wrap("a\nb", 10, 2), ["a", "b"]);
        assert_eq!(wrap("abcdefghijkl", 5, 3), ["abcde", "fghij", "kl"]);
    }

    #[test]
    fn overflow_is_ellipsized_within_width() {
        let lines = wrap("one two three four five six seven", 9, 2);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "one two");
        assert!(lines[1].ends_with('\u{2026}'));
        assert!(lines.iter().all(|l| l.chars().count() <= 9));
        assert_eq!(lines[1], "three\u{2026}");
    }

    #[test]
    fn overflow_without_spaces_cuts_mid_word() {
        let lines = wrap("abcdefghijklmnopqrstuvwxyz", 5, 2);
        assert_eq!(lines, ["abcde", "fghi\u{2026}"]);
    }

    #[test]
    fn bottom_layout_uses_margins() {
        let style = CaptionStyle::default();
        let layout = compute(&style, FrameSize::new(1920, 1080), "Hello", (0, 0));
        assert_eq!(layout.font_size, 15);
        assert_eq!(layout.line_spacing, 18);
        assert_eq!(layout.margin_x, 115);
        assert_eq!(layout.margin_v, 130);
        assert_eq!(layout.padding, 5);
        assert_eq!(
            layout.box_y + i64::from(layout.box_height),
            1080 - 130
        );
        // Centered horizontally.
        let right = 1920 - (layout.box_x + i64::from(layout.box_width));
        assert!((right - layout.box_x).abs() <= 1);
    }

    #[test]
    fn max_width_bounds_line_length() {
        let style = CaptionStyle::default();
        let layout = compute(
            &style,
            FrameSize::new(640, 360),
            "a very long caption that certainly needs more than one line to fit on a small frame",
            (0, 0),
        );
        // 640 * 0.72 / (5 * 0.55) = 167 chars at the auto size of 5px.
        assert_eq!(layout.font_size, 5);
        assert_eq!(layout.max_chars, 167);
        assert_eq!(layout.lines.len(), 1);

        let big = CaptionStyle {
            font_size: FontSize::Px(40),
            ..CaptionStyle::default()
        };
        let layout = compute(&big, FrameSize::new(640, 360), "word ".repeat(40).trim(), (0, 0));
        assert_eq!(layout.max_chars, 20);
        assert_eq!(layout.lines.len(), 2);
        assert!(
            i64::from(layout.box_width) - 2 * i64::from(layout.padding)
                <= (640.0 * 0.72_f64).ceil() as i64
        );
    }

    #[test]
    fn top_and_center_positions() {
        let frame = FrameSize::new(1280, 720);
        let top = CaptionStyle {
            position: CaptionPosition::Top,
            ..CaptionStyle::default()
        };
        assert_eq!(compute(&top, frame, "x", (0, 0)).box_y, 86);

        let center = CaptionStyle {
            position: CaptionPosition::Center,
            ..CaptionStyle::default()
        };
        let layout = compute(&center, frame, "x", (0, 0));
        assert_eq!(layout.box_y, (720 - i64::from(layout.box_height)) / 2);
    }

    #[test]
    fn custom_position_is_clamped_into_frame() {
        let style = CaptionStyle {
            position: CaptionPosition::Custom,
            ..CaptionStyle::default()
        };
        let layout = compute(&style, FrameSize::new(400, 300), "hi", (5000, -20));
        assert_eq!(layout.box_y, 0);
        assert_eq!(layout.box_x + i64::from(layout.box_width), 400);
    }

    #[test]
    fn extreme_offsets_saturate_and_clamp() {
        let style = CaptionStyle::default();
        let frame = FrameSize::new(800, 600);
        let far = compute(&style, frame, "hi", (i64::MAX, i64::MAX));
        assert_eq!(far.box_x, 800 - i64::from(far.box_width));
        assert_eq!(far.box_y, 600 - i64::from(far.box_height));

        let near = compute(&style, frame, "hi", (i64::MIN, i64::MIN));
        assert_eq!((near.box_x, near.box_y), (0, 0));
    }
}
