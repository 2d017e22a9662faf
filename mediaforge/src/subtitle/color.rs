//! Color parsing and the two color encodings the engine understands.
//!
//! ASS styles store colors as `&HAABBGGRR`: channels are in reverse order and
//! the alpha byte is *transparency*, not opacity. `00` is fully opaque and
//! `FF` fully transparent, so an opacity `o` is written as `255 - round(o * 255)`.
//! Filter options (`drawbox`, `pad`, ...) use `0xRRGGBB@opacity` instead.

use std::fmt;
use std::str::FromStr;

/// An opaque RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    fn named(name: &str) -> Option<Self> {
        let rgb = match name {
            "black" => Self::BLACK,
            "white" => Self::WHITE,
            "red" => Self::new(255, 0, 0),
            "green" => Self::new(0, 128, 0),
            "lime" => Self::new(0, 255, 0),
            "blue" => Self::new(0, 0, 255),
            "yellow" => Self::new(255, 255, 0),
            "cyan" => Self::new(0, 255, 255),
            "magenta" => Self::new(255, 0, 255),
            "orange" => Self::new(255, 165, 0),
            "gray" | "grey" => Self::new(128, 128, 128),
            _ => return None,
        };
        Some(rgb)
    }

    /// `0xRRGGBB` form used in filter options.
    pub fn to_hex(self) -> String {
        format!("0x{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl FromStr for Rgb {
    type Err = String;

    /// Accepts a color name, `#RRGGBB` or `0xRRGGBB`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim().to_ascii_lowercase();
        if let Some(rgb) = Self::named(&value) {
            return Ok(rgb);
        }
        let hex = value
            .strip_prefix('#')
            .or_else(|| value.strip_prefix("0x"))
            .ok_or_else(|| format!("unknown color '{raw}'"))?;
        if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("invalid hex color '{raw}'"));
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|e| e.to_string());
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Color with an optional opacity suffix, e.g. `white@0.8`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorSpec {
    pub color: Rgb,
    pub opacity: Option<f64>,
}

impl FromStr for ColorSpec {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (color, opacity) = match raw.split_once('@') {
            Some((color, alpha)) => {
                let alpha: f64 = alpha
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid opacity in '{raw}'"))?;
                if !(0.0..=1.0).contains(&alpha) {
                    return Err(format!("opacity in '{raw}' must be within [0, 1]"));
                }
                (color, Some(alpha))
            }
            None => (raw, None),
        };
        Ok(Self {
            color: color.parse()?,
            opacity,
        })
    }
}

fn clamp_opacity(opacity: f64) -> f64 {
    if opacity.is_nan() {
        1.0
    } else {
        opacity.clamp(0.0, 1.0)
    }
}

/// Encode for an ASS style field: `&HAABBGGRR` with inverted alpha.
pub fn ass_color(color: Rgb, opacity: f64) -> String {
    let alpha = 255 - (clamp_opacity(opacity) * 255.0).round() as u8;
    format!(
        "&H{alpha:02X}{:02X}{:02X}{:02X}",
        color.b, color.g, color.r
    )
}

/// Decode an `&HAABBGGRR` value back into a color and an opacity.
pub fn decode_ass_color(encoded: &str) -> Option<(Rgb, f64)> {
    let hex = encoded.strip_prefix("&H")?.trim_end_matches('&');
    if hex.len() != 8 {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    let alpha = byte(0)?;
    let color = Rgb::new(byte(6)?, byte(4)?, byte(2)?);
    Some((color, f64::from(255 - alpha) / 255.0))
}

/// Encode for a filter option: `0xRRGGBB@opacity`.
pub fn ffmpeg_color(color: Rgb, opacity: f64) -> String {
    let opacity = clamp_opacity(opacity);
    if opacity >= 1.0 {
        color.to_hex()
    } else {
        format!("{}@{:.3}", color.to_hex(), opacity)
    }
}
