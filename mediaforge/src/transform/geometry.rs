//! Ratio parsing and frame geometry.
//!
//! All pixel values handed to the engine are even, as required by 4:2:0
//! chroma subsampling.

use std::fmt;

use crate::{Error, Result};

/// Largest accepted ratio component.
const MAX_COMPONENT: u32 = 10_000;

/// A positive `W:H` aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    pub width: u32,
    pub height: u32,
}

impl Ratio {
    pub const VERTICAL: Ratio = Ratio {
        width: 9,
        height: 16,
    };

    /// Parse `"16:9"`. Failures are validation errors on `field`.
    pub fn parse(raw: &str, field: &str) -> Result<Self> {
        let invalid = || {
            Error::validation(
                field,
                format!("'{raw}' is not a ratio of positive integers like 16:9"),
            )
        };
        let (w, h) = raw.trim().split_once(':').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 || width > MAX_COMPONENT || height > MAX_COMPONENT {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }

    /// Width divided by height.
    pub fn value(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

impl fmt::Display for Ratio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

/// Round to the nearest even integer, never below 2.
pub fn round_even(value: f64) -> u32 {
    let even = ((value / 2.0).round() * 2.0) as u32;
    even.max(2)
}

/// Largest even integer not above `value`, zero for negative input.
fn even_down(value: f64) -> u32 {
    ((value / 2.0).floor() * 2.0).max(0.0) as u32
}

/// Largest even integer not above `value`, never below 2.
pub fn floor_even(value: f64) -> u32 {
    even_down(value).max(2)
}

/// Canvas for letterboxing a `width`x`height` frame to `ratio`.
///
/// The canvas keeps the source's longer side (even-floored) as its own longer
/// side; the other side follows from the ratio.
pub fn pad_dimensions(width: u32, height: u32, ratio: Ratio) -> (u32, u32) {
    let longer = floor_even(f64::from(width.max(height)));
    let r = ratio.value();
    if r >= 1.0 {
        (longer, round_even(f64::from(longer) / r))
    } else {
        (round_even(f64::from(longer) * r), longer)
    }
}

/// A crop window in normalized `[0, 1]` frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropWindow {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Engine crop parameters in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropWindow {
    const EPSILON: f64 = 1e-9;

    /// The largest window of `ratio` centered in a `width`x`height` frame.
    pub fn centered(width: u32, height: u32, ratio: Ratio) -> Self {
        let (w, h) = (f64::from(width), f64::from(height));
        let (cw, ch) = if w / h > ratio.value() {
            (h * ratio.value(), h)
        } else {
            (w, w / ratio.value())
        };
        let (nw, nh) = (cw / w, ch / h);
        Self {
            x: (1.0 - nw) / 2.0,
            y: (1.0 - nh) / 2.0,
            width: nw,
            height: nh,
        }
    }

    /// Whether the window lies inside the unit square and is non-empty.
    pub fn is_valid(&self) -> bool {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.x + self.width <= 1.0 + Self::EPSILON
            && self.y + self.height <= 1.0 + Self::EPSILON
    }

    /// Convert to even pixel values that stay inside the frame.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let (w, h) = (f64::from(width), f64::from(height));
        let frame_w = floor_even(w);
        let frame_h = floor_even(h);
        let cw = floor_even(self.width * w).min(frame_w);
        let ch = floor_even(self.height * h).min(frame_h);
        PixelRect {
            x: even_down(self.x * w).min(frame_w - cw),
            y: even_down(self.y * h).min(frame_h - ch),
            width: cw,
            height: ch,
        }
    }
}
