//! Cue time encoding.

/// Separator between seconds and centiseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFormat {
    /// `HH:MM:SS,CC`, used by the plain cue sheet.
    Comma,
    /// `HH:MM:SS.CC`, used by ASS dialogue lines.
    Dot,
}

impl TimeFormat {
    fn separator(self) -> char {
        match self {
            Self::Comma => ',',
            Self::Dot => '.',
        }
    }
}

/// Whole centiseconds in `seconds`, floored.
///
/// A product that lands within a few ULPs of a whole centisecond is taken as
/// that centisecond, so `4.35` (stored as `4.3499999...`) encodes as 435.
/// Anything further below a boundary floors, so `1.2399995` encodes as 123.
/// Negative and non-finite input is 0.
pub fn centiseconds(seconds: f64) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    let scaled = seconds * 100.0;
    let nearest = scaled.round();
    if (scaled - nearest).abs() <= nearest.max(1.0) * 4.0 * f64::EPSILON {
        nearest as u64
    } else {
        scaled.floor() as u64
    }
}

/// Encode `seconds` as a zero-padded timestamp.
pub fn encode(seconds: f64, format: TimeFormat) -> String {
    let cs = centiseconds(seconds);
    let hours = cs / 360_000;
    let minutes = (cs / 6_000) % 60;
    let secs = (cs / 100) % 60;
    let frac = cs % 100;
    format!(
        "{hours:02}:{minutes:02}:{secs:02}{}{frac:02}",
        format.separator()
    )
}
