//! Escaping of user text for the two grammars it is embedded in.
//!
//! Escaped values are newtypes. Converting an already escaped value is the
//! identity, so text can never be escaped twice by accident.

use std::fmt;

/// Characters the filter option parser treats specially.
const OPTION_SPECIAL: &[char] = &['\\', '\'', ':'];
/// Characters the filter graph parser treats specially.
const GRAPH_SPECIAL: &[char] = &['\\', '\'', '[', ']', ',', ';'];

fn prefix_backslash(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn strip_backslash(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Text safe to embed as a filter option value inside a filter graph.
///
/// Both escaping levels are applied: the option level first, then the graph
/// level. Line breaks are replaced by spaces since option values are single
/// line; callers split multi-line text beforehand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterText(String);

impl FilterText {
    pub fn escape(raw: &str) -> Self {
        let flat: String = raw
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        let option = prefix_backslash(&flat, OPTION_SPECIAL);
        Self(prefix_backslash(&option, GRAPH_SPECIAL))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reverse both escaping levels, as the engine does when parsing.
    pub fn unescape(&self) -> String {
        strip_backslash(&strip_backslash(&self.0))
    }
}

impl fmt::Display for FilterText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversion into [`FilterText`]; identity for values already escaped.
pub trait IntoFilterText {
    fn into_filter_text(self) -> FilterText;
}

impl IntoFilterText for &str {
    fn into_filter_text(self) -> FilterText {
        FilterText::escape(self)
    }
}

impl IntoFilterText for FilterText {
    fn into_filter_text(self) -> FilterText {
        self
    }
}

/// Text safe to place in an ASS `Dialogue` text field.
///
/// Override braces are escaped, line breaks become `\N`, and a literal
/// backslash is followed by a word joiner so it cannot start an escape
/// sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssText(String);

const WORD_JOINER: char = '\u{2060}';

impl AssText {
    pub fn escape(raw: &str) -> Self {
        let mut out = String::with_capacity(raw.len() + 8);
        for c in raw.chars() {
            match c {
                '\\' => {
                    out.push('\\');
                    out.push(WORD_JOINER);
                }
                '{' => out.push_str("\\{"),
                '}' => out.push_str("\\}"),
                '\n' => out.push_str("\\N"),
                '\r' => {}
                c => out.push(c),
            }
        }
        Self(out)
    }

    /// Join already wrapped lines with ASS hard breaks.
    pub fn from_lines(lines: &[String]) -> Self {
        Self::escape(&lines.join("\n"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reverse [`AssText::escape`].
    pub fn unescape(&self) -> String {
        let mut out = String::with_capacity(self.0.len());
        let mut chars = self.0.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.peek().copied() {
                Some(WORD_JOINER) => {
                    chars.next();
                    out.push('\\');
                }
                Some('N') => {
                    chars.next();
                    out.push('\n');
                }
                Some(next @ ('{' | '}')) => {
                    chars.next();
                    out.push(next);
                }
                _ => out.push('\\'),
            }
        }
        out
    }
}

impl fmt::Display for AssText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversion into [`AssText`]; identity for values already escaped.
pub trait IntoAssText {
    fn into_ass_text(self) -> AssText;
}

impl IntoAssText for &str {
    fn into_ass_text(self) -> AssText {
        AssText::escape(self)
    }
}

impl IntoAssText for AssText {
    fn into_ass_text(self) -> AssText {
        self
    }
}
