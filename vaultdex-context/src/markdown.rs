//! Line-level Markdown recognisers shared by the chunker and the extractor.
//!
//! Everything here works on a single line (with or without its trailing
//! newline) so callers can drive their own scanning loop.

/// Returns the line with up to three leading spaces removed, or `None` when the
/// line is indented far enough to be an indented code line.
pub(crate) fn strip_indent(line: &str) -> Option<&str> {
    let body = line.trim_start_matches(' ');
    (line.len() - body.len() <= 3).then_some(body)
}

/// An opening code fence: ```` ``` ```` or `~~~`, three or more characters long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FenceMarker {
    symbol: char,
    len: usize,
}

impl FenceMarker {
    pub(crate) fn opening(line: &str) -> Option<Self> {
        let body = strip_indent(line)?;
        let symbol = body.chars().next().filter(|c| *c == '`' || *c == '~')?;
        let len = body.chars().take_while(|c| *c == symbol).count();
        if len < 3 {
            return None;
        }
        // A backtick fence's info string may not itself contain backticks.
        if symbol == '`' && body[len..].contains('`') {
            return None;
        }
        Some(Self { symbol, len })
    }

    /// A closing fence uses the same character, is at least as long, and has
    /// nothing but whitespace after it.
    pub(crate) fn closes(&self, line: &str) -> bool {
        let Some(body) = strip_indent(line) else {
            return false;
        };
        let run = body.chars().take_while(|c| *c == self.symbol).count();
        run >= self.len && body[run..].trim().is_empty()
    }
}

/// Parses an ATX heading (`# Title` through `###### Title`) into its level and title.
pub(crate) fn parse_heading(line: &str) -> Option<(usize, String)> {
    let body = strip_indent(line)?;
    let level = body.bytes().take_while(|b| *b == b'#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &body[level..];
    if !rest.trim().is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }

    let mut title = rest.trim();
    let without_closing = title.trim_end_matches('#');
    if without_closing.is_empty() || without_closing.ends_with([' ', '\t']) {
        title = without_closing.trim_end();
    }
    Some((level, title.to_string()))
}

pub(crate) fn is_table_row(line: &str) -> bool {
    strip_indent(line).is_some_and(|body| body.starts_with('|'))
}

/// `> [!note]` style callout header.
pub(crate) fn is_callout_start(line: &str) -> bool {
    strip_indent(line)
        .and_then(|body| body.strip_prefix('>'))
        .is_some_and(|rest| rest.trim_start().starts_with("[!"))
}

pub(crate) fn is_quote_line(line: &str) -> bool {
    strip_indent(line).is_some_and(|body| body.starts_with('>'))
}
