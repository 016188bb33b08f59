//! Wiki-link and tag extraction.
//!
//! The scanners walk the text once, left to right, and never rewrite it: every
//! reported span is a pair of character offsets into the original input, with
//! `span_end` exclusive.
//!
//! - Links are `[[target]]`, `[[target|display]]`, `[[target#anchor]]`,
//!   `[[target#anchor|display]]`, optionally prefixed with `!` for embeds.
//!   Links never span lines and are ignored inside fenced code blocks.
//! - Tags are `#` followed by letters, digits, `-`, `_` and `/`. They must start
//!   the text or follow whitespace, contain at least one non-digit, and are
//!   ignored inside fenced code blocks and inline code spans.
//!
//! ```
//! use vaultdex_context::links::{extract_links, extract_tags, wiki_link_targets};
//!
//! let text = "See [[Note A|Shown]] and [[Note A]] again. #project/alpha";
//! assert_eq!(wiki_link_targets(text), vec!["Note A".to_string()]);
//!
//! let links = extract_links(text);
//! assert_eq!(links.len(), 2);
//! assert_eq!(links[0].display_text.as_deref(), Some("Shown"));
//!
//! let tags = extract_tags(text);
//! assert_eq!(tags[0].path, "project/alpha");
//! assert_eq!(tags[0].parent_paths, vec!["project".to_string()]);
//! ```

use crate::markdown::FenceMarker;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A cross-reference to another note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// The full marker as written, including brackets and any `!` prefix.
    pub original_text: String,
    /// The referenced note; excludes `#anchor` and `|display` decorations.
    pub target: String,
    pub display_text: Option<String>,
    pub anchor: Option<String>,
    pub span_start: usize,
    pub span_end: usize,
    pub is_embed: bool,
}

/// A hierarchical classification marker such as `#project/alpha`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub original_text: String,
    /// Tag path without the leading `#`.
    pub path: String,
    pub span_start: usize,
    pub span_end: usize,
    pub is_nested: bool,
    /// Every proper ancestor path, shallowest first.
    pub parent_paths: Vec<String>,
}

impl Tag {
    pub fn new(path: String, span_start: usize, span_end: usize) -> Self {
        let parent_paths: Vec<String> = path
            .match_indices('/')
            .map(|(idx, _)| path[..idx].to_string())
            .collect();
        Self {
            original_text: format!("#{path}"),
            is_nested: !parent_paths.is_empty(),
            parent_paths,
            path,
            span_start,
            span_end,
        }
    }
}

/// Links and tags found in one piece of text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractedMetadata {
    pub links: Vec<Link>,
    pub tags: Vec<Tag>,
}

/// Runs both scans, sharing one pass of code-region detection.
pub fn extract(text: &str) -> ExtractedMetadata {
    let chars: Vec<char> = text.chars().collect();
    let mask = CodeMask::build(&chars);
    ExtractedMetadata {
        links: scan_links(&chars, &mask),
        tags: scan_tags(&chars, &mask),
    }
}

pub fn extract_links(text: &str) -> Vec<Link> {
    let chars: Vec<char> = text.chars().collect();
    let mask = CodeMask::build(&chars);
    scan_links(&chars, &mask)
}

pub fn extract_tags(text: &str) -> Vec<Tag> {
    let chars: Vec<char> = text.chars().collect();
    let mask = CodeMask::build(&chars);
    scan_tags(&chars, &mask)
}

/// Distinct, non-empty link targets in order of first appearance.
pub fn wiki_link_targets(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    extract_links(text)
        .into_iter()
        .filter(|link| !link.target.is_empty())
        .filter(|link| seen.insert(link.target.clone()))
        .map(|link| link.target)
        .collect()
}

/// Every tag plus every ancestor path, flattened and de-duplicated.
///
/// Ancestors come before the tag that introduced them, so `#a/b/c` yields
/// `["a", "a/b", "a/b/c"]`.
pub fn tags_with_ancestors(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut flattened = Vec::new();
    for tag in extract_tags(text) {
        for path in tag.parent_paths.into_iter().chain(std::iter::once(tag.path)) {
            if seen.insert(path.clone()) {
                flattened.push(path);
            }
        }
    }
    flattened
}

/// Per-character flags for fenced code and inline code spans.
struct CodeMask {
    fenced: Vec<bool>,
    inline: Vec<bool>,
}

impl CodeMask {
    fn build(chars: &[char]) -> Self {
        let mut fenced = vec![false; chars.len()];
        let mut inline = vec![false; chars.len()];

        // Backtick runs outside fences as (segment, start, len). Blank lines and
        // fenced lines start a new segment; spans never pair across segments.
        let mut runs: Vec<(usize, usize, usize)> = Vec::new();
        let mut segment = 0;
        let mut open_fence: Option<FenceMarker> = None;
        let mut line_start = 0;

        while line_start < chars.len() {
            let line_end = chars[line_start..]
                .iter()
                .position(|c| *c == '\n')
                .map_or(chars.len(), |offset| line_start + offset + 1);
            let line: String = chars[line_start..line_end].iter().collect();

            if let Some(fence) = open_fence {
                fenced[line_start..line_end].fill(true);
                if fence.closes(&line) {
                    open_fence = None;
                }
                segment += 1;
            } else if let Some(fence) = FenceMarker::opening(&line) {
                fenced[line_start..line_end].fill(true);
                open_fence = Some(fence);
                segment += 1;
            } else if line.trim().is_empty() {
                segment += 1;
            } else {
                let mut idx = line_start;
                while idx < line_end {
                    if chars[idx] == '`' {
                        let len = chars[idx..line_end].iter().take_while(|c| **c == '`').count();
                        runs.push((segment, idx, len));
                        idx += len;
                    } else {
                        idx += 1;
                    }
                }
            }
            line_start = line_end;
        }

        // For each run, the index of the next run with the same length in the
        // same segment. Built back to front so the whole pass stays linear.
        let mut next_match = vec![None; runs.len()];
        let mut latest: HashMap<(usize, usize), usize> = HashMap::new();
        for (idx, (segment, _, len)) in runs.iter().enumerate().rev() {
            next_match[idx] = latest.insert((*segment, *len), idx);
        }

        let mut idx = 0;
        while idx < runs.len() {
            match next_match[idx] {
                Some(close) => {
                    let (_, open_start, _) = runs[idx];
                    let (_, close_start, close_len) = runs[close];
                    inline[open_start..close_start + close_len].fill(true);
                    idx = close + 1;
                }
                None => idx += 1,
            }
        }

        Self { fenced, inline }
    }

    fn in_code(&self, idx: usize) -> bool {
        self.fenced[idx] || self.inline[idx]
    }
}

fn scan_links(chars: &[char], mask: &CodeMask) -> Vec<Link> {
    let mut links = Vec::new();
    let mut idx = 0;

    while idx + 1 < chars.len() {
        if mask.fenced[idx] || chars[idx] != '[' || chars[idx + 1] != '[' {
            idx += 1;
            continue;
        }

        let inner_start = idx + 2;
        // The first `]` or newline ends the candidate; any `[[` between here and
        // there would stop at the same character, so a failure skips ahead.
        let stop = chars[inner_start..]
            .iter()
            .position(|c| *c == ']' || *c == '\n')
            .map(|offset| inner_start + offset);

        match stop {
            Some(close) if chars[close] == ']' && chars.get(close + 1) == Some(&']') => {
                let inner: String = chars[inner_start..close].iter().collect();
                let is_embed = idx > 0 && chars[idx - 1] == '!' && !mask.fenced[idx - 1];
                let span_start = if is_embed { idx - 1 } else { idx };
                let span_end = close + 2;
                if let Some(link) = parse_link(chars, inner, span_start, span_end, is_embed) {
                    links.push(link);
                }
                idx = span_end;
            }
            Some(other) => idx = other.max(idx + 1),
            None => break,
        }
    }

    links
}

fn parse_link(
    chars: &[char],
    inner: String,
    span_start: usize,
    span_end: usize,
    is_embed: bool,
) -> Option<Link> {
    if inner.trim().is_empty() {
        return None;
    }

    let (reference, display) = match inner.split_once('|') {
        Some((reference, display)) => (reference, Some(display)),
        None => (inner.as_str(), None),
    };
    let (target, anchor) = match reference.split_once('#') {
        Some((target, anchor)) => (target, Some(anchor)),
        None => (reference, None),
    };
    let non_empty = |value: &str| {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    };

    Some(Link {
        original_text: chars[span_start..span_end].iter().collect(),
        target: target.trim().to_string(),
        display_text: display.and_then(non_empty),
        anchor: anchor.and_then(non_empty),
        span_start,
        span_end,
        is_embed,
    })
}

fn is_tag_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '/')
}

fn scan_tags(chars: &[char], mask: &CodeMask) -> Vec<Tag> {
    let mut tags = Vec::new();
    let mut idx = 0;

    while idx < chars.len() {
        let starts_tag = chars[idx] == '#'
            && !mask.in_code(idx)
            && (idx == 0 || chars[idx - 1].is_whitespace());
        if !starts_tag {
            idx += 1;
            continue;
        }

        let mut end = idx + 1;
        while end < chars.len() && is_tag_char(chars[end]) && !mask.in_code(end) {
            end += 1;
        }
        let scanned_end = end;
        while end > idx + 1 && chars[end - 1] == '/' {
            end -= 1;
        }

        let path: String = chars[idx + 1..end].iter().collect();
        let valid = !path.is_empty()
            && !path.split('/').any(str::is_empty)
            && !path.chars().all(|c| c.is_numeric() || c == '/');
        if valid {
            tags.push(Tag::new(path, idx, end));
        }
        idx = scanned_end.max(idx + 1);
    }

    tags
}
