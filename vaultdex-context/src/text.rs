//! Token-budgeted chunking for Markdown notes.
//!
//! [`ChunkingEngine`] turns a document into an ordered list of [`TextChunk`]s.
//! Chunks are built from structural units (headings glued to the block that
//! follows them, paragraphs, fenced code, tables and callouts) which are
//! accumulated greedily until the next unit would push the chunk past
//! `max_tokens`.
//!
//! # Key Features
//!
//! *   **Header sections**: with `split_by_headers`, every heading opens a new
//!     section and chunks never straddle two sections.
//! *   **Preserved blocks**: fenced code, tables and callouts can be kept whole,
//!     even when that makes a chunk larger than the budget.
//! *   **Recursive splitting**: any other unit that is too large on its own is
//!     split on blank lines, then newlines, then sentence ends, then whitespace,
//!     and finally by characters.
//! *   **Overlap**: a new chunk inside the same section starts with the last
//!     `overlap_tokens` worth of words from the unit that closed the previous one.
//! *   **Reconstruction**: the non-overlap content of all chunks, concatenated in
//!     order, is exactly the original document.
//!
//! ```
//! use vaultdex_context::text::{ChunkingEngine, ChunkingStrategy};
//!
//! let engine = ChunkingEngine::new(ChunkingStrategy::default());
//! let document = "# H1\n\nPara one.\n\n# H2\n\nPara two.";
//! let chunks = engine.chunk(document);
//!
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[0].header_path, vec!["H1".to_string()]);
//! assert_eq!(chunks[1].header_path, vec!["H2".to_string()]);
//!
//! let rebuilt: String = chunks.iter().map(|c| c.content()).collect();
//! assert_eq!(rebuilt, document);
//! ```
use crate::markdown::{
    FenceMarker, is_callout_start, is_quote_line, is_table_row, parse_heading,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::LazyLock;

/// Delimiters for splitting oversized units, most significant first.
static SPLIT_DELIMITERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\n[ \t]*\n\s*", // Blank lines
        r"\n",            // Line breaks
        r"[.!?]+\s+",     // Sentence ends
        r"\s+",           // Whitespace
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static delimiter pattern"))
    .collect()
});

/// Approximate token count: every run of alphanumeric characters counts as one
/// token and every other non-whitespace character counts as one more.
///
/// The estimate is deterministic and never decreases when text is appended.
///
/// ```
/// use vaultdex_context::text::estimate_tokens;
///
/// assert_eq!(estimate_tokens("Hello, world!"), 4);
/// assert_eq!(estimate_tokens("   "), 0);
/// ```
pub fn estimate_tokens(text: &str) -> usize {
    let mut count = 0;
    let mut in_word = false;
    for ch in text.chars() {
        if ch.is_alphanumeric() {
            if !in_word {
                count += 1;
                in_word = true;
            }
        } else {
            in_word = false;
            if !ch.is_whitespace() {
                count += 1;
            }
        }
    }
    count
}

/// How a document should be segmented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingStrategy {
    /// Soft budget per chunk, measured with [`estimate_tokens`].
    pub max_tokens: usize,
    /// Tokens of trailing context repeated at the start of the next chunk.
    pub overlap_tokens: usize,
    pub split_by_headers: bool,
    /// Treat blank-line separated paragraphs as units; otherwise single lines.
    pub split_by_paragraphs: bool,
    /// Attach the active heading titles to each chunk.
    pub include_headers: bool,
    pub preserve_code_blocks: bool,
    pub preserve_tables: bool,
    pub preserve_callouts: bool,
}

impl Default for ChunkingStrategy {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            overlap_tokens: 50,
            split_by_headers: true,
            split_by_paragraphs: true,
            include_headers: true,
            preserve_code_blocks: true,
            preserve_tables: true,
            preserve_callouts: true,
        }
    }
}

impl ChunkingStrategy {
    /// Checks that the budget leaves room for new content after the overlap.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_tokens == 0 {
            return Err("max_tokens must be greater than zero".to_string());
        }
        if self.overlap_tokens >= self.max_tokens {
            return Err(format!(
                "overlap_tokens ({}) must be smaller than max_tokens ({})",
                self.overlap_tokens, self.max_tokens
            ));
        }
        Ok(())
    }
}

/// One segment of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextChunk {
    /// Position of this chunk in the document (0-indexed).
    pub sequence: usize,
    /// Overlap carried from the previous chunk followed by this chunk's own content.
    pub text: String,
    /// Length in bytes of the overlap prefix of `text`.
    pub overlap_len: usize,
    /// Byte range of the chunk's own content in the source document.
    pub range: Range<usize>,
    /// Character range of the chunk's own content in the source document.
    pub char_range: Range<usize>,
    pub header_path: Vec<String>,
    pub approx_tokens: usize,
    pub contains_preserved_block: bool,
}

impl TextChunk {
    /// The chunk text without the overlap prefix.
    pub fn content(&self) -> &str {
        &self.text[self.overlap_len..]
    }

    pub fn overlap(&self) -> &str {
        &self.text[..self.overlap_len]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BlockKind {
    Heading { level: usize, title: String },
    Fence,
    Table,
    Callout,
    Text,
    Blank,
}

#[derive(Debug, Clone)]
struct Block {
    kind: BlockKind,
    range: Range<usize>,
}

#[derive(Debug, Clone)]
struct UnitStart {
    start: usize,
    preserved: bool,
    section: usize,
    header_path: Vec<String>,
}

#[derive(Debug, Clone)]
struct Unit {
    range: Range<usize>,
    tokens: usize,
    preserved: bool,
    section: usize,
    header_path: Vec<String>,
}

struct OpenChunk {
    first: usize,
    last: usize,
    tokens: usize,
    overlap: String,
}

/// Tracks the character offset matching a byte offset as chunks are emitted in order.
#[derive(Default)]
struct CharCursor {
    byte: usize,
    chars: usize,
}

impl CharCursor {
    fn advance(&mut self, text: &str, range: Range<usize>) -> Range<usize> {
        let start = self.chars + text[self.byte..range.start].chars().count();
        let end = start + text[range.clone()].chars().count();
        self.byte = range.end;
        self.chars = end;
        start..end
    }
}

/// Splits documents according to a [`ChunkingStrategy`].
#[derive(Debug, Clone, Default)]
pub struct ChunkingEngine {
    strategy: ChunkingStrategy,
}

impl ChunkingEngine {
    pub fn new(strategy: ChunkingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> &ChunkingStrategy {
        &self.strategy
    }

    /// Splits `text` into chunks.
    ///
    /// Returns no chunks for an empty or whitespace-only document. Otherwise the
    /// chunks' [`TextChunk::range`]s partition the whole document.
    pub fn chunk(&self, text: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let max_tokens = self.strategy.max_tokens.max(1);
        let units = self.build_units(text, max_tokens);
        self.assemble(text, &units, max_tokens)
    }

    fn is_preserved(&self, kind: &BlockKind) -> bool {
        match kind {
            BlockKind::Fence => self.strategy.preserve_code_blocks,
            BlockKind::Table => self.strategy.preserve_tables,
            BlockKind::Callout => self.strategy.preserve_callouts,
            _ => false,
        }
    }

    fn build_units(&self, text: &str, max_tokens: usize) -> Vec<Unit> {
        let blocks = parse_blocks(text, self.strategy.split_by_paragraphs);

        let mut starts: Vec<UnitStart> = Vec::new();
        let mut headings: Vec<(usize, String)> = Vec::new();
        let mut section = 0;
        let mut pending_heading: Option<UnitStart> = None;
        let titles = |headings: &[(usize, String)]| -> Vec<String> {
            headings.iter().map(|(_, title)| title.clone()).collect()
        };

        for block in blocks {
            match block.kind {
                BlockKind::Blank => {}
                BlockKind::Heading { level, title } => {
                    // Two headings in a row: the first one stands alone.
                    if let Some(heading) = pending_heading.take() {
                        starts.push(heading);
                    }
                    while headings.last().is_some_and(|(open, _)| *open >= level) {
                        headings.pop();
                    }
                    headings.push((level, title));
                    if self.strategy.split_by_headers {
                        section += 1;
                    }
                    pending_heading = Some(UnitStart {
                        start: block.range.start,
                        preserved: false,
                        section,
                        header_path: titles(&headings),
                    });
                }
                kind => {
                    let preserved = self.is_preserved(&kind);
                    match pending_heading.take() {
                        Some(mut heading) => {
                            heading.preserved = preserved;
                            starts.push(heading);
                        }
                        None => starts.push(UnitStart {
                            start: block.range.start,
                            preserved,
                            section,
                            header_path: titles(&headings),
                        }),
                    }
                }
            }
        }
        if let Some(heading) = pending_heading {
            starts.push(heading);
        }
        // Leading blank lines belong to the first unit.
        if let Some(first) = starts.first_mut() {
            first.start = 0;
        }

        let mut units = Vec::with_capacity(starts.len());
        for (idx, start) in starts.iter().enumerate() {
            // Trailing blank lines belong to the unit before them.
            let end = starts.get(idx + 1).map_or(text.len(), |next| next.start);
            let range = start.start..end;
            let tokens = estimate_tokens(&text[range.clone()]);

            if tokens > max_tokens && !start.preserved {
                for piece in split_oversized(text, range, 0, max_tokens) {
                    units.push(Unit {
                        tokens: estimate_tokens(&text[piece.clone()]),
                        range: piece,
                        preserved: false,
                        section: start.section,
                        header_path: start.header_path.clone(),
                    });
                }
            } else {
                units.push(Unit {
                    range,
                    tokens,
                    preserved: start.preserved,
                    section: start.section,
                    header_path: start.header_path.clone(),
                });
            }
        }
        units
    }

    fn assemble(&self, text: &str, units: &[Unit], max_tokens: usize) -> Vec<TextChunk> {
        let mut chunks = Vec::new();
        let mut cursor = CharCursor::default();
        let mut open: Option<OpenChunk> = None;

        for (index, unit) in units.iter().enumerate() {
            let mut carried = String::new();

            if let Some(current) = open.take() {
                let boundary = units[current.last].section != unit.section;
                if !boundary && current.tokens + unit.tokens <= max_tokens {
                    open = Some(OpenChunk {
                        last: index,
                        tokens: current.tokens + unit.tokens,
                        ..current
                    });
                    continue;
                }
                if !boundary {
                    carried = self.overlap_after(text, &units[current.last]);
                }
                let sequence = chunks.len();
                chunks.push(self.finish(text, units, current, &mut cursor, sequence));
            }

            let mut overlap_tokens = estimate_tokens(&carried);
            if overlap_tokens + unit.tokens > max_tokens {
                carried.clear();
                overlap_tokens = 0;
            }
            open = Some(OpenChunk {
                first: index,
                last: index,
                tokens: overlap_tokens + unit.tokens,
                overlap: carried,
            });
        }

        if let Some(current) = open {
            let sequence = chunks.len();
            chunks.push(self.finish(text, units, current, &mut cursor, sequence));
        }
        chunks
    }

    /// Overlap to carry out of `unit` into the next chunk. Nothing is carried out
    /// of a preserved block.
    fn overlap_after(&self, text: &str, unit: &Unit) -> String {
        if self.strategy.overlap_tokens == 0 || unit.preserved {
            return String::new();
        }
        let tail = overlap_tail(&text[unit.range.clone()], self.strategy.overlap_tokens);
        if tail.trim().is_empty() {
            String::new()
        } else {
            tail.to_string()
        }
    }

    fn finish(
        &self,
        text: &str,
        units: &[Unit],
        open: OpenChunk,
        cursor: &mut CharCursor,
        sequence: usize,
    ) -> TextChunk {
        let range = units[open.first].range.start..units[open.last].range.end;
        let char_range = cursor.advance(text, range.clone());
        let overlap_len = open.overlap.len();
        let mut chunk_text = open.overlap;
        chunk_text.push_str(&text[range.clone()]);

        TextChunk {
            sequence,
            approx_tokens: estimate_tokens(&chunk_text),
            text: chunk_text,
            overlap_len,
            range,
            char_range,
            header_path: if self.strategy.include_headers {
                units[open.first].header_path.clone()
            } else {
                Vec::new()
            },
            contains_preserved_block: units[open.first..=open.last]
                .iter()
                .any(|unit| unit.preserved),
        }
    }
}

/// Returns the shortest whole-word suffix of `text` worth at least
/// `overlap_tokens`, or all of `text` if it is shorter than that.
fn overlap_tail(text: &str, overlap_tokens: usize) -> &str {
    let mut tokens = 0;
    let mut in_word = false;
    for (idx, ch) in text.char_indices().rev() {
        if ch.is_whitespace() {
            if tokens >= overlap_tokens {
                return &text[idx + ch.len_utf8()..];
            }
            in_word = false;
        } else if ch.is_alphanumeric() {
            if !in_word {
                tokens += 1;
                in_word = true;
            }
        } else {
            tokens += 1;
            in_word = false;
        }
    }
    text
}

fn line_ranges(text: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    for line in text.split_inclusive('\n') {
        ranges.push(start..start + line.len());
        start += line.len();
    }
    ranges
}

fn starts_block(line: &str) -> bool {
    FenceMarker::opening(line).is_some()
        || parse_heading(line).is_some()
        || is_table_row(line)
        || is_callout_start(line)
}

/// Classifies the document into consecutive blocks of whole lines.
fn parse_blocks(text: &str, by_paragraph: bool) -> Vec<Block> {
    let lines = line_ranges(text);
    let line = |idx: usize| &text[lines[idx].clone()];
    let scan_while = |from: usize, keep: &dyn Fn(&str) -> bool| -> usize {
        let mut end = from;
        while end < lines.len() && keep(line(end)) {
            end += 1;
        }
        end
    };

    let mut blocks = Vec::new();
    let mut idx = 0;
    while idx < lines.len() {
        let current = line(idx);
        let (kind, end) = if current.trim().is_empty() {
            (BlockKind::Blank, idx + 1)
        } else if let Some(fence) = FenceMarker::opening(current) {
            // An unclosed fence runs to the end of the document.
            let mut end = idx + 1;
            while end < lines.len() {
                let closes = fence.closes(line(end));
                end += 1;
                if closes {
                    break;
                }
            }
            (BlockKind::Fence, end)
        } else if let Some((level, title)) = parse_heading(current) {
            (BlockKind::Heading { level, title }, idx + 1)
        } else if is_table_row(current) {
            (BlockKind::Table, scan_while(idx + 1, &is_table_row))
        } else if is_callout_start(current) {
            (BlockKind::Callout, scan_while(idx + 1, &is_quote_line))
        } else if by_paragraph {
            let end = scan_while(idx + 1, &|l: &str| !l.trim().is_empty() && !starts_block(l));
            (BlockKind::Text, end)
        } else {
            (BlockKind::Text, idx + 1)
        };

        blocks.push(Block {
            kind,
            range: lines[idx].start..lines[end - 1].end,
        });
        idx = end;
    }
    blocks
}

/// Recursively splits `range` until every piece fits the budget. Each delimiter
/// stays attached to the piece before it, so the pieces are contiguous.
fn split_oversized(
    text: &str,
    range: Range<usize>,
    delimiter_idx: usize,
    max_tokens: usize,
) -> Vec<Range<usize>> {
    let slice = &text[range.clone()];
    if estimate_tokens(slice) <= max_tokens {
        return vec![range];
    }
    let Some(delimiter) = SPLIT_DELIMITERS.get(delimiter_idx) else {
        return split_by_chars(text, range, max_tokens);
    };

    let mut pieces = Vec::new();
    let mut piece_start = 0;
    for found in delimiter.find_iter(slice) {
        if found.end() >= slice.len() {
            break;
        }
        pieces.push(range.start + piece_start..range.start + found.end());
        piece_start = found.end();
    }
    pieces.push(range.start + piece_start..range.end);

    pieces
        .into_iter()
        .flat_map(|piece| split_oversized(text, piece, delimiter_idx + 1, max_tokens))
        .collect()
}

/// Last resort: every character is worth at most one token.
fn split_by_chars(text: &str, range: Range<usize>, max_tokens: usize) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut start = range.start;
    let mut count = 0;
    for (offset, _) in text[range.clone()].char_indices() {
        if count == max_tokens {
            pieces.push(start..range.start + offset);
            start = range.start + offset;
            count = 0;
        }
        count += 1;
    }
    pieces.push(start..range.end);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(max_tokens: usize, overlap_tokens: usize) -> ChunkingStrategy {
        ChunkingStrategy {
            max_tokens,
            overlap_tokens,
            ..ChunkingStrategy::default()
        }
    }

    fn assert_reconstructs(chunks: &[TextChunk], document: &str) {
        let rebuilt: String = chunks.iter().map(|c| c.content()).collect();
        assert_eq!(rebuilt, document);
        for (idx, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.sequence, idx);
            assert_eq!(chunk.content(), &document[chunk.range.clone()]);
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("one two three"), 3);
        assert_eq!(estimate_tokens("a.b"), 3);
        assert_eq!(estimate_tokens("# Heading\n"), 2);
        assert!(estimate_tokens("one two") <= estimate_tokens("one two three"));
    }

    #[test]
    fn test_validate() {
        assert!(ChunkingStrategy::default().validate().is_ok());
        assert!(strategy(0, 0).validate().is_err());
        assert!(strategy(10, 10).validate().is_err());
    }

    #[test]
    fn test_empty_and_blank_documents() {
        let engine = ChunkingEngine::default();
        assert!(engine.chunk("").is_empty());
        assert!(engine.chunk("  \n\n\t\n").is_empty());
    }

    #[test]
    fn test_single_chunk_keeps_surrounding_whitespace() {
        let engine = ChunkingEngine::default();
        let document = "\n\nJust one paragraph.\n\n";
        let chunks = engine.chunk(document);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, document);
        assert_eq!(chunks[0].overlap_len, 0);
        assert_eq!(chunks[0].char_range, 0..document.chars().count());
    }

    #[test]
    fn test_header_sections_split() {
        let engine = ChunkingEngine::default();
        let document = "# H1\n\nPara one.\n\n# H2\n\nPara two.";
        let chunks = engine.chunk(document);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].header_path, vec!["H1"]);
        assert_eq!(chunks[1].header_path, vec!["H2"]);
        assert_eq!(chunks[0].text, "# H1\n\nPara one.\n\n");
        assert_reconstructs(&chunks, document);
    }

    #[test]
    fn test_nested_header_path() {
        let engine = ChunkingEngine::default();
        let document = "# Top\n\nIntro.\n\n## Child\n\nBody.\n\n### Grandchild\n\nDeep.\n\n## Sibling\n\nMore.";
        let chunks = engine.chunk(document);
        let paths: Vec<Vec<String>> = chunks.iter().map(|c| c.header_path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                vec!["Top".to_string()],
                vec!["Top".to_string(), "Child".to_string()],
                vec!["Top".to_string(), "Child".to_string(), "Grandchild".to_string()],
                vec!["Top".to_string(), "Sibling".to_string()],
            ]
        );
    }

    #[test]
    fn test_without_header_splitting_sections_merge() {
        let engine = ChunkingEngine::new(ChunkingStrategy {
            split_by_headers: false,
            ..ChunkingStrategy::default()
        });
        let document = "# H1\n\nPara one.\n\n# H2\n\nPara two.";
        let chunks = engine.chunk(document);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].header_path, vec!["H1"]);
    }

    #[test]
    fn test_include_headers_off() {
        let engine = ChunkingEngine::new(ChunkingStrategy {
            include_headers: false,
            ..ChunkingStrategy::default()
        });
        let chunks = engine.chunk("# H1\n\nBody");
        assert!(chunks[0].header_path.is_empty());
    }

    #[test]
    fn test_greedy_budget_and_overlap() {
        let engine = ChunkingEngine::new(strategy(6, 2));
        let document = "alpha beta gamma delta\n\nepsilon zeta eta theta\n\niota kappa lambda mu";
        let chunks = engine.chunk(document);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].overlap(), "");
        assert_eq!(chunks[1].overlap(), "gamma delta\n\n");
        assert_eq!(chunks[1].content(), "epsilon zeta eta theta\n\n");
        assert_eq!(chunks[2].overlap(), "eta theta\n\n");
        for chunk in &chunks {
            assert!(chunk.approx_tokens <= 6);
        }
        assert_reconstructs(&chunks, document);
    }

    #[test]
    fn test_no_overlap_across_sections() {
        let engine = ChunkingEngine::new(strategy(50, 5));
        let chunks = engine.chunk("# A\n\none two three\n\n# B\n\nfour five six");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].overlap_len, 0);
    }

    #[test]
    fn test_preserved_code_block_exceeds_budget() {
        let engine = ChunkingEngine::new(strategy(10, 2));
        let code: String = (0..40).map(|i| format!("let x{i} = {i};\n")).collect();
        let document = format!("Before.\n\n```rust\n{code}```\n\nAfter.");
        let chunks = engine.chunk(&document);

        let fenced: Vec<&TextChunk> = chunks.iter().filter(|c| c.text.contains("```rust")).collect();
        assert_eq!(fenced.len(), 1);
        assert!(fenced[0].contains_preserved_block);
        assert!(fenced[0].content().contains(&code));
        assert!(fenced[0].content().trim_end().ends_with("```"));
        assert!(fenced[0].approx_tokens > 10);

        // Nothing is carried out of a preserved block.
        let after = chunks.last().unwrap();
        assert_eq!(after.overlap_len, 0);
        assert_reconstructs(&chunks, &document);
    }

    #[test]
    fn test_unpreserved_code_block_is_split() {
        let engine = ChunkingEngine::new(ChunkingStrategy {
            max_tokens: 10,
            overlap_tokens: 0,
            preserve_code_blocks: false,
            ..ChunkingStrategy::default()
        });
        let code: String = (0..40).map(|i| format!("let x{i} = {i};\n")).collect();
        let document = format!("```\n{code}```\n");
        let chunks = engine.chunk(&document);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| !c.contains_preserved_block));
        assert!(chunks.iter().all(|c| c.approx_tokens <= 10));
        assert_reconstructs(&chunks, &document);
    }

    #[test]
    fn test_tables_and_callouts_are_atomic() {
        let engine = ChunkingEngine::new(strategy(6, 0));
        let table = "| a | b |\n|---|---|\n| 1 | 2 |\n| 3 | 4 |\n";
        let callout = "> [!note] Remember\n> this whole thing\n> stays together\n";
        let document = format!("{table}\n{callout}");
        let chunks = engine.chunk(&document);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].text.starts_with(table));
        assert!(chunks[1].text.starts_with(callout));
        assert!(chunks.iter().all(|c| c.contains_preserved_block));
    }

    #[test]
    fn test_unclosed_fence_runs_to_end() {
        let engine = ChunkingEngine::new(strategy(4, 0));
        let document = "Intro text.\n\n```\n# not a heading\nmore code here please\n";
        let chunks = engine.chunk(document);
        let last = chunks.last().unwrap();
        assert!(last.contains_preserved_block);
        assert!(last.content().contains("# not a heading"));
        assert!(last.header_path.is_empty());
        assert_reconstructs(&chunks, document);
    }

    #[test]
    fn test_long_paragraph_splits_on_sentences() {
        let engine = ChunkingEngine::new(strategy(12, 0));
        let document = "First sentence is here. Second sentence follows it. Third one ends the paragraph.";
        let chunks = engine.chunk(document);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].content().ends_with(". "));
        assert!(chunks.iter().all(|c| c.approx_tokens <= 12));
        assert_reconstructs(&chunks, document);
    }

    #[test]
    fn test_punctuation_run_falls_back_to_chars() {
        let engine = ChunkingEngine::new(strategy(5, 0));
        let document = "!".repeat(23);
        let chunks = engine.chunk(&document);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.approx_tokens <= 5));
        assert_reconstructs(&chunks, &document);
    }

    #[test]
    fn test_line_units_without_paragraph_splitting() {
        let engine = ChunkingEngine::new(ChunkingStrategy {
            max_tokens: 3,
            overlap_tokens: 0,
            split_by_paragraphs: false,
            ..ChunkingStrategy::default()
        });
        let document = "one two\nthree four\nfive six\n";
        let chunks = engine.chunk(document);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[1].content(), "three four\n");
    }

    #[test]
    fn test_char_ranges_track_multibyte_text() {
        let engine = ChunkingEngine::new(strategy(3, 0));
        let document = "héllo wörld\n\nçà et là\n\nfin";
        let chunks = engine.chunk(document);
        let chars: Vec<char> = document.chars().collect();
        for chunk in &chunks {
            let by_chars: String = chars[chunk.char_range.clone()].iter().collect();
            assert_eq!(by_chars, chunk.content());
        }
        assert_eq!(chunks.last().unwrap().char_range.end, chars.len());
    }

    #[test]
    fn test_heading_glued_to_following_block() {
        let engine = ChunkingEngine::new(ChunkingStrategy {
            max_tokens: 6,
            overlap_tokens: 0,
            split_by_headers: false,
            ..ChunkingStrategy::default()
        });
        let chunks = engine.chunk("Lead in words here.\n\n# Title\n\nBody text");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].content(), "# Title\n\nBody text");
        assert_eq!(chunks[1].header_path, vec!["Title"]);
    }
}
