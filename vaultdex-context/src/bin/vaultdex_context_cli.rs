use clap::Parser;
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use vaultdex_context::links::{Link, Tag};
use vaultdex_context::{ChunkingEngine, ChunkingStrategy, extract};

/// A CLI tool to chunk a Markdown note into JSON output using vaultdex-context.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input note. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Soft token budget for each chunk.
    #[arg(short, long, default_value_t = 512)]
    max_tokens: usize,

    /// Tokens of trailing context repeated at the start of the next chunk.
    #[arg(short, long, default_value_t = 50)]
    overlap_tokens: usize,

    /// Keep sections under different headings in the same chunk.
    #[arg(long)]
    no_header_split: bool,

    /// Use single lines instead of paragraphs as chunking units.
    #[arg(long)]
    no_paragraph_split: bool,

    /// Allow code blocks, tables and callouts to be split.
    #[arg(long)]
    no_preserve: bool,
}

#[derive(Serialize)]
struct SerializableChunk<'a> {
    sequence: usize,
    text: &'a str,
    approx_tokens: usize,
    header_path: &'a [String],
    contains_preserved_block: bool,
    links: Vec<&'a Link>,
    tags: Vec<&'a Tag>,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let file_content = if let Some(input_path) = args.input {
        fs::read_to_string(input_path)?
    } else {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    };

    let strategy = ChunkingStrategy {
        max_tokens: args.max_tokens,
        overlap_tokens: args.overlap_tokens,
        split_by_headers: !args.no_header_split,
        split_by_paragraphs: !args.no_paragraph_split,
        preserve_code_blocks: !args.no_preserve,
        preserve_tables: !args.no_preserve,
        preserve_callouts: !args.no_preserve,
        ..ChunkingStrategy::default()
    };
    if let Err(reason) = strategy.validate() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, reason));
    }

    let chunks = ChunkingEngine::new(strategy).chunk(&file_content);
    let metadata = extract(&file_content);

    let serializable_chunks: Vec<SerializableChunk> = chunks
        .iter()
        .map(|c| SerializableChunk {
            sequence: c.sequence,
            text: &c.text,
            approx_tokens: c.approx_tokens,
            header_path: &c.header_path,
            contains_preserved_block: c.contains_preserved_block,
            links: metadata
                .links
                .iter()
                .filter(|l| c.char_range.contains(&l.span_start))
                .collect(),
            tags: metadata
                .tags
                .iter()
                .filter(|t| c.char_range.contains(&t.span_start))
                .collect(),
        })
        .collect();

    let json_output = serde_json::to_string_pretty(&serializable_chunks)?;
    println!("{}", json_output);

    Ok(())
}
