pub mod links;
mod markdown;
pub mod text;

// Re-export the main entry points for external use
pub use links::{
    ExtractedMetadata, Link, Tag, extract, extract_links, extract_tags, tags_with_ancestors,
    wiki_link_targets,
};
pub use text::{ChunkingEngine, ChunkingStrategy, TextChunk, estimate_tokens};
