//! Turns one note into store-ready chunks.
//!
//! [`DocumentChunker`] runs link and tag extraction once over the whole note, then
//! segments it with [`ChunkingEngine`] and hands each chunk the links and tags whose
//! spans start inside the chunk's own (non-overlap) text.

use crate::storage::{ChunkId, ChunkMetadata, chunk_id};
use half::f16;
use vaultdex_context::{ChunkingEngine, ChunkingStrategy, Link, Tag, extract};

#[derive(Debug, Clone)]
pub struct Chunk {
    pub source_file: String,
    /// Contiguous from 0 within a file.
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
    pub approx_token_count: usize,
    pub header_path: Vec<String>,
    pub contains_preserved_block: bool,
    pub links: Vec<Link>,
    pub tags: Vec<Tag>,
    pub embedding: Option<Vec<f16>>,
}

impl Chunk {
    pub fn id(&self) -> ChunkId {
        chunk_id(&self.source_file, self.chunk_index)
    }

    pub fn metadata(&self, content_hash: &str) -> ChunkMetadata {
        ChunkMetadata {
            source_file: self.source_file.clone(),
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
            text: self.text.clone(),
            approx_token_count: self.approx_token_count,
            header_path: self.header_path.clone(),
            contains_preserved_block: self.contains_preserved_block,
            links: self.links.clone(),
            tags: self.tags.clone(),
            content_hash: content_hash.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentChunker {
    engine: ChunkingEngine,
}

impl DocumentChunker {
    pub fn new(strategy: ChunkingStrategy) -> Self {
        Self {
            engine: ChunkingEngine::new(strategy),
        }
    }

    pub fn chunk_document(&self, source_file: &str, text: &str) -> Vec<Chunk> {
        let metadata = extract(text);
        let pieces = self.engine.chunk(text);
        let total_chunks = pieces.len();

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .enumerate()
            .map(|(chunk_index, piece)| Chunk {
                source_file: source_file.to_string(),
                chunk_index,
                total_chunks,
                links: metadata
                    .links
                    .iter()
                    .filter(|l| piece.char_range.contains(&l.span_start))
                    .cloned()
                    .collect(),
                tags: metadata
                    .tags
                    .iter()
                    .filter(|t| piece.char_range.contains(&t.span_start))
                    .cloned()
                    .collect(),
                approx_token_count: piece.approx_tokens,
                header_path: piece.header_path,
                contains_preserved_block: piece.contains_preserved_block,
                text: piece.text,
                embedding: None,
            })
            .collect();

        tracing::debug!(
            "Chunked {} into {} chunks ({} links, {} tags)",
            source_file,
            total_chunks,
            metadata.links.len(),
            metadata.tags.len()
        );
        chunks
    }
}
