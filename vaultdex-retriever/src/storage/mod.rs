//! Vector store abstraction for indexed note chunks.
//!
//! The orchestrator only needs put, delete-by-source and a ranked query, so the
//! [`VectorStore`] trait is kept to that surface plus a few inspection calls used by
//! `vaultdex status`.
//!
//! ## Key Components
//!
//! - **VectorStore**: async trait implemented by storage backends
//! - **SqliteVectorStore**: SQLite backend storing f16 embeddings as blobs
//! - **ChunkMetadata**: everything stored next to a vector
//!
//! Chunk ids come from [`chunk_id`], a hash of the source path and chunk index, so
//! reindexing a file overwrites its previous chunks in place.

use anyhow::Result;
use async_trait::async_trait;
use half::f16;
use serde::{Deserialize, Serialize};
use vaultdex_context::{Link, Tag};

pub mod sqlite_store;

pub use sqlite_store::SqliteVectorStore;

/// Hex blake3 digest of `(source_file, chunk_index)`.
pub type ChunkId = String;

pub fn chunk_id(source_file: &str, chunk_index: usize) -> ChunkId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source_file.as_bytes());
    hasher.update(&[0]);
    hasher.update(&(chunk_index as u64).to_le_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source_file: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
    pub approx_token_count: usize,
    pub header_path: Vec<String>,
    pub contains_preserved_block: bool,
    /// Links whose span starts in this chunk, spans relative to the whole note.
    pub links: Vec<Link>,
    /// Tags whose span starts in this chunk, spans relative to the whole note.
    pub tags: Vec<Tag>,
    /// Hash of the whole source file when the chunk was written.
    pub content_hash: String,
}

impl ChunkMetadata {
    /// Distinct non-empty link targets, in order of first appearance.
    pub fn link_targets(&self) -> Vec<&str> {
        let mut targets: Vec<&str> = Vec::new();
        for link in &self.links {
            if !link.target.is_empty() && !targets.contains(&link.target.as_str()) {
                targets.push(&link.target);
            }
        }
        targets
    }

    /// Distinct tag paths, in order of first appearance.
    pub fn tag_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = Vec::new();
        for tag in &self.tags {
            if !paths.contains(&tag.path.as_str()) {
                paths.push(&tag.path);
            }
        }
        paths
    }
}

#[derive(Debug, Clone)]
pub enum QueryInput {
    /// Substring match over chunk text.
    Text(String),
    /// Cosine similarity against stored embeddings.
    Vector(Vec<f16>),
}

#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Only chunks whose source path starts with this prefix.
    pub source_prefix: Option<String>,
    /// Only chunks carrying this tag or one of its descendants.
    pub tag: Option<String>,
}

impl QueryFilter {
    pub fn matches(&self, metadata: &ChunkMetadata) -> bool {
        if let Some(prefix) = &self.source_prefix {
            if !metadata.source_file.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            let tag = tag.trim_start_matches('#').trim_end_matches('/');
            return metadata
                .tags
                .iter()
                .any(|t| t.path == tag || t.parent_paths.iter().any(|p| p == tag));
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub limit: usize,
    pub filter: QueryFilter,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            filter: QueryFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub id: ChunkId,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_vectors: usize,
    pub total_sources: usize,
    /// Embedding dimension, when at least one vector is stored.
    pub dimension: Option<usize>,
    pub database_size_bytes: Option<u64>,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create tables and indices. Safe to call more than once.
    async fn initialize(&self) -> Result<()>;

    async fn database_exists(&self) -> Result<bool>;

    async fn upsert(&self, id: &str, vector: &[f16], metadata: &ChunkMetadata) -> Result<()>;

    /// Remove every chunk of `source_file`, returning how many were removed.
    async fn delete_by_source(&self, source_file: &str) -> Result<usize>;

    /// Ranked hits, best first.
    async fn query(&self, input: &QueryInput, options: &QueryOptions) -> Result<Vec<QueryHit>>;

    async fn get_stats(&self) -> Result<StoreStats>;

    async fn list_indices(&self) -> Result<Vec<String>>;
}

/// Cosine similarity between two f16 vectors, computed in f32.
pub fn cosine_similarity(a: &[f16], b: &[f16]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (x.to_f32(), y.to_f32());
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
