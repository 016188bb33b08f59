//! SQLite implementation of [`VectorStore`].
//!
//! ## Database Schema
//!
//! ```sql
//! CREATE TABLE chunks (
//!     id TEXT PRIMARY KEY,          -- chunk_id(source_file, chunk_index)
//!     source_file TEXT NOT NULL,    -- vault-relative path
//!     chunk_index INTEGER NOT NULL,
//!     content TEXT NOT NULL,        -- chunk text, duplicated from metadata for LIKE queries
//!     metadata TEXT NOT NULL,       -- ChunkMetadata as JSON
//!     embedding BLOB NOT NULL,      -- f16 vector, native byte order
//!     dimension INTEGER NOT NULL,
//!     updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
//! );
//! ```
//!
//! Similarity search is a linear scan computing cosine similarity in memory, which is
//! plenty for a personal vault of a few thousand notes.

use super::{
    ChunkMetadata, QueryHit, QueryInput, QueryOptions, StoreStats, VectorStore, cosine_similarity,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use half::f16;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DB_FILE_NAME: &str = ".vaultdex.db";

#[derive(Clone, Debug)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
    path: Option<PathBuf>,
}

impl SqliteVectorStore {
    /// Opens (creating if needed) the database file inside `dir`.
    pub async fn open(dir: &Path) -> Result<Self> {
        let db_path = dir.join(DB_FILE_NAME);
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(&db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
        let store = Self {
            pool,
            path: Some(db_path),
        };
        store.initialize().await?;
        Ok(store)
    }

    /// In-memory database, mostly for tests. A single connection keeps every query on
    /// the same database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool, path: None };
        store.initialize().await?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    async fn query_by_vector(
        &self,
        vector: &[f16],
        options: &QueryOptions,
    ) -> Result<Vec<QueryHit>> {
        let rows = sqlx::query(
            r#"
            SELECT id, metadata, embedding FROM chunks
            WHERE dimension = ?1 AND source_file LIKE ?2 ESCAPE '\'
            "#,
        )
        .bind(vector.len() as i64)
        .bind(prefix_pattern(options.filter.source_prefix.as_deref()))
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata: ChunkMetadata = serde_json::from_str(row.get("metadata"))?;
            if !options.filter.matches(&metadata) {
                continue;
            }
            let embedding = decode_embedding(row.get("embedding"));
            hits.push(QueryHit {
                id: row.get("id"),
                score: cosine_similarity(vector, &embedding),
                metadata,
            });
        }
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(options.limit);
        Ok(hits)
    }

    async fn query_by_text(&self, text: &str, options: &QueryOptions) -> Result<Vec<QueryHit>> {
        let needle = text.trim();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT id, metadata FROM chunks
            WHERE content LIKE ?1 ESCAPE '\' AND source_file LIKE ?2 ESCAPE '\'
            "#,
        )
        .bind(format!("%{}%", escape_like(needle)))
        .bind(prefix_pattern(options.filter.source_prefix.as_deref()))
        .fetch_all(&self.pool)
        .await?;

        let needle = needle.to_lowercase();
        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata: ChunkMetadata = serde_json::from_str(row.get("metadata"))?;
            if !options.filter.matches(&metadata) {
                continue;
            }
            let occurrences = metadata.text.to_lowercase().matches(&needle).count().max(1);
            hits.push(QueryHit {
                id: row.get("id"),
                score: occurrences as f32,
                metadata,
            });
        }
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.metadata.source_file.cmp(&b.metadata.source_file))
                .then_with(|| a.metadata.chunk_index.cmp(&b.metadata.chunk_index))
        });
        hits.truncate(options.limit);
        Ok(hits)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                source_file TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL,
                dimension INTEGER NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_file)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn database_exists(&self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'chunks'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn upsert(&self, id: &str, vector: &[f16], metadata: &ChunkMetadata) -> Result<()> {
        let embedding_bytes: &[u8] = bytemuck::cast_slice(vector);
        sqlx::query(
            r#"
            INSERT INTO chunks (id, source_file, chunk_index, content, metadata, embedding, dimension, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                source_file = excluded.source_file,
                chunk_index = excluded.chunk_index,
                content = excluded.content,
                metadata = excluded.metadata,
                embedding = excluded.embedding,
                dimension = excluded.dimension,
                updated_at = datetime('now')
            "#,
        )
        .bind(id)
        .bind(&metadata.source_file)
        .bind(metadata.chunk_index as i64)
        .bind(&metadata.text)
        .bind(serde_json::to_string(metadata)?)
        .bind(embedding_bytes)
        .bind(vector.len() as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_source(&self, source_file: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE source_file = ?1")
            .bind(source_file)
            .execute(&self.pool)
            .await?;
        let removed = result.rows_affected() as usize;
        if removed > 0 {
            debug!("Removed {} chunks for {}", removed, source_file);
        }
        Ok(removed)
    }

    async fn query(&self, input: &QueryInput, options: &QueryOptions) -> Result<Vec<QueryHit>> {
        match input {
            QueryInput::Vector(vector) => self.query_by_vector(vector, options).await,
            QueryInput::Text(text) => self.query_by_text(text, options).await,
        }
    }

    async fn get_stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(DISTINCT source_file) AS sources, MAX(dimension) AS dimension FROM chunks",
        )
        .fetch_one(&self.pool)
        .await?;
        let size: Option<i64> = sqlx::query_scalar(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(StoreStats {
            total_vectors: row.get::<i64, _>("total") as usize,
            total_sources: row.get::<i64, _>("sources") as usize,
            dimension: row.get::<Option<i64>, _>("dimension").map(|d| d as usize),
            database_size_bytes: size.map(|s| s as u64),
        })
    }

    async fn list_indices(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(names)
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn prefix_pattern(prefix: Option<&str>) -> String {
    format!("{}%", escape_like(prefix.unwrap_or_default()))
}

/// Reads f16 values byte pair by byte pair, since a SQLite blob carries no alignment
/// guarantee for a direct cast.
fn decode_embedding(bytes: &[u8]) -> Vec<f16> {
    bytes
        .chunks_exact(2)
        .map(|pair| f16::from_ne_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{QueryFilter, chunk_id};
    use vaultdex_context::Tag;

    fn vector(values: &[f32]) -> Vec<f16> {
        values.iter().map(|&v| f16::from_f32(v)).collect()
    }

    fn metadata(source: &str, index: usize, text: &str, tags: &[&str]) -> ChunkMetadata {
        ChunkMetadata {
            source_file: source.into(),
            chunk_index: index,
            total_chunks: 1,
            text: text.into(),
            approx_token_count: text.split_whitespace().count(),
            header_path: Vec::new(),
            contains_preserved_block: false,
            links: Vec::new(),
            tags: tags
                .iter()
                .map(|t| Tag::new(t.to_string(), 0, t.len() + 1))
                .collect(),
            content_hash: "hash".into(),
        }
    }

    async fn seeded() -> Result<SqliteVectorStore> {
        let store = SqliteVectorStore::open_memory().await?;
        for (source, index, text, tags, v) in [
            ("notes/a.md", 0, "rust ownership rules", vec!["lang/rust"], [1.0, 0.0, 0.0]),
            ("notes/a.md", 1, "rust rust borrowing", vec![], [0.9, 0.1, 0.0]),
            ("journal/b.md", 0, "a quiet day", vec!["daily"], [0.0, 1.0, 0.0]),
            ("notes/c_d.md", 0, "100% coverage", vec![], [0.0, 0.0, 1.0]),
        ] {
            store
                .upsert(
                    &chunk_id(source, index),
                    &vector(&v),
                    &metadata(source, index, text, &tags),
                )
                .await?;
        }
        Ok(store)
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() -> Result<()> {
        let store = SqliteVectorStore::open_memory().await?;
        store.initialize().await?;
        assert!(store.database_exists().await?);
        assert_eq!(store.list_indices().await?, vec!["chunks"]);
        assert_eq!(store.get_stats().await?.total_vectors, 0);
        assert_eq!(store.get_stats().await?.dimension, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_upsert_overwrites_by_id() -> Result<()> {
        let store = seeded().await?;
        let id = chunk_id("notes/a.md", 0);
        store
            .upsert(&id, &vector(&[0.0, 1.0, 0.0]), &metadata("notes/a.md", 0, "rewritten", &[]))
            .await?;

        let stats = store.get_stats().await?;
        assert_eq!(stats.total_vectors, 4);
        assert_eq!(stats.total_sources, 3);
        assert_eq!(stats.dimension, Some(3));
        assert!(stats.database_size_bytes.unwrap_or(0) > 0);

        let hits = store
            .query(&QueryInput::Text("rewritten".into()), &QueryOptions::default())
            .await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, id);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_by_source() -> Result<()> {
        let store = seeded().await?;
        assert_eq!(store.delete_by_source("notes/a.md").await?, 2);
        assert_eq!(store.delete_by_source("notes/a.md").await?, 0);
        assert_eq!(store.get_stats().await?.total_vectors, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_vector_query_ranks_by_similarity() -> Result<()> {
        let store = seeded().await?;
        let hits = store
            .query(
                &QueryInput::Vector(vector(&[1.0, 0.0, 0.0])),
                &QueryOptions {
                    limit: 2,
                    ..Default::default()
                },
            )
            .await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.source_file, "notes/a.md");
        assert_eq!(hits[0].metadata.chunk_index, 0);
        assert_eq!(hits[1].metadata.chunk_index, 1);
        assert!(hits[0].score >= hits[1].score);

        let wrong_dimension = store
            .query(&QueryInput::Vector(vector(&[1.0, 0.0])), &QueryOptions::default())
            .await?;
        assert!(wrong_dimension.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_query_filters() -> Result<()> {
        let store = seeded().await?;
        let by_prefix = QueryOptions {
            limit: 10,
            filter: QueryFilter {
                source_prefix: Some("journal/".into()),
                tag: None,
            },
        };
        let hits = store
            .query(&QueryInput::Vector(vector(&[1.0, 0.0, 0.0])), &by_prefix)
            .await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.source_file, "journal/b.md");

        let by_tag = QueryOptions {
            limit: 10,
            filter: QueryFilter {
                source_prefix: None,
                tag: Some("lang".into()),
            },
        };
        let hits = store.query(&QueryInput::Text("rust".into()), &by_tag).await?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.chunk_index, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_text_query_escapes_wildcards() -> Result<()> {
        let store = seeded().await?;
        let hits = store
            .query(&QueryInput::Text("100%".into()), &QueryOptions::default())
            .await?;
        assert_eq!(hits.len(), 1);

        let underscore = QueryOptions {
            limit: 10,
            filter: QueryFilter {
                source_prefix: Some("notes/c_".into()),
                tag: None,
            },
        };
        let hits = store
            .query(&QueryInput::Text("coverage".into()), &underscore)
            .await?;
        assert_eq!(hits.len(), 1);

        let hits = store
            .query(&QueryInput::Text("RUST".into()), &QueryOptions::default())
            .await?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata.chunk_index, 1, "two occurrences rank first");

        assert!(
            store
                .query(&QueryInput::Text("  ".into()), &QueryOptions::default())
                .await?
                .is_empty()
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_open_creates_database_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = SqliteVectorStore::open(dir.path()).await?;
        assert!(dir.path().join(DB_FILE_NAME).exists());
        assert_eq!(store.path(), Some(dir.path().join(DB_FILE_NAME).as_path()));
        store
            .upsert(&chunk_id("a.md", 0), &vector(&[1.0]), &metadata("a.md", 0, "x", &[]))
            .await?;
        drop(store);

        let reopened = SqliteVectorStore::open(dir.path()).await?;
        assert_eq!(reopened.get_stats().await?.total_vectors, 1);
        Ok(())
    }
}
