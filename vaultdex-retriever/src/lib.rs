//! vaultdex-retriever: incremental semantic indexing for Markdown vaults
//!
//! Each run scans the vault, compares it with the record of the previous run and
//! only re-embeds notes that were added, modified or renamed. Chunks carry their
//! heading path, wiki-links and tags so search results keep their structural context.
//!
//! ## Key Modules
//!
//! - **[`retrieval`]**: discovery, change detection, chunking and the batch orchestrator
//! - **[`storage`]**: vector store abstraction with a SQLite implementation
//! - **[`config`]**: `vaultdex.toml` configuration
//! - **[`status`]**: read-only index inspection
//! - **[`watch`]**: reindexing on filesystem events
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use vaultdex_embed::HashingProvider;
//! use vaultdex_retriever::config::VaultdexConfig;
//! use vaultdex_retriever::retrieval::orchestrator::BatchOrchestrator;
//! use vaultdex_retriever::storage::SqliteVectorStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let vault = std::path::Path::new("my-vault");
//! let config = VaultdexConfig::discover(vault).await?;
//! let store = Arc::new(SqliteVectorStore::open(vault).await?);
//! let embedder = Arc::new(HashingProvider::initialized(256)?);
//!
//! let orchestrator = BatchOrchestrator::new(&config, vault, store, embedder)?;
//! let result = orchestrator.run(&CancellationToken::new()).await?;
//! println!("indexed {} of {} files", result.processed_count, result.attempted_count);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! FileDiscovery → ChangeDetector → BatchOrchestrator → VectorStore
//!                      ↑                 ↓      ↓
//!                VersionStore ←──────────┘   DocumentChunker → EmbeddingProvider
//! ```

pub mod config;
pub mod error;
pub mod retrieval;
pub mod status;
pub mod storage;
pub mod watch;
