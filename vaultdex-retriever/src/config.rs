//! Run configuration for the indexer.
//!
//! One [`VaultdexConfig`] value is threaded explicitly through discovery, chunking,
//! embedding and the orchestrator. It is read from `vaultdex.toml` in the vault root
//! (or an explicit `--config` path); every table and field is optional.
//!
//! ```toml
//! [discovery]
//! file_extensions = ["md"]
//! exclude_patterns = ["templates/**"]
//!
//! [chunking]
//! max_tokens = 256
//!
//! [indexing]
//! batch_size = 20
//! concurrency = 2
//!
//! [embedding]
//! provider = "hashing"
//! dimension = 128
//! ```

use crate::error::{IndexError, Result};
use crate::retrieval::discovery::DiscoveryOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vaultdex_context::ChunkingStrategy;
use vaultdex_embed::EmbedConfig;

pub const FILE_NAME: &str = "vaultdex.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultdexConfig {
    pub discovery: DiscoveryOptions,
    pub chunking: ChunkingStrategy,
    pub indexing: IndexingOptions,
    pub embedding: EmbedConfig,
    pub store: StoreOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingOptions {
    /// Files per batch. Batches run one after another.
    pub batch_size: usize,
    /// File pipelines running in parallel within a batch.
    pub concurrency: usize,
    pub dry_run: bool,
    /// Ignore the prior version record and reindex every file.
    pub force_full: bool,
    /// Consult git history when the vault is a repository.
    pub use_revision_control: bool,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            concurrency: 4,
            dry_run: false,
            force_full: false,
            use_revision_control: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// Directory holding the database and the version file. Relative paths resolve
    /// against the vault root; unset means the vault root itself.
    pub database_dir: Option<PathBuf>,
}

impl VaultdexConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| IndexError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IndexError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Loads `vaultdex.toml` from the vault root, falling back to defaults when absent.
    pub async fn discover(vault_root: &Path) -> Result<Self> {
        let path = vault_root.join(FILE_NAME);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!("Loading configuration from {}", path.display());
            Self::load(&path).await
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate().map_err(IndexError::Config)?;
        if self.indexing.batch_size == 0 {
            return Err(IndexError::Config(
                "indexing.batch_size must be greater than zero".into(),
            ));
        }
        if self.indexing.concurrency == 0 {
            return Err(IndexError::Config(
                "indexing.concurrency must be greater than zero".into(),
            ));
        }
        self.discovery.validate()?;
        self.embedding
            .validate()
            .map_err(|e| IndexError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn database_dir(&self, vault_root: &Path) -> PathBuf {
        match &self.store.database_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => vault_root.join(dir),
            None => vault_root.to_path_buf(),
        }
    }
}
