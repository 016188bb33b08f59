//! Persisted record of the last completed indexing run.
//!
//! The record is a single JSON document, replaced as a whole by writing a sibling
//! temporary file and renaming it over the target. `fileHashes` is written as a list
//! of `{path, hash}` pairs sorted by path so the file is byte-stable across runs.

use crate::error::{IndexError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

pub const VERSION_FILE_NAME: &str = ".vaultdex-version.json";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Revision the vault was at when every file was indexed. `None` after a partial run.
    pub last_indexed_revision: Option<String>,
    pub indexed_at: DateTime<Utc>,
    #[serde(with = "file_hash_list")]
    pub file_hashes: BTreeMap<String, String>,
    pub total_documents: usize,
    pub total_chunks: usize,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl VersionRecord {
    pub fn new(
        last_indexed_revision: Option<String>,
        file_hashes: BTreeMap<String, String>,
        total_chunks: usize,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_indexed_revision,
            indexed_at: Utc::now(),
            total_documents: file_hashes.len(),
            file_hashes,
            total_chunks,
        }
    }
}

mod file_hash_list {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct EntryRef<'a> {
        path: &'a str,
        hash: &'a str,
    }

    #[derive(Deserialize)]
    struct Entry {
        path: String,
        hash: String,
    }

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<String, String>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.iter().map(|(path, hash)| EntryRef { path, hash }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, String>, D::Error> {
        let mut map = BTreeMap::new();
        for Entry { path, hash } in Vec::<Entry>::deserialize(deserializer)? {
            if map.contains_key(&path) {
                return Err(D::Error::custom(format!("duplicate path in fileHashes: {path}")));
            }
            map.insert(path, hash);
        }
        Ok(map)
    }
}

pub struct VersionStore {
    path: PathBuf,
}

impl VersionStore {
    /// Store whose record lives in `dir` under [`VERSION_FILE_NAME`].
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(VERSION_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    /// Returns the stored record, or `None` when there is none or it cannot be used.
    /// A corrupt file is reported and then treated like a first run.
    pub async fn load(&self) -> Option<VersionRecord> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No version record at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Cannot read version record {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str::<VersionRecord>(&content) {
            Ok(record) if record.schema_version == SCHEMA_VERSION => Some(record),
            Ok(record) => {
                warn!(
                    "Version record {} has unsupported schema version {}, ignoring it",
                    self.path.display(),
                    record.schema_version
                );
                None
            }
            Err(e) => {
                warn!(
                    "Version record {} is corrupt, treating as first run: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    pub async fn save(&self, record: &VersionRecord) -> Result<()> {
        let persist_error = |reason: String| IndexError::VersionPersist {
            path: self.path.clone(),
            reason,
        };
        let json = serde_json::to_string_pretty(record).map_err(|e| persist_error(e.to_string()))?;

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(VERSION_FILE_NAME);
        let tmp = self
            .path
            .with_file_name(format!("{file_name}.{}.tmp", std::process::id()));

        let write = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(json.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp, &self.path).await
        };
        if let Err(e) = write.await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(persist_error(e.to_string()));
        }

        debug!(
            "Saved version record with {} files to {}",
            record.file_hashes.len(),
            self.path.display()
        );
        Ok(())
    }
}
