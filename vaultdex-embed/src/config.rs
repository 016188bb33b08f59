//! Configuration for embedding providers

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local ONNX models through fastembed.
    #[default]
    FastEmbed,
    /// Deterministic feature hashing, no model files required.
    Hashing,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fastembed" => Ok(Self::FastEmbed),
            "hashing" => Ok(Self::Hashing),
            _ => Err(format!("Invalid embedding provider: {s}")),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FastEmbed => write!(f, "fastembed"),
            Self::Hashing => write!(f, "hashing"),
        }
    }
}

/// Settings shared by all embedding providers.
///
/// Every field has a default so a partial TOML table deserializes cleanly:
///
/// ```
/// use vaultdex_embed::{EmbedConfig, ProviderKind};
///
/// let config: EmbedConfig = serde_json::from_str(r#"{"provider": "hashing"}"#).unwrap();
/// assert_eq!(config.provider, ProviderKind::Hashing);
/// assert_eq!(config.dimension, 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    pub provider: ProviderKind,
    /// Built-in fastembed model name, e.g. `all-minilm-l6-v2`.
    pub model_name: String,
    /// Where fastembed keeps downloaded model files. Uses fastembed's default when unset.
    pub cache_dir: Option<PathBuf>,
    /// Texts per inference call.
    pub batch_size: usize,
    /// Output dimension of the hashing provider.
    pub dimension: usize,
    pub show_download_progress: bool,
}

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::FastEmbed,
            model_name: "all-minilm-l6-v2".to_string(),
            cache_dir: None,
            batch_size: 16,
            dimension: 256,
            show_download_progress: false,
        }
    }
}

impl EmbedConfig {
    /// Configuration for a built-in fastembed model.
    pub fn fastembed<S: Into<String>>(model_name: S) -> Self {
        Self {
            model_name: model_name.into(),
            ..Self::default()
        }
    }

    /// Configuration for the hashing provider with the given dimension.
    pub fn hashing(dimension: usize) -> Self {
        Self {
            provider: ProviderKind::Hashing,
            model_name: format!("hashing-{dimension}"),
            dimension,
            ..Self::default()
        }
    }

    pub fn with_cache_dir<P: Into<PathBuf>>(mut self, cache_dir: P) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EmbedError::invalid_config("batch_size must be greater than zero"));
        }
        if self.provider == ProviderKind::Hashing && self.dimension == 0 {
            return Err(EmbedError::invalid_config("dimension must be greater than zero"));
        }
        if self.provider == ProviderKind::FastEmbed && self.model_name.trim().is_empty() {
            return Err(EmbedError::invalid_config("model_name must not be empty"));
        }
        Ok(())
    }
}
