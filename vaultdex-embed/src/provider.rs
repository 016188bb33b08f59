//! Embedding provider implementations

use crate::config::{EmbedConfig, ProviderKind};
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, OnceLock};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text
    pub embeddings: Vec<Vec<f16>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new embedding result. The dimension is taken from the first
    /// vector, or 0 when there are none.
    pub fn new(embeddings: Vec<Vec<f16>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Prepare the provider (load models, validate settings). Must succeed before
    /// any embedding call.
    async fn initialize(&mut self) -> Result<()>;

    /// Generate embeddings for multiple texts, one vector per input in input order
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Generate embeddings for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f16>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::embedding_gen("no embedding generated for text"))
    }

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;
}

/// Builds the provider selected by `config` and initializes it.
pub async fn create_provider(config: &EmbedConfig) -> Result<Box<dyn EmbeddingProvider>> {
    config.validate()?;
    let mut provider: Box<dyn EmbeddingProvider> = match config.provider {
        ProviderKind::FastEmbed => Box::new(FastEmbedProvider::new(config.clone())),
        ProviderKind::Hashing => Box::new(HashingProvider::new(config.dimension)),
    };
    provider.initialize().await?;
    Ok(provider)
}

/// L2-normalizes a vector and converts it to half precision.
fn normalize_to_f16(embedding: &[f32]) -> Vec<f16> {
    let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
    embedding
        .iter()
        .map(|value| {
            if norm > 0.0 {
                f16::from_f32(value / norm)
            } else {
                f16::from_f32(*value)
            }
        })
        .collect()
}

const BUILTIN_MODELS: &[(&str, EmbeddingModel)] = &[
    ("all-minilm-l6-v2", EmbeddingModel::AllMiniLML6V2),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15),
    ("nomic-embed-text-v1.5", EmbeddingModel::NomicEmbedTextV15),
    ("snowflake-arctic-embed-xs", EmbeddingModel::SnowflakeArcticEmbedXS),
];

/// Resolves a configured model name to a built-in fastembed model.
pub fn builtin_model(name: &str) -> Result<EmbeddingModel> {
    let wanted = name.to_lowercase();
    BUILTIN_MODELS
        .iter()
        .find(|(known, _)| *known == wanted)
        .map(|(_, model)| model.clone())
        .ok_or_else(|| EmbedError::UnknownModel {
            name: name.to_string(),
            supported: BUILTIN_MODELS
                .iter()
                .map(|(known, _)| *known)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// Type alias for cached model entries (model, dimension)
type ModelCacheEntry = (Arc<Mutex<TextEmbedding>>, usize);

/// Global cache for initialized embedding models to avoid reloading
static MODEL_CACHE: OnceLock<Mutex<HashMap<String, ModelCacheEntry>>> = OnceLock::new();

fn get_model_cache() -> &'static Mutex<HashMap<String, ModelCacheEntry>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// FastEmbed-based embedding provider using local ONNX models
#[derive(Clone)]
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("model", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Creates a new uninitialized provider.
    pub fn new(config: EmbedConfig) -> Self {
        Self {
            config,
            model: None,
            dimension: 0,
        }
    }

    /// Creates and initializes a provider in one step.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self::new(config);
        provider.initialize().await?;
        Ok(provider)
    }

    /// Cache key covering everything that changes which model gets loaded
    fn create_cache_key(&self) -> String {
        let mut hasher = FnvHasher::default();
        hasher.write(self.config.model_name.to_lowercase().as_bytes());
        if let Some(cache_dir) = &self.config.cache_dir {
            hasher.write(cache_dir.to_string_lossy().as_bytes());
        }
        format!("v1:{:x}", hasher.finish())
    }

    /// Clears the global model cache.
    pub fn clear_cache() {
        if let Ok(mut cache) = get_model_cache().lock() {
            cache.clear();
            tracing::info!("Model cache cleared");
        }
    }

    /// Returns the number of cached models.
    pub fn cache_size() -> usize {
        get_model_cache().lock().map(|cache| cache.len()).unwrap_or(0)
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn initialize(&mut self) -> Result<()> {
        tracing::info!(
            "Initializing FastEmbed provider for model: {}",
            self.config.model_name()
        );
        let cache_key = self.create_cache_key();

        let cached = {
            let cache = get_model_cache()
                .lock()
                .map_err(|_| EmbedError::LockPoisoned)?;
            cache
                .get(&cache_key)
                .map(|(model, dim)| (Arc::clone(model), *dim))
        };
        if let Some((model, dimension)) = cached {
            tracing::info!("Using cached model for: {}", self.config.model_name());
            self.model = Some(model);
            self.dimension = dimension;
            return Ok(());
        }

        let builtin = builtin_model(&self.config.model_name)?;
        let config = self.config.clone();
        let (model, dimension) =
            tokio::task::spawn_blocking(move || -> Result<(TextEmbedding, usize)> {
                tracing::info!("Loading embedding model: {}", config.model_name());

                let mut init_options = InitOptions::new(builtin)
                    .with_show_download_progress(config.show_download_progress);
                if let Some(cache_dir) = &config.cache_dir {
                    init_options = init_options.with_cache_dir(cache_dir.clone());
                }

                let mut model = TextEmbedding::try_new(init_options).map_err(EmbedError::model_init)?;

                // Probe the output dimension and make sure the model produces finite values
                let probe = model
                    .embed(vec!["dimension probe".to_string()], None)
                    .map_err(EmbedError::model_init)?;
                let vector = probe
                    .first()
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| EmbedError::invalid_config("model produced an empty embedding"))?;
                if vector.iter().any(|value| !value.is_finite()) {
                    return Err(EmbedError::invalid_config(
                        "model produced non-finite values",
                    ));
                }

                tracing::info!("Model loaded successfully. Dimension: {}", vector.len());
                Ok((model, vector.len()))
            })
            .await??;

        let model = Arc::new(Mutex::new(model));
        get_model_cache()
            .lock()
            .map_err(|_| EmbedError::LockPoisoned)?
            .insert(cache_key, (Arc::clone(&model), dimension));

        self.model = Some(model);
        self.dimension = dimension;
        Ok(())
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        let model = self.model.as_ref().ok_or_else(|| EmbedError::NotInitialized {
            provider: self.provider_name().to_string(),
        })?;

        tracing::debug!("Generating embeddings for {} texts", texts.len());
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let batch = batch.to_vec();
            let model = Arc::clone(model);

            let batch_embeddings = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
                let mut guard = model.lock().map_err(|_| EmbedError::LockPoisoned)?;
                guard.embed(batch, None).map_err(EmbedError::embedding_gen)
            })
            .await??;

            all_embeddings.extend(batch_embeddings.iter().map(|e| normalize_to_f16(e)));
        }

        if all_embeddings.len() != texts.len() {
            return Err(EmbedError::embedding_gen(format!(
                "expected {} embeddings, model returned {}",
                texts.len(),
                all_embeddings.len()
            )));
        }
        Ok(EmbeddingResult::new(all_embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

/// Deterministic bag-of-words embeddings by feature hashing.
///
/// Each lowercased alphanumeric word is hashed with FNV into one of
/// `dimension` buckets with a hash-derived sign, and the result is
/// L2-normalized. Texts sharing words get similar vectors, which is enough for
/// offline search and for tests.
#[derive(Debug, Clone)]
pub struct HashingProvider {
    dimension: usize,
    initialized: bool,
}

impl HashingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            initialized: false,
        }
    }

    /// A ready-to-use provider; hashing has no setup beyond validating the dimension.
    pub fn initialized(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(EmbedError::invalid_config("dimension must be greater than zero"));
        }
        Ok(Self {
            dimension,
            initialized: true,
        })
    }

    fn embed_one(&self, text: &str) -> Vec<f16> {
        let mut buckets = vec![0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
        {
            let mut hasher = FnvHasher::default();
            hasher.write(word.to_lowercase().as_bytes());
            let hash = hasher.finish();
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            buckets[bucket] += sign;
        }
        normalize_to_f16(&buckets)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    async fn initialize(&mut self) -> Result<()> {
        if self.dimension == 0 {
            return Err(EmbedError::invalid_config("dimension must be greater than zero"));
        }
        self.initialized = true;
        Ok(())
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if !self.initialized {
            return Err(EmbedError::NotInitialized {
                provider: self.provider_name().to_string(),
            });
        }
        let embeddings = texts.iter().map(|text| self.embed_one(text)).collect();
        Ok(EmbeddingResult {
            embeddings,
            dimension: self.dimension,
        })
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hashing"
    }
}
