//! # vaultdex-embed
//!
//! Text embedding providers behind one async trait. Vectors are returned in
//! half precision (f16) and L2-normalized so cosine similarity is a dot product.
//!
//! ## Providers
//!
//! - [`FastEmbedProvider`]: local ONNX models through fastembed. Models are
//!   downloaded on first use and cached per process.
//! - [`HashingProvider`]: deterministic feature-hashing vectors that need no
//!   model files. Useful offline and in tests.
//!
//! ## Quick Start
//!
//! ```
//! use vaultdex_embed::{EmbedConfig, create_provider};
//!
//! # async fn example() -> vaultdex_embed::Result<()> {
//! let provider = create_provider(&EmbedConfig::hashing(128)).await?;
//!
//! let texts = vec!["Hello world".to_string(), "How are you?".to_string()];
//! let result = provider.embed_texts(&texts).await?;
//!
//! assert_eq!(result.len(), 2);
//! assert_eq!(result.dimension, 128);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] using the crate's [`EmbedError`] type.

pub mod config;
pub mod error;
pub mod provider;

// Re-export main types for easy access
pub use config::{EmbedConfig, ProviderKind};
pub use error::{EmbedError, Result};
pub use provider::{
    EmbeddingProvider, EmbeddingResult, FastEmbedProvider, HashingProvider, builtin_model,
    create_provider,
};
