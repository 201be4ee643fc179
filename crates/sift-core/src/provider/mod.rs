//! Embedding providers: anything that turns text into vectors.
//!
//! The store only ever sees [`EmbeddingProvider`]. Bundled backends:
//! - [`local`]: on-device ONNX model pipeline (fastembed), feature `local-model`
//! - [`openai`]: OpenAI-compatible `/embeddings` HTTP endpoint
//! - [`ollama`]: a local or remote Ollama server
//!
//! Every bundled backend returns unit-length vectors in input order.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{ProviderConfig, ProviderKind};

#[cfg(feature = "local-model")]
pub mod local;
pub mod ollama;
pub mod openai;

#[cfg(feature = "local-model")]
pub use local::{LocalProvider, ModelSession};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Converts text to embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single string.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    /// Embed many strings. The output is index-aligned with `texts`.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// A native runtime resource held by a provider, such as a loaded model session.
///
/// Owned by whoever built the provider and released explicitly. Releasing twice is a no-op.
pub trait SessionHandle: Send + Sync {
    fn release(&self);
    fn is_released(&self) -> bool;
}

/// A ready-to-use provider plus the session it runs on, if any.
pub struct Backend {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub session: Option<Arc<dyn SessionHandle>>,
}

/// Build the provider described by `config`.
///
/// `model_cache` is where the local backend keeps downloaded model files.
pub fn build_backend(
    config: &ProviderConfig,
    model_cache: Option<std::path::PathBuf>,
) -> Result<Backend, ProviderError> {
    let model = (!config.model.is_empty()).then_some(config.model.as_str());
    let base_url = (!config.base_url.is_empty()).then_some(config.base_url.as_str());
    match config.kind {
        #[cfg(feature = "local-model")]
        ProviderKind::Local => {
            let cache = model_cache.ok_or_else(|| {
                ProviderError::Runtime("no model cache directory available".to_string())
            })?;
            let session = Arc::new(ModelSession::open(
                model.unwrap_or(local::DEFAULT_LOCAL_MODEL),
                cache,
            )?);
            Ok(Backend {
                provider: Arc::new(LocalProvider::new(Arc::clone(&session))),
                session: Some(session),
            })
        }
        #[cfg(not(feature = "local-model"))]
        ProviderKind::Local => {
            let _ = model_cache;
            Err(ProviderError::Runtime(
                "built without the local-model feature".to_string(),
            ))
        }
        ProviderKind::OpenAi => {
            let api_key = std::env::var(&config.api_key_env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| ProviderError::MissingApiKey(config.api_key_env.clone()))?;
            let provider = OpenAiProvider::new(
                api_key,
                base_url.unwrap_or(openai::DEFAULT_BASE_URL),
                model.unwrap_or(openai::DEFAULT_OPENAI_MODEL),
                Duration::from_secs(config.timeout_secs),
                config.max_retries,
            )?;
            Ok(Backend {
                provider: Arc::new(provider),
                session: None,
            })
        }
        ProviderKind::Ollama => {
            let provider = OllamaProvider::from_url(base_url.unwrap_or(ollama::DEFAULT_BASE_URL))?
                .with_embed_model(model.unwrap_or(ollama::DEFAULT_EMBED_MODEL));
            Ok(Backend {
                provider: Arc::new(provider),
                session: None,
            })
        }
    }
}

/// Place `(index, vector)` pairs reported by a backend into input order.
/// Fails if any slot is missing, duplicated, or out of range.
pub fn restore_order(
    items: Vec<(usize, Vec<f32>)>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if items.len() != expected {
        return Err(ProviderError::CountMismatch {
            expected,
            got: items.len(),
        });
    }
    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];
    for (index, vector) in items {
        let Some(slot) = slots.get_mut(index) else {
            return Err(ProviderError::MissingIndex { index });
        };
        if slot.is_some() {
            return Err(ProviderError::MissingIndex { index });
        }
        *slot = Some(vector);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.ok_or(ProviderError::MissingIndex { index }))
        .collect()
}

/// Checks a batch result has one non-empty vector per input, then normalizes each.
pub(crate) fn finish_batch(
    vectors: Vec<Vec<f32>>,
    expected: usize,
) -> Result<Vec<Vec<f32>>, ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::CountMismatch {
            expected,
            got: vectors.len(),
        });
    }
    vectors.into_iter().map(finish_one).collect()
}

/// Rejects an empty vector, normalizes the rest.
pub(crate) fn finish_one(mut vector: Vec<f32>) -> Result<Vec<f32>, ProviderError> {
    if vector.is_empty() {
        return Err(ProviderError::EmptyEmbedding);
    }
    crate::vector::normalize_in_place(&mut vector);
    Ok(vector)
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("embedding request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Ollama request failed: {0}")]
    Ollama(#[from] ollama_rs::error::OllamaError),
    #[error("invalid provider URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("embedding API error: {0}")]
    Api(String),
    #[error("embedding API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed embedding response: {0}")]
    Malformed(String),
    #[error("empty embedding result")]
    EmptyEmbedding,
    #[error("expected {expected} embeddings, got {got}")]
    CountMismatch { expected: usize, got: usize },
    #[error("embedding for input {index} missing or duplicated")]
    MissingIndex { index: usize },
    #[error("local model error: {0}")]
    Runtime(String),
    #[error("model session has been released")]
    Released,
    #[error("API key not set (expected in ${0})")]
    MissingApiKey(String),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("embedding task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_order_sorts_by_index() {
        let items = vec![(2, vec![2.0]), (0, vec![0.0]), (1, vec![1.0])];
        let out = restore_order(items, 3).unwrap();
        assert_eq!(out, vec![vec![0.0], vec![1.0], vec![2.0]]);
    }

    #[test]
    fn restore_order_rejects_wrong_count() {
        let res = restore_order(vec![(0, vec![1.0])], 2);
        assert!(matches!(
            res,
            Err(ProviderError::CountMismatch { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn restore_order_rejects_duplicates_and_out_of_range() {
        let dup = restore_order(vec![(0, vec![1.0]), (0, vec![2.0])], 2);
        assert!(matches!(dup, Err(ProviderError::MissingIndex { index: 0 })));

        let oob = restore_order(vec![(0, vec![1.0]), (5, vec![2.0])], 2);
        assert!(matches!(oob, Err(ProviderError::MissingIndex { index: 5 })));
    }

    #[test]
    fn finish_batch_normalizes_and_checks() {
        let out = finish_batch(vec![vec![3.0, 4.0]], 1).unwrap();
        assert!((out[0][0] - 0.6).abs() < 1e-6);

        assert!(matches!(
            finish_batch(vec![vec![]], 1),
            Err(ProviderError::EmptyEmbedding)
        ));
        assert!(matches!(
            finish_batch(vec![vec![1.0]], 2),
            Err(ProviderError::CountMismatch { .. })
        ));
    }

    #[test]
    fn openai_without_key_fails() {
        let config = ProviderConfig {
            kind: ProviderKind::OpenAi,
            api_key_env: "SIFT_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..ProviderConfig::default()
        };
        let res = build_backend(&config, None);
        assert!(matches!(res, Err(ProviderError::MissingApiKey(_))));
    }

    #[test]
    fn ollama_backend_has_no_session() {
        let config = ProviderConfig {
            kind: ProviderKind::Ollama,
            ..ProviderConfig::default()
        };
        let backend = build_backend(&config, None).unwrap();
        assert!(backend.session.is_none());
    }
}
