//! On-device embeddings through fastembed's ONNX pipeline.
//!
//! [`ModelSession`] owns the loaded model and the native runtime behind it. It is
//! created once, shared by [`LocalProvider`] and released explicitly through
//! [`SessionHandle::release`] (or when the last reference drops).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use fastembed::{InitOptions, TextEmbedding};

use super::{finish_batch, finish_one, EmbeddingProvider, ProviderError, SessionHandle};

/// Default local model: small, 384 dimensions, normalized output.
pub const DEFAULT_LOCAL_MODEL: &str = "bge-small-en-v1.5";

/// A loaded local embedding model. `embed` needs `&mut`, hence the mutex.
pub struct ModelSession {
    model: Mutex<Option<TextEmbedding>>,
    model_name: String,
}

impl ModelSession {
    /// Load (downloading on first use) `model_name`, caching files under `cache_dir`.
    pub fn open(model_name: &str, cache_dir: PathBuf) -> Result<Self, ProviderError> {
        let model_enum = parse_model_name(model_name)?;
        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            ProviderError::Runtime(format!("failed to create model cache directory: {e}"))
        })?;
        let options = InitOptions::new(model_enum)
            .with_cache_dir(cache_dir)
            .with_show_download_progress(false);
        let model =
            TextEmbedding::try_new(options).map_err(|e| ProviderError::Runtime(e.to_string()))?;
        tracing::info!(model = model_name, "loaded local embedding model");
        Ok(Self {
            model: Mutex::new(Some(model)),
            model_name: model_name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.model_name
    }

    /// Runs inference. Blocking; call from a blocking-friendly thread.
    fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut guard = self
            .model
            .lock()
            .map_err(|e| ProviderError::Runtime(format!("model lock poisoned: {e}")))?;
        let model = guard.as_mut().ok_or(ProviderError::Released)?;
        model
            .embed(texts, None)
            .map_err(|e| ProviderError::Runtime(e.to_string()))
    }
}

impl SessionHandle for ModelSession {
    fn release(&self) {
        let Ok(mut guard) = self.model.lock() else {
            return;
        };
        if guard.take().is_some() {
            tracing::info!(model = %self.model_name, "released local embedding model");
        }
    }

    fn is_released(&self) -> bool {
        self.model.lock().map(|g| g.is_none()).unwrap_or(true)
    }
}

/// [`EmbeddingProvider`] backed by a [`ModelSession`].
#[derive(Clone)]
pub struct LocalProvider {
    session: Arc<ModelSession>,
}

impl LocalProvider {
    pub fn new(session: Arc<ModelSession>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let session = Arc::clone(&self.session);
        let texts = vec![text.to_string()];
        let out = tokio::task::spawn_blocking(move || session.embed(texts)).await??;
        finish_one(out.into_iter().next().unwrap_or_default())
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let session = Arc::clone(&self.session);
        let owned = texts.to_vec();
        let out = tokio::task::spawn_blocking(move || session.embed(owned)).await??;
        finish_batch(out, texts.len())
    }
}

fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, ProviderError> {
    use fastembed::EmbeddingModel as M;
    match name.to_lowercase().as_str() {
        "all-minilm-l6-v2" => Ok(M::AllMiniLML6V2),
        "all-minilm-l6-v2-q" => Ok(M::AllMiniLML6V2Q),
        "bge-small-en-v1.5" => Ok(M::BGESmallENV15),
        "bge-small-en-v1.5-q" => Ok(M::BGESmallENV15Q),
        "bge-base-en-v1.5" => Ok(M::BGEBaseENV15),
        "bge-base-en-v1.5-q" => Ok(M::BGEBaseENV15Q),
        "bge-large-en-v1.5" => Ok(M::BGELargeENV15),
        "bge-large-en-v1.5-q" => Ok(M::BGELargeENV15Q),
        _ => Err(ProviderError::UnknownModel(name.to_string())),
    }
}
