//! Ollama embeddings. Wraps ollama-rs behind [`EmbeddingProvider`].

use async_trait::async_trait;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use ollama_rs::Ollama;

use super::{finish_batch, finish_one, EmbeddingProvider, ProviderError};

pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Thin wrapper around an Ollama server used for embeddings.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    inner: Ollama,
    embed_model: String,
}

impl OllamaProvider {
    /// Create from URL string. Default: http://localhost:11434.
    pub fn from_url(url: &str) -> Result<Self, ProviderError> {
        let inner = Ollama::try_new(url)?;
        Ok(Self {
            inner,
            embed_model: DEFAULT_EMBED_MODEL.to_string(),
        })
    }

    /// Set the embedding model (e.g. `nomic-embed-text`, `all-minilm`).
    pub fn with_embed_model(mut self, model: impl Into<String>) -> Self {
        self.embed_model = model.into();
        self
    }

    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Single(text.to_string()),
        );
        let res = self.inner.generate_embeddings(req).await?;
        let first = res.embeddings.into_iter().next().unwrap_or_default();
        finish_one(first)
    }

    /// Ollama answers in input order, so only the count needs checking.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let req = GenerateEmbeddingsRequest::new(
            self.embed_model.clone(),
            EmbeddingsInput::Multiple(texts.to_vec()),
        );
        let res = self.inner.generate_embeddings(req).await?;
        tracing::debug!(count = res.embeddings.len(), model = %self.embed_model, "ollama batch embedded");
        finish_batch(res.embeddings, texts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_nomic() {
        let p = OllamaProvider::from_url(DEFAULT_BASE_URL).unwrap();
        assert_eq!(p.embed_model(), "nomic-embed-text");
        let p = p.with_embed_model("all-minilm");
        assert_eq!(p.embed_model(), "all-minilm");
    }

    #[test]
    fn bad_url_is_rejected() {
        assert!(matches!(
            OllamaProvider::from_url("not a url"),
            Err(ProviderError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn empty_batch_skips_the_server() {
        // Port 9 is discard; nothing is contacted for an empty batch.
        let p = OllamaProvider::from_url("http://127.0.0.1:9").unwrap();
        assert!(p.embed_batch(&[]).await.unwrap().is_empty());
    }
}
