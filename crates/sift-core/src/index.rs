//! Ingestion pipeline: text → chunks → embeddings → normalize → store.

use crate::chunks::{chunk_text, ChunkParams};
use crate::config::ConfigError;
use crate::sources::TextSource;
use crate::store::{EmbeddingDocument, EmbeddingStore, StoreError};
use crate::vector::normalize_in_place;

/// Chunks and embeds `source`, then appends one document per chunk.
/// Chunk ids are `{source.id}#{n}`. Returns the number of documents added.
///
/// All chunks are embedded in one batch call; nothing is added if it fails.
pub async fn index_source(
    store: &EmbeddingStore,
    source: &TextSource,
    params: ChunkParams,
) -> Result<usize, IndexError> {
    let chunks = chunk_text(&source.text, params)?;
    if chunks.is_empty() {
        return Ok(0);
    }

    let embeddings = store.embed_batch(&chunks).await?;
    if embeddings.len() != chunks.len() {
        return Err(IndexError::Misaligned {
            chunks: chunks.len(),
            embeddings: embeddings.len(),
        });
    }

    let docs: Vec<EmbeddingDocument> = chunks
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, (content, mut embedding))| {
            normalize_in_place(&mut embedding);
            EmbeddingDocument {
                id: format!("{}#{}", source.id, i),
                content,
                url: source.url.clone(),
                title: source.title.clone(),
                embedding,
                depth: source.depth,
            }
        })
        .collect();
    let added = docs.len();
    store.add_documents(docs).await;
    tracing::debug!(source = %source.id, chunks = added, "indexed source");
    Ok(added)
}

/// Runs [`index_source`] over every source in order. Stops at the first failure.
pub async fn index_sources(
    store: &EmbeddingStore,
    sources: &[TextSource],
    params: ChunkParams,
) -> Result<usize, IndexError> {
    params.validate()?;
    let mut total = 0;
    for source in sources {
        total += index_source(store, source, params).await?;
    }
    tracing::info!(sources = sources.len(), documents = total, "indexing finished");
    Ok(total)
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("provider returned {embeddings} embeddings for {chunks} chunks")]
    Misaligned { chunks: usize, embeddings: usize },
}
