//! Exact nearest-neighbour ranking over stored documents.
//!
//! Every document is scored against the query (O(N·D)), the ones at or above the
//! threshold are sorted by similarity and cut to `top_k`. No index structure; the
//! corpora this serves are hundreds to low thousands of chunks.

use std::cmp::Ordering;

use serde::Serialize;

use crate::store::EmbeddingDocument;
use crate::vector::{cosine_similarity, l2_norm};

/// Number of top scores reported in [`SearchDiagnostics`].
pub const DIAGNOSTIC_TOP_N: usize = 5;
const PREVIEW_CHARS: usize = 100;

/// A document copied out of the store together with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub document: EmbeddingDocument,
    pub similarity: f32,
}

/// Cosine similarity of `query` against every document, in store order.
pub fn score(query: &[f32], documents: &[EmbeddingDocument]) -> Vec<f32> {
    documents
        .iter()
        .map(|doc| cosine_similarity(query, &doc.embedding))
        .collect()
}

/// Keep documents scoring `>= threshold`, best first, at most `top_k` (0 = no limit).
/// Ties keep store order.
pub fn select(
    documents: &[EmbeddingDocument],
    scores: &[f32],
    top_k: usize,
    threshold: f32,
) -> Vec<SearchResult> {
    let mut kept: Vec<(usize, f32)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, s)| *s >= threshold)
        .collect();
    kept.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    if top_k > 0 {
        kept.truncate(top_k);
    }
    kept.into_iter()
        .map(|(i, similarity)| SearchResult {
            document: documents[i].clone(),
            similarity,
        })
        .collect()
}

/// Score and select in one step.
pub fn rank(
    query: &[f32],
    documents: &[EmbeddingDocument],
    top_k: usize,
    threshold: f32,
) -> Vec<SearchResult> {
    let scores = score(query, documents);
    select(documents, &scores, top_k, threshold)
}

/// Receives diagnostics for each search. Install one on the store to log or record them.
pub trait SearchObserver: Send + Sync {
    fn observe(&self, diagnostics: &SearchDiagnostics);
}

/// What a search saw, independent of the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchDiagnostics {
    pub query: String,
    pub query_dimension: usize,
    /// Should be ~1.0; anything else means the provider didn't normalize.
    pub query_norm: f32,
    /// Dimension of the first stored document.
    pub document_dimension: usize,
    /// Best [`DIAGNOSTIC_TOP_N`] scores over all documents.
    pub top: Vec<ScorePreview>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorePreview {
    pub id: String,
    pub similarity: f32,
    pub preview: String,
}

impl SearchDiagnostics {
    pub fn collect(
        query: &str,
        query_vec: &[f32],
        documents: &[EmbeddingDocument],
        scores: &[f32],
    ) -> Self {
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));
        let top = order
            .into_iter()
            .take(DIAGNOSTIC_TOP_N)
            .map(|i| ScorePreview {
                id: documents[i].id.clone(),
                similarity: scores[i],
                preview: preview(&documents[i].content),
            })
            .collect();
        Self {
            query: query.to_string(),
            query_dimension: query_vec.len(),
            query_norm: l2_norm(query_vec),
            document_dimension: documents.first().map_or(0, |d| d.embedding.len()),
            top,
        }
    }
}

fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

/// Writes diagnostics to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SearchObserver for TracingObserver {
    fn observe(&self, d: &SearchDiagnostics) {
        tracing::debug!(
            query = %d.query,
            query_dimension = d.query_dimension,
            document_dimension = d.document_dimension,
            query_norm = d.query_norm,
            "search"
        );
        for (rank, s) in d.top.iter().enumerate() {
            tracing::debug!(rank = rank + 1, id = %s.id, score = s.similarity, "{}", s.preview);
        }
    }
}
