//! File-backed embedding store with cosine similarity search.
//!
//! All documents and the last-saved timestamp live in memory behind one
//! reader/writer lock and are written to a single JSON file on [`EmbeddingStore::save`].
//! Writes are plain overwrites: a crash mid-save can leave a truncated file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;

use crate::config::ConfigError;
use crate::provider::{EmbeddingProvider, ProviderError, SessionHandle};
use crate::search::{self, SearchDiagnostics, SearchObserver, SearchResult};

/// A chunk of text with its embedding and provenance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingDocument {
    /// Caller-assigned; the store does not enforce uniqueness.
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    /// Unit-length vector. All documents in a store should share one dimension.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub embedding: Vec<f32>,
    /// Crawl distance from the seed page; opaque to the store.
    #[serde(default)]
    pub depth: i32,
}

/// On-disk layout. Field names match existing store files.
#[derive(Debug, Default, Deserialize)]
struct StoreFile {
    #[serde(default, deserialize_with = "null_as_empty")]
    documents: Vec<EmbeddingDocument>,
    #[serde(default)]
    last_updated: String,
}

/// Older store files write empty lists as `null`.
fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    documents: &'a [EmbeddingDocument],
    last_updated: &'a str,
}

#[derive(Default)]
struct State {
    documents: Vec<EmbeddingDocument>,
    /// RFC 3339; empty means never saved.
    last_updated: String,
    provider: Option<Arc<dyn EmbeddingProvider>>,
}

/// Embedding documents in memory, persisted to one file.
///
/// Safe to share between tasks (`Arc<EmbeddingStore>`). Reads take the shared lock,
/// mutations the exclusive one. A search holds the shared lock for the whole scan.
pub struct EmbeddingStore {
    path: PathBuf,
    state: RwLock<State>,
    session: Option<Arc<dyn SessionHandle>>,
    observer: Option<Arc<dyn SearchObserver>>,
}

impl EmbeddingStore {
    /// Empty store backed by `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: RwLock::new(State::default()),
            session: None,
            observer: None,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.state.get_mut().provider = Some(provider);
        self
    }

    /// Hand the store a runtime session to release on [`destroy`](Self::destroy).
    pub fn with_session(mut self, session: Arc<dyn SessionHandle>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn SearchObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory state with the file's contents.
    /// A missing file is a cold start: the store is left empty.
    pub async fn load(&self) -> Result<(), PersistenceError> {
        let mut state = self.state.write().await;
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %self.path.display(), "embeddings file does not exist, starting fresh");
                return Ok(());
            }
            Err(e) => {
                return Err(PersistenceError::Read {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        let file: StoreFile =
            serde_json::from_slice(&data).map_err(|e| PersistenceError::Parse {
                path: self.path.clone(),
                source: e,
            })?;
        state.documents = file.documents;
        state.last_updated = file.last_updated;
        tracing::info!(count = state.documents.len(), path = %self.path.display(), "loaded embeddings");
        Ok(())
    }

    /// Stamp the current time and write the whole store to its file.
    pub async fn save(&self) -> Result<(), PersistenceError> {
        self.save_at(Utc::now()).await
    }

    /// [`save`](Self::save) with an explicit timestamp.
    pub async fn save_at(&self, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        let mut state = self.state.write().await;
        state.last_updated = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let data = serde_json::to_vec_pretty(&StoreFileRef {
            documents: &state.documents,
            last_updated: &state.last_updated,
        })?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| PersistenceError::Write {
                path: self.path.clone(),
                source: e,
            })?;
        tracing::info!(count = state.documents.len(), path = %self.path.display(), "saved embeddings");
        Ok(())
    }

    pub async fn add_document(&self, doc: EmbeddingDocument) {
        self.state.write().await.documents.push(doc);
    }

    /// Append several documents under one lock acquisition.
    pub async fn add_documents(&self, docs: Vec<EmbeddingDocument>) {
        self.state.write().await.documents.extend(docs);
    }

    /// Drop every document and forget the last save time.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.documents.clear();
        state.last_updated.clear();
        tracing::info!(path = %self.path.display(), "cleared embeddings");
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.documents.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.documents.is_empty()
    }

    /// Copy of all documents in insertion order.
    pub async fn documents(&self) -> Vec<EmbeddingDocument> {
        self.state.read().await.documents.clone()
    }

    /// RFC 3339 time of the last save, empty if never saved (or cleared since).
    pub async fn last_updated(&self) -> String {
        self.state.read().await.last_updated.clone()
    }

    /// True if never saved, the timestamp is unreadable, or the last save is older
    /// than `max_age_days`.
    pub async fn is_stale(&self, max_age_days: u32) -> bool {
        self.is_stale_at(max_age_days, Utc::now()).await
    }

    /// [`is_stale`](Self::is_stale) measured from `now`.
    pub async fn is_stale_at(&self, max_age_days: u32, now: DateTime<Utc>) -> bool {
        let state = self.state.read().await;
        if state.last_updated.is_empty() {
            return true;
        }
        let last = match DateTime::parse_from_rfc3339(&state.last_updated) {
            Ok(t) => t.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!(value = %state.last_updated, error = %e, "failed to parse last_updated timestamp");
                return true;
            }
        };
        now.signed_duration_since(last) > chrono::Duration::days(i64::from(max_age_days))
    }

    /// Swap the embedding backend. Waits for in-flight searches to finish.
    pub async fn set_provider(&self, provider: Arc<dyn EmbeddingProvider>) {
        self.state.write().await.provider = Some(provider);
    }

    /// Embed `text` with the active provider.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let provider = self.provider().await?;
        Ok(provider.embed(text).await?)
    }

    /// Embed `texts` with the active provider, index-aligned with the input.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, StoreError> {
        let provider = self.provider().await?;
        Ok(provider.embed_batch(texts).await?)
    }

    async fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>, ConfigError> {
        self.state
            .read()
            .await
            .provider
            .clone()
            .ok_or(ConfigError::NoProvider)
    }

    /// Documents most similar to `query`, best first.
    ///
    /// Only documents scoring `>= threshold` are returned, at most `top_k` of them
    /// (`0` means no limit). An empty store returns nothing without calling the provider.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let state = self.state.read().await;
        if state.documents.is_empty() {
            return Ok(Vec::new());
        }
        let provider = state.provider.as_ref().ok_or(ConfigError::NoProvider)?;
        let query_vec = provider.embed(query).await?;

        let Some(observer) = &self.observer else {
            return Ok(search::rank(&query_vec, &state.documents, top_k, threshold));
        };
        let scores = search::score(&query_vec, &state.documents);
        observer.observe(&SearchDiagnostics::collect(
            query,
            &query_vec,
            &state.documents,
            &scores,
        ));
        Ok(search::select(&state.documents, &scores, top_k, threshold))
    }

    /// Release the runtime session, if one was given. The store file is left alone.
    /// Safe to call more than once.
    pub fn destroy(&self) {
        if let Some(session) = &self.session {
            session.release();
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to serialize embeddings: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::vector::normalize;

    /// Returns a fixed vector per known text; unknown text is a provider error.
    struct FixedProvider {
        vectors: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl FixedProvider {
        fn new(pairs: &[(&str, Vec<f32>)]) -> Self {
            Self {
                vectors: pairs
                    .iter()
                    .map(|(t, v)| (t.to_string(), normalize(v)))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FixedProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.vectors
                .get(text)
                .cloned()
                .ok_or_else(|| ProviderError::Api(format!("no vector for {text:?}")))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            let mut out = Vec::with_capacity(texts.len());
            for t in texts {
                out.push(self.embed(t).await?);
            }
            Ok(out)
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<SearchDiagnostics>>);

    impl SearchObserver for Recorder {
        fn observe(&self, d: &SearchDiagnostics) {
            self.0.lock().unwrap().push(d.clone());
        }
    }

    #[derive(Default)]
    struct CountingSession(AtomicUsize);

    impl SessionHandle for CountingSession {
        fn release(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn is_released(&self) -> bool {
            self.0.load(Ordering::SeqCst) > 0
        }
    }

    fn doc(id: &str, embedding: Vec<f32>) -> EmbeddingDocument {
        EmbeddingDocument {
            id: id.to_string(),
            content: format!("content {id}"),
            url: format!("https://example.com/{id}"),
            title: id.to_uppercase(),
            embedding,
            depth: 1,
        }
    }

    fn at(sim: f32) -> Vec<f32> {
        vec![sim, (1.0 - sim * sim).sqrt()]
    }

    fn store_in(dir: &tempfile::TempDir) -> EmbeddingStore {
        EmbeddingStore::new(dir.path().join("embeddings.json"))
    }

    #[tokio::test]
    async fn load_missing_file_is_cold_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.load().await.unwrap();
        assert!(store.is_empty().await);
        assert_eq!(store.last_updated().await, "");
    }

    #[tokio::test]
    async fn load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(
            store.load().await,
            Err(PersistenceError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add_document(doc("a", vec![0.6, 0.8])).await;
        store.add_document(doc("b", vec![1.0, 0.0])).await;
        store.save().await.unwrap();

        let fresh = store_in(&dir);
        fresh.load().await.unwrap();
        assert_eq!(fresh.documents().await, store.documents().await);
        let ts = fresh.last_updated().await;
        assert!(DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[tokio::test]
    async fn file_uses_expected_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add_document(doc("a", vec![1.0])).await;
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        store.save_at(t).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
        assert_eq!(raw["last_updated"], "2024-05-01T12:00:00Z");
        let d = &raw["documents"][0];
        for key in ["id", "content", "url", "title", "embedding", "depth"] {
            assert!(d.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn load_accepts_sparse_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(
            store.path(),
            r#"{"documents":[{"id":"x","content":"hi","embedding":[1.0]}]}"#,
        )
        .unwrap();
        store.load().await.unwrap();
        let docs = store.documents().await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].url, "");
        assert_eq!(docs[0].depth, 0);
        assert!(store.is_stale(7).await);
    }

    #[tokio::test]
    async fn load_treats_null_lists_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{"documents":null,"last_updated":""}"#).unwrap();
        store.load().await.unwrap();
        assert!(store.is_empty().await);

        std::fs::write(
            store.path(),
            r#"{"documents":[{"id":"x","content":"hi","url":"","title":"","embedding":null,"depth":0}],"last_updated":""}"#,
        )
        .unwrap();
        store.load().await.unwrap();
        let docs = store.documents().await;
        assert_eq!(docs.len(), 1);
        assert!(docs[0].embedding.is_empty());
    }

    #[tokio::test]
    async fn staleness_follows_saves_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let saved = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        store.save_at(saved).await.unwrap();
        assert!(!store.is_stale_at(7, saved).await);
        assert!(!store.is_stale_at(7, saved + chrono::Duration::days(7)).await);
        assert!(
            store
                .is_stale_at(7, saved + chrono::Duration::days(7) + chrono::Duration::seconds(1))
                .await
        );

        store.clear().await;
        assert!(store.is_stale_at(7, saved).await);

        store.save().await.unwrap();
        assert!(!store.is_stale(7).await);
    }

    #[tokio::test]
    async fn unparsable_timestamp_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(store.path(), r#"{"documents":[],"last_updated":"yesterday"}"#).unwrap();
        store.load().await.unwrap();
        assert!(store.is_stale(365).await);
    }

    #[tokio::test]
    async fn search_ranks_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FixedProvider::new(&[("query", vec![1.0, 0.0])]));
        let store = store_in(&dir).with_provider(provider);
        store.add_document(doc("low", at(0.2))).await;
        store.add_document(doc("high", at(0.9))).await;
        store.add_document(doc("mid", at(0.5))).await;

        let res = store.search("query", 2, 0.3).await.unwrap();
        let ids: Vec<&str> = res.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "mid"]);
        assert!(res[0].similarity > res[1].similarity);
    }

    #[tokio::test]
    async fn empty_store_search_skips_provider() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(FixedProvider::new(&[]));
        let store = store_in(&dir).with_provider(provider.clone());
        assert!(store.search("anything", 5, 0.0).await.unwrap().is_empty());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).with_provider(Arc::new(FixedProvider::new(&[])));
        store.add_document(doc("a", vec![1.0, 0.0])).await;
        assert!(matches!(
            store.search("unknown", 5, 0.0).await,
            Err(StoreError::Provider(ProviderError::Api(_)))
        ));
    }

    #[tokio::test]
    async fn missing_provider_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.add_document(doc("a", vec![1.0, 0.0])).await;
        assert!(matches!(
            store.search("q", 5, 0.0).await,
            Err(StoreError::Config(ConfigError::NoProvider))
        ));
        assert!(matches!(
            store.embed("q").await,
            Err(StoreError::Config(ConfigError::NoProvider))
        ));
    }

    #[tokio::test]
    async fn set_provider_swaps_backend() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).with_provider(Arc::new(FixedProvider::new(&[("q", vec![1.0, 0.0])])));
        store.add_document(doc("x", vec![1.0, 0.0])).await;
        store.add_document(doc("y", vec![0.0, 1.0])).await;
        assert_eq!(store.search("q", 1, 0.0).await.unwrap()[0].document.id, "x");

        store
            .set_provider(Arc::new(FixedProvider::new(&[("q", vec![0.0, 1.0])])))
            .await;
        assert_eq!(store.search("q", 1, 0.0).await.unwrap()[0].document.id, "y");
    }

    #[tokio::test]
    async fn observer_sees_every_search() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let store = store_in(&dir)
            .with_provider(Arc::new(FixedProvider::new(&[("q", vec![1.0, 0.0])])))
            .with_observer(recorder.clone());
        store.add_document(doc("a", at(0.1))).await;
        store.add_document(doc("b", at(0.8))).await;

        let res = store.search("q", 5, 0.5).await.unwrap();
        assert_eq!(res.len(), 1);

        let seen = recorder.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].query, "q");
        // Diagnostics cover documents below the threshold too.
        assert_eq!(seen[0].top.len(), 2);
        assert_eq!(seen[0].top[0].id, "b");
    }

    #[tokio::test]
    async fn destroy_releases_session_and_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(CountingSession::default());
        let store = store_in(&dir).with_session(session.clone());
        store.add_document(doc("a", vec![1.0])).await;
        store.save().await.unwrap();

        store.destroy();
        assert!(session.is_released());
        assert!(store.path().exists());
        store.destroy();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_and_searches() {
        const WRITERS: usize = 64;
        const READERS: usize = 32;
        let dir = tempfile::tempdir().unwrap();
        let dim = 16;
        let q = normalize(&vec![1.0; dim]);
        let store = Arc::new(
            store_in(&dir).with_provider(Arc::new(FixedProvider::new(&[("q", q.clone())]))),
        );
        store.add_document(doc("seed", q.clone())).await;

        let mut handles = Vec::new();
        for i in 0..WRITERS {
            let store = Arc::clone(&store);
            let v = q.clone();
            handles.push(tokio::spawn(async move {
                store.add_document(doc(&format!("w{i}"), v)).await;
            }));
        }
        for _ in 0..READERS {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let res = store.search("q", 0, -1.0).await.unwrap();
                assert!(!res.is_empty());
                for r in res {
                    assert_eq!(r.document.embedding.len(), dim);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(store.len().await, WRITERS + 1);
    }
}
