//! Semantic document store: text chunks tagged with embedding vectors, persisted to
//! one JSON file and searched by exact cosine similarity.
//!
//! Data flow: text ([sources]) → [chunks] → [provider] embeddings → [vector] normalize
//! → [store]. Queries go through the active provider and are ranked by [search].
//! sift keeps its config and store file in its own app data directory (see [app_data]).

pub mod app_data;
pub mod chunks;
pub mod config;
pub mod index;
pub mod links;
pub mod provider;
pub mod search;
pub mod sources;
pub mod store;
pub mod vector;

pub use app_data::{app_data_dir, model_cache_dir};
pub use chunks::{chunk_text, ChunkParams, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP};
pub use config::{load_config, load_config_from, save_config, Config, ConfigError, ProviderKind};
pub use index::{index_source, index_sources, IndexError};
pub use links::extract_links;
pub use provider::{build_backend, Backend, EmbeddingProvider, ProviderError, SessionHandle};
pub use search::{SearchDiagnostics, SearchObserver, SearchResult, TracingObserver};
pub use sources::{read_source, scan_sources, SourceError, TextSource};
pub use store::{EmbeddingDocument, EmbeddingStore, PersistenceError, StoreError};
pub use vector::{cosine_similarity, normalize};
