//! # Lodestone
//!
//! Embedded codebase search engine. Given a rooted directory of source
//! files, it builds and maintains a persistent index answering free-text
//! queries with ranked file locations in three modes: lexical (TF-IDF over
//! code-aware tokens), semantic (approximate k-NN over dense embeddings),
//! and a weighted hybrid of the two. A filesystem watcher keeps the index
//! live; single-file changes are applied incrementally rather than by
//! rebuilding.
//!
//! ## Modules
//!
//! - [`indexer`] - orchestrator: pipeline, watch mode, single-flight, search
//! - [`search`] - TF-IDF core, HNSW vector index, hybrid fusion, result cache
//! - [`storage`] - SQLite-backed persistent store
//! - [`embedding`] - embedding provider trait, registry, mock, fallback
//! - [`scanner`] - file walking, ignore rules, hashing, change detection
//! - [`tokenizer`] - code-aware term extraction
//! - [`config`] - configuration types
//! - [`error`] - error taxonomy
//!
//! ## Example
//!
//! ```no_run
//! use lodestone::{CodebaseIndexer, IndexOptions, IndexerConfig, SearchOptions};
//!
//! # async fn run() -> lodestone::Result<()> {
//! let mut config = IndexerConfig::new("/path/to/repo");
//! config.embedding_provider = Some("mock".into());
//! let indexer = CodebaseIndexer::new(config)?;
//!
//! indexer.index(IndexOptions::default()).await?;
//! let results = indexer
//!     .search("user authentication", SearchOptions::default())
//!     .await?;
//! for result in results {
//!     println!("{:.3}  {}", result.score, result.path);
//! }
//! indexer.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod scanner;
pub mod search;
pub mod storage;
pub mod tokenizer;

pub use config::{CacheConfig, HnswConfig, IndexerConfig};
pub use embedding::{with_fallback, EmbeddingProvider, MockProvider, ProviderRegistry};
pub use error::{Error, Result};
pub use indexer::progress::{IndexStage, IndexingStatus, ProgressCallback, ProgressEvent};
pub use indexer::{CancelFlag, CodebaseIndexer, IndexOptions, IndexStats, IndexSummary};
pub use search::{
    CacheStats, Provenance, SearchFilter, SearchMode, SearchOptions, SearchResult,
};
