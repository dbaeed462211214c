//! Indexer configuration.
//!
//! All tunables have defaults; only the codebase root is required. The
//! defaults below are also exported as constants so benchmarks and tests
//! stay consistent with production behavior.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Default maximum file size admitted by the scanner (1 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;

/// Default debounce window for watch mode, in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default incremental-update threshold: if more than this fraction of the
/// indexed documents changed, a full rebuild is cheaper than deltas.
pub const DEFAULT_REBUILD_THRESHOLD: f64 = 0.20;

/// Name of the data directory created under the codebase root.
pub const DATA_DIR_NAME: &str = ".codebase-search";

/// HNSW graph parameters.
///
/// `M` (bidirectional links per node) is fixed at 16 with 32 links at the
/// entry layer by the graph implementation; the remaining parameters are
/// runtime-tunable.
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Neighbor list size during construction. Higher improves recall at
    /// build-time cost.
    pub ef_construction: usize,
    /// Minimum neighbor list size during search. Queries use
    /// `max(2 * k, ef_search)`.
    pub ef_search: usize,
    /// Logical capacity. Reaching it (or accumulating logical deletes past
    /// 30% of it) triggers a compaction rebuild, which also grows capacity.
    pub max_elements: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            ef_construction: 200,
            ef_search: 50,
            max_elements: 10_000,
        }
    }
}

/// Result cache parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached query results.
    pub capacity: usize,
    /// Time-to-live per entry, in seconds.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            ttl_secs: 300,
        }
    }
}

/// Top-level configuration for [`CodebaseIndexer`](crate::CodebaseIndexer).
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Root directory of the codebase to index. Must exist.
    pub codebase_root: PathBuf,
    /// Files larger than this many bytes are skipped.
    pub max_file_size: u64,
    /// Extra ignore globs applied on top of `.gitignore` chains and the
    /// built-in rules.
    pub ignore_extra: Vec<String>,
    /// Name of the embedding provider to resolve from the registry. `None`
    /// disables semantic search.
    pub embedding_provider: Option<String>,
    /// HNSW graph parameters.
    pub hnsw: HnswConfig,
    /// Result cache parameters.
    pub cache: CacheConfig,
    /// Debounce window for watch mode, in milliseconds.
    pub debounce_ms: u64,
    /// Fraction of changed documents above which the lexical index is
    /// rebuilt from scratch instead of patched incrementally.
    pub rebuild_threshold: f64,
}

impl IndexerConfig {
    /// Creates a configuration with defaults for everything but the root.
    pub fn new(codebase_root: impl Into<PathBuf>) -> Self {
        Self {
            codebase_root: codebase_root.into(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            ignore_extra: Vec::new(),
            embedding_provider: None,
            hnsw: HnswConfig::default(),
            cache: CacheConfig::default(),
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            rebuild_threshold: DEFAULT_REBUILD_THRESHOLD,
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns [`Error::Config`] if the root does not exist or is not a
    /// directory, or if a numeric tunable is out of range.
    pub fn validate(&self) -> Result<()> {
        if !self.codebase_root.is_dir() {
            return Err(Error::Config(format!(
                "codebase root is not a directory: {}",
                self.codebase_root.display()
            )));
        }
        if self.max_file_size == 0 {
            return Err(Error::Config("max_file_size must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.rebuild_threshold) || self.rebuild_threshold == 0.0 {
            return Err(Error::Config(format!(
                "rebuild_threshold must be in (0, 1], got {}",
                self.rebuild_threshold
            )));
        }
        if self.cache.capacity == 0 {
            return Err(Error::Config("cache capacity must be positive".into()));
        }
        if self.hnsw.max_elements == 0 {
            return Err(Error::Config("hnsw max_elements must be positive".into()));
        }
        Ok(())
    }

    /// Directory holding all persistent artifacts.
    pub fn data_dir(&self) -> PathBuf {
        self.codebase_root.join(DATA_DIR_NAME)
    }

    /// Path of the relational store.
    pub fn index_db_path(&self) -> PathBuf {
        self.data_dir().join("index.db")
    }

    /// Path of the vector snapshot. The JSON sidecar lives next to it with a
    /// `.metadata.json` suffix.
    pub fn vector_snapshot_path(&self) -> PathBuf {
        self.data_dir().join("vectors.hnsw")
    }

    /// Sidecar path for a given snapshot path.
    pub fn sidecar_path(snapshot: &Path) -> PathBuf {
        let mut name = snapshot
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".metadata.json");
        snapshot.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = IndexerConfig::new("/tmp");
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert_eq!(config.debounce_ms, 500);
        assert!((config.rebuild_threshold - 0.20).abs() < f64::EPSILON);
        assert_eq!(config.hnsw.ef_construction, 200);
        assert_eq!(config.hnsw.ef_search, 50);
        assert_eq!(config.hnsw.max_elements, 10_000);
    }

    #[test]
    fn test_validate_missing_root() {
        let config = IndexerConfig::new("/definitely/not/a/real/path");
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "config");
    }

    #[test]
    fn test_validate_bad_threshold() {
        let tmp = TempDir::new().unwrap();
        let mut config = IndexerConfig::new(tmp.path());
        config.rebuild_threshold = 0.0;
        assert!(config.validate().is_err());
        config.rebuild_threshold = 1.5;
        assert!(config.validate().is_err());
        config.rebuild_threshold = 0.2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_paths() {
        let config = IndexerConfig::new("/repo");
        assert_eq!(
            config.index_db_path(),
            PathBuf::from("/repo/.codebase-search/index.db")
        );
        assert_eq!(
            config.vector_snapshot_path(),
            PathBuf::from("/repo/.codebase-search/vectors.hnsw")
        );
        assert_eq!(
            IndexerConfig::sidecar_path(&config.vector_snapshot_path()),
            PathBuf::from("/repo/.codebase-search/vectors.hnsw.metadata.json")
        );
    }
}
