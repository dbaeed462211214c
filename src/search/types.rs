//! Shared search types: modes, filters, and the result envelope.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Which ranking subsystem(s) a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// TF-IDF over code-aware tokens.
    Lexical,
    /// k-NN over dense embeddings.
    Semantic,
    /// Weighted fusion of both.
    Hybrid,
}

impl Default for SearchMode {
    fn default() -> Self {
        SearchMode::Hybrid
    }
}

/// Which subsystem(s) produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Lexical,
    Vector,
    Hybrid,
}

/// Metadata predicate applied to candidates before ranking cutoffs.
///
/// Kept as data rather than a closure so it can participate in cache keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SearchFilter {
    /// Only match files with this language tag.
    pub language: Option<String>,
    /// Only match paths starting with this prefix.
    pub path_prefix: Option<String>,
}

impl SearchFilter {
    pub fn matches(&self, path: &str, language: Option<&str>) -> bool {
        if let Some(want) = &self.language {
            if language != Some(want.as_str()) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}

/// Options for [`CodebaseIndexer::search`](crate::CodebaseIndexer::search).
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum results returned.
    pub limit: usize,
    pub mode: SearchMode,
    /// Weight of the vector stream in hybrid fusion, in `[0, 1]`.
    pub vector_weight: f32,
    /// Results scoring below this are dropped.
    pub min_score: f32,
    /// Attach content previews to results.
    pub include_content: bool,
    pub filter: Option<SearchFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            mode: SearchMode::Hybrid,
            vector_weight: 0.7,
            min_score: 0.01,
            include_content: false,
            filter: None,
        }
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Path relative to the codebase root.
    pub path: String,
    /// Final relevance score. Raw TF-IDF or similarity in single-stream
    /// modes; normalized fused score in hybrid mode.
    pub score: f32,
    pub provenance: Provenance,
    /// Query terms that matched, for lexical and hybrid results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_terms: Option<Vec<String>>,
    /// Cosine similarity, for vector and hybrid results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Checks an embedding length against the configured dimensions.
pub fn validate_dimension(expected: usize, actual: usize) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_dimension() {
        assert!(validate_dimension(3, 3).is_ok());
        let err = validate_dimension(3, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_filter_language() {
        let filter = SearchFilter {
            language: Some("rust".into()),
            path_prefix: None,
        };
        assert!(filter.matches("src/lib.rs", Some("rust")));
        assert!(!filter.matches("src/app.ts", Some("typescript")));
        assert!(!filter.matches("LICENSE", None));
    }

    #[test]
    fn test_filter_path_prefix() {
        let filter = SearchFilter {
            language: None,
            path_prefix: Some("src/".into()),
        };
        assert!(filter.matches("src/lib.rs", None));
        assert!(!filter.matches("tests/lib.rs", None));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = SearchFilter::default();
        assert!(filter.matches("anything", None));
    }

    #[test]
    fn test_default_options() {
        let opts = SearchOptions::default();
        assert_eq!(opts.limit, 10);
        assert_eq!(opts.mode, SearchMode::Hybrid);
        assert!((opts.vector_weight - 0.7).abs() < f32::EPSILON);
        assert!((opts.min_score - 0.01).abs() < f32::EPSILON);
    }
}
