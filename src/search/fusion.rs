//! Weighted fusion of lexical and vector result streams.
//!
//! Each stream is normalized to `[0, 1]` by its own maximum score, then
//! merged by path: a result present only in the lexical stream contributes
//! `(1 - w) * norm`, only in the vector stream `w * norm`, and one present
//! in both contributes both terms and is tagged `hybrid`. If one stream is
//! empty the other passes through with its own provenance and raw scores.

use crate::search::types::{Provenance, SearchResult};
use std::collections::HashMap;

/// Guard against division by a zero maximum.
const SCORE_EPSILON: f32 = 1e-9;

/// Fuses the two streams under vector weight `w`, applies `min_score`, and
/// returns the top `limit` results sorted by score descending (ties by path
/// ascending).
pub fn fuse(
    lexical: Vec<SearchResult>,
    vector: Vec<SearchResult>,
    weight: f32,
    min_score: f32,
    limit: usize,
) -> Vec<SearchResult> {
    if lexical.is_empty() && vector.is_empty() {
        return Vec::new();
    }
    // One stream empty: the other passes through untouched.
    if vector.is_empty() {
        return cut(lexical, min_score, limit);
    }
    if lexical.is_empty() {
        return cut(vector, min_score, limit);
    }

    let weight = weight.clamp(0.0, 1.0);
    let lexical_max = max_score(&lexical).max(SCORE_EPSILON);
    let vector_max = max_score(&vector).max(SCORE_EPSILON);

    let mut merged: HashMap<String, SearchResult> = HashMap::new();
    for mut result in lexical {
        result.score = (1.0 - weight) * (result.score / lexical_max);
        merged.insert(result.path.clone(), result);
    }
    for result in vector {
        let contribution = weight * (result.score / vector_max);
        match merged.get_mut(&result.path) {
            Some(existing) => {
                existing.score += contribution;
                existing.provenance = Provenance::Hybrid;
                existing.similarity = result.similarity;
                if existing.content_preview.is_none() {
                    existing.content_preview = result.content_preview;
                }
                if existing.language.is_none() {
                    existing.language = result.language;
                }
            }
            None => {
                let mut fresh = result;
                fresh.score = contribution;
                merged.insert(fresh.path.clone(), fresh);
            }
        }
    }

    cut(merged.into_values().collect(), min_score, limit)
}

fn max_score(results: &[SearchResult]) -> f32 {
    results.iter().map(|r| r.score).fold(0.0, f32::max)
}

fn cut(mut results: Vec<SearchResult>, min_score: f32, limit: usize) -> Vec<SearchResult> {
    results.retain(|r| r.score >= min_score);
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.path.cmp(&b.path))
    });
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexical_result(path: &str, score: f32) -> SearchResult {
        SearchResult {
            path: path.into(),
            score,
            provenance: Provenance::Lexical,
            matched_terms: Some(vec!["term".into()]),
            similarity: None,
            content_preview: None,
            language: None,
        }
    }

    fn vector_result(path: &str, score: f32) -> SearchResult {
        SearchResult {
            path: path.into(),
            score,
            provenance: Provenance::Vector,
            matched_terms: None,
            similarity: Some(score),
            content_preview: None,
            language: None,
        }
    }

    #[test]
    fn test_both_streams_merge_to_hybrid() {
        let fused = fuse(
            vec![lexical_result("both.rs", 2.0), lexical_result("lex.rs", 1.0)],
            vec![vector_result("both.rs", 0.9), vector_result("vec.rs", 0.8)],
            0.5,
            0.0,
            10,
        );
        assert_eq!(fused.len(), 3);
        let both = fused.iter().find(|r| r.path == "both.rs").unwrap();
        assert_eq!(both.provenance, Provenance::Hybrid);
        // Normalized max in both streams: 0.5 * 1.0 + 0.5 * 1.0.
        assert!((both.score - 1.0).abs() < 1e-6);
        assert!(both.matched_terms.is_some());
        assert!(both.similarity.is_some());
        assert_eq!(fused[0].path, "both.rs");
    }

    #[test]
    fn test_single_stream_provenance_kept() {
        let fused = fuse(
            vec![lexical_result("lex.rs", 1.0)],
            vec![vector_result("vec.rs", 0.5)],
            0.7,
            0.0,
            10,
        );
        let lex = fused.iter().find(|r| r.path == "lex.rs").unwrap();
        let vec_hit = fused.iter().find(|r| r.path == "vec.rs").unwrap();
        assert_eq!(lex.provenance, Provenance::Lexical);
        assert!((lex.score - 0.3).abs() < 1e-6);
        assert_eq!(vec_hit.provenance, Provenance::Vector);
        assert!((vec_hit.score - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_empty_vector_stream_passes_lexical_through() {
        let fused = fuse(
            vec![lexical_result("a.rs", 2.0), lexical_result("b.rs", 1.0)],
            vec![],
            0.7,
            0.0,
            10,
        );
        assert_eq!(fused.len(), 2);
        // Raw scores, no normalization.
        assert!((fused[0].score - 2.0).abs() < 1e-6);
        assert_eq!(fused[0].provenance, Provenance::Lexical);
    }

    #[test]
    fn test_empty_lexical_stream_passes_vector_through() {
        let fused = fuse(vec![], vec![vector_result("v.rs", 0.8)], 0.7, 0.0, 10);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 0.8).abs() < 1e-6);
        assert_eq!(fused[0].provenance, Provenance::Vector);
    }

    #[test]
    fn test_both_empty() {
        assert!(fuse(vec![], vec![], 0.5, 0.0, 10).is_empty());
    }

    #[test]
    fn test_weight_zero_zeroes_vector_only_results() {
        let fused = fuse(
            vec![lexical_result("lex.rs", 1.0)],
            vec![vector_result("vec.rs", 0.9)],
            0.0,
            0.01,
            10,
        );
        // The vector-only result contributes w * norm = 0 and is dropped by
        // min_score; the lexical result keeps full weight.
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].path, "lex.rs");
        assert!((fused[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_weight_one_zeroes_lexical_only_results() {
        let fused = fuse(
            vec![lexical_result("lex.rs", 1.0)],
            vec![vector_result("vec.rs", 0.9)],
            1.0,
            0.01,
            10,
        );
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].path, "vec.rs");
    }

    #[test]
    fn test_min_score_and_limit() {
        let fused = fuse(
            vec![
                lexical_result("a.rs", 1.0),
                lexical_result("b.rs", 0.5),
                lexical_result("c.rs", 0.01),
            ],
            vec![vector_result("a.rs", 0.9)],
            0.5,
            0.2,
            2,
        );
        assert!(fused.len() <= 2);
        assert!(fused.iter().all(|r| r.score >= 0.2));
        assert_eq!(fused[0].path, "a.rs");
    }

    #[test]
    fn test_tie_breaks_by_path() {
        let fused = fuse(
            vec![lexical_result("z.rs", 1.0), lexical_result("a.rs", 1.0)],
            vec![vector_result("z.rs", 0.5), vector_result("a.rs", 0.5)],
            0.5,
            0.0,
            10,
        );
        assert_eq!(fused[0].path, "a.rs");
        assert_eq!(fused[1].path, "z.rs");
    }

    #[test]
    fn test_scores_monotonically_non_increasing() {
        let fused = fuse(
            vec![
                lexical_result("a.rs", 3.0),
                lexical_result("b.rs", 2.0),
                lexical_result("c.rs", 1.0),
            ],
            vec![vector_result("b.rs", 0.9), vector_result("d.rs", 0.4)],
            0.6,
            0.0,
            10,
        );
        for pair in fused.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }
}
