//! Incremental application of document changes to the lexical engine.
//!
//! Small change batches are applied as deltas; once a batch touches more
//! than `rebuild_threshold` of the indexed documents (or the index is
//! empty), rebuilding from scratch is both cheaper and simpler. Either path
//! must produce an engine whose search output is identical to a full rebuild
//! over the final document set.

use crate::error::Result;
use crate::search::lexical::TfIdfEngine;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// How a batch of changes should be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStrategy {
    /// Apply each change as a delta against the live engine.
    Incremental,
    /// Rebuild the engine from the full final document set.
    FullRebuild,
}

/// One pending document mutation.
#[derive(Debug, Clone)]
pub enum DocumentChange {
    Add {
        path: String,
        tf: HashMap<String, u32>,
    },
    Update {
        path: String,
        tf: HashMap<String, u32>,
    },
    Remove {
        path: String,
    },
}

impl DocumentChange {
    pub fn path(&self) -> &str {
        match self {
            DocumentChange::Add { path, .. }
            | DocumentChange::Update { path, .. }
            | DocumentChange::Remove { path } => path,
        }
    }
}

/// Decides between delta application and a full rebuild.
pub fn plan(change_count: usize, doc_count: usize, rebuild_threshold: f64) -> IndexStrategy {
    if doc_count == 0 {
        return IndexStrategy::FullRebuild;
    }
    let ratio = change_count as f64 / doc_count as f64;
    if ratio > rebuild_threshold {
        debug!(
            "change ratio {ratio:.2} exceeds threshold {rebuild_threshold:.2}, rebuilding"
        );
        IndexStrategy::FullRebuild
    } else {
        IndexStrategy::Incremental
    }
}

/// Applies a change batch to the engine one delta at a time.
///
/// Returns the union of terms whose postings changed, for point persistence
/// of the affected rows.
pub fn apply(engine: &mut TfIdfEngine, changes: Vec<DocumentChange>) -> Result<HashSet<String>> {
    let mut touched = HashSet::new();
    for change in changes {
        let changed = match change {
            DocumentChange::Add { path, tf } => engine.add_document(&path, tf)?,
            DocumentChange::Update { path, tf } => engine.update_document(&path, tf)?,
            DocumentChange::Remove { path } => engine.remove_document(&path),
        };
        touched.extend(changed);
    }
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tf(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs.iter().map(|(t, c)| (t.to_string(), *c)).collect()
    }

    #[test]
    fn test_plan_empty_index_rebuilds() {
        assert_eq!(plan(5, 0, 0.2), IndexStrategy::FullRebuild);
    }

    #[test]
    fn test_plan_threshold_boundary() {
        // Exactly at the threshold stays incremental; above it rebuilds.
        assert_eq!(plan(20, 100, 0.2), IndexStrategy::Incremental);
        assert_eq!(plan(21, 100, 0.2), IndexStrategy::FullRebuild);
        assert_eq!(plan(1, 100, 0.2), IndexStrategy::Incremental);
    }

    #[test]
    fn test_apply_collects_touched_terms() {
        let mut engine = TfIdfEngine::new();
        engine
            .add_document("old.rs", tf(&[("alpha", 1), ("beta", 1)]))
            .unwrap();

        let touched = apply(
            &mut engine,
            vec![
                DocumentChange::Add {
                    path: "new.rs".into(),
                    tf: tf(&[("gamma", 2)]),
                },
                DocumentChange::Update {
                    path: "old.rs".into(),
                    tf: tf(&[("alpha", 1), ("delta", 1)]),
                },
            ],
        )
        .unwrap();

        assert!(touched.contains("gamma"));
        assert!(touched.contains("beta"));
        assert!(touched.contains("delta"));
        assert!(!touched.contains("alpha"));
    }

    #[test]
    fn test_apply_matches_rebuild() {
        let mut engine = TfIdfEngine::new();
        for i in 0..10 {
            engine
                .add_document(&format!("f{i}.rs"), tf(&[("stable", 1), ("alpha", i + 1)]))
                .unwrap();
        }

        apply(
            &mut engine,
            vec![
                DocumentChange::Remove {
                    path: "f3.rs".into(),
                },
                DocumentChange::Update {
                    path: "f5.rs".into(),
                    tf: tf(&[("stable", 2), ("fresh", 1)]),
                },
                DocumentChange::Add {
                    path: "f10.rs".into(),
                    tf: tf(&[("fresh", 3)]),
                },
            ],
        )
        .unwrap();

        let rebuilt = TfIdfEngine::from_documents(
            engine
                .documents()
                .map(|(path, tf)| (path.clone(), tf.clone()))
                .collect::<Vec<_>>(),
        );

        let probe = vec!["stable".into(), "alpha".into(), "fresh".into()];
        let a = engine.search(&probe, 20, 0.0, None);
        let b = rebuilt.search(&probe, 20, 0.0, None);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.path, y.path);
            assert!((x.score - y.score).abs() < 1e-6);
        }
    }

    #[test]
    fn test_remove_then_add_same_path() {
        let mut engine = TfIdfEngine::new();
        engine.add_document("a.rs", tf(&[("alpha", 1)])).unwrap();
        apply(
            &mut engine,
            vec![
                DocumentChange::Remove { path: "a.rs".into() },
                DocumentChange::Add {
                    path: "a.rs".into(),
                    tf: tf(&[("beta", 1)]),
                },
            ],
        )
        .unwrap();
        assert_eq!(engine.doc_count(), 1);
        assert_eq!(engine.document_frequency("alpha"), None);
        assert_eq!(engine.document_frequency("beta"), Some(1));
    }
}
