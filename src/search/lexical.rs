//! TF-IDF lexical ranking core.
//!
//! Maintains an inverted index (term -> document -> term frequency), a
//! per-document table (term frequencies, length, normalization factor), and
//! derives document frequency and IDF from the postings. Because IDF depends
//! on the total document count, IDF values are computed at query time from
//! `(N, df)` rather than stored; this keeps every mutation path trivially
//! consistent with a rebuild from scratch.
//!
//! IDF uses the smoothed form `ln((N + 1) / (df + 1)) + 1`. A document's
//! score for a query is `sum((tf / len) * idf) / norm`, where `norm` is the
//! L2 norm of the document's raw term-frequency vector. Scores are
//! non-negative; ties are broken by path ascending.

use crate::error::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Per-document state: the tokenized view of one file.
#[derive(Debug, Clone)]
struct DocEntry {
    tf: HashMap<String, u32>,
    length: u64,
    norm: f32,
}

impl DocEntry {
    fn new(tf: HashMap<String, u32>) -> Self {
        let length: u64 = tf.values().map(|&c| u64::from(c)).sum();
        let norm = (tf.values().map(|&c| (c as f32) * (c as f32)).sum::<f32>()).sqrt();
        Self { tf, length, norm }
    }
}

/// A scored lexical match.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub path: String,
    pub score: f32,
    /// Query terms that contributed to the score, in query order.
    pub matched_terms: Vec<String>,
}

/// In-memory TF-IDF engine over document term-frequency maps.
///
/// Not thread-safe by itself; the orchestrator serializes writers and lets
/// readers share it behind a readers-writer lock.
#[derive(Debug, Default)]
pub struct TfIdfEngine {
    /// term -> (path -> tf). The posting set size is the term's df.
    postings: HashMap<String, HashMap<String, u32>>,
    /// path -> document entry.
    docs: HashMap<String, DocEntry>,
}

impl TfIdfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an engine from a full document set in one pass. This is the
    /// full-rebuild path; its output is definitionally the reference for
    /// incremental equivalence.
    pub fn from_documents<I>(documents: I) -> Self
    where
        I: IntoIterator<Item = (String, HashMap<String, u32>)>,
    {
        let mut engine = Self::new();
        for (path, tf) in documents {
            // Duplicate paths cannot occur when building from a file map.
            let _ = engine.add_document(&path, tf);
        }
        engine
    }

    /// Number of indexed documents (N).
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.docs.contains_key(path)
    }

    /// Document frequency of a term, if indexed.
    pub fn document_frequency(&self, term: &str) -> Option<u32> {
        self.postings.get(term).map(|p| p.len() as u32)
    }

    /// Smoothed IDF of a term, if indexed.
    pub fn idf(&self, term: &str) -> Option<f32> {
        self.document_frequency(term)
            .map(|df| idf_value(self.docs.len(), df))
    }

    /// Iterates `(path, term-frequency map)` pairs.
    pub fn documents(&self) -> impl Iterator<Item = (&String, &HashMap<String, u32>)> {
        self.docs.iter().map(|(path, entry)| (path, &entry.tf))
    }

    /// Iterates `(term, df)` pairs.
    pub fn terms(&self) -> impl Iterator<Item = (&String, u32)> {
        self.postings
            .iter()
            .map(|(term, posting)| (term, posting.len() as u32))
    }

    /// Length and normalization factor of a document.
    pub fn doc_stats(&self, path: &str) -> Option<(u64, f32)> {
        self.docs.get(path).map(|d| (d.length, d.norm))
    }

    /// Adds a document, appending postings and updating document
    /// frequencies.
    ///
    /// Returns the set of terms whose postings changed (for point
    /// persistence).
    ///
    /// # Errors
    /// [`Error::DuplicateId`] if the path is already indexed.
    pub fn add_document(&mut self, path: &str, tf: HashMap<String, u32>) -> Result<HashSet<String>> {
        if self.docs.contains_key(path) {
            return Err(Error::DuplicateId(path.to_string()));
        }
        let mut changed = HashSet::with_capacity(tf.len());
        for (term, &count) in &tf {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(path.to_string(), count);
            changed.insert(term.clone());
        }
        self.docs.insert(path.to_string(), DocEntry::new(tf));
        Ok(changed)
    }

    /// Removes a document from every posting it appears in; terms whose df
    /// reaches zero are purged.
    ///
    /// Returns the set of terms whose postings changed. Removing an unknown
    /// path is a no-op.
    pub fn remove_document(&mut self, path: &str) -> HashSet<String> {
        let Some(entry) = self.docs.remove(path) else {
            return HashSet::new();
        };
        let mut changed = HashSet::with_capacity(entry.tf.len());
        for term in entry.tf.keys() {
            if let Some(posting) = self.postings.get_mut(term) {
                posting.remove(path);
                if posting.is_empty() {
                    self.postings.remove(term);
                }
            }
            changed.insert(term.clone());
        }
        changed
    }

    /// Replaces a document's term frequencies.
    ///
    /// Computed as a set-symmetric-difference over the old and new term
    /// sets so only terms whose posting actually changes are touched.
    /// Updating an unknown path behaves as an add.
    pub fn update_document(
        &mut self,
        path: &str,
        new_tf: HashMap<String, u32>,
    ) -> Result<HashSet<String>> {
        let Some(old) = self.docs.get(path) else {
            return self.add_document(path, new_tf);
        };
        let old_tf = old.tf.clone();
        let mut changed = HashSet::new();

        for (term, &old_count) in &old_tf {
            match new_tf.get(term) {
                Some(&new_count) if new_count == old_count => {}
                Some(&new_count) => {
                    // Count changed; df unchanged.
                    if let Some(posting) = self.postings.get_mut(term) {
                        posting.insert(path.to_string(), new_count);
                    }
                    changed.insert(term.clone());
                }
                None => {
                    if let Some(posting) = self.postings.get_mut(term) {
                        posting.remove(path);
                        if posting.is_empty() {
                            self.postings.remove(term);
                        }
                    }
                    changed.insert(term.clone());
                }
            }
        }
        for (term, &count) in &new_tf {
            if !old_tf.contains_key(term) {
                self.postings
                    .entry(term.clone())
                    .or_default()
                    .insert(path.to_string(), count);
                changed.insert(term.clone());
            }
        }

        self.docs.insert(path.to_string(), DocEntry::new(new_tf));
        Ok(changed)
    }

    /// Ranks documents for a term query.
    ///
    /// Query terms are deduplicated preserving order; terms absent from the
    /// index contribute zero. An empty query yields an empty result.
    pub fn search(
        &self,
        query_terms: &[String],
        limit: usize,
        min_score: f32,
        filter: Option<&dyn Fn(&str) -> bool>,
    ) -> Vec<LexicalHit> {
        if query_terms.is_empty() || limit == 0 || self.docs.is_empty() {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let unique_terms: Vec<&String> = query_terms
            .iter()
            .filter(|t| seen.insert(t.as_str()))
            .collect();

        let n = self.docs.len();
        let mut scores: HashMap<&str, (f32, Vec<String>)> = HashMap::new();
        for term in unique_terms {
            let Some(posting) = self.postings.get(term.as_str()) else {
                continue;
            };
            let idf = idf_value(n, posting.len() as u32);
            for (path, &tf) in posting {
                let doc = &self.docs[path.as_str()];
                let contribution = (tf as f32 / doc.length as f32) * idf;
                let slot = scores
                    .entry(path.as_str())
                    .or_insert_with(|| (0.0, Vec::new()));
                slot.0 += contribution;
                slot.1.push(term.clone());
            }
        }

        let mut hits: Vec<LexicalHit> = scores
            .into_iter()
            .filter(|(path, _)| filter.map_or(true, |f| f(path)))
            .map(|(path, (sum, matched_terms))| {
                let norm = self.docs[path].norm;
                LexicalHit {
                    path: path.to_string(),
                    score: sum / norm,
                    matched_terms,
                }
            })
            .filter(|hit| hit.score >= min_score)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.path.cmp(&b.path))
        });
        hits.truncate(limit);
        hits
    }
}

/// Smoothed IDF: `ln((N + 1) / (df + 1)) + 1`, natural log.
pub fn idf_value(n: usize, df: u32) -> f32 {
    ((n as f32 + 1.0) / (df as f32 + 1.0)).ln() + 1.0
}
