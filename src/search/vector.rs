//! HNSW vector index with logical deletes and persistent snapshots.
//!
//! The HNSW graph supports insertion and query but not removal, so deletion
//! is logical: deleted slots stay in the graph and are filtered out of
//! results. Once deletions pass 30% of capacity (or capacity runs out), the
//! orchestrator triggers [`compact`](VectorIndex::compact), which rebuilds a
//! fresh graph over only the live slots.
//!
//! A snapshot is two files: the slot-ordered vector table (raw little-endian
//! f32 with a small header) and a JSON sidecar holding the document map,
//! id <-> slot maps, the deleted set, the slot counter, and the dimensions.
//! Loading reinserts the slots in order; insertion is deterministic, so a
//! loaded index answers queries identically to the one that was saved.

use crate::config::{HnswConfig, IndexerConfig};
use crate::error::{Error, Result};
use crate::search::types::validate_dimension;
use hnsw::{Hnsw, Params, Searcher};
use serde::{Deserialize, Serialize};
use space::{Metric, Neighbor};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info, warn};

/// Minimum ef parameter for HNSW queries; queries use `max(2k, ef_search)`.
const MIN_EF_SEARCH: usize = 50;

/// Fraction of capacity that logical deletes may occupy before compaction.
const COMPACTION_RATIO: f64 = 0.30;

/// Magic bytes at the head of the vector table file.
const SNAPSHOT_MAGIC: &[u8; 4] = b"vsnp";

/// Vector table format version.
const SNAPSHOT_VERSION: u32 = 1;

/// Cosine distance scaled to u32, the unit the graph orders neighbors by.
///
/// Distance is `1 - cosine_similarity`, in `[0, 2]`, scaled to the full u32
/// range. Zero vectors are maximally distant from everything.
struct CosineDistance;

impl Metric<Box<[f32]>> for CosineDistance {
    type Unit = u32;

    fn distance(&self, a: &Box<[f32]>, b: &Box<[f32]>) -> u32 {
        let dot: f32 = a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum();
        let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = b.iter().map(|y| y * y).sum::<f32>().sqrt();

        if mag_a == 0.0 || mag_b == 0.0 {
            return u32::MAX;
        }

        let distance = 1.0 - dot / (mag_a * mag_b);
        (distance * (u32::MAX as f32 / 2.0)) as u32
    }
}

type Graph = Hnsw<CosineDistance, Box<[f32]>, rand::rngs::StdRng, 16, 32>;

/// Metadata snapshot stored alongside each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub language: Option<String>,
    /// Content preview, at most 500 characters.
    pub preview: String,
}

/// A scored vector match.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub path: String,
    /// Cosine similarity in `[0, 1]`.
    pub similarity: f32,
    pub metadata: VectorMetadata,
}

/// Sidecar document entry: logical id plus metadata.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDoc {
    id: String,
    metadata: VectorMetadata,
}

/// JSON sidecar written next to the vector table.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    documents: Vec<(u64, SnapshotDoc)>,
    #[serde(rename = "idToIndex")]
    id_to_index: Vec<(String, u64)>,
    #[serde(rename = "indexToId")]
    index_to_id: Vec<(u64, String)>,
    deleted: Vec<u64>,
    #[serde(rename = "nextId")]
    next_id: u64,
    dimensions: usize,
}

/// Approximate k-NN index over document embeddings.
pub struct VectorIndex {
    // NOTE: manual Debug impl below; Hnsw's Graph type doesn't derive Debug.
    graph: Graph,
    /// Slot-ordered vector table; the graph cannot enumerate its points.
    vectors: Vec<Box<[f32]>>,
    id_to_index: HashMap<String, u64>,
    index_to_id: HashMap<u64, String>,
    /// Live slots only; metadata for deleted slots is dropped.
    documents: HashMap<u64, VectorMetadata>,
    deleted: HashSet<u64>,
    next_slot: u64,
    dimensions: usize,
    capacity: usize,
    ef_construction: usize,
    ef_search: usize,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("dimensions", &self.dimensions)
            .field("capacity", &self.capacity)
            .field("len", &self.vectors.len())
            .finish()
    }
}

impl VectorIndex {
    pub fn new(dimensions: usize, config: &HnswConfig) -> Self {
        let graph = Graph::new_params(
            CosineDistance,
            Params::new().ef_construction(config.ef_construction),
        );
        Self {
            graph,
            vectors: Vec::new(),
            id_to_index: HashMap::new(),
            index_to_id: HashMap::new(),
            documents: HashMap::new(),
            deleted: HashSet::new(),
            next_slot: 0,
            dimensions,
            capacity: config.max_elements,
            ef_construction: config.ef_construction,
            ef_search: config.ef_search.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Total slots in the graph, including logically deleted ones.
    pub fn total_slots(&self) -> usize {
        self.vectors.len()
    }

    /// Number of live (searchable) documents.
    pub fn live_len(&self) -> usize {
        self.id_to_index.len()
    }

    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, path: &str) -> bool {
        self.id_to_index.contains_key(path)
    }

    /// Inserts a document embedding into the next free slot.
    ///
    /// # Errors
    /// [`Error::DimensionMismatch`] for wrong-length vectors,
    /// [`Error::DuplicateId`] if the id is already live.
    pub fn add(&mut self, path: &str, vector: Vec<f32>, metadata: VectorMetadata) -> Result<()> {
        validate_dimension(self.dimensions, vector.len())?;
        if self.id_to_index.contains_key(path) {
            return Err(Error::DuplicateId(path.to_string()));
        }

        let boxed = vector.into_boxed_slice();
        let mut searcher: Searcher<u32> = Searcher::default();
        let slot = self.graph.insert(boxed.clone(), &mut searcher) as u64;
        debug_assert_eq!(slot, self.next_slot);

        self.vectors.push(boxed);
        self.id_to_index.insert(path.to_string(), slot);
        self.index_to_id.insert(slot, path.to_string());
        self.documents.insert(slot, metadata);
        self.next_slot += 1;
        Ok(())
    }

    /// Replaces a document's embedding: the prior slot is logically deleted
    /// and a fresh slot is inserted. The old vector stays in the graph but
    /// never appears in results.
    pub fn update(&mut self, path: &str, vector: Vec<f32>, metadata: VectorMetadata) -> Result<()> {
        self.delete(path);
        self.add(path, vector, metadata)
    }

    /// Logically deletes a document. Returns whether it was present.
    pub fn delete(&mut self, path: &str) -> bool {
        let Some(slot) = self.id_to_index.remove(path) else {
            return false;
        };
        self.index_to_id.remove(&slot);
        self.documents.remove(&slot);
        self.deleted.insert(slot);
        true
    }

    /// Finds up to `k` nearest live documents.
    ///
    /// Asks the graph for `2k` neighbors, then drops deleted slots, results
    /// below `min_score`, and results rejected by `filter`.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        min_score: Option<f32>,
        filter: Option<&dyn Fn(&str, &VectorMetadata) -> bool>,
    ) -> Result<Vec<VectorHit>> {
        validate_dimension(self.dimensions, query.len())?;
        if k == 0 || self.vectors.is_empty() {
            return Ok(Vec::new());
        }

        let want = (k * 2).min(self.vectors.len());
        let mut neighbors = vec![
            Neighbor {
                index: !0,
                distance: !0,
            };
            want
        ];
        let ef = (k * 2).max(self.ef_search).max(MIN_EF_SEARCH);

        let query_box = query.to_vec().into_boxed_slice();
        let mut searcher: Searcher<u32> = Searcher::default();
        self.graph
            .nearest(&query_box, ef, &mut searcher, &mut neighbors);

        let mut hits = Vec::with_capacity(k);
        for neighbor in neighbors {
            if neighbor.index == !0 {
                continue;
            }
            let slot = neighbor.index as u64;
            if self.deleted.contains(&slot) {
                continue;
            }
            let Some(path) = self.index_to_id.get(&slot) else {
                continue;
            };
            let distance = (neighbor.distance as f32) / (u32::MAX as f32 / 2.0);
            let similarity = (1.0 - distance).clamp(0.0, 1.0);
            if min_score.is_some_and(|min| similarity < min) {
                continue;
            }
            let metadata = &self.documents[&slot];
            if let Some(f) = filter {
                if !f(path, metadata) {
                    continue;
                }
            }
            hits.push(VectorHit {
                path: path.clone(),
                similarity,
                metadata: metadata.clone(),
            });
            if hits.len() == k {
                break;
            }
        }
        Ok(hits)
    }

    /// Whether the deleted set or slot count calls for a rebuild.
    pub fn needs_compaction(&self) -> bool {
        let threshold = (self.capacity as f64 * COMPACTION_RATIO) as usize;
        self.deleted.len() > threshold || self.vectors.len() >= self.capacity
    }

    /// Rebuilds the graph over live slots only, renumbering them and
    /// clearing the deleted set. Grows capacity when the live set
    /// approaches it.
    ///
    /// Returns the number of live entries in the compacted index.
    pub fn compact(&mut self) -> usize {
        let live: Vec<(String, Box<[f32]>, VectorMetadata)> = {
            let mut entries: Vec<(u64, &String)> = self.index_to_id.iter().map(|(s, p)| (*s, p)).collect();
            entries.sort_by_key(|(slot, _)| *slot);
            entries
                .into_iter()
                .map(|(slot, path)| {
                    (
                        path.clone(),
                        self.vectors[slot as usize].clone(),
                        self.documents[&slot].clone(),
                    )
                })
                .collect()
        };

        let before = self.vectors.len();
        if live.len() * 4 >= self.capacity * 3 {
            self.capacity *= 2;
        }

        self.graph = Graph::new_params(
            CosineDistance,
            Params::new().ef_construction(self.ef_construction),
        );
        self.vectors.clear();
        self.id_to_index.clear();
        self.index_to_id.clear();
        self.documents.clear();
        self.deleted.clear();
        self.next_slot = 0;

        let mut searcher: Searcher<u32> = Searcher::default();
        for (path, vector, metadata) in live {
            let slot = self.graph.insert(vector.clone(), &mut searcher) as u64;
            self.vectors.push(vector);
            self.id_to_index.insert(path.clone(), slot);
            self.index_to_id.insert(slot, path);
            self.documents.insert(slot, metadata);
            self.next_slot = slot + 1;
        }

        info!(
            "compacted vector index: {} -> {} slots (capacity {})",
            before,
            self.vectors.len(),
            self.capacity
        );
        self.vectors.len()
    }

    /// Writes the snapshot (vector table + JSON sidecar), replacing any
    /// prior files atomically via temp-file + rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut table = Vec::with_capacity(16 + self.vectors.len() * self.dimensions * 4);
        table.extend_from_slice(SNAPSHOT_MAGIC);
        table.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
        table.extend_from_slice(&(self.vectors.len() as u32).to_le_bytes());
        table.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        for vector in &self.vectors {
            for value in vector.iter() {
                table.extend_from_slice(&value.to_le_bytes());
            }
        }

        let meta = SnapshotMeta {
            documents: {
                let mut docs: Vec<(u64, SnapshotDoc)> = self
                    .documents
                    .iter()
                    .map(|(&slot, metadata)| {
                        (
                            slot,
                            SnapshotDoc {
                                id: self.index_to_id[&slot].clone(),
                                metadata: metadata.clone(),
                            },
                        )
                    })
                    .collect();
                docs.sort_by_key(|(slot, _)| *slot);
                docs
            },
            id_to_index: {
                let mut pairs: Vec<(String, u64)> = self
                    .id_to_index
                    .iter()
                    .map(|(id, &slot)| (id.clone(), slot))
                    .collect();
                pairs.sort();
                pairs
            },
            index_to_id: {
                let mut pairs: Vec<(u64, String)> = self
                    .index_to_id
                    .iter()
                    .map(|(&slot, id)| (slot, id.clone()))
                    .collect();
                pairs.sort();
                pairs
            },
            deleted: {
                let mut slots: Vec<u64> = self.deleted.iter().copied().collect();
                slots.sort_unstable();
                slots
            },
            next_id: self.next_slot,
            dimensions: self.dimensions,
        };
        let sidecar_bytes = serde_json::to_vec(&meta)
            .map_err(|e| Error::Io(format!("serialize vector sidecar: {e}")))?;

        write_atomic(path, &table)?;
        write_atomic(&IndexerConfig::sidecar_path(path), &sidecar_bytes)?;
        debug!(
            "saved vector snapshot: {} slots ({} live) to {}",
            self.vectors.len(),
            self.live_len(),
            path.display()
        );
        Ok(())
    }

    /// Loads a snapshot, validating dimensions against the configured
    /// provider and reinserting slots in order.
    ///
    /// # Errors
    /// [`Error::IndexCorruption`] for malformed files,
    /// [`Error::DimensionMismatch`] when the snapshot disagrees with
    /// `expected_dimensions`.
    pub fn load(path: &Path, expected_dimensions: usize, config: &HnswConfig) -> Result<Self> {
        let table = std::fs::read(path)?;
        if table.len() < 16 || &table[0..4] != SNAPSHOT_MAGIC {
            return Err(Error::IndexCorruption(format!(
                "{}: bad vector table header",
                path.display()
            )));
        }
        let version = u32::from_le_bytes(table[4..8].try_into().unwrap_or_default());
        if version != SNAPSHOT_VERSION {
            return Err(Error::IndexCorruption(format!(
                "{}: unsupported vector table version {version}",
                path.display()
            )));
        }
        let count = u32::from_le_bytes(table[8..12].try_into().unwrap_or_default()) as usize;
        let dimensions = u32::from_le_bytes(table[12..16].try_into().unwrap_or_default()) as usize;
        if table.len() != 16 + count * dimensions * 4 {
            return Err(Error::IndexCorruption(format!(
                "{}: vector table length mismatch",
                path.display()
            )));
        }

        let sidecar_path = IndexerConfig::sidecar_path(path);
        let sidecar = std::fs::read(&sidecar_path)?;
        let meta: SnapshotMeta = serde_json::from_slice(&sidecar).map_err(|e| {
            Error::IndexCorruption(format!("{}: bad sidecar: {e}", sidecar_path.display()))
        })?;

        if meta.dimensions != dimensions {
            return Err(Error::IndexCorruption(format!(
                "{}: sidecar dimensions {} disagree with table {}",
                sidecar_path.display(),
                meta.dimensions,
                dimensions
            )));
        }
        validate_dimension(expected_dimensions, dimensions)?;
        if meta.next_id != count as u64 {
            return Err(Error::IndexCorruption(format!(
                "{}: slot counter {} disagrees with table count {}",
                sidecar_path.display(),
                meta.next_id,
                count
            )));
        }

        let mut index = Self::new(dimensions, config);
        // Capacity must cover the loaded slots even if the config shrank.
        index.capacity = config.max_elements.max(count);

        let mut searcher: Searcher<u32> = Searcher::default();
        for i in 0..count {
            let start = 16 + i * dimensions * 4;
            let mut vector = Vec::with_capacity(dimensions);
            for d in 0..dimensions {
                let offset = start + d * 4;
                vector.push(f32::from_le_bytes(
                    table[offset..offset + 4].try_into().unwrap_or_default(),
                ));
            }
            let boxed = vector.into_boxed_slice();
            let slot = index.graph.insert(boxed.clone(), &mut searcher) as u64;
            if slot != i as u64 {
                return Err(Error::IndexCorruption(format!(
                    "{}: slot renumbering during load",
                    path.display()
                )));
            }
            index.vectors.push(boxed);
        }
        index.next_slot = count as u64;
        index.deleted = meta.deleted.into_iter().collect();
        for (id, slot) in meta.id_to_index {
            index.id_to_index.insert(id, slot);
        }
        for (slot, id) in meta.index_to_id {
            index.index_to_id.insert(slot, id);
        }
        for (slot, doc) in meta.documents {
            index.documents.insert(slot, doc.metadata);
        }

        if index.id_to_index.len() != index.index_to_id.len() {
            return Err(Error::IndexCorruption(format!(
                "{}: id map sizes disagree",
                sidecar_path.display()
            )));
        }

        info!(
            "loaded vector snapshot: {} slots ({} live, {} deleted) from {}",
            count,
            index.live_len(),
            index.deleted.len(),
            path.display()
        );
        Ok(index)
    }
}

/// Writes `bytes` to `path` via a temp file in the same directory plus an
/// atomic rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)
            .map_err(|e| Error::Io(format!("{}: {e}", tmp.display())))?;
        file.write_all(bytes)
            .map_err(|e| Error::Io(format!("{}: {e}", tmp.display())))?;
        file.sync_all()
            .map_err(|e| Error::Io(format!("{}: {e}", tmp.display())))?;
    }
    std::fs::rename(&tmp, path).map_err(|e| {
        warn!("atomic rename failed for {}: {e}", path.display());
        Error::Io(format!("{}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(preview: &str) -> VectorMetadata {
        VectorMetadata {
            language: Some("rust".into()),
            preview: preview.into(),
        }
    }

    fn small_config() -> HnswConfig {
        HnswConfig {
            max_elements: 10,
            ..HnswConfig::default()
        }
    }

    #[test]
    fn test_add_and_search_orders_by_similarity() {
        let mut index = VectorIndex::new(3, &HnswConfig::default());
        index.add("a.rs", vec![1.0, 0.0, 0.0], meta("a")).unwrap();
        index.add("b.rs", vec![0.0, 1.0, 0.0], meta("b")).unwrap();
        index.add("c.rs", vec![0.9, 0.1, 0.0], meta("c")).unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 2, None, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "a.rs");
        assert_eq!(hits[1].path, "c.rs");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut index = VectorIndex::new(3, &HnswConfig::default());
        let err = index.add("a.rs", vec![1.0, 0.0], meta("a")).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 3, actual: 2 }));
        index.add("a.rs", vec![1.0, 0.0, 0.0], meta("a")).unwrap();
        let err = index.search(&[1.0], 1, None, None).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut index = VectorIndex::new(3, &HnswConfig::default());
        index.add("a.rs", vec![1.0, 0.0, 0.0], meta("a")).unwrap();
        let err = index.add("a.rs", vec![0.0, 1.0, 0.0], meta("a")).unwrap_err();
        assert!(matches!(err, Error::DuplicateId(_)));
    }

    #[test]
    fn test_delete_filters_results() {
        let mut index = VectorIndex::new(3, &HnswConfig::default());
        index.add("a.rs", vec![1.0, 0.0, 0.0], meta("a")).unwrap();
        index.add("b.rs", vec![0.9, 0.1, 0.0], meta("b")).unwrap();

        assert!(index.delete("a.rs"));
        assert!(!index.delete("a.rs"));

        let hits = index.search(&[1.0, 0.0, 0.0], 10, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "b.rs");
        // The slot is still physically present.
        assert_eq!(index.total_slots(), 2);
        assert_eq!(index.live_len(), 1);
    }

    #[test]
    fn test_update_excludes_old_vector() {
        let mut index = VectorIndex::new(3, &HnswConfig::default());
        index.add("a.rs", vec![1.0, 0.0, 0.0], meta("old")).unwrap();
        index
            .update("a.rs", vec![0.0, 1.0, 0.0], meta("new"))
            .unwrap();

        // Query matching the old embedding must not surface the document
        // with its old similarity.
        let hits = index.search(&[0.0, 1.0, 0.0], 10, None, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.rs");
        assert!(hits[0].similarity > 0.99);
        assert_eq!(hits[0].metadata.preview, "new");
        assert_eq!(index.total_slots(), 2);
        assert_eq!(index.deleted_count(), 1);
    }

    #[test]
    fn test_min_score_and_filter() {
        let mut index = VectorIndex::new(3, &HnswConfig::default());
        index.add("close.rs", vec![1.0, 0.0, 0.0], meta("c")).unwrap();
        index.add("far.rs", vec![0.0, 1.0, 0.0], meta("f")).unwrap();

        let hits = index
            .search(&[1.0, 0.0, 0.0], 10, Some(0.5), None)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "close.rs");

        let pred = |path: &str, _m: &VectorMetadata| path.starts_with("far");
        let hits = index
            .search(&[1.0, 0.0, 0.0], 10, None, Some(&pred))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "far.rs");
    }

    #[test]
    fn test_empty_index_search() {
        let index = VectorIndex::new(3, &HnswConfig::default());
        assert!(index.search(&[1.0, 0.0, 0.0], 5, None, None).unwrap().is_empty());
    }

    #[test]
    fn test_needs_compaction_thresholds() {
        let mut index = VectorIndex::new(3, &small_config());
        for i in 0..5 {
            index
                .add(&format!("f{i}.rs"), vec![i as f32, 1.0, 0.0], meta("x"))
                .unwrap();
        }
        assert!(!index.needs_compaction());
        // 30% of capacity 10 is 3; a fourth delete crosses it.
        for path in ["f0.rs", "f1.rs", "f2.rs"] {
            index.delete(path);
        }
        assert!(!index.needs_compaction());
        index.delete("f3.rs");
        assert!(index.needs_compaction());
    }

    #[test]
    fn test_capacity_exhaustion_triggers_compaction() {
        let mut index = VectorIndex::new(3, &small_config());
        for i in 0..10 {
            index
                .add(&format!("f{i}.rs"), vec![i as f32, 1.0, 0.0], meta("x"))
                .unwrap();
        }
        assert!(index.needs_compaction());
    }

    #[test]
    fn test_compact_renumbers_and_grows() {
        let mut index = VectorIndex::new(3, &small_config());
        for i in 0..10 {
            index
                .add(&format!("f{i}.rs"), vec![(i % 3) as f32, 1.0, 0.0], meta("x"))
                .unwrap();
        }
        for i in 0..4 {
            index.delete(&format!("f{i}.rs"));
        }

        let live = index.compact();
        assert_eq!(live, 6);
        assert_eq!(index.total_slots(), 6);
        assert_eq!(index.deleted_count(), 0);
        // 6 live of 10 is below three quarters; capacity is unchanged.
        assert_eq!(index.capacity(), 10);
        assert!(!index.needs_compaction());

        let hits = index.search(&[1.0, 1.0, 0.0], 10, None, None).unwrap();
        assert_eq!(hits.len(), 6);
        assert!(!hits.iter().any(|h| h.path == "f0.rs"));
    }

    #[test]
    fn test_compact_grows_capacity_when_near_full() {
        let mut index = VectorIndex::new(3, &small_config());
        for i in 0..10 {
            index
                .add(&format!("f{i}.rs"), vec![(i % 3) as f32, 1.0, 0.0], meta("x"))
                .unwrap();
        }
        index.delete("f0.rs");
        assert!(index.needs_compaction());

        let live = index.compact();
        assert_eq!(live, 9);
        assert_eq!(index.capacity(), 20);
        assert!(!index.needs_compaction());
    }

    #[test]
    fn test_save_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.hnsw");

        let mut index = VectorIndex::new(3, &HnswConfig::default());
        index.add("a.rs", vec![1.0, 0.0, 0.0], meta("a")).unwrap();
        index.add("b.rs", vec![0.0, 1.0, 0.0], meta("b")).unwrap();
        index.add("c.rs", vec![0.7, 0.7, 0.0], meta("c")).unwrap();
        index.delete("b.rs");
        index.save(&path).unwrap();
        assert!(path.exists());
        assert!(IndexerConfig::sidecar_path(&path).exists());

        let loaded = VectorIndex::load(&path, 3, &HnswConfig::default()).unwrap();
        assert_eq!(loaded.total_slots(), 3);
        assert_eq!(loaded.live_len(), 2);
        assert_eq!(loaded.deleted_count(), 1);

        let query = [1.0, 0.0, 0.0];
        let before = index.search(&query, 10, None, None).unwrap();
        let after = loaded.search(&query, 10, None, None).unwrap();
        assert_eq!(before.len(), after.len());
        for (x, y) in before.iter().zip(after.iter()) {
            assert_eq!(x.path, y.path);
            assert!((x.similarity - y.similarity).abs() < 1e-6);
            assert_eq!(x.metadata, y.metadata);
        }
    }

    #[test]
    fn test_load_rejects_wrong_dimensions() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.hnsw");
        let mut index = VectorIndex::new(3, &HnswConfig::default());
        index.add("a.rs", vec![1.0, 0.0, 0.0], meta("a")).unwrap();
        index.save(&path).unwrap();

        let err = VectorIndex::load(&path, 512, &HnswConfig::default()).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 512, actual: 3 }));
    }

    #[test]
    fn test_load_rejects_corrupt_table() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.hnsw");
        std::fs::write(&path, b"garbage").unwrap();
        let err = VectorIndex::load(&path, 3, &HnswConfig::default()).unwrap_err();
        assert!(matches!(err, Error::IndexCorruption(_)));
    }

    #[test]
    fn test_snapshot_shrinks_after_compaction() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vectors.hnsw");
        let mut index = VectorIndex::new(3, &small_config());
        for i in 0..10 {
            index
                .add(&format!("f{i}.rs"), vec![i as f32, 1.0, 0.0], meta("x"))
                .unwrap();
        }
        for i in 0..6 {
            index.delete(&format!("f{i}.rs"));
        }
        index.save(&path).unwrap();
        let before = std::fs::metadata(&path).unwrap().len();

        index.compact();
        index.save(&path).unwrap();
        let after = std::fs::metadata(&path).unwrap().len();
        assert!(after < before);
    }
}
