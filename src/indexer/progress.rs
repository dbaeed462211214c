//! Indexing status and progress reporting.

use serde::Serialize;
use std::sync::{Arc, RwLock};

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexStage {
    Idle,
    Scanning,
    Tfidf,
    Vectors,
    Complete,
    Error,
}

impl std::fmt::Display for IndexStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IndexStage::Idle => "idle",
            IndexStage::Scanning => "scanning",
            IndexStage::Tfidf => "tfidf",
            IndexStage::Vectors => "vectors",
            IndexStage::Complete => "complete",
            IndexStage::Error => "error",
        };
        f.write_str(name)
    }
}

/// Snapshot of the orchestrator's indexing state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingStatus {
    pub is_indexing: bool,
    pub stage: IndexStage,
    /// 0-100, monotonic within a stage.
    pub progress: u8,
    pub total_files: usize,
    pub indexed_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for IndexingStatus {
    fn default() -> Self {
        Self {
            is_indexing: false,
            stage: IndexStage::Idle,
            progress: 0,
            total_files: 0,
            indexed_files: 0,
            current_file: None,
            error: None,
        }
    }
}

/// One progress callback invocation: a stage transition or a per-file tick.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub stage: IndexStage,
    pub current: usize,
    pub total: usize,
    pub file_name: Option<String>,
}

/// Callback invoked on stage transitions and per-file progress.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Progress share of each stage, as (start, end) percent.
fn stage_span(stage: IndexStage) -> (u8, u8) {
    match stage {
        IndexStage::Idle => (0, 0),
        IndexStage::Scanning => (0, 25),
        IndexStage::Tfidf => (25, 65),
        IndexStage::Vectors => (65, 95),
        IndexStage::Complete => (100, 100),
        IndexStage::Error => (0, 0),
    }
}

/// Shared, thread-safe status cell owned by the orchestrator.
#[derive(Default)]
pub(crate) struct StatusCell {
    inner: RwLock<IndexingStatus>,
}

impl StatusCell {
    pub fn snapshot(&self) -> IndexingStatus {
        self.inner.read().expect("status lock poisoned").clone()
    }

    pub fn begin(&self, total_files: usize) {
        let mut status = self.inner.write().expect("status lock poisoned");
        *status = IndexingStatus {
            is_indexing: true,
            stage: IndexStage::Scanning,
            total_files,
            ..IndexingStatus::default()
        };
    }

    pub fn enter_stage(&self, stage: IndexStage) {
        let mut status = self.inner.write().expect("status lock poisoned");
        status.stage = stage;
        status.progress = stage_span(stage).0;
        status.current_file = None;
    }

    /// Per-file tick within the current stage. Progress is interpolated
    /// inside the stage's span, so it never moves backwards within a stage.
    pub fn file_tick(&self, current: usize, total: usize, file: Option<&str>) {
        let mut status = self.inner.write().expect("status lock poisoned");
        let (start, end) = stage_span(status.stage);
        let span = f64::from(end - start);
        let fraction = if total == 0 {
            1.0
        } else {
            (current as f64 / total as f64).min(1.0)
        };
        let progress = start + (span * fraction) as u8;
        status.progress = status.progress.max(progress);
        status.current_file = file.map(str::to_string);
        if status.stage == IndexStage::Tfidf {
            status.indexed_files = current;
        }
    }

    pub fn set_total(&self, total: usize) {
        let mut status = self.inner.write().expect("status lock poisoned");
        status.total_files = total;
    }

    pub fn complete(&self, error: Option<String>) {
        let mut status = self.inner.write().expect("status lock poisoned");
        status.is_indexing = false;
        status.stage = IndexStage::Complete;
        status.progress = 100;
        status.current_file = None;
        status.error = error;
    }

    pub fn fail(&self, error: String) {
        let mut status = self.inner.write().expect("status lock poisoned");
        status.is_indexing = false;
        status.stage = IndexStage::Error;
        status.current_file = None;
        status.error = Some(error);
    }

    /// Cancellation resets to idle; it is not an error condition.
    pub fn reset_idle(&self) {
        let mut status = self.inner.write().expect("status lock poisoned");
        status.is_indexing = false;
        status.stage = IndexStage::Idle;
        status.current_file = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_idle() {
        let status = IndexingStatus::default();
        assert!(!status.is_indexing);
        assert_eq!(status.stage, IndexStage::Idle);
        assert_eq!(status.progress, 0);
    }

    #[test]
    fn test_progress_monotonic_within_stage() {
        let cell = StatusCell::default();
        cell.begin(10);
        cell.enter_stage(IndexStage::Scanning);
        cell.file_tick(2, 10, Some("a.rs"));
        let p1 = cell.snapshot().progress;
        cell.file_tick(5, 10, Some("b.rs"));
        let p2 = cell.snapshot().progress;
        cell.file_tick(10, 10, None);
        let p3 = cell.snapshot().progress;
        assert!(p1 <= p2 && p2 <= p3);
        assert!(p3 <= 25);
    }

    #[test]
    fn test_stage_transitions_advance_progress() {
        let cell = StatusCell::default();
        cell.begin(4);
        cell.enter_stage(IndexStage::Tfidf);
        assert_eq!(cell.snapshot().progress, 25);
        cell.enter_stage(IndexStage::Vectors);
        assert_eq!(cell.snapshot().progress, 65);
        cell.complete(None);
        let status = cell.snapshot();
        assert_eq!(status.progress, 100);
        assert_eq!(status.stage, IndexStage::Complete);
        assert!(!status.is_indexing);
    }

    #[test]
    fn test_complete_with_error_keeps_complete_stage() {
        let cell = StatusCell::default();
        cell.begin(1);
        cell.complete(Some("embedding provider error: boom".into()));
        let status = cell.snapshot();
        assert_eq!(status.stage, IndexStage::Complete);
        assert!(status.error.is_some());
    }

    #[test]
    fn test_fail_sets_error_stage() {
        let cell = StatusCell::default();
        cell.begin(1);
        cell.fail("I/O error: disk gone".into());
        let status = cell.snapshot();
        assert_eq!(status.stage, IndexStage::Error);
        assert!(!status.is_indexing);
        assert!(status.error.is_some());
    }
}
