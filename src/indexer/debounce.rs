//! Pending-change queue for watch mode.
//!
//! Watcher events accumulate here between debounce flushes. Later events for
//! a path supersede earlier ones, with two collapses: an add followed by a
//! delete cancels out entirely, and an add followed by an update stays an
//! add (the content is read at flush time anyway). A delete followed by an
//! add is a replacement and becomes an update.
//!
//! The queue is insertion-ordered by first observation of each path. Memory
//! is bounded by the number of unique paths under the root; there is no
//! hard cap.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Kind of pending filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Update,
    Delete,
}

/// One deduplicated pending change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

/// Insertion-ordered, deduplicating event queue.
#[derive(Debug, Default)]
pub struct PendingQueue {
    kinds: HashMap<PathBuf, ChangeKind>,
    order: Vec<PathBuf>,
    last_event: Option<Instant>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event, collapsing against any pending one for the path.
    pub fn push(&mut self, path: PathBuf, kind: ChangeKind) {
        self.last_event = Some(Instant::now());
        match (self.kinds.get(&path).copied(), kind) {
            (None, kind) => {
                self.order.push(path.clone());
                self.kinds.insert(path, kind);
            }
            // An add that gets deleted before the flush never happened.
            (Some(ChangeKind::Add), ChangeKind::Delete) => {
                self.kinds.remove(&path);
                self.order.retain(|p| p != &path);
            }
            // Content updates during creation collapse into the add.
            (Some(ChangeKind::Add), ChangeKind::Update) => {}
            (Some(ChangeKind::Add), ChangeKind::Add) => {}
            // A delete followed by a re-create is a replacement.
            (Some(ChangeKind::Delete), ChangeKind::Add) => {
                self.kinds.insert(path, ChangeKind::Update);
            }
            // Otherwise the latest event wins.
            (Some(_), kind) => {
                self.kinds.insert(path, kind);
            }
        }
    }

    /// Whether the debounce window has elapsed since the last event.
    pub fn is_ready(&self, debounce: Duration) -> bool {
        self.last_event
            .is_some_and(|last| last.elapsed() >= debounce)
    }

    pub fn has_pending(&self) -> bool {
        !self.kinds.is_empty()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Drains all pending changes in insertion order.
    pub fn flush(&mut self) -> Vec<PendingChange> {
        self.last_event = None;
        let kinds = std::mem::take(&mut self.kinds);
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|path| {
                kinds.get(&path).map(|&kind| PendingChange { path, kind })
            })
            .collect()
    }
}
