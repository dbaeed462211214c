//! Filesystem watcher thread for watch mode.
//!
//! The watcher never calls back into the orchestrator; it only pushes
//! deduplicated events into the shared [`PendingQueue`], which the
//! orchestrator's debounce loop drains. A dedicated thread owns the
//! `notify` watcher and shuts down when the guard is dropped.

use crate::config::DATA_DIR_NAME;
use crate::error::{Error, Result};
use crate::indexer::debounce::{ChangeKind, PendingQueue};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// Handle to the running watcher thread. Dropping it stops the thread.
pub(crate) struct WatcherGuard {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherGuard {
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for WatcherGuard {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawns a recursive watcher over `root` feeding `queue`.
pub(crate) fn spawn_watcher(
    root: PathBuf,
    queue: Arc<Mutex<PendingQueue>>,
) -> Result<WatcherGuard> {
    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |event| {
        let _ = tx.send(event);
    })
    .map_err(|e| Error::Io(format!("failed to create watcher: {e}")))?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| Error::Io(format!("failed to watch {}: {e}", root.display())))?;
    debug!("watching {}", root.display());

    let shutdown = Arc::new(AtomicBool::new(false));
    let thread_shutdown = shutdown.clone();
    let thread = std::thread::spawn(move || {
        // The watcher must live on this thread for its lifetime.
        let _watcher = watcher;
        loop {
            if thread_shutdown.load(Ordering::SeqCst) {
                break;
            }
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(Ok(event)) => {
                    if let Some(kind) = map_event_kind(&event.kind) {
                        let mut queue = match queue.lock() {
                            Ok(guard) => guard,
                            Err(_) => break,
                        };
                        for path in &event.paths {
                            if is_watchable(path) {
                                queue.push(path.clone(), kind);
                            }
                        }
                    }
                }
                Ok(Err(e)) => warn!("watcher error: {e}"),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    Ok(WatcherGuard {
        shutdown,
        thread: Some(thread),
    })
}

/// Events for the data directory and directories themselves are noise.
fn is_watchable(path: &Path) -> bool {
    if path.components().any(|c| c.as_os_str() == DATA_DIR_NAME) {
        return false;
    }
    !path.is_dir()
}

/// Maps a notify event to a pending-change kind.
///
/// Kinds are advisory: the pipeline re-verifies each flushed path against
/// the filesystem and the file record table, so a rename reported as a
/// modify still resolves correctly.
fn map_event_kind(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Add),
        EventKind::Modify(_) => Some(ChangeKind::Update),
        EventKind::Remove(_) => Some(ChangeKind::Delete),
        _ => None,
    }
}
