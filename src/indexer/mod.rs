//! Indexing orchestrator.
//!
//! [`CodebaseIndexer`] owns every subsystem: scanner, tokenizer, lexical and
//! vector engines, persistent store, result cache, and (in watch mode) the
//! filesystem watcher and its debounce loop.
//!
//! The indexing pipeline runs in stages: scan and diff, lexical update,
//! vector update, persist. The lexical and vector engines are mutated under
//! a single writer discipline behind a readers-writer lock; searches take
//! the read side and observe a consistent snapshot. Persistence happens at
//! stage boundaries, so cooperative cancellation between files leaves the
//! store at the last consistent checkpoint.
//!
//! At most one pipeline runs at a time: a second `index` call joins the
//! in-progress run's completion instead of starting another. Watch-mode
//! flushes queue behind the running pipeline and run when the slot frees.
//!
//! The watcher holds no reference to the orchestrator; it pushes events
//! into the shared pending queue and the orchestrator's debounce loop
//! drains it.

pub mod debounce;
pub mod progress;
mod watcher;

use crate::config::IndexerConfig;
use crate::embedding::{EmbeddingProvider, ProviderRegistry};
use crate::error::{Error, Result};
use crate::scanner::{FileRecord, FileScanner, ScanDiff, ScannedFile};
use crate::search::cache::{CacheStats, QueryCache, QueryKey};
use crate::search::delta::{self, DocumentChange, IndexStrategy};
use crate::search::fusion;
use crate::search::lexical::{idf_value, TfIdfEngine};
use crate::search::types::{Provenance, SearchMode, SearchOptions, SearchResult};
use crate::search::vector::{VectorIndex, VectorMetadata};
use crate::storage::{SqliteStore, StoreEntry};
use crate::tokenizer::Tokenizer;
use debounce::{PendingChange, PendingQueue};
use progress::{IndexStage, IndexingStatus, ProgressCallback, ProgressEvent, StatusCell};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use watcher::{spawn_watcher, WatcherGuard};

/// Documents embedded per provider call.
const EMBED_BATCH_SIZE: usize = 16;

/// Files tokenized per worker thread before parallelism pays off.
const PARALLEL_TOKENIZE_MIN: usize = 16;

/// Cooperative cancellation flag, checked between files and stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Options for [`CodebaseIndexer::index`].
#[derive(Clone, Default)]
pub struct IndexOptions {
    /// Keep watching the root after the pipeline completes.
    pub watch: bool,
    /// Invoked on stage transitions and per-file progress. Watch-mode
    /// flushes reuse the callback of the call that enabled watching.
    pub on_progress: Option<ProgressCallback>,
    pub cancel: Option<CancelFlag>,
}

/// What one pipeline run did.
#[derive(Debug, Clone)]
pub struct IndexSummary {
    /// Files considered by the scan (or flush batch).
    pub files_seen: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Whether the lexical index was rebuilt from scratch.
    pub full_rebuild: bool,
    pub elapsed_ms: u64,
    /// Present when the vector stage was skipped on provider failure.
    pub vector_error: Option<String>,
}

/// Aggregate index size counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub files: usize,
    pub documents: usize,
    pub terms: usize,
    /// Live vectors (when semantic search is enabled).
    pub vectors: usize,
    pub deleted_slots: usize,
}

/// Where a pipeline run's changes come from.
enum ChangeSource {
    /// Walk the whole root and diff against the record table.
    FullScan,
    /// Verify a flushed batch of watcher events.
    Paths(Vec<PendingChange>),
}

/// Cloneable pipeline outcome broadcast to joined callers.
type Outcome = std::result::Result<IndexSummary, (String, String)>;

fn outcome_to_result(outcome: Outcome) -> Result<IndexSummary> {
    match outcome {
        Ok(summary) => Ok(summary),
        Err((code, message)) => Err(match code.as_str() {
            "cancelled" => Error::Cancelled,
            "index_corruption" => Error::IndexCorruption(message),
            "config" => Error::Config(message),
            "provider" => Error::Provider(message),
            _ => Error::Io(message),
        }),
    }
}

/// In-memory engines, mutated under a single writer.
struct Engines {
    lexical: TfIdfEngine,
    vector: Option<VectorIndex>,
    records: HashMap<String, FileRecord>,
    /// Set when the vector snapshot was missing or unusable at open while
    /// the store had documents; the next full scan re-embeds everything.
    vector_rebuild_needed: bool,
}

struct WatchState {
    guard: Option<WatcherGuard>,
    task: Option<tokio::task::JoinHandle<()>>,
}

struct Inner {
    config: IndexerConfig,
    scanner: FileScanner,
    tokenizer: Tokenizer,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    store: Mutex<SqliteStore>,
    engines: tokio::sync::RwLock<Engines>,
    cache: Mutex<QueryCache>,
    status: StatusCell,
    /// Single-flight slot: receiver present while a pipeline runs.
    in_flight: tokio::sync::Mutex<Option<watch::Receiver<Option<Outcome>>>>,
    pending: Arc<Mutex<PendingQueue>>,
    watch_state: Mutex<WatchState>,
    closed: AtomicBool,
    pipeline_runs: AtomicU64,
}

/// Embedded codebase search engine.
///
/// Cheap to clone; clones share the same underlying index.
#[derive(Clone)]
pub struct CodebaseIndexer {
    inner: Arc<Inner>,
}

impl CodebaseIndexer {
    /// Opens an indexer with the default provider registry.
    pub fn new(config: IndexerConfig) -> Result<Self> {
        Self::with_registry(config, &ProviderRegistry::default())
    }

    /// Opens an indexer, resolving `config.embedding_provider` from
    /// `registry`.
    pub fn with_registry(config: IndexerConfig, registry: &ProviderRegistry) -> Result<Self> {
        let provider = match &config.embedding_provider {
            Some(name) => Some(registry.create(name)?),
            None => None,
        };
        Self::with_provider(config, provider)
    }

    /// Opens an indexer with an explicit provider instance.
    ///
    /// Loads the persistent store (discarding it on corruption) and rebuilds
    /// the in-memory engines from it.
    pub fn with_provider(
        config: IndexerConfig,
        provider: Option<Arc<dyn EmbeddingProvider>>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(config.data_dir())?;

        let db_path = config.index_db_path();
        let store = match SqliteStore::open(&db_path) {
            Ok(store) => store,
            Err(Error::IndexCorruption(message)) => {
                warn!("discarding corrupt index database: {message}");
                for suffix in ["", "-wal", "-shm"] {
                    let mut os = db_path.clone().into_os_string();
                    os.push(suffix);
                    let _ = std::fs::remove_file(PathBuf::from(os));
                }
                SqliteStore::open(&db_path)?
            }
            Err(e) => return Err(e),
        };

        let entries = store.load_entries()?;
        let mut records = HashMap::with_capacity(entries.len());
        let mut documents = Vec::with_capacity(entries.len());
        for entry in entries {
            records.insert(entry.record.path.clone(), entry.record.clone());
            documents.push((entry.record.path, entry.tf));
        }
        let lexical = TfIdfEngine::from_documents(documents);
        info!(
            "loaded index: {} documents, {} terms",
            lexical.doc_count(),
            lexical.term_count()
        );

        let (vector, vector_rebuild_needed) = match &provider {
            Some(provider) => {
                let snapshot = config.vector_snapshot_path();
                if snapshot.exists() {
                    match VectorIndex::load(&snapshot, provider.dimensions(), &config.hnsw) {
                        Ok(vector) => (Some(vector), false),
                        Err(e) => {
                            warn!("discarding unusable vector snapshot: {e}");
                            (
                                Some(VectorIndex::new(provider.dimensions(), &config.hnsw)),
                                !records.is_empty(),
                            )
                        }
                    }
                } else {
                    (
                        Some(VectorIndex::new(provider.dimensions(), &config.hnsw)),
                        !records.is_empty(),
                    )
                }
            }
            None => (None, false),
        };

        let cache = QueryCache::new(&config.cache);
        let scanner = FileScanner::new(&config);
        Ok(Self {
            inner: Arc::new(Inner {
                scanner,
                tokenizer: Tokenizer::default(),
                provider,
                store: Mutex::new(store),
                engines: tokio::sync::RwLock::new(Engines {
                    lexical,
                    vector,
                    records,
                    vector_rebuild_needed,
                }),
                cache: Mutex::new(cache),
                status: StatusCell::default(),
                in_flight: tokio::sync::Mutex::new(None),
                pending: Arc::new(Mutex::new(PendingQueue::new())),
                watch_state: Mutex::new(WatchState {
                    guard: None,
                    task: None,
                }),
                closed: AtomicBool::new(false),
                pipeline_runs: AtomicU64::new(0),
                config,
            }),
        })
    }

    /// Runs the indexing pipeline over the whole root.
    ///
    /// If a pipeline is already in progress, joins its completion instead of
    /// starting a new one. With `options.watch`, keeps a filesystem watcher
    /// running afterwards, feeding debounced change batches back into the
    /// pipeline.
    pub async fn index(&self, options: IndexOptions) -> Result<IndexSummary> {
        self.ensure_open()?;
        enum Role {
            Runner(watch::Sender<Option<Outcome>>),
            Joiner(watch::Receiver<Option<Outcome>>),
        }

        let role = {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                Some(rx) => Role::Joiner(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx);
                    Role::Runner(tx)
                }
            }
        };

        let result = match role {
            Role::Joiner(mut rx) => loop {
                let outcome = rx.borrow().clone();
                if let Some(outcome) = outcome {
                    break outcome_to_result(outcome);
                }
                if rx.changed().await.is_err() {
                    break Err(Error::Io("indexing task dropped".into()));
                }
            },
            Role::Runner(tx) => self.run_as_runner(tx, ChangeSource::FullScan, &options).await,
        };

        if result.is_ok() && options.watch {
            self.start_watch(&options)?;
        }
        result
    }

    /// Spawns the pipeline without blocking the caller. Errors surface via
    /// [`status`](Self::status).
    pub fn start_background_indexing(&self, options: IndexOptions) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.index(options).await {
                warn!("background indexing failed: {e}");
            }
        });
    }

    /// Searches the index.
    ///
    /// The search path never fails on data issues: provider or vector
    /// trouble degrades to lexical results (or empty), with a warning.
    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        self.ensure_open()?;
        let query = query.trim();
        if query.is_empty() || options.limit == 0 {
            return Ok(Vec::new());
        }

        let key = QueryKey::new(query, &options);
        let cached = {
            let mut cache = self
                .inner
                .cache
                .lock()
                .map_err(|_| Error::Io("cache lock poisoned".into()))?;
            cache.get(&key)
        };
        if let Some(results) = cached {
            return Ok(results);
        }

        // The weight extremes degenerate to the single-stream modes.
        let mode = match options.mode {
            SearchMode::Hybrid if options.vector_weight <= 0.0 => SearchMode::Lexical,
            SearchMode::Hybrid if options.vector_weight >= 1.0 => SearchMode::Semantic,
            mode => mode,
        };

        let results = match mode {
            SearchMode::Lexical => {
                self.lexical_results(query, &options, options.limit, options.min_score)
                    .await
            }
            SearchMode::Semantic => {
                match self
                    .vector_results(query, &options, options.limit, Some(options.min_score))
                    .await
                {
                    VectorOutcome::Hits(hits) => hits,
                    VectorOutcome::Unavailable => {
                        debug!("semantic search without a provider returns nothing");
                        Vec::new()
                    }
                    VectorOutcome::Failed => {
                        self.lexical_results(query, &options, options.limit, options.min_score)
                            .await
                    }
                }
            }
            SearchMode::Hybrid => {
                let lexical = self
                    .lexical_results(query, &options, options.limit * 2, 0.0)
                    .await;
                let vector = match self
                    .vector_results(query, &options, options.limit * 2, None)
                    .await
                {
                    VectorOutcome::Hits(hits) => hits,
                    VectorOutcome::Unavailable | VectorOutcome::Failed => Vec::new(),
                };
                fusion::fuse(
                    lexical,
                    vector,
                    options.vector_weight,
                    options.min_score,
                    options.limit,
                )
            }
        };

        let mut cache = self
            .inner
            .cache
            .lock()
            .map_err(|_| Error::Io("cache lock poisoned".into()))?;
        cache.insert(key, results.clone());
        Ok(results)
    }

    /// Current indexing status.
    pub fn status(&self) -> IndexingStatus {
        self.inner.status.snapshot()
    }

    /// Aggregate index counters.
    pub async fn stats(&self) -> IndexStats {
        let engines = self.inner.engines.read().await;
        IndexStats {
            files: engines.records.len(),
            documents: engines.lexical.doc_count(),
            terms: engines.lexical.term_count(),
            vectors: engines.vector.as_ref().map_or(0, VectorIndex::live_len),
            deleted_slots: engines.vector.as_ref().map_or(0, VectorIndex::deleted_count),
        }
    }

    /// Result cache hit/miss counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.inner
            .cache
            .lock()
            .map(|cache| cache.stats())
            .unwrap_or_default()
    }

    /// Number of pipeline runs since open. Watch-mode flushes count.
    pub fn pipeline_runs(&self) -> u64 {
        self.inner.pipeline_runs.load(Ordering::SeqCst)
    }

    /// Stops the watcher, saves the vector snapshot, and releases resources.
    /// Further operations fail with a configuration error.
    pub async fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let (guard, task) = {
            let mut ws = self
                .inner
                .watch_state
                .lock()
                .map_err(|_| Error::Io("watch state lock poisoned".into()))?;
            (ws.guard.take(), ws.task.take())
        };
        if let Some(mut guard) = guard {
            guard.stop();
        }
        if let Some(task) = task {
            task.abort();
        }

        let engines = self.inner.engines.read().await;
        if let Some(vector) = &engines.vector {
            vector.save(&self.inner.config.vector_snapshot_path())?;
        }
        info!("indexer closed");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(Error::Config("indexer is closed".into()))
        } else {
            Ok(())
        }
    }

    /// Runs the pipeline while holding the single-flight slot, then
    /// releases the slot and broadcasts the outcome to joined callers.
    async fn run_as_runner(
        &self,
        tx: watch::Sender<Option<Outcome>>,
        source: ChangeSource,
        options: &IndexOptions,
    ) -> Result<IndexSummary> {
        let result = self.run_guarded(source, options).await;
        {
            let mut slot = self.inner.in_flight.lock().await;
            *slot = None;
        }
        let outcome = match &result {
            Ok(summary) => Ok(summary.clone()),
            Err(e) => Err((e.code().to_string(), e.to_string())),
        };
        let _ = tx.send(Some(outcome));
        result
    }

    /// Acquires the single-flight slot (waiting out any in-progress run)
    /// and runs the pipeline. Used by watch-mode flushes, which must not
    /// discard their batch by merely joining another run.
    async fn run_exclusive(
        &self,
        source: ChangeSource,
        options: &IndexOptions,
    ) -> Result<IndexSummary> {
        let tx = loop {
            let mut slot = self.inner.in_flight.lock().await;
            match slot.as_ref() {
                None => {
                    let (tx, rx) = watch::channel(None);
                    *slot = Some(rx);
                    break tx;
                }
                Some(rx) => {
                    let mut rx = rx.clone();
                    drop(slot);
                    if rx.changed().await.is_err() {
                        // Runner vanished without broadcasting; reclaim the
                        // slot so the queue cannot wedge.
                        let mut slot = self.inner.in_flight.lock().await;
                        if slot.as_ref().is_some_and(|s| s.has_changed().is_err()) {
                            *slot = None;
                        }
                    }
                }
            }
        };
        self.run_as_runner(tx, source, options).await
    }

    /// Runs the pipeline, translating failures into status updates.
    async fn run_guarded(
        &self,
        source: ChangeSource,
        options: &IndexOptions,
    ) -> Result<IndexSummary> {
        match self.run_pipeline(source, options).await {
            Ok(summary) => Ok(summary),
            Err(Error::Cancelled) => {
                self.inner.status.reset_idle();
                Err(Error::Cancelled)
            }
            Err(e) => {
                self.inner.status.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        source: ChangeSource,
        options: &IndexOptions,
    ) -> Result<IndexSummary> {
        let inner = &self.inner;
        let started = Instant::now();
        let cancel = options.cancel.clone().unwrap_or_default();
        let progress = options.on_progress.clone();
        let emit = |stage: IndexStage, current: usize, total: usize, file: Option<&str>| {
            if let Some(cb) = &progress {
                cb(ProgressEvent {
                    stage,
                    current,
                    total,
                    file_name: file.map(str::to_string),
                });
            }
        };
        inner.pipeline_runs.fetch_add(1, Ordering::SeqCst);
        inner.status.begin(0);

        // Stage: scanning.
        inner.status.enter_stage(IndexStage::Scanning);
        emit(IndexStage::Scanning, 0, 0, None);
        let (existing, force_reindex) = {
            let engines = inner.engines.read().await;
            (engines.records.clone(), engines.vector_rebuild_needed)
        };
        let (diff, files_seen, full_scan) = match source {
            ChangeSource::FullScan => {
                let paths = inner.scanner.discover()?;
                inner.status.set_total(paths.len());
                let mut scanned = Vec::with_capacity(paths.len());
                for (i, path) in paths.iter().enumerate() {
                    cancel.check()?;
                    let name = path
                        .strip_prefix(&inner.config.codebase_root)
                        .unwrap_or(path)
                        .to_string_lossy()
                        .into_owned();
                    match inner.scanner.read_file(path) {
                        Ok(file) => scanned.push(file),
                        Err(e) => debug!("skipping {name}: {e}"),
                    }
                    inner.status.file_tick(i + 1, paths.len(), Some(&name));
                    emit(IndexStage::Scanning, i + 1, paths.len(), Some(&name));
                }
                let seen = scanned.len();
                let diff = if force_reindex {
                    forced_diff(scanned, &existing)
                } else {
                    FileScanner::diff(scanned, &existing)
                };
                (diff, seen, true)
            }
            ChangeSource::Paths(batch) => {
                inner.status.set_total(batch.len());
                let diff = self.verify_batch(&batch, &existing, &cancel, &emit)?;
                (diff, batch.len(), false)
            }
        };
        debug!(
            "scan: {} added, {} changed, {} removed, {} unchanged",
            diff.added.len(),
            diff.changed.len(),
            diff.removed.len(),
            diff.unchanged
        );

        // Stage: lexical index.
        cancel.check()?;
        inner.status.enter_stage(IndexStage::Tfidf);
        let work_total = diff.change_count();
        emit(IndexStage::Tfidf, 0, work_total, None);

        let to_tokenize: Vec<&ScannedFile> = diff.added.iter().chain(diff.changed.iter()).collect();
        let tokenized = parallel_tokenize(&inner.tokenizer, &to_tokenize);
        let doc_count = {
            let engines = inner.engines.read().await;
            engines.lexical.doc_count()
        };
        let strategy = delta::plan(work_total, doc_count, inner.config.rebuild_threshold);
        let full_rebuild = strategy == IndexStrategy::FullRebuild;

        let touched_terms: Option<HashSet<String>> = {
            let mut engines = inner.engines.write().await;
            for path in &diff.removed {
                engines.records.remove(path);
            }
            for file in diff.added.iter().chain(diff.changed.iter()) {
                engines
                    .records
                    .insert(file.record.path.clone(), file.record.clone());
            }

            match strategy {
                IndexStrategy::FullRebuild => {
                    let mut final_docs: HashMap<String, HashMap<String, u32>> = engines
                        .lexical
                        .documents()
                        .map(|(path, tf)| (path.clone(), tf.clone()))
                        .collect();
                    for path in &diff.removed {
                        final_docs.remove(path);
                    }
                    for (path, tf) in &tokenized {
                        final_docs.insert(path.clone(), tf.clone());
                    }
                    engines.lexical = TfIdfEngine::from_documents(final_docs);
                    emit(IndexStage::Tfidf, work_total, work_total, None);
                    inner.status.file_tick(work_total, work_total, None);
                    None
                }
                IndexStrategy::Incremental => {
                    let mut changes: Vec<DocumentChange> = Vec::with_capacity(work_total);
                    for path in &diff.removed {
                        changes.push(DocumentChange::Remove { path: path.clone() });
                    }
                    let tokenized_map: HashMap<&str, &HashMap<String, u32>> = tokenized
                        .iter()
                        .map(|(path, tf)| (path.as_str(), tf))
                        .collect();
                    for file in &diff.added {
                        changes.push(DocumentChange::Add {
                            path: file.record.path.clone(),
                            tf: (*tokenized_map[file.record.path.as_str()]).clone(),
                        });
                    }
                    for file in &diff.changed {
                        changes.push(DocumentChange::Update {
                            path: file.record.path.clone(),
                            tf: (*tokenized_map[file.record.path.as_str()]).clone(),
                        });
                    }

                    let mut touched = HashSet::new();
                    let total = changes.len();
                    for (i, change) in changes.into_iter().enumerate() {
                        cancel.check()?;
                        let name = change.path().to_string();
                        touched.extend(delta::apply(&mut engines.lexical, vec![change])?);
                        inner.status.file_tick(i + 1, total, Some(&name));
                        emit(IndexStage::Tfidf, i + 1, total, Some(&name));
                    }
                    Some(touched)
                }
            }
        };

        // Stage: vectors.
        let mut vector_error: Option<String> = None;
        let mut vector_stage_ran = false;
        if let Some(provider) = inner.provider.clone() {
            cancel.check()?;
            inner.status.enter_stage(IndexStage::Vectors);
            let to_embed: Vec<(String, String, VectorMetadata)> = diff
                .added
                .iter()
                .chain(diff.changed.iter())
                .map(|file| {
                    (
                        file.record.path.clone(),
                        file.contents.clone(),
                        VectorMetadata {
                            language: file.record.language.clone(),
                            preview: file.record.preview.clone(),
                        },
                    )
                })
                .collect();
            emit(IndexStage::Vectors, 0, to_embed.len(), None);

            {
                let mut engines = inner.engines.write().await;
                if let Some(vector) = engines.vector.as_mut() {
                    for path in &diff.removed {
                        vector.delete(path);
                    }
                }
            }

            let mut completed = 0usize;
            vector_stage_ran = true;
            'embed: for chunk in to_embed.chunks(EMBED_BATCH_SIZE) {
                cancel.check()?;
                let texts: Vec<String> = chunk.iter().map(|(_, text, _)| text.clone()).collect();
                let vectors = match provider.embed_batch(&texts).await {
                    Ok(vectors) => vectors,
                    Err(e) => {
                        warn!("embedding batch failed, skipping vector stage: {e}");
                        vector_error = Some(Error::Provider(e.to_string()).to_string());
                        break 'embed;
                    }
                };
                if vectors.len() != chunk.len() {
                    vector_error = Some(
                        Error::Provider(format!(
                            "provider returned {} vectors for {} texts",
                            vectors.len(),
                            chunk.len()
                        ))
                        .to_string(),
                    );
                    break 'embed;
                }

                let mut engines = inner.engines.write().await;
                let Some(vector_index) = engines.vector.as_mut() else {
                    break 'embed;
                };
                for ((path, _, metadata), embedding) in chunk.iter().zip(vectors) {
                    let upsert = if vector_index.contains(path) {
                        vector_index.update(path, embedding, metadata.clone())
                    } else {
                        vector_index.add(path, embedding, metadata.clone())
                    };
                    if let Err(e) = upsert {
                        warn!("vector upsert failed for {path}: {e}");
                        vector_error = Some(e.to_string());
                        break 'embed;
                    }
                    completed += 1;
                    inner.status.file_tick(completed, to_embed.len(), Some(path));
                    emit(IndexStage::Vectors, completed, to_embed.len(), Some(path));
                }
            }

            {
                let mut engines = inner.engines.write().await;
                if vector_stage_ran && vector_error.is_none() && full_scan {
                    engines.vector_rebuild_needed = false;
                }
                if let Some(vector) = engines.vector.as_mut() {
                    if vector.needs_compaction() {
                        vector.compact();
                    }
                }
            }
        }

        // Stage: persist.
        cancel.check()?;
        {
            let engines = inner.engines.read().await;
            let mut store = inner
                .store
                .lock()
                .map_err(|_| Error::Io("store lock poisoned".into()))?;

            match &touched_terms {
                None => {
                    let entries: Vec<StoreEntry> = engines
                        .lexical
                        .documents()
                        .map(|(path, tf)| {
                            let (length, norm) =
                                engines.lexical.doc_stats(path).unwrap_or((0, 0.0));
                            StoreEntry {
                                record: engines.records[path].clone(),
                                tf: tf.clone(),
                                length,
                                norm,
                            }
                        })
                        .collect();
                    let n = engines.lexical.doc_count();
                    let idf: Vec<(String, u32, f32)> = engines
                        .lexical
                        .terms()
                        .map(|(term, df)| (term.clone(), df, idf_value(n, df)))
                        .collect();
                    store.bulk_replace(&entries, &idf)?;
                }
                Some(touched) => {
                    for path in &diff.removed {
                        store.delete_path(path)?;
                    }
                    for (path, tf) in &tokenized {
                        let (length, norm) = engines.lexical.doc_stats(path).unwrap_or((0, 0.0));
                        store.upsert_entry(&StoreEntry {
                            record: engines.records[path].clone(),
                            tf: tf.clone(),
                            length,
                            norm,
                        })?;
                    }
                    let changed: Vec<(String, Option<u32>)> = touched
                        .iter()
                        .map(|term| (term.clone(), engines.lexical.document_frequency(term)))
                        .collect();
                    store.update_idf(engines.lexical.doc_count(), &changed)?;
                }
            }

            store.put_meta("doc_count", &engines.lexical.doc_count().to_string())?;
            if let Some(provider) = &inner.provider {
                store.put_meta("dimensions", &provider.dimensions().to_string())?;
            }
            if let Some(vector) = &engines.vector {
                vector.save(&inner.config.vector_snapshot_path())?;
            }
        }

        if let Ok(mut cache) = inner.cache.lock() {
            cache.clear();
        }
        inner.status.complete(vector_error.clone());

        let summary = IndexSummary {
            files_seen,
            added: diff.added.len(),
            updated: diff.changed.len(),
            removed: diff.removed.len(),
            unchanged: diff.unchanged,
            full_rebuild,
            elapsed_ms: started.elapsed().as_millis() as u64,
            vector_error,
        };
        info!(
            "indexed in {}ms: +{} ~{} -{} ({} unchanged{})",
            summary.elapsed_ms,
            summary.added,
            summary.updated,
            summary.removed,
            summary.unchanged,
            if summary.full_rebuild { ", full rebuild" } else { "" }
        );
        Ok(summary)
    }

    /// Re-verifies a flushed watcher batch against the filesystem and the
    /// record table. Event kinds are advisory; the filesystem decides.
    fn verify_batch(
        &self,
        batch: &[PendingChange],
        existing: &HashMap<String, FileRecord>,
        cancel: &CancelFlag,
        emit: &dyn Fn(IndexStage, usize, usize, Option<&str>),
    ) -> Result<ScanDiff> {
        let inner = &self.inner;
        let mut diff = ScanDiff::default();
        for (i, change) in batch.iter().enumerate() {
            cancel.check()?;
            let Ok(rel) = change.path.strip_prefix(&inner.config.codebase_root) else {
                continue;
            };
            let rel = rel.to_string_lossy().replace('\\', "/");
            inner.status.file_tick(i + 1, batch.len(), Some(&rel));
            emit(IndexStage::Scanning, i + 1, batch.len(), Some(&rel));

            if !change.path.exists() {
                if existing.contains_key(&rel) {
                    diff.removed.push(rel);
                }
                continue;
            }
            if !inner.scanner.is_candidate(&change.path) {
                continue;
            }
            match inner.scanner.read_file(&change.path) {
                Ok(file) => match existing.get(&file.record.path) {
                    None => diff.added.push(file),
                    Some(record) if record.hash != file.record.hash => diff.changed.push(file),
                    Some(_) => diff.unchanged += 1,
                },
                Err(e) => debug!("skipping {rel}: {e}"),
            }
        }
        diff.removed.sort();
        diff.removed.dedup();
        Ok(diff)
    }

    /// Starts the watcher thread and debounce loop, if not already running.
    fn start_watch(&self, options: &IndexOptions) -> Result<()> {
        let mut ws = self
            .inner
            .watch_state
            .lock()
            .map_err(|_| Error::Io("watch state lock poisoned".into()))?;
        if ws.guard.is_some() {
            return Ok(());
        }
        let guard = spawn_watcher(
            self.inner.config.codebase_root.clone(),
            self.inner.pending.clone(),
        )?;
        ws.guard = Some(guard);

        let this = self.clone();
        let flush_options = IndexOptions {
            watch: false,
            on_progress: options.on_progress.clone(),
            cancel: None,
        };
        ws.task = Some(tokio::spawn(async move {
            let debounce = Duration::from_millis(this.inner.config.debounce_ms.max(1));
            let poll = Duration::from_millis((this.inner.config.debounce_ms / 4).clamp(25, 250));
            loop {
                tokio::time::sleep(poll).await;
                if this.inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                let batch = {
                    let Ok(mut queue) = this.inner.pending.lock() else {
                        break;
                    };
                    if queue.has_pending() && queue.is_ready(debounce) {
                        queue.flush()
                    } else {
                        continue;
                    }
                };
                if batch.is_empty() {
                    continue;
                }
                debug!("watch flush: {} pending changes", batch.len());
                if let Err(e) = this
                    .run_exclusive(ChangeSource::Paths(batch), &flush_options)
                    .await
                {
                    warn!("watch-triggered indexing failed: {e}");
                }
            }
        }));
        info!("watch mode enabled ({}ms debounce)", self.inner.config.debounce_ms);
        Ok(())
    }

    async fn lexical_results(
        &self,
        query: &str,
        options: &SearchOptions,
        limit: usize,
        min_score: f32,
    ) -> Vec<SearchResult> {
        let engines = self.inner.engines.read().await;
        let terms: Vec<String> = self.inner.tokenizer.tokenize(query, None).collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let hits = match &options.filter {
            Some(filter) => {
                let records = &engines.records;
                let pred = |path: &str| {
                    let language = records.get(path).and_then(|r| r.language.as_deref());
                    filter.matches(path, language)
                };
                engines.lexical.search(&terms, limit, min_score, Some(&pred))
            }
            None => engines.lexical.search(&terms, limit, min_score, None),
        };

        hits.into_iter()
            .map(|hit| {
                let record = engines.records.get(&hit.path);
                SearchResult {
                    score: hit.score,
                    provenance: Provenance::Lexical,
                    matched_terms: Some(hit.matched_terms),
                    similarity: None,
                    content_preview: if options.include_content {
                        record.map(|r| r.preview.clone())
                    } else {
                        None
                    },
                    language: record.and_then(|r| r.language.clone()),
                    path: hit.path,
                }
            })
            .collect()
    }

    async fn vector_results(
        &self,
        query: &str,
        options: &SearchOptions,
        k: usize,
        min_score: Option<f32>,
    ) -> VectorOutcome {
        let Some(provider) = self.inner.provider.clone() else {
            return VectorOutcome::Unavailable;
        };
        let embedding = match provider.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("query embedding failed, degrading to lexical: {e}");
                return VectorOutcome::Failed;
            }
        };

        let engines = self.inner.engines.read().await;
        let Some(vector) = &engines.vector else {
            return VectorOutcome::Unavailable;
        };
        let result = match &options.filter {
            Some(filter) => {
                let pred = |path: &str, metadata: &VectorMetadata| {
                    filter.matches(path, metadata.language.as_deref())
                };
                vector.search(&embedding, k, min_score, Some(&pred))
            }
            None => vector.search(&embedding, k, min_score, None),
        };
        match result {
            Ok(hits) => VectorOutcome::Hits(
                hits.into_iter()
                    .map(|hit| SearchResult {
                        path: hit.path,
                        score: hit.similarity,
                        provenance: Provenance::Vector,
                        matched_terms: None,
                        similarity: Some(hit.similarity),
                        content_preview: if options.include_content {
                            Some(hit.metadata.preview)
                        } else {
                            None
                        },
                        language: hit.metadata.language,
                    })
                    .collect(),
            ),
            Err(e) => {
                warn!("vector search failed, degrading to lexical: {e}");
                VectorOutcome::Failed
            }
        }
    }
}

enum VectorOutcome {
    Hits(Vec<SearchResult>),
    /// No provider configured or no vector index present.
    Unavailable,
    /// Provider or index errored; callers degrade to lexical.
    Failed,
}

/// Diff that treats every scanned file as changed (or added), used when the
/// vector index must be rebuilt from source.
fn forced_diff(scanned: Vec<ScannedFile>, existing: &HashMap<String, FileRecord>) -> ScanDiff {
    let mut diff = ScanDiff::default();
    let mut seen: HashSet<String> = HashSet::new();
    for file in scanned {
        seen.insert(file.record.path.clone());
        if existing.contains_key(&file.record.path) {
            diff.changed.push(file);
        } else {
            diff.added.push(file);
        }
    }
    for path in existing.keys() {
        if !seen.contains(path) {
            diff.removed.push(path.clone());
        }
    }
    diff.removed.sort();
    diff
}

/// Tokenizes files into term-frequency maps, fanning out to scoped threads
/// for larger batches.
fn parallel_tokenize(
    tokenizer: &Tokenizer,
    files: &[&ScannedFile],
) -> Vec<(String, HashMap<String, u32>)> {
    let tokenize_one = |file: &&ScannedFile| {
        let (tf, _len) = tokenizer.term_frequencies(
            &file.contents,
            file.record.language.as_deref(),
        );
        (file.record.path.clone(), tf)
    };

    if files.len() < PARALLEL_TOKENIZE_MIN {
        return files.iter().map(|file| tokenize_one(file)).collect();
    }

    let chunk_size = (files.len() + 3) / 4;
    let tokenize_one = &tokenize_one;
    std::thread::scope(|scope| {
        let handles: Vec<_> = files
            .chunks(chunk_size)
            .map(|chunk| {
                scope.spawn(move || chunk.iter().map(|file| tokenize_one(file)).collect::<Vec<_>>())
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|handle| handle.join().expect("tokenizer thread panicked"))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_flag() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        assert!(flag.check().is_ok());
        flag.cancel();
        assert!(flag.is_cancelled());
        assert!(matches!(flag.check(), Err(Error::Cancelled)));
        // Clones share state.
        let clone = flag.clone();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_forced_diff_marks_everything() {
        use crate::scanner::FileRecord;
        let record = |path: &str| FileRecord {
            path: path.into(),
            abs_path: PathBuf::from("/r").join(path),
            size: 1,
            hash: "h".into(),
            language: None,
            preview: String::new(),
            indexed_at: 0,
        };
        let scanned = vec![
            ScannedFile {
                record: record("known.rs"),
                contents: "a".into(),
            },
            ScannedFile {
                record: record("new.rs"),
                contents: "b".into(),
            },
        ];
        let mut existing = HashMap::new();
        existing.insert("known.rs".to_string(), record("known.rs"));
        existing.insert("gone.rs".to_string(), record("gone.rs"));

        let diff = forced_diff(scanned, &existing);
        assert_eq!(diff.changed.len(), 1);
        assert_eq!(diff.added.len(), 1);
        assert_eq!(diff.removed, vec!["gone.rs".to_string()]);
    }

    #[test]
    fn test_outcome_round_trip() {
        let err = Error::Cancelled;
        let outcome: Outcome = Err((err.code().to_string(), err.to_string()));
        assert!(matches!(outcome_to_result(outcome), Err(Error::Cancelled)));

        let err = Error::Provider("boom".into());
        let outcome: Outcome = Err((err.code().to_string(), err.to_string()));
        assert!(matches!(outcome_to_result(outcome), Err(Error::Provider(_))));
    }
}
