//! Filesystem scanning and change detection.
//!
//! The scanner walks the codebase root honoring `.gitignore` chains plus a
//! set of built-in rules, reads candidate files, and hashes their contents.
//! Repeated scans are diffed against the known file records to produce the
//! added / changed / removed streams the pipeline consumes.
//!
//! Built-in ignore rules, beyond the gitignore chain handled by the walker:
//! hidden files and directories (which covers `.git`, `.hg`, `.svn`), the
//! index's own data directory, a table of binary extensions, files over the
//! configured size limit, and non-UTF-8 content.
//!
//! Per-file failures (permissions, disappeared files) are logged and
//! skipped; they never abort a scan.

use crate::config::{IndexerConfig, DATA_DIR_NAME};
use crate::error::{Error, Result};
use ignore::gitignore::Gitignore;
use ignore::overrides::OverrideBuilder;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Maximum length of the stored content preview, in characters.
pub const PREVIEW_CHARS: usize = 500;

/// Extensions treated as binary and never indexed.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "tar", "gz", "bz2", "xz",
    "7z", "rar", "jar", "class", "exe", "dll", "so", "dylib", "a", "o", "obj", "bin", "dat", "db",
    "sqlite", "wasm", "woff", "woff2", "ttf", "eot", "otf", "mp3", "mp4", "avi", "mov", "mkv",
    "flac", "ogg", "wav",
];

/// Durable identity and fingerprint of one indexed file.
///
/// Identity is the path relative to the codebase root. A record is created
/// on first observation, replaced when the content hash changes, and removed
/// when the file disappears from a scan.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FileRecord {
    /// Path relative to the codebase root (forward slashes).
    pub path: String,
    /// Absolute path on disk.
    pub abs_path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256 of the file contents.
    pub hash: String,
    /// Detected language tag, if the extension is recognized.
    pub language: Option<String>,
    /// First [`PREVIEW_CHARS`] characters of the contents.
    pub preview: String,
    /// Unix timestamp of when the record was produced.
    pub indexed_at: u64,
}

/// A file read during a scan: its record plus full contents.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub record: FileRecord,
    pub contents: String,
}

/// Outcome of diffing a scan against the known records.
#[derive(Debug, Default)]
pub struct ScanDiff {
    /// Files with no existing record.
    pub added: Vec<ScannedFile>,
    /// Files whose content hash differs from the record.
    pub changed: Vec<ScannedFile>,
    /// Paths with a record but no file on disk.
    pub removed: Vec<String>,
    /// Files whose hash matched (skipped).
    pub unchanged: usize,
}

impl ScanDiff {
    /// Number of documents that need re-indexing work.
    pub fn change_count(&self) -> usize {
        self.added.len() + self.changed.len() + self.removed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.change_count() == 0
    }
}

/// Walks the codebase root and reads candidate files.
pub struct FileScanner {
    root: PathBuf,
    max_file_size: u64,
    ignore_extra: Vec<String>,
    /// Root-level gitignore matcher for single-path checks (watch events).
    /// Full scans get the complete gitignore chain from the walker.
    gitignore: Gitignore,
}

impl FileScanner {
    pub fn new(config: &IndexerConfig) -> Self {
        let (gitignore, _err) = Gitignore::new(config.codebase_root.join(".gitignore"));
        Self {
            root: config.codebase_root.clone(),
            max_file_size: config.max_file_size,
            ignore_extra: config.ignore_extra.clone(),
            gitignore,
        }
    }

    /// Whether a single path would be admitted by the scan rules. Used to
    /// vet watcher events without a full walk.
    pub(crate) fn is_candidate(&self, path: &Path) -> bool {
        if path.components().any(|c| c.as_os_str() == DATA_DIR_NAME) {
            return false;
        }
        if is_binary_extension(path) {
            return false;
        }
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.'))
        {
            return false;
        }
        !self
            .gitignore
            .matched_path_or_any_parents(path, false)
            .is_ignore()
    }

    /// Lists absolute paths of all candidate files under the root.
    ///
    /// Honors gitignore chains and the built-in rules. Does not read file
    /// contents; pair with [`read_file`](Self::read_file).
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false)
            .follow_links(false);

        if !self.ignore_extra.is_empty() {
            let mut overrides = OverrideBuilder::new(&self.root);
            for pattern in &self.ignore_extra {
                // Overrides are whitelists; a leading '!' turns the glob
                // into an ignore rule.
                overrides
                    .add(&format!("!{pattern}"))
                    .map_err(|e| Error::Config(format!("bad ignore pattern {pattern:?}: {e}")))?;
            }
            let overrides = overrides
                .build()
                .map_err(|e| Error::Config(format!("bad ignore patterns: {e}")))?;
            builder.overrides(overrides);
        }

        let mut files = Vec::new();
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("scan: skipping unreadable entry: {e}");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            if path.components().any(|c| c.as_os_str() == DATA_DIR_NAME) {
                continue;
            }
            if is_binary_extension(path) {
                continue;
            }
            files.push(path.to_path_buf());
        }
        files.sort();
        Ok(files)
    }

    /// Reads one candidate file, producing its record and contents.
    ///
    /// # Errors
    /// Returns [`Error::Io`] for unreadable, oversized, or binary files.
    /// Callers treat these as per-file skips.
    pub fn read_file(&self, abs_path: &Path) -> Result<ScannedFile> {
        let metadata = std::fs::metadata(abs_path)
            .map_err(|e| Error::Io(format!("{}: {e}", abs_path.display())))?;
        if metadata.len() > self.max_file_size {
            return Err(Error::Io(format!(
                "{}: exceeds max file size ({} > {})",
                abs_path.display(),
                metadata.len(),
                self.max_file_size
            )));
        }
        let bytes = std::fs::read(abs_path)
            .map_err(|e| Error::Io(format!("{}: {e}", abs_path.display())))?;
        if bytes.contains(&0) {
            return Err(Error::Io(format!(
                "{}: binary content",
                abs_path.display()
            )));
        }
        let contents = String::from_utf8(bytes.clone())
            .map_err(|_| Error::Io(format!("{}: not valid UTF-8", abs_path.display())))?;

        let rel = abs_path
            .strip_prefix(&self.root)
            .unwrap_or(abs_path)
            .to_string_lossy()
            .replace('\\', "/");

        let record = FileRecord {
            path: rel,
            abs_path: abs_path.to_path_buf(),
            size: metadata.len(),
            hash: content_hash(&bytes),
            language: detect_language(abs_path),
            preview: preview_of(&contents),
            indexed_at: current_timestamp(),
        };
        Ok(ScannedFile { record, contents })
    }

    /// Discovers and reads all candidate files, skipping per-file failures.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        let mut scanned = Vec::new();
        for path in self.discover()? {
            match self.read_file(&path) {
                Ok(file) => scanned.push(file),
                Err(e) => debug!("scan: skipping {}: {e}", path.display()),
            }
        }
        Ok(scanned)
    }

    /// Diffs a scan against the known records.
    pub fn diff(scanned: Vec<ScannedFile>, existing: &HashMap<String, FileRecord>) -> ScanDiff {
        let mut diff = ScanDiff::default();
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        for file in scanned {
            seen.insert(file.record.path.clone());
            match existing.get(&file.record.path) {
                None => diff.added.push(file),
                Some(record) if record.hash != file.record.hash => diff.changed.push(file),
                Some(_) => diff.unchanged += 1,
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
}

/// Hex SHA-256 digest of a byte slice.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// First [`PREVIEW_CHARS`] characters of `contents`.
pub fn preview_of(contents: &str) -> String {
    contents.chars().take(PREVIEW_CHARS).collect()
}

/// Seconds since the Unix epoch; 0 if the clock is before it.
pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn is_binary_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| BINARY_EXTENSIONS.contains(&e.as_str()))
}

/// Maps a file extension to a language tag.
pub fn detect_language(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let tag = match ext.as_str() {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" => "python",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "sh" | "bash" => "shell",
        "kt" | "kts" => "kotlin",
        "swift" => "swift",
        "php" => "php",
        "md" | "markdown" => "markdown",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "html" | "htm" => "html",
        "css" => "css",
        "sql" => "sql",
        _ => return None,
    };
    Some(tag.to_string())
}
