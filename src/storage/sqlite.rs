//! SQLite-backed persistent store.
//!
//! Holds the durable half of the index: file records, per-document term
//! frequencies (postings), document lengths and norms, the IDF table, and a
//! small metadata map. The in-memory engines are rebuilt from this store on
//! open.
//!
//! Two write patterns: [`bulk_replace`](SqliteStore::bulk_replace) rewrites
//! the whole dataset inside a single transaction with prepared statements
//! (initial indexing and full rebuilds), and point updates
//! ([`upsert_entry`](SqliteStore::upsert_entry),
//! [`delete_path`](SqliteStore::delete_path),
//! [`update_idf`](SqliteStore::update_idf)) for incremental changes.
//!
//! The schema version lives in `PRAGMA user_version`; opening applies
//! forward migrations and refuses versions newer than it understands. The
//! database file is owned by a single process for the lifetime of the
//! orchestrator.

use crate::error::{Error, Result};
use crate::scanner::FileRecord;
use crate::search::lexical::idf_value;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Current schema version. Version 1 lacked the `preview` column.
const SCHEMA_VERSION: i32 = 2;

/// One document's durable state: identity plus its tokenized view.
#[derive(Debug, Clone)]
pub struct StoreEntry {
    pub record: FileRecord,
    pub tf: HashMap<String, u32>,
    pub length: u64,
    pub norm: f32,
}

/// Durable relational store for the index.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the store at `path`, applying forward migrations.
    ///
    /// # Errors
    /// [`Error::IndexCorruption`] for unreadable databases or unknown future
    /// schema versions; the orchestrator may discard the file and rebuild.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        // Touch the schema table first: a corrupt file fails here with
        // NotADatabase, which maps to IndexCorruption.
        let _: i64 = conn.query_row("SELECT count(*) FROM sqlite_master", [], |r| r.get(0))?;

        conn.query_row("PRAGMA journal_mode = WAL", [], |_row| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        match version {
            0 => {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS files (
                        path       TEXT PRIMARY KEY,
                        abs_path   TEXT NOT NULL,
                        size       INTEGER NOT NULL,
                        hash       TEXT NOT NULL,
                        language   TEXT,
                        preview    TEXT NOT NULL DEFAULT '',
                        indexed_at INTEGER NOT NULL
                    );
                    CREATE TABLE IF NOT EXISTS documents (
                        path   TEXT PRIMARY KEY,
                        length INTEGER NOT NULL,
                        norm   REAL NOT NULL
                    );
                    CREATE TABLE IF NOT EXISTS postings (
                        term TEXT NOT NULL,
                        path TEXT NOT NULL,
                        tf   INTEGER NOT NULL,
                        PRIMARY KEY (term, path)
                    );
                    CREATE INDEX IF NOT EXISTS idx_postings_path ON postings(path);
                    CREATE TABLE IF NOT EXISTS idf (
                        term TEXT PRIMARY KEY,
                        df   INTEGER NOT NULL,
                        idf  REAL NOT NULL
                    );
                    CREATE TABLE IF NOT EXISTS meta (
                        key   TEXT PRIMARY KEY,
                        value TEXT NOT NULL
                    );",
                )?;
                conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
                debug!("initialized store schema at version {SCHEMA_VERSION}");
            }
            1 => {
                info!("migrating store schema 1 -> {SCHEMA_VERSION}");
                conn.execute_batch(
                    "ALTER TABLE files ADD COLUMN preview TEXT NOT NULL DEFAULT '';",
                )?;
                conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            }
            SCHEMA_VERSION => {}
            newer => {
                return Err(Error::IndexCorruption(format!(
                    "store schema version {newer} is newer than supported {SCHEMA_VERSION}"
                )));
            }
        }
        Ok(Self { conn })
    }

    /// Loads every document with its term frequencies.
    pub fn load_entries(&self) -> Result<Vec<StoreEntry>> {
        let mut records: HashMap<String, (FileRecord, u64, f32)> = HashMap::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT f.path, f.abs_path, f.size, f.hash, f.language, f.preview,
                        f.indexed_at, d.length, d.norm
                 FROM files f JOIN documents d ON d.path = f.path",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    FileRecord {
                        path: row.get(0)?,
                        abs_path: PathBuf::from(row.get::<_, String>(1)?),
                        size: row.get::<_, i64>(2)? as u64,
                        hash: row.get(3)?,
                        language: row.get(4)?,
                        preview: row.get(5)?,
                        indexed_at: row.get::<_, i64>(6)? as u64,
                    },
                    row.get::<_, i64>(7)? as u64,
                    row.get::<_, f64>(8)? as f32,
                ))
            })?;
            for row in rows {
                let (record, length, norm) = row?;
                records.insert(record.path.clone(), (record, length, norm));
            }
        }

        let mut tf_by_path: HashMap<String, HashMap<String, u32>> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT term, path, tf FROM postings")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)? as u32,
                ))
            })?;
            for row in rows {
                let (term, path, tf) = row?;
                tf_by_path.entry(path).or_default().insert(term, tf);
            }
        }

        let mut entries: Vec<StoreEntry> = records
            .into_iter()
            .map(|(path, (record, length, norm))| StoreEntry {
                record,
                tf: tf_by_path.remove(&path).unwrap_or_default(),
                length,
                norm,
            })
            .collect();
        entries.sort_by(|a, b| a.record.path.cmp(&b.record.path));
        Ok(entries)
    }

    /// Replaces the entire dataset inside one transaction.
    ///
    /// `idf` rows are `(term, df, idf)` computed by the caller over the
    /// final document set.
    pub fn bulk_replace(
        &mut self,
        entries: &[StoreEntry],
        idf: &[(String, u32, f32)],
    ) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM postings; DELETE FROM documents; DELETE FROM files; DELETE FROM idf;",
        )?;
        {
            let mut insert_file = tx.prepare(
                "INSERT INTO files (path, abs_path, size, hash, language, preview, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut insert_doc =
                tx.prepare("INSERT INTO documents (path, length, norm) VALUES (?1, ?2, ?3)")?;
            let mut insert_posting =
                tx.prepare("INSERT INTO postings (term, path, tf) VALUES (?1, ?2, ?3)")?;
            let mut insert_idf =
                tx.prepare("INSERT INTO idf (term, df, idf) VALUES (?1, ?2, ?3)")?;

            for entry in entries {
                let r = &entry.record;
                insert_file.execute(params![
                    r.path,
                    r.abs_path.to_string_lossy(),
                    r.size as i64,
                    r.hash,
                    r.language,
                    r.preview,
                    r.indexed_at as i64,
                ])?;
                insert_doc.execute(params![r.path, entry.length as i64, entry.norm as f64])?;
                for (term, tf) in &entry.tf {
                    insert_posting.execute(params![term, r.path, *tf as i64])?;
                }
            }
            for (term, df, idf_value) in idf {
                insert_idf.execute(params![term, *df as i64, *idf_value as f64])?;
            }
        }
        tx.commit()?;
        debug!("bulk replace: {} documents", entries.len());
        Ok(())
    }

    /// Inserts or replaces one document and its postings.
    pub fn upsert_entry(&mut self, entry: &StoreEntry) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let r = &entry.record;
            tx.execute(
                "INSERT INTO files (path, abs_path, size, hash, language, preview, indexed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(path) DO UPDATE SET
                    abs_path = excluded.abs_path,
                    size = excluded.size,
                    hash = excluded.hash,
                    language = excluded.language,
                    preview = excluded.preview,
                    indexed_at = excluded.indexed_at",
                params![
                    r.path,
                    r.abs_path.to_string_lossy(),
                    r.size as i64,
                    r.hash,
                    r.language,
                    r.preview,
                    r.indexed_at as i64,
                ],
            )?;
            tx.execute(
                "INSERT INTO documents (path, length, norm) VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE SET length = excluded.length, norm = excluded.norm",
                params![r.path, entry.length as i64, entry.norm as f64],
            )?;
            tx.execute("DELETE FROM postings WHERE path = ?1", params![r.path])?;
            let mut insert_posting =
                tx.prepare("INSERT INTO postings (term, path, tf) VALUES (?1, ?2, ?3)")?;
            for (term, tf) in &entry.tf {
                insert_posting.execute(params![term, r.path, *tf as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Removes one document, its postings, and its file record.
    pub fn delete_path(&mut self, path: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM postings WHERE path = ?1", params![path])?;
        tx.execute("DELETE FROM documents WHERE path = ?1", params![path])?;
        tx.execute("DELETE FROM files WHERE path = ?1", params![path])?;
        tx.commit()?;
        Ok(())
    }

    /// Applies df changes to the IDF table and refreshes every idf value
    /// against the current document count.
    ///
    /// `changed` maps a term to its new df, or `None` when the term was
    /// purged. The full refresh is required because idf depends on the
    /// document count, which moves with every add or remove.
    pub fn update_idf(&mut self, doc_count: usize, changed: &[(String, Option<u32>)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut upsert = tx.prepare(
                "INSERT INTO idf (term, df, idf) VALUES (?1, ?2, 0.0)
                 ON CONFLICT(term) DO UPDATE SET df = excluded.df",
            )?;
            let mut delete = tx.prepare("DELETE FROM idf WHERE term = ?1")?;
            for (term, df) in changed {
                match df {
                    Some(df) => {
                        upsert.execute(params![term, *df as i64])?;
                    }
                    None => {
                        delete.execute(params![term])?;
                    }
                }
            }

            let terms: Vec<(String, u32)> = {
                let mut stmt = tx.prepare("SELECT term, df FROM idf")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u32))
                })?;
                rows.collect::<std::result::Result<_, _>>()?
            };
            let mut refresh = tx.prepare("UPDATE idf SET idf = ?1 WHERE term = ?2")?;
            for (term, df) in terms {
                refresh.execute(params![f64::from(idf_value(doc_count, df)), term])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of file records.
    pub fn file_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM files", [], |r| r.get(0))?;
        Ok(count as usize)
    }

    pub fn put_meta(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |r| {
                r.get(0)
            })
            .optional()?)
    }

    /// All `(term, df, idf)` rows, for invariant checks.
    pub fn idf_rows(&self) -> Result<Vec<(String, u32, f32)>> {
        let mut stmt = self.conn.prepare("SELECT term, df, idf FROM idf ORDER BY term")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as u32,
                row.get::<_, f64>(2)? as f32,
            ))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }
}
