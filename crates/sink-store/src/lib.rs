//! The index store: a durable `path -> (digest, size, count, mtime, status,
//! report)` mapping backed by SQLite, plus duplicate-lookup queries.
//!
//! One file (`reports`/`files`, per spec.md §6) holds every indexed path.
//! Writes commit per upsert so the store survives a crash between any two
//! writes; readers run concurrently under SQLite's WAL mode.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown status: {0}")]
    UnknownStatus(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Processing status of a [`PathRecord`]. Only `Completed` records
/// participate in queries by default (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Completed,
    /// Reserved for future intermediate states (e.g. `in-progress`); stored
    /// verbatim so forward-incompatible writers don't lose information.
    Other,
}

impl Status {
    fn as_str(self) -> &'static str {
        match self {
            Status::Completed => "completed",
            Status::Other => "other",
        }
    }

    fn parse(s: &str) -> Status {
        match s {
            "completed" => Status::Completed,
            _ => Status::Other,
        }
    }
}

/// One row of the `files` table: a path's content fingerprint and metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRecord {
    pub path: String,
    pub digest: String,
    pub is_dir: bool,
    pub count: u64,
    pub size: u64,
    pub mtime: f64,
    pub status: Status,
    pub report_id: i64,
}

/// One row of the `reports` table: a labeled batch of index upserts.
#[derive(Debug, Clone)]
pub struct Report {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub description: Option<String>,
}

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS reports (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        created_at TEXT NOT NULL,
        description TEXT
    );

    CREATE TABLE IF NOT EXISTS files (
        path TEXT PRIMARY KEY,
        report INTEGER NOT NULL REFERENCES reports(id),
        status TEXT NOT NULL,
        hash TEXT NOT NULL,
        is_dir INTEGER NOT NULL DEFAULT 0,
        filecount INTEGER NOT NULL,
        filesize INTEGER NOT NULL,
        modification_time REAL NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_files_hash ON files(hash);
";

/// The content-fingerprint index: a single-file SQLite database.
pub struct IndexStore {
    conn: Connection,
    db_path: PathBuf,
}

impl IndexStore {
    /// Opens (creating if necessary) the index database at `db_path`.
    pub fn open(db_path: &Path) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self { conn, db_path: db_path.to_path_buf() })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// The index store's own file is excluded from all traversals (spec.md §3).
    pub fn is_own_file(&self, path: &Path) -> bool {
        match (path.canonicalize(), self.db_path.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => path == self.db_path,
        }
    }

    /// Starts a new report, returning its id.
    pub fn new_report(&self, description: Option<&str>) -> StoreResult<i64> {
        self.conn.execute(
            "INSERT INTO reports (created_at, description) VALUES (?1, ?2)",
            params![Utc::now().to_rfc3339(), description],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Looks up a report by id.
    pub fn get_report(&self, id: i64) -> StoreResult<Option<Report>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, created_at, description FROM reports WHERE id = ?1",
        )?;
        let report = stmt
            .query_row(params![id], |row| {
                let created_at: String = row.get(1)?;
                Ok(Report {
                    id: row.get(0)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    description: row.get(2)?,
                })
            })
            .optional()?;
        Ok(report)
    }

    pub fn exists(&self, path: &str, status: Status) -> StoreResult<bool> {
        Ok(self.lookup(path, status)?.is_some())
    }

    pub fn lookup(&self, path: &str, status: Status) -> StoreResult<Option<PathRecord>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT path, hash, is_dir, filecount, filesize, modification_time, status, report
             FROM files WHERE path = ?1 AND status = ?2",
        )?;
        let record = stmt
            .query_row(params![path, status.as_str()], Self::row_to_record)
            .optional()?;
        Ok(record)
    }

    /// Inserts or replaces a record by path.
    pub fn upsert(&self, record: &PathRecord) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO files
                (path, report, status, hash, is_dir, filecount, filesize, modification_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.path,
                record.report_id,
                record.status.as_str(),
                record.digest,
                record.is_dir as i64,
                record.count as i64,
                record.size as i64,
                record.mtime,
            ],
        )?;
        Ok(())
    }

    /// All records under `root_prefix` (or every record, if `None`) with the
    /// given status. `root_prefix` matches itself and any path nested under
    /// it as a path component, never a sibling with the same string prefix
    /// (e.g. `/data` does not match `/data2`).
    pub fn iter_all(&self, root_prefix: Option<&str>, status: Status) -> StoreResult<Vec<PathRecord>> {
        let records = match root_prefix {
            Some(prefix) => {
                let mut stmt = self.conn.prepare(
                    "SELECT path, hash, is_dir, filecount, filesize, modification_time, status, report
                     FROM files WHERE status = ?1 AND (path = ?2 OR path LIKE ?3 ESCAPE '\\')",
                )?;
                stmt.query_map(
                    params![status.as_str(), prefix, nested_pattern(prefix)],
                    Self::row_to_record,
                )?
                .collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT path, hash, is_dir, filecount, filesize, modification_time, status, report
                     FROM files WHERE status = ?1",
                )?;
                stmt.query_map(params![status.as_str()], Self::row_to_record)?
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(records)
    }

    /// Records whose digest appears at least twice with `size > 0`, bounded
    /// to `root_prefix` if given. The `size > 0` filter suppresses the
    /// enormous equivalence class of empty files/directories (spec.md §4.2).
    pub fn iter_duplicates(&self, root_prefix: Option<&str>) -> StoreResult<Vec<PathRecord>> {
        let sql = "
            SELECT path, hash, is_dir, filecount, filesize, modification_time, status, report
            FROM files
            WHERE status = ?1
              AND filesize > 0
              AND (?2 IS NULL OR path = ?2 OR path LIKE ?3 ESCAPE '\\')
              AND hash IN (
                  SELECT hash FROM files
                  WHERE status = ?1 AND filesize > 0 AND (?2 IS NULL OR path = ?2 OR path LIKE ?3 ESCAPE '\\')
                  GROUP BY hash HAVING COUNT(*) >= 2
              )
        ";
        let mut stmt = self.conn.prepare(sql)?;
        let pattern = root_prefix.map(nested_pattern);
        let records = stmt
            .query_map(params![Status::Completed.as_str(), root_prefix, pattern], Self::row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<PathRecord> {
        let status_str: String = row.get(6)?;
        Ok(PathRecord {
            path: row.get(0)?,
            digest: row.get(1)?,
            is_dir: row.get::<_, i64>(2)? != 0,
            count: row.get::<_, i64>(3)? as u64,
            size: row.get::<_, i64>(4)? as u64,
            mtime: row.get(5)?,
            status: Status::parse(&status_str),
            report_id: row.get(7)?,
        })
    }
}

/// Escapes `LIKE`'s own wildcard characters (`%`, `_`) and the escape
/// character itself, so a literal path prefix containing either (e.g. the
/// very common `_` in `/home/user_data`) cannot be misinterpreted as a
/// wildcard and match unrelated sibling paths.
fn escape_like(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        if c == '\\' || c == '%' || c == '_' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn nested_pattern(prefix: &str) -> String {
    let escaped = escape_like(prefix);
    if escaped.ends_with('/') {
        format!("{escaped}%")
    } else {
        format!("{escaped}/%")
    }
}
