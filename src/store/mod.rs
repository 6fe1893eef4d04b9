//! SQLite persistence for jobs, page texts, notes, and the task queue.
//!
//! All state that must survive a process restart lives here: the extraction
//! jobs themselves, every transcribed page, generated notes, and the durable
//! task queue that drives the worker. A single [`Store`] wraps one SQLite
//! connection behind a mutex; page-at-a-time jobs never produce enough write
//! pressure to justify a pool.
//!
//! Operations are organised into submodules by domain and exposed as inherent
//! methods on `Store`.

mod jobs;
mod notes;
mod pages;
mod queue;

pub use jobs::{ExtractionJob, JobStatus};
pub use notes::{ChapterNotes, PageNotes};
pub use pages::PageText;
pub use queue::{Task, TaskKind};

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::error::{StoreError, StoreResult};

/// SQLite-backed store for all durable extraction state.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Migration {
                message: format!("cannot create database directory: {e}"),
            })?;
        }

        let conn = Connection::open(path).map_err(StoreError::Connection)?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Used by tests and one-shot CLI runs
    /// that do not need resumability.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::Connection)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        // WAL so status reads never block a step mid-write.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(StoreError::Query)?;

        run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Delete everything stored for a document: jobs, page texts, page notes,
    /// chapter notes, and any queued tasks. Administrative reset; a following
    /// trigger starts from a blank slate.
    pub fn reset_document(&self, document_id: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        for table in ["tasks", "chapter_notes", "page_notes", "page_texts", "jobs"] {
            conn.execute(
                &format!("DELETE FROM {table} WHERE document_id = ?1"),
                [document_id],
            )
            .map_err(StoreError::Query)?;
        }
        Ok(())
    }
}

/// Current time as unix milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        r#"
        -- Extraction jobs, one row per trigger/restart. The latest job for a
        -- document is the row with the highest id.
        CREATE TABLE IF NOT EXISTS jobs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            source_url TEXT NOT NULL,
            total_pages INTEGER NOT NULL,
            next_page INTEGER NOT NULL DEFAULT 1,
            status TEXT NOT NULL DEFAULT 'running',
            last_error TEXT,
            last_primary_model TEXT,
            last_used_model TEXT,
            fallback_active INTEGER NOT NULL DEFAULT 0,
            owner TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_jobs_document ON jobs(document_id, id);

        -- One transcription per (document, page); re-extraction patches in
        -- place rather than inserting a second row.
        CREATE TABLE IF NOT EXISTS page_texts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            content TEXT NOT NULL,
            model TEXT NOT NULL,
            owner TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(document_id, page_number)
        );

        CREATE TABLE IF NOT EXISTS page_notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            notes TEXT NOT NULL,
            model TEXT NOT NULL,
            owner TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, page_number)
        );

        CREATE TABLE IF NOT EXISTS chapter_notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            document_id TEXT NOT NULL UNIQUE,
            title TEXT,
            content TEXT NOT NULL DEFAULT '',
            model TEXT,
            owner TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        -- Durable task queue. Tasks are deleted on claim; orphan recovery at
        -- worker startup covers a crash between claim and completion.
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kind TEXT NOT NULL,
            job_id INTEGER,
            document_id TEXT NOT NULL,
            page INTEGER,
            run_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tasks_due ON tasks(run_at, id);
        "#,
    )
    .map_err(|e| StoreError::Migration {
        message: e.to_string(),
    })
}
