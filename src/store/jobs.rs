//! Extraction job rows and their lifecycle mutations.
//!
//! The job row is the single source of truth for a document's extraction
//! progress: the cursor (`next_page`), the status, the last error, and model
//! bookkeeping. Every mutation here touches `updated_at` so "is this job
//! stuck" is answerable from the row alone.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_ms, Store};
use crate::error::{StoreError, StoreResult};

/// Lifecycle state of an extraction job.
///
/// There is no terminal failure state: a job that hit an error is `Paused`
/// with `last_error` set, and can always be resumed or force-restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Paused,
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            _ => None,
        }
    }
}

/// One extraction job row.
///
/// Invariant: `1 <= next_page <= total_pages + 1`. The cursor equal to
/// `total_pages + 1` means every page is done and the job is (or is about to
/// be) `Completed`.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub id: i64,
    pub document_id: String,
    pub source_url: String,
    pub total_pages: u32,
    pub next_page: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub last_primary_model: Option<String>,
    pub last_used_model: Option<String>,
    pub fallback_active: bool,
    pub owner: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl ExtractionJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let status: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            source_url: row.get("source_url")?,
            total_pages: row.get::<_, i64>("total_pages")? as u32,
            next_page: row.get::<_, i64>("next_page")? as u32,
            status: JobStatus::parse(&status).unwrap_or(JobStatus::Paused),
            last_error: row.get("last_error")?,
            last_primary_model: row.get("last_primary_model")?,
            last_used_model: row.get("last_used_model")?,
            fallback_active: row.get::<_, i64>("fallback_active")? != 0,
            owner: row.get("owner")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

const JOB_COLUMNS: &str = "id, document_id, source_url, total_pages, next_page, status, \
     last_error, last_primary_model, last_used_model, fallback_active, owner, \
     created_at, updated_at, started_at, completed_at";

impl Store {
    /// Insert a fresh `running` job with its cursor at page 1.
    pub fn insert_job(
        &self,
        document_id: &str,
        source_url: &str,
        total_pages: u32,
        owner: &str,
    ) -> StoreResult<ExtractionJob> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        conn.execute(
            "INSERT INTO jobs (document_id, source_url, total_pages, next_page, status, \
             owner, created_at, updated_at, started_at) \
             VALUES (?1, ?2, ?3, 1, 'running', ?4, ?5, ?5, ?5)",
            params![document_id, source_url, total_pages as i64, owner, now],
        )
        .map_err(StoreError::Query)?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_job(id)?
            .ok_or(StoreError::Query(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Fetch a job by id.
    pub fn get_job(&self, id: i64) -> StoreResult<Option<ExtractionJob>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
            [id],
            ExtractionJob::from_row,
        )
        .optional()
        .map_err(StoreError::Query)
    }

    /// The most recently created job for a document, regardless of status.
    pub fn latest_job_for_document(&self, document_id: &str) -> StoreResult<Option<ExtractionJob>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE document_id = ?1 ORDER BY id DESC LIMIT 1"),
            [document_id],
            ExtractionJob::from_row,
        )
        .optional()
        .map_err(StoreError::Query)
    }

    /// Force-restart: cursor back to 1, status running, error and completion
    /// timestamp cleared. Source URL and page count are refreshed because a
    /// restart may follow a re-upload of the document.
    pub fn restart_job(
        &self,
        id: i64,
        source_url: &str,
        total_pages: u32,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET source_url = ?2, total_pages = ?3, next_page = 1, \
             status = 'running', last_error = NULL, completed_at = NULL, \
             started_at = ?4, updated_at = ?4 WHERE id = ?1",
            params![id, source_url, total_pages as i64, now_ms()],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Move the cursor forward after a page (or a run of already-present
    /// pages) is done.
    pub fn advance_cursor(&self, id: i64, next_page: u32) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET next_page = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, next_page as i64, now_ms()],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Park the job with a human-readable error. The cursor is untouched so a
    /// later resume picks up exactly where the failure happened.
    pub fn set_job_paused(&self, id: i64, error: &str) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'paused', last_error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, error, now_ms()],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Resume a paused job: back to running with the error cleared. A no-op
    /// for any other status, so a stale retry task cannot disturb a job that
    /// was force-restarted or completed in the meantime.
    pub fn resume_job(&self, id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET status = 'running', last_error = NULL, updated_at = ?2 \
             WHERE id = ?1 AND status = 'paused'",
            params![id, now_ms()],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Mark the job completed. The cursor stays at `total_pages + 1`.
    pub fn complete_job(&self, id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        conn.execute(
            "UPDATE jobs SET status = 'completed', last_error = NULL, \
             completed_at = ?2, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Record which model actually answered the last successful page call.
    /// `fallback_active` flags that the provider routed past the primary.
    pub fn record_model_info(
        &self,
        id: i64,
        primary_model: &str,
        used_model: &str,
    ) -> StoreResult<()> {
        let fallback_active = primary_model != used_model;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE jobs SET last_primary_model = ?2, last_used_model = ?3, \
             fallback_active = ?4, updated_at = ?5 WHERE id = ?1",
            params![id, primary_model, used_model, fallback_active as i64, now_ms()],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Ids of `running` jobs that have no queued task. After a crash between
    /// task claim and completion these jobs would otherwise sit forever.
    pub fn running_jobs_without_tasks(&self) -> StoreResult<Vec<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id FROM jobs WHERE status = 'running' \
                 AND id NOT IN (SELECT job_id FROM tasks WHERE job_id IS NOT NULL)",
            )
            .map_err(StoreError::Query)?;
        let ids = stmt
            .query_map([], |row| row.get(0))
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<i64>, _>>()
            .map_err(StoreError::Query)?;
        Ok(ids)
    }
}
