//! The durable task queue.
//!
//! Extraction is driven by tasks, not by in-process timers: "step this job in
//! 500 ms" is a row, so scheduled work survives a restart. The worker claims
//! the oldest due task, executes it, and enqueues follow-ups.
//!
//! Claiming deletes the row. A crash between claim and completion is healed
//! at worker startup by [`Store::running_jobs_without_tasks`] plus an
//! immediate re-enqueue; steps are idempotent, so the occasional duplicate
//! delivery is harmless.

use rusqlite::{params, OptionalExtension, Row};

use super::Store;
use crate::error::{StoreError, StoreResult};

/// What a queued task asks the worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    /// Run one extraction step for `job_id`.
    Step,
    /// Resume a paused `job_id` (clearing its error), then step. Scheduled
    /// only after a retryable model-call failure.
    Retry,
    /// Generate study notes for (`document_id`, `page`).
    PageNotes,
    /// Combine all page notes for `document_id` into chapter notes.
    CombineNotes,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Step => "step",
            TaskKind::Retry => "retry",
            TaskKind::PageNotes => "page_notes",
            TaskKind::CombineNotes => "combine_notes",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "step" => Some(TaskKind::Step),
            "retry" => Some(TaskKind::Retry),
            "page_notes" => Some(TaskKind::PageNotes),
            "combine_notes" => Some(TaskKind::CombineNotes),
            _ => None,
        }
    }
}

/// One queued unit of work.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: i64,
    pub kind: TaskKind,
    pub job_id: Option<i64>,
    pub document_id: String,
    pub page: Option<u32>,
    pub run_at: i64,
}

impl Task {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind: String = row.get("kind")?;
        Ok(Self {
            id: row.get("id")?,
            // Unknown kinds cannot appear; the column is only written via
            // TaskKind::as_str.
            kind: TaskKind::parse(&kind).unwrap_or(TaskKind::Step),
            job_id: row.get("job_id")?,
            document_id: row.get("document_id")?,
            page: row.get::<_, Option<i64>>("page")?.map(|p| p as u32),
            run_at: row.get("run_at")?,
        })
    }
}

impl Store {
    /// Enqueue a task to run at (or after) `run_at` unix-ms.
    pub fn enqueue_task(
        &self,
        kind: TaskKind,
        job_id: Option<i64>,
        document_id: &str,
        page: Option<u32>,
        run_at: i64,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (kind, job_id, document_id, page, run_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                kind.as_str(),
                job_id,
                document_id,
                page.map(|p| p as i64),
                run_at
            ],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Claim the oldest due task, removing it from the queue. Due means
    /// `run_at <= now`; ties break on insertion order.
    pub fn claim_due_task(&self, now: i64) -> StoreResult<Option<Task>> {
        let conn = self.conn.lock().unwrap();
        let task = conn
            .query_row(
                "SELECT id, kind, job_id, document_id, page, run_at FROM tasks \
                 WHERE run_at <= ?1 ORDER BY run_at, id LIMIT 1",
                [now],
                Task::from_row,
            )
            .optional()
            .map_err(StoreError::Query)?;

        if let Some(ref task) = task {
            conn.execute("DELETE FROM tasks WHERE id = ?1", [task.id])
                .map_err(StoreError::Query)?;
        }
        Ok(task)
    }

    /// How many tasks are queued (due or not). Lets callers poll for drain.
    pub fn pending_task_count(&self) -> StoreResult<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .map_err(StoreError::Query)?;
        Ok(count as u32)
    }
}
