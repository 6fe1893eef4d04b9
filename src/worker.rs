//! The task-queue worker.
//!
//! A single polling loop drains the durable queue: claim the oldest due
//! task, execute it, enqueue whatever follows. All scheduling decisions —
//! the 500 ms pacing between pages, the 60 s retry after a model failure,
//! the notes re-runs — are expressed as `run_at` timestamps on queued rows,
//! so they survive a restart.
//!
//! The loop never dies: every error is logged and the loop moves on.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::StoreResult;
use crate::job::StepOutcome;
use crate::notes::NotesOutcome;
use crate::pipeline::{ChatTransport, PageRasterizer, SourceFetcher};
use crate::service::Extractor;
use crate::store::{now_ms, Store, Task, TaskKind};

/// Spawn the worker loop for an extractor. Orphaned running jobs are
/// re-queued first, then the loop polls until the handle is aborted.
pub fn start<F, R, T>(extractor: Arc<Extractor<F, R, T>>) -> JoinHandle<()>
where
    F: SourceFetcher,
    R: PageRasterizer,
    T: ChatTransport,
{
    tokio::spawn(async move {
        if let Err(e) = requeue_orphaned_jobs(extractor.store()) {
            error!(%e, "failed to requeue orphaned jobs");
        }

        let poll = std::time::Duration::from_millis(extractor.config().poll_interval_ms);
        loop {
            match extractor.store().claim_due_task(now_ms()) {
                Ok(Some(task)) => {
                    if let Err(e) = execute_task(&extractor, &task).await {
                        error!(task_id = task.id, kind = task.kind.as_str(), %e,
                               "task execution hit a storage error");
                    }
                }
                Ok(None) => tokio::time::sleep(poll).await,
                Err(e) => {
                    error!(%e, "failed to claim a task");
                    tokio::time::sleep(poll).await;
                }
            }
        }
    })
}

/// Enqueue an immediate step for every `running` job with no queued task.
///
/// Such jobs exist only after a crash between task claim and completion;
/// without this they would stay `running` forever with nothing driving them.
pub fn requeue_orphaned_jobs(store: &Store) -> StoreResult<usize> {
    let orphans = store.running_jobs_without_tasks()?;
    for &job_id in &orphans {
        if let Some(job) = store.get_job(job_id)? {
            info!(job_id, document_id = %job.document_id, "re-queuing orphaned running job");
            store.enqueue_task(TaskKind::Step, Some(job_id), &job.document_id, None, now_ms())?;
        }
    }
    Ok(orphans.len())
}

/// Execute one claimed task and enqueue its follow-up work.
pub async fn execute_task<F, R, T>(
    extractor: &Extractor<F, R, T>,
    task: &Task,
) -> StoreResult<()>
where
    F: SourceFetcher,
    R: PageRasterizer,
    T: ChatTransport,
{
    let store = extractor.store();
    let config = extractor.config();

    match task.kind {
        TaskKind::Step => {
            let Some(job_id) = task.job_id else {
                warn!(task_id = task.id, "step task without a job id");
                return Ok(());
            };
            let outcome = extractor.run_step(job_id).await?;
            schedule_followup(store, config, job_id, &task.document_id, outcome)
        }
        TaskKind::Retry => {
            let Some(job_id) = task.job_id else {
                warn!(task_id = task.id, "retry task without a job id");
                return Ok(());
            };
            // Clear the pause before stepping. A no-op if the job was
            // force-restarted or completed while the retry sat in the queue.
            store.resume_job(job_id)?;
            let outcome = extractor.run_step(job_id).await?;
            schedule_followup(store, config, job_id, &task.document_id, outcome)
        }
        TaskKind::PageNotes => {
            let Some(page) = task.page else {
                warn!(task_id = task.id, "page-notes task without a page number");
                return Ok(());
            };
            let outcome = extractor.generate_page_notes(&task.document_id, page).await?;
            if outcome == NotesOutcome::Failed {
                store.enqueue_task(
                    TaskKind::PageNotes,
                    task.job_id,
                    &task.document_id,
                    Some(page),
                    now_ms() + config.notes_retry_delay_ms as i64,
                )?;
            }
            Ok(())
        }
        TaskKind::CombineNotes => extractor.combine_notes(&task.document_id).await,
    }
}

fn schedule_followup(
    store: &Store,
    config: &crate::config::ExtractorConfig,
    job_id: i64,
    document_id: &str,
    outcome: StepOutcome,
) -> StoreResult<()> {
    match outcome {
        StepOutcome::Progressed => store.enqueue_task(
            TaskKind::Step,
            Some(job_id),
            document_id,
            None,
            now_ms() + config.step_delay_ms as i64,
        ),
        StepOutcome::Paused { retryable: true } => store.enqueue_task(
            TaskKind::Retry,
            Some(job_id),
            document_id,
            None,
            now_ms() + config.model_retry_delay_ms as i64,
        ),
        StepOutcome::Completed => store.enqueue_task(
            TaskKind::CombineNotes,
            Some(job_id),
            document_id,
            None,
            now_ms(),
        ),
        StepOutcome::Skipped | StepOutcome::Paused { retryable: false } => Ok(()),
    }
}
