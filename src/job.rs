//! The extraction step: the heart of the state machine.
//!
//! One step takes one job through at most [`STEP_BATCH_SIZE`] fresh pages:
//! download the source, skip pages already transcribed, render → encode →
//! transcribe the next missing one, persist, advance the cursor. Every
//! failure is converted into a `paused` status plus `last_error` on the job
//! row — a step never returns an error for anything the model, network, or
//! document did wrong. Only storage failures propagate, and the worker logs
//! those.
//!
//! Failure handling is deliberately asymmetric. Model-call failures are
//! usually transient (rate limits, provider hiccups), so they pause with a
//! scheduled automatic retry. Download and render failures mean the source
//! itself is bad; retrying burns rate limit for nothing, so those pauses wait
//! for an explicit restart.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::pipeline::{encode, ChatTransport, PageRasterizer, SourceFetcher};
use crate::prompts;
use crate::service::Extractor;
use crate::store::{now_ms, JobStatus, TaskKind};

/// Fresh pages transcribed per step. Strictly one: each page completion
/// yields back to the queue so rate-limit pacing applies between every pair
/// of model calls.
pub const STEP_BATCH_SIZE: u32 = 1;

/// What one step did, which tells the worker what to schedule next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Job missing or not running; nothing was done and nothing follows.
    Skipped,
    /// The job was parked with `last_error` set. `retryable` is true only
    /// for model-call failures, which get an automatic delayed retry.
    Paused { retryable: bool },
    /// A page was transcribed and more remain; schedule the next step.
    Progressed,
    /// The cursor moved past the last page; schedule the notes combine.
    Completed,
}

impl<F, R, T> Extractor<F, R, T>
where
    F: SourceFetcher,
    R: PageRasterizer,
    T: ChatTransport,
{
    /// Run one extraction step for `job_id`.
    pub async fn run_step(&self, job_id: i64) -> StoreResult<StepOutcome> {
        let Some(job) = self.store.get_job(job_id)? else {
            debug!(job_id, "step for unknown job; skipping");
            return Ok(StepOutcome::Skipped);
        };
        if job.status != JobStatus::Running {
            debug!(job_id, status = job.status.as_str(), "job not running; skipping step");
            return Ok(StepOutcome::Skipped);
        }

        if self.config.api_key.is_none() {
            self.store
                .set_job_paused(job.id, "OpenRouter API key is not configured")?;
            warn!(job_id, document_id = %job.document_id, "no API key configured; job paused");
            return Ok(StepOutcome::Paused { retryable: false });
        }

        // Fresh download every step: steps can be minutes apart and may run
        // in a different process after a restart.
        let pdf = match self.fetcher.fetch(&job.source_url).await {
            Ok(bytes) => Arc::new(bytes),
            Err(e) => {
                let message = format!("Failed to download source PDF: {e}");
                self.store.set_job_paused(job.id, &message)?;
                warn!(job_id, document_id = %job.document_id, %e, "source download failed; job paused");
                return Ok(StepOutcome::Paused { retryable: false });
            }
        };

        let mut next = job.next_page;
        let mut processed = 0;
        while processed < STEP_BATCH_SIZE {
            if next > job.total_pages {
                break;
            }

            // Resume guard: pages transcribed by an earlier run are skipped
            // without consuming the batch budget.
            if self.store.page_text_exists(&job.document_id, next)? {
                next += 1;
                self.store.advance_cursor(job.id, next)?;
                continue;
            }

            let rasterizer = Arc::clone(&self.rasterizer);
            let bytes = Arc::clone(&pdf);
            let page = next;
            let rendered = tokio::task::spawn_blocking(move || rasterizer.render_page(&bytes, page))
                .await
                .unwrap_or_else(|e| {
                    warn!(job_id, page, error = %e, "render task panicked");
                    None
                });

            let Some(image) = rendered else {
                let message = format!("Failed to render page {next} to image");
                self.store.set_job_paused(job.id, &message)?;
                warn!(job_id, document_id = %job.document_id, page = next, "render failed; job paused");
                return Ok(StepOutcome::Paused { retryable: false });
            };

            let data_url = match encode::encode_page(&image) {
                Ok(url) => url,
                Err(e) => {
                    let message = format!("Failed to encode page {next}: {e}");
                    self.store.set_job_paused(job.id, &message)?;
                    warn!(job_id, page = next, %e, "page encoding failed; job paused");
                    return Ok(StepOutcome::Paused { retryable: false });
                }
            };
            drop(image);

            let prompt = prompts::transcribe_page_prompt(next);
            match self.vision.transcribe_page(&prompt, &data_url).await {
                Ok(transcription) => {
                    let cleaned = clamp_text(&transcription.text, self.config.max_page_chars);
                    self.store.upsert_page_text(
                        &job.document_id,
                        next,
                        &cleaned,
                        &transcription.model,
                        &job.owner,
                    )?;
                    self.store.record_model_info(
                        job.id,
                        self.config.primary_model(),
                        &transcription.model,
                    )?;
                    self.store.enqueue_task(
                        TaskKind::PageNotes,
                        Some(job.id),
                        &job.document_id,
                        Some(next),
                        now_ms(),
                    )?;
                    info!(
                        job_id,
                        document_id = %job.document_id,
                        page = next,
                        total = job.total_pages,
                        model = %transcription.model,
                        "page transcribed"
                    );
                    next += 1;
                    self.store.advance_cursor(job.id, next)?;
                    processed += 1;
                }
                Err(e) => {
                    self.store.set_job_paused(job.id, &e.to_string())?;
                    warn!(job_id, document_id = %job.document_id, page = next, %e,
                          "model call failed; job paused for automatic retry");
                    return Ok(StepOutcome::Paused { retryable: true });
                }
            }
        }

        if next > job.total_pages {
            self.store.complete_job(job.id)?;
            info!(job_id, document_id = %job.document_id, pages = job.total_pages, "extraction completed");
            Ok(StepOutcome::Completed)
        } else {
            Ok(StepOutcome::Progressed)
        }
    }
}

/// Trim, then hard-truncate to `max_chars` characters (not bytes, so the cut
/// never splits a code point).
pub(crate) fn clamp_text(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((idx, _)) => trimmed[..idx].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_trims_whitespace() {
        assert_eq!(clamp_text("  hello \n", 100), "hello");
    }

    #[test]
    fn clamp_truncates_long_text() {
        let long = "a".repeat(20_000);
        assert_eq!(clamp_text(&long, 12_000).len(), 12_000);
    }

    #[test]
    fn clamp_counts_chars_not_bytes() {
        let text = "é".repeat(10);
        let clamped = clamp_text(&text, 5);
        assert_eq!(clamped.chars().count(), 5);
        assert_eq!(clamped, "é".repeat(5));
    }

    #[test]
    fn clamp_keeps_short_text_intact() {
        assert_eq!(clamp_text("short", 12_000), "short");
    }
}
