//! The public service surface: trigger extraction, query status.
//!
//! [`Extractor`] bundles the store, configuration, and the three pipeline
//! seams. It is generic over those seams so the whole state machine can run
//! in tests against scripted fetchers, rasterizers, and transports; the
//! [`DefaultExtractor`] alias wires in the production implementations.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::ExtractorConfig;
use crate::error::ExtractError;
use crate::pipeline::{
    ChatTransport, HttpFetcher, HttpTransport, PageRasterizer, PdfiumRasterizer, SourceFetcher,
    VisionClient,
};
use crate::store::{now_ms, ExtractionJob, JobStatus, Store, TaskKind};

/// Largest accepted page count. Out-of-range requests are clamped, never
/// rejected: a bad page count should not strand a document.
const MAX_TOTAL_PAGES: u32 = 2000;

/// Extraction service over a store and the three pipeline seams.
pub struct Extractor<F, R, T>
where
    F: SourceFetcher,
    R: PageRasterizer,
    T: ChatTransport,
{
    pub(crate) store: Arc<Store>,
    pub(crate) config: ExtractorConfig,
    pub(crate) fetcher: F,
    pub(crate) rasterizer: Arc<R>,
    pub(crate) vision: VisionClient<T>,
}

/// The production wiring: reqwest fetcher and transport, pdfium rasterizer.
pub type DefaultExtractor = Extractor<HttpFetcher, PdfiumRasterizer, HttpTransport>;

impl DefaultExtractor {
    /// Build an extractor with the production pipeline.
    pub fn new(store: Arc<Store>, config: ExtractorConfig) -> Self {
        let fetcher = HttpFetcher::new(config.download_timeout_secs);
        let rasterizer = PdfiumRasterizer::new(config.render_scale);
        let transport = HttpTransport::new(
            config.endpoint.clone(),
            config.api_key.clone().unwrap_or_default(),
            config.api_timeout_secs,
        );
        Self::with_pipeline(store, config, fetcher, rasterizer, transport)
    }
}

impl<F, R, T> Extractor<F, R, T>
where
    F: SourceFetcher,
    R: PageRasterizer,
    T: ChatTransport,
{
    /// Build an extractor with custom pipeline implementations.
    pub fn with_pipeline(
        store: Arc<Store>,
        config: ExtractorConfig,
        fetcher: F,
        rasterizer: R,
        transport: T,
    ) -> Self {
        let vision = VisionClient::new(transport, config.clone());
        Self {
            store,
            config,
            fetcher,
            rasterizer: Arc::new(rasterizer),
            vision,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// The chat transport behind the vision client. Exposed so tests can
    /// inspect mock state.
    pub fn transport(&self) -> &T {
        self.vision.transport()
    }

    /// Trigger extraction for a document, or return the job that already
    /// covers it.
    ///
    /// A non-forced trigger on a document with ANY existing job — running,
    /// paused, or completed — returns that job untouched: retriggers from
    /// impatient callers must not reset progress or queue duplicate work.
    /// `force` restarts the latest job from page 1 (already-transcribed
    /// pages are skipped by the resume guard, so a forced restart of a
    /// half-done document is cheap).
    pub fn start_or_resume(
        &self,
        owner: &str,
        document_id: &str,
        source_url: &str,
        total_pages: u32,
        force: bool,
    ) -> Result<ExtractionJob, ExtractError> {
        if owner.trim().is_empty() {
            return Err(ExtractError::NotAuthenticated);
        }
        if !source_url.starts_with("http://") && !source_url.starts_with("https://") {
            return Err(ExtractError::InvalidRequest {
                message: format!("source_url must be an http(s) URL, got {source_url:?}"),
            });
        }

        let pages = total_pages.clamp(1, MAX_TOTAL_PAGES);
        if pages != total_pages {
            warn!(
                document_id,
                requested = total_pages,
                clamped = pages,
                "total_pages out of range; clamped"
            );
        }

        if let Some(existing) = self.store.latest_job_for_document(document_id)? {
            if existing.owner != owner {
                return Err(ExtractError::NotAuthenticated);
            }
            if !force {
                info!(
                    document_id,
                    job_id = existing.id,
                    status = existing.status.as_str(),
                    "existing job found; trigger is a no-op"
                );
                return Ok(existing);
            }

            self.store.restart_job(existing.id, source_url, pages)?;
            self.store.enqueue_task(
                TaskKind::Step,
                Some(existing.id),
                document_id,
                None,
                now_ms(),
            )?;
            info!(document_id, job_id = existing.id, "job force-restarted from page 1");
            return Ok(self
                .store
                .get_job(existing.id)?
                .unwrap_or(existing));
        }

        let job = self
            .store
            .insert_job(document_id, source_url, pages, owner)?;
        self.store
            .enqueue_task(TaskKind::Step, Some(job.id), document_id, None, now_ms())?;
        info!(document_id, job_id = job.id, total_pages = pages, "extraction job started");
        Ok(job)
    }

    /// Status of the latest job for a document, scoped to its owner.
    ///
    /// Returns `Ok(None)` when there is no job, and also when the latest job
    /// belongs to someone else — another account's document looks exactly
    /// like a document that was never processed.
    pub fn get_status(
        &self,
        owner: &str,
        document_id: &str,
    ) -> Result<Option<JobStatusView>, ExtractError> {
        if owner.trim().is_empty() {
            return Err(ExtractError::NotAuthenticated);
        }

        let Some(job) = self.store.latest_job_for_document(document_id)? else {
            return Ok(None);
        };
        if job.owner != owner {
            return Ok(None);
        }

        let pages_done = self.store.count_page_texts(document_id)?;
        Ok(Some(JobStatusView {
            job_id: job.id,
            status: job.status,
            next_page: job.next_page,
            total_pages: job.total_pages,
            pages_done,
            last_error: job.last_error,
            last_primary_model: job.last_primary_model,
            last_used_model: job.last_used_model,
            fallback_active: job.fallback_active,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }))
    }

    /// Wipe every stored artifact for a document so the next trigger starts
    /// from scratch. Scoped to the owner like `get_status`.
    pub fn reset_document(&self, owner: &str, document_id: &str) -> Result<(), ExtractError> {
        if owner.trim().is_empty() {
            return Err(ExtractError::NotAuthenticated);
        }
        if let Some(job) = self.store.latest_job_for_document(document_id)? {
            if job.owner != owner {
                return Err(ExtractError::NotAuthenticated);
            }
        }
        self.store.reset_document(document_id)?;
        info!(document_id, "document extraction state reset");
        Ok(())
    }
}

/// A caller-facing snapshot of one document's extraction progress.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: i64,
    #[serde(serialize_with = "serialize_status")]
    pub status: JobStatus,
    pub next_page: u32,
    pub total_pages: u32,
    pub pages_done: u32,
    pub last_error: Option<String>,
    pub last_primary_model: Option<String>,
    pub last_used_model: Option<String>,
    pub fallback_active: bool,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

fn serialize_status<S: serde::Serializer>(s: &JobStatus, ser: S) -> Result<S::Ok, S::Error> {
    ser.serialize_str(s.as_str())
}
