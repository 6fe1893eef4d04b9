//! # pagescribe
//!
//! Durable, resumable page-by-page PDF transcription using Vision Language
//! Models (VLMs).
//!
//! ## Why this crate?
//!
//! Transcribing a long PDF through a vision model is slow and failure-prone:
//! free-tier endpoints rate-limit aggressively, a 300-page document takes
//! many minutes, and a crash halfway should not throw away 150 finished
//! pages. This crate treats extraction as a durable background job: one page
//! per step, every page persisted the moment it exists, and a cursor that
//! lets any process pick up exactly where the last one stopped.
//!
//! ## Pipeline Overview
//!
//! ```text
//! trigger (document, source URL, page count)
//!  │
//!  ├─ job row         cursor + status in SQLite, survives restarts
//!  ├─ task queue      "step this job at T" as durable rows
//!  └─ per step:
//!      ├─ 1. Fetch    download the source PDF
//!      ├─ 2. Render   rasterise the next page via pdfium (spawn_blocking)
//!      ├─ 3. Encode   PNG → base64 data URL
//!      ├─ 4. Vision   transcribe with model-fallback routing + retries
//!      └─ 5. Persist  page text upserted, cursor advanced, notes queued
//! ```
//!
//! After the last page, per-page study notes are merged into a single
//! chapter document with an extracted title.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pagescribe::{DefaultExtractor, ExtractorConfig, Store};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(Store::open("pagescribe.db".as_ref())?);
//!     let config = ExtractorConfig::from_env();
//!     let extractor = Arc::new(DefaultExtractor::new(store, config));
//!
//!     let worker = pagescribe::worker::start(Arc::clone(&extractor));
//!
//!     let job = extractor.start_or_resume(
//!         "user-1",
//!         "doc-42",
//!         "https://example.com/chapter.pdf",
//!         34,
//!         false,
//!     )?;
//!     println!("job {} running", job.id);
//!
//!     worker.await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pagescribe` binary (clap + anyhow + indicatif + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod job;
pub mod notes;
pub mod pipeline;
pub mod prompts;
pub mod service;
pub mod store;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ExtractorConfig, ExtractorConfigBuilder};
pub use error::{ExtractError, StoreError, VisionError};
pub use job::StepOutcome;
pub use notes::NotesOutcome;
pub use pipeline::{ChatTransport, PageRasterizer, SourceFetcher, Transcription, VisionClient};
pub use service::{DefaultExtractor, Extractor, JobStatusView};
pub use store::{ExtractionJob, JobStatus, Store, Task, TaskKind};
