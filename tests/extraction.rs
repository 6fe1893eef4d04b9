//! End-to-end extraction scenarios against mock pipeline seams.
//!
//! Every scenario runs the real state machine — store, job steps, worker
//! task handling — with the network and pdfium replaced: a fetcher serving
//! canned bytes, a rasterizer producing tiny images, and a transport that
//! scripts API responses. Scheduling delays are zeroed so queued follow-ups
//! are due immediately and `drain` can run the queue to quiescence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use image::{Rgba, RgbaImage};
use pagescribe::pipeline::fetch::{FetchError, SourceFetcher};
use pagescribe::pipeline::render::PageRasterizer;
use pagescribe::pipeline::vision::{ChatExchange, ChatRequest, ChatTransport, MessageContent};
use pagescribe::{ExtractError, Extractor, ExtractorConfig, JobStatus, Store};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_millis() as i64
}

// ── Mock seams ───────────────────────────────────────────────────────────

struct StaticFetcher {
    bytes: Vec<u8>,
}

impl StaticFetcher {
    fn pdf() -> Self {
        Self {
            bytes: b"%PDF-1.7 fake".to_vec(),
        }
    }
}

impl SourceFetcher for StaticFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        Ok(self.bytes.clone())
    }
}

struct FailingFetcher;

impl SourceFetcher for FailingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Http {
            url: url.to_string(),
            status: 404,
        })
    }
}

struct MockRasterizer {
    fail_page: Option<u32>,
    calls: AtomicU32,
}

impl MockRasterizer {
    fn ok() -> Self {
        Self {
            fail_page: None,
            calls: AtomicU32::new(0),
        }
    }

    fn failing_on(page: u32) -> Self {
        Self {
            fail_page: Some(page),
            calls: AtomicU32::new(0),
        }
    }
}

impl PageRasterizer for MockRasterizer {
    fn render_page(&self, _pdf: &[u8], page_number: u32) -> Option<RgbaImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_page == Some(page_number) {
            return None;
        }
        Some(RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 255])))
    }
}

const VISION_MODEL: &str = "nvidia/nemotron-nano-12b-v2-vl:free";

fn chat_body(content: &str, model: &str) -> String {
    serde_json::json!({
        "choices": [{"message": {"content": content}}],
        "model": model,
    })
    .to_string()
}

/// Transport that tells vision calls (multimodal content) apart from notes
/// calls, counts both, and lets tests front-load scripted failures.
struct MockTransport {
    vision_calls: AtomicU32,
    notes_calls: AtomicU32,
    vision_script: Mutex<VecDeque<ChatExchange>>,
    notes_script: Mutex<VecDeque<ChatExchange>>,
    vision_model: String,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            vision_calls: AtomicU32::new(0),
            notes_calls: AtomicU32::new(0),
            vision_script: Mutex::new(VecDeque::new()),
            notes_script: Mutex::new(VecDeque::new()),
            vision_model: VISION_MODEL.to_string(),
        }
    }
}

impl MockTransport {
    /// Answer vision calls as if the provider routed to `model`.
    fn serving_model(model: &str) -> Self {
        Self {
            vision_model: model.to_string(),
            ..Self::default()
        }
    }

    fn with_vision_failures(failures: u32) -> Self {
        let t = Self::default();
        for _ in 0..failures {
            t.vision_script.lock().unwrap().push_back(ChatExchange {
                status: 400,
                body: r#"{"error":"model refused the image"}"#.to_string(),
            });
        }
        t
    }

    fn with_notes_failures(failures: u32) -> Self {
        let t = Self::default();
        for _ in 0..failures {
            t.notes_script.lock().unwrap().push_back(ChatExchange {
                status: 400,
                body: r#"{"error":"notes model unavailable"}"#.to_string(),
            });
        }
        t
    }
}

impl ChatTransport for MockTransport {
    async fn post_chat(&self, request: &ChatRequest) -> Result<ChatExchange, String> {
        let is_vision = request
            .messages
            .iter()
            .any(|m| matches!(m.content, MessageContent::Parts(_)));

        if is_vision {
            self.vision_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(scripted) = self.vision_script.lock().unwrap().pop_front() {
                return Ok(scripted);
            }
            Ok(ChatExchange {
                status: 200,
                body: chat_body("transcribed page text", &self.vision_model),
            })
        } else {
            self.notes_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(scripted) = self.notes_script.lock().unwrap().pop_front() {
                return Ok(scripted);
            }
            Ok(ChatExchange {
                status: 200,
                body: chat_body("TITLE: Test Chapter\n---\nGenerated notes body", "notes/model"),
            })
        }
    }
}

// ── Harness ──────────────────────────────────────────────────────────────

type TestExtractor = Extractor<StaticFetcher, MockRasterizer, MockTransport>;

fn test_config() -> ExtractorConfig {
    ExtractorConfig::builder()
        .api_key("test-key")
        .step_delay_ms(0)
        .model_retry_delay_ms(0)
        .notes_retry_delay_ms(0)
        .poll_interval_ms(1)
        .build()
}

fn extractor_with(transport: MockTransport) -> TestExtractor {
    let store = Arc::new(Store::open_in_memory().expect("in-memory store"));
    Extractor::with_pipeline(
        store,
        test_config(),
        StaticFetcher::pdf(),
        MockRasterizer::ok(),
        transport,
    )
}

/// Run queued tasks until the queue is empty. Delays are zeroed in
/// `test_config`, so everything enqueued is immediately due.
async fn drain<F, R, T>(extractor: &Extractor<F, R, T>)
where
    F: SourceFetcher,
    R: PageRasterizer,
    T: ChatTransport,
{
    for _ in 0..500 {
        let Some(task) = extractor
            .store()
            .claim_due_task(now_ms() + 100)
            .expect("claim task")
        else {
            return;
        };
        pagescribe::worker::execute_task(extractor, &task)
            .await
            .expect("task execution");
    }
    panic!("task queue did not drain within 500 tasks");
}

// ── Scenarios ────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_document_completes_and_combines_notes() {
    let ex = extractor_with(MockTransport::default());
    let job = ex
        .start_or_resume("alice", "doc-1", "https://host/x.pdf", 2, false)
        .expect("trigger");
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.next_page, 1);

    drain(&ex).await;

    let status = ex.get_status("alice", "doc-1").expect("status").expect("view");
    assert_eq!(status.status, JobStatus::Completed);
    // Cursor rests one past the last page.
    assert_eq!(status.next_page, 3);
    assert_eq!(status.pages_done, 2);
    assert!(status.last_error.is_none());
    assert!(status.completed_at.is_some());
    assert_eq!(status.last_used_model.as_deref(), Some(VISION_MODEL));
    assert!(!status.fallback_active);

    let page = ex.store().get_page_text("doc-1", 1).unwrap().expect("page 1 text");
    assert_eq!(page.content, "transcribed page text");
    assert_eq!(page.model, VISION_MODEL);

    // Notes pipeline ran: per-page notes plus the combined chapter document.
    assert!(ex.store().page_notes_exist("doc-1", 1).unwrap());
    assert!(ex.store().page_notes_exist("doc-1", 2).unwrap());
    let chapter = ex.store().get_chapter_notes("doc-1").unwrap().expect("chapter notes");
    assert_eq!(chapter.title.as_deref(), Some("Test Chapter"));
    assert_eq!(chapter.content, "Generated notes body");

    // Two page-notes calls plus exactly one combine pass.
    assert_eq!(ex.transport().notes_calls.load(Ordering::SeqCst), 3);
    assert_eq!(ex.store().pending_task_count().unwrap(), 0);
}

#[tokio::test]
async fn fallback_model_is_recorded_when_primary_is_bypassed() {
    let ex = extractor_with(MockTransport::serving_model("qwen/qwen-2.5-vl-7b-instruct:free"));
    ex.start_or_resume("alice", "doc-fb", "https://host/x.pdf", 1, false)
        .expect("trigger");
    drain(&ex).await;

    let status = ex.get_status("alice", "doc-fb").unwrap().unwrap();
    assert!(status.fallback_active);
    assert_eq!(
        status.last_used_model.as_deref(),
        Some("qwen/qwen-2.5-vl-7b-instruct:free")
    );
    assert_eq!(status.last_primary_model.as_deref(), Some(VISION_MODEL));
    // The page row records the model that actually answered.
    assert_eq!(
        ex.store().get_page_text("doc-fb", 1).unwrap().unwrap().model,
        "qwen/qwen-2.5-vl-7b-instruct:free"
    );
}

#[tokio::test]
async fn resume_skips_already_transcribed_pages() {
    let ex = extractor_with(MockTransport::default());
    ex.store()
        .upsert_page_text("doc-2", 1, "old text", VISION_MODEL, "alice")
        .unwrap();
    ex.store()
        .upsert_page_text("doc-2", 2, "old text", VISION_MODEL, "alice")
        .unwrap();

    ex.start_or_resume("alice", "doc-2", "https://host/x.pdf", 3, false)
        .expect("trigger");
    drain(&ex).await;

    // Only page 3 hit the model; pages 1 and 2 kept their stored text.
    assert_eq!(ex.transport().vision_calls.load(Ordering::SeqCst), 1);
    let status = ex.get_status("alice", "doc-2").unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(
        ex.store().get_page_text("doc-2", 1).unwrap().unwrap().content,
        "old text"
    );
}

#[tokio::test]
async fn nonforced_retrigger_is_a_noop() {
    let ex = extractor_with(MockTransport::default());
    let first = ex
        .start_or_resume("alice", "doc-3", "https://host/x.pdf", 4, false)
        .expect("first trigger");

    let again = ex
        .start_or_resume("alice", "doc-3", "https://host/x.pdf", 4, false)
        .expect("second trigger");
    assert_eq!(again.id, first.id);
    // No duplicate step was queued.
    assert_eq!(ex.store().pending_task_count().unwrap(), 1);

    // Same for a paused job: a plain retrigger must not reset or resume it.
    ex.store().set_job_paused(first.id, "stuck").unwrap();
    let paused = ex
        .start_or_resume("alice", "doc-3", "https://host/x.pdf", 4, false)
        .expect("third trigger");
    assert_eq!(paused.status, JobStatus::Paused);
    assert_eq!(paused.last_error.as_deref(), Some("stuck"));
}

#[tokio::test]
async fn forced_restart_resets_cursor_and_reuses_pages() {
    let ex = extractor_with(MockTransport::default());
    ex.start_or_resume("alice", "doc-4", "https://host/x.pdf", 2, false)
        .expect("trigger");
    drain(&ex).await;
    assert_eq!(
        ex.get_status("alice", "doc-4").unwrap().unwrap().status,
        JobStatus::Completed
    );
    let calls_before = ex.transport().vision_calls.load(Ordering::SeqCst);

    let restarted = ex
        .start_or_resume("alice", "doc-4", "https://host/x.pdf", 2, true)
        .expect("forced restart");
    assert_eq!(restarted.status, JobStatus::Running);
    assert_eq!(restarted.next_page, 1);
    assert!(restarted.completed_at.is_none());

    drain(&ex).await;
    // All pages already had text, so the restart made no new vision calls.
    assert_eq!(
        ex.transport().vision_calls.load(Ordering::SeqCst),
        calls_before
    );
    assert_eq!(
        ex.get_status("alice", "doc-4").unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn download_failure_pauses_with_no_automatic_retry() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let ex = Extractor::with_pipeline(
        store,
        test_config(),
        FailingFetcher,
        MockRasterizer::ok(),
        MockTransport::default(),
    );
    ex.start_or_resume("alice", "doc-5", "https://host/missing.pdf", 3, false)
        .expect("trigger");
    drain(&ex).await;

    let status = ex.get_status("alice", "doc-5").unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Paused);
    let error = status.last_error.expect("error recorded");
    assert!(error.contains("download"), "got: {error}");
    assert!(error.contains("404"), "got: {error}");
    // Nothing queued: recovery needs an explicit restart.
    assert_eq!(ex.store().pending_task_count().unwrap(), 0);
}

#[tokio::test]
async fn render_failure_pauses_with_no_automatic_retry() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let ex = Extractor::with_pipeline(
        store,
        test_config(),
        StaticFetcher::pdf(),
        MockRasterizer::failing_on(2),
        MockTransport::default(),
    );
    ex.start_or_resume("alice", "doc-6", "https://host/x.pdf", 3, false)
        .expect("trigger");
    drain(&ex).await;

    let status = ex.get_status("alice", "doc-6").unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Paused);
    assert!(status
        .last_error
        .as_deref()
        .unwrap()
        .contains("render page 2"));
    // Page 1 made it through before the failure, and the cursor sits on the
    // failed page so a resume retries exactly it.
    assert_eq!(status.next_page, 2);
    assert!(ex.store().page_text_exists("doc-6", 1).unwrap());
    assert_eq!(ex.store().pending_task_count().unwrap(), 0);
}

#[tokio::test]
async fn missing_api_key_pauses_without_retry() {
    let store = Arc::new(Store::open_in_memory().unwrap());
    let config = ExtractorConfig::builder()
        .step_delay_ms(0)
        .model_retry_delay_ms(0)
        .poll_interval_ms(1)
        .build();
    let ex = Extractor::with_pipeline(
        store,
        config,
        StaticFetcher::pdf(),
        MockRasterizer::ok(),
        MockTransport::default(),
    );
    ex.start_or_resume("alice", "doc-7", "https://host/x.pdf", 3, false)
        .expect("trigger");
    drain(&ex).await;

    let status = ex.get_status("alice", "doc-7").unwrap().unwrap();
    assert_eq!(status.status, JobStatus::Paused);
    assert!(status.last_error.as_deref().unwrap().contains("API key"));
    assert_eq!(ex.store().pending_task_count().unwrap(), 0);
    // No model traffic at all.
    assert_eq!(ex.transport().vision_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn model_failure_pauses_then_scheduled_retry_finishes_the_job() {
    let ex = extractor_with(MockTransport::with_vision_failures(1));
    let job = ex
        .start_or_resume("alice", "doc-8", "https://host/x.pdf", 2, false)
        .expect("trigger");

    // Run only the first step so the intermediate paused state is visible.
    let first = ex.store().claim_due_task(now_ms() + 100).unwrap().unwrap();
    pagescribe::worker::execute_task(&ex, &first).await.unwrap();

    let mid = ex.store().get_job(job.id).unwrap().unwrap();
    assert_eq!(mid.status, JobStatus::Paused);
    assert!(mid.last_error.as_deref().unwrap().contains("refused"));
    // The automatic retry is sitting in the queue.
    assert_eq!(ex.store().pending_task_count().unwrap(), 1);

    drain(&ex).await;

    let after = ex.store().get_job(job.id).unwrap().unwrap();
    assert_eq!(after.status, JobStatus::Completed);
    assert!(after.last_error.is_none());
    assert!(ex.store().page_text_exists("doc-8", 1).unwrap());
    assert!(ex.store().page_text_exists("doc-8", 2).unwrap());
}

#[tokio::test]
async fn notes_failure_is_retried_at_the_task_level() {
    let ex = extractor_with(MockTransport::with_notes_failures(1));
    ex.start_or_resume("alice", "doc-9", "https://host/x.pdf", 1, false)
        .expect("trigger");
    drain(&ex).await;

    // First notes call failed, the re-enqueued task succeeded.
    assert!(ex.store().page_notes_exist("doc-9", 1).unwrap());
    assert!(ex.transport().notes_calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn status_is_scoped_to_the_owner() {
    let ex = extractor_with(MockTransport::default());
    ex.start_or_resume("alice", "doc-10", "https://host/x.pdf", 3, false)
        .expect("trigger");

    assert!(ex.get_status("alice", "doc-10").unwrap().is_some());
    // Someone else's document looks like one that was never processed.
    assert!(ex.get_status("bob", "doc-10").unwrap().is_none());
    assert!(matches!(
        ex.get_status("", "doc-10"),
        Err(ExtractError::NotAuthenticated)
    ));
    assert!(matches!(
        ex.start_or_resume("bob", "doc-10", "https://host/x.pdf", 3, false),
        Err(ExtractError::NotAuthenticated)
    ));
}

#[tokio::test]
async fn page_count_is_clamped_and_urls_validated() {
    let ex = extractor_with(MockTransport::default());

    let low = ex
        .start_or_resume("alice", "doc-11", "https://host/x.pdf", 0, false)
        .expect("trigger");
    assert_eq!(low.total_pages, 1);

    let high = ex
        .start_or_resume("alice", "doc-12", "https://host/x.pdf", 5000, false)
        .expect("trigger");
    assert_eq!(high.total_pages, 2000);

    assert!(matches!(
        ex.start_or_resume("alice", "doc-13", "file:///etc/passwd", 3, false),
        Err(ExtractError::InvalidRequest { .. })
    ));
}

#[tokio::test]
async fn state_survives_a_process_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("pagescribe.db");

    let job_id = {
        let store = Arc::new(Store::open(&db_path).expect("open store"));
        let ex = Extractor::with_pipeline(
            store,
            test_config(),
            StaticFetcher::pdf(),
            MockRasterizer::ok(),
            MockTransport::default(),
        );
        let job = ex
            .start_or_resume("alice", "doc-15", "https://host/x.pdf", 3, false)
            .expect("trigger");

        // One step only, then the "process" dies with work still queued.
        let task = ex.store().claim_due_task(now_ms() + 100).unwrap().unwrap();
        pagescribe::worker::execute_task(&ex, &task).await.unwrap();
        job.id
    };

    // A fresh process picks up the same database and finishes the job.
    let store = Arc::new(Store::open(&db_path).expect("reopen store"));
    let ex = Extractor::with_pipeline(
        store,
        test_config(),
        StaticFetcher::pdf(),
        MockRasterizer::ok(),
        MockTransport::default(),
    );
    let resumed = ex.store().get_job(job_id).unwrap().expect("job persisted");
    assert_eq!(resumed.status, JobStatus::Running);
    assert_eq!(resumed.next_page, 2);
    assert!(ex.store().page_text_exists("doc-15", 1).unwrap());

    pagescribe::worker::requeue_orphaned_jobs(ex.store()).unwrap();
    drain(&ex).await;
    assert_eq!(
        ex.store().get_job(job_id).unwrap().unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn orphaned_running_job_is_requeued_and_finishes() {
    let ex = extractor_with(MockTransport::default());
    let job = ex
        .start_or_resume("alice", "doc-14", "https://host/x.pdf", 1, false)
        .expect("trigger");

    // Simulate a crash after claim: the task is gone, the job still runs.
    ex.store().claim_due_task(now_ms() + 100).unwrap().unwrap();
    assert_eq!(ex.store().pending_task_count().unwrap(), 0);

    let requeued = pagescribe::worker::requeue_orphaned_jobs(ex.store()).unwrap();
    assert_eq!(requeued, 1);
    drain(&ex).await;

    assert_eq!(
        ex.store().get_job(job.id).unwrap().unwrap().status,
        JobStatus::Completed
    );
}
