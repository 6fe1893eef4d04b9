//! CLI binary for pagescribe.
//!
//! A thin shim over the library: `run` triggers extraction for a document
//! and drives the worker until the job settles, `status` prints the latest
//! job as JSON, `reset` wipes a document's extraction state.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use pagescribe::{DefaultExtractor, ExtractorConfig, JobStatus, Store};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"ENVIRONMENT VARIABLES:
  OPENROUTER_API_KEY        API key for the chat-completions endpoint (required for `run`)
  OPENROUTER_VISION_MODELS  Comma/newline-separated vision model candidates
  OPENROUTER_VISION_MODEL   Single vision model override
  OPENROUTER_NOTES_MODEL    Model for note generation

EXAMPLES:
  # Extract a 34-page chapter
  pagescribe run --document chapter-3 --pages 34 https://example.com/chapter3.pdf

  # Resume after a pause (same command; finished pages are skipped)
  pagescribe run --document chapter-3 --pages 34 https://example.com/chapter3.pdf

  # Restart from page 1, re-transcribing nothing that already exists
  pagescribe run --force --document chapter-3 --pages 34 https://example.com/chapter3.pdf

  # Check progress
  pagescribe status --document chapter-3
"#;

/// Durable page-by-page PDF transcription via vision models.
#[derive(Parser, Debug)]
#[command(
    name = "pagescribe",
    version,
    about = "Durable page-by-page PDF transcription via vision models",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Path to the SQLite database holding jobs and extracted text.
    #[arg(long, global = true, default_value = "pagescribe.db", env = "PAGESCRIBE_DB")]
    db: PathBuf,

    /// Owner identity recorded on jobs and used to scope status queries.
    #[arg(long, global = true, default_value = "cli")]
    owner: String,

    /// Suppress log output (progress bar only).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Trigger extraction and run until the job completes or pauses.
    Run {
        /// HTTP(S) URL of the source PDF.
        url: String,

        /// Document identifier; reruns with the same id resume.
        #[arg(long)]
        document: String,

        /// Number of pages in the document.
        #[arg(long)]
        pages: u32,

        /// Restart from page 1 even if a job already exists.
        #[arg(long)]
        force: bool,
    },

    /// Print the latest job status for a document as JSON.
    Status {
        #[arg(long)]
        document: String,
    },

    /// Delete all extraction state for a document.
    Reset {
        #[arg(long)]
        document: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.quiet { "error" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let store = Arc::new(Store::open(&cli.db).context("failed to open the database")?);
    let config = ExtractorConfig::from_env();
    let extractor = Arc::new(DefaultExtractor::new(store, config));

    match cli.command {
        Command::Run {
            url,
            document,
            pages,
            force,
        } => run(extractor, &cli.owner, &document, &url, pages, force).await,
        Command::Status { document } => {
            match extractor.get_status(&cli.owner, &document)? {
                Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
                None => println!("null"),
            }
            Ok(())
        }
        Command::Reset { document } => {
            extractor.reset_document(&cli.owner, &document)?;
            eprintln!("extraction state for {document} deleted");
            Ok(())
        }
    }
}

async fn run(
    extractor: Arc<DefaultExtractor>,
    owner: &str,
    document: &str,
    url: &str,
    pages: u32,
    force: bool,
) -> Result<()> {
    if extractor.config().api_key.is_none() {
        bail!("OPENROUTER_API_KEY is not set; the job would pause immediately");
    }

    let job = extractor.start_or_resume(owner, document, url, pages, force)?;
    let worker = pagescribe::worker::start(Arc::clone(&extractor));

    let bar = ProgressBar::new(job.total_pages as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  "),
    );
    bar.set_prefix("Transcribing");
    bar.enable_steady_tick(Duration::from_millis(120));

    let final_status = loop {
        tokio::time::sleep(Duration::from_millis(300)).await;
        let Some(view) = extractor.get_status(owner, document)? else {
            bail!("job disappeared while running");
        };
        bar.set_position(view.pages_done.min(view.total_pages) as u64);
        match view.status {
            JobStatus::Running => continue,
            JobStatus::Completed => break view,
            JobStatus::Paused => {
                // A pause with queued work (the automatic model-failure
                // retry, or a notes re-run) is not final yet.
                if extractor.store().pending_task_count()? > 0 {
                    bar.set_message("waiting for retry");
                    continue;
                }
                break view;
            }
        }
    };

    match final_status.status {
        JobStatus::Completed => {
            bar.finish_with_message("done ✓");

            // Let the queued notes passes drain before reporting.
            while extractor.store().pending_task_count()? > 0 {
                tokio::time::sleep(Duration::from_millis(300)).await;
            }
            worker.abort();

            if let Some(notes) = extractor.store().get_chapter_notes(document)? {
                if let Some(title) = &notes.title {
                    eprintln!("chapter title: {title}");
                }
            }
            eprintln!("{} pages transcribed", final_status.pages_done);
            Ok(())
        }
        JobStatus::Paused => {
            bar.abandon_with_message("paused");
            worker.abort();
            let error = final_status
                .last_error
                .unwrap_or_else(|| "unknown error".into());
            bail!(
                "job paused at page {} of {}: {error}\n\
                 rerun the same command with --force to restart; finished pages are kept",
                final_status.next_page,
                final_status.total_pages
            );
        }
        JobStatus::Running => unreachable!("loop exits only on a settled status"),
    }
}
