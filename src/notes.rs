//! Downstream note generation from transcribed pages.
//!
//! Two passes. Per-page: each fresh transcription queues a task that turns
//! that page's text into study notes. Combine: once the extraction job
//! completes, all page notes are merged into one chapter-level document.
//!
//! Both passes ask the model to surface the real chapter title via a
//! `TITLE:` marker line — page 1 of the per-page pass as an early guess, the
//! combine pass authoritatively. [`split_title`] parses the marker out of
//! the response so the stored notes never begin with protocol scaffolding.

use tracing::{info, warn};

use crate::error::StoreResult;
use crate::pipeline::{ChatTransport, PageRasterizer, SourceFetcher};
use crate::prompts;
use crate::service::Extractor;

/// What a page-notes task accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotesOutcome {
    /// Notes were generated and stored.
    Generated,
    /// Nothing to do: notes already exist, or there is no page text (or the
    /// model returned an empty response, which a retry will not fix).
    Skipped,
    /// The model call failed; the worker re-enqueues the task with a delay.
    Failed,
}

impl<F, R, T> Extractor<F, R, T>
where
    F: SourceFetcher,
    R: PageRasterizer,
    T: ChatTransport,
{
    /// Generate study notes for one transcribed page.
    pub async fn generate_page_notes(
        &self,
        document_id: &str,
        page_number: u32,
    ) -> StoreResult<NotesOutcome> {
        if self.store.page_notes_exist(document_id, page_number)? {
            return Ok(NotesOutcome::Skipped);
        }
        let Some(page) = self.store.get_page_text(document_id, page_number)? else {
            warn!(document_id, page = page_number, "no page text to generate notes from");
            return Ok(NotesOutcome::Skipped);
        };

        let prompt = prompts::page_notes_prompt(page_number, &page.content);
        let response = self
            .vision
            .notes_chat(
                prompts::PAGE_NOTES_SYSTEM_PROMPT,
                &prompt,
                self.config.notes_max_tokens,
                self.config.notes_temperature,
            )
            .await;

        let notes = match response {
            Ok(notes) => notes,
            Err(e) => {
                warn!(document_id, page = page_number, %e, "page notes generation failed");
                return Ok(NotesOutcome::Failed);
            }
        };
        if notes.trim().is_empty() {
            warn!(document_id, page = page_number, "model returned empty notes");
            return Ok(NotesOutcome::Skipped);
        }

        let (title, body) = if page_number == 1 {
            split_title(&notes)
        } else {
            (None, notes.trim().to_string())
        };
        if let Some(title) = &title {
            self.store.set_chapter_title(document_id, title, &page.owner)?;
            info!(document_id, %title, "chapter title identified from first page");
        }

        self.store.upsert_page_notes(
            document_id,
            page_number,
            &body,
            &self.config.notes_model,
            &page.owner,
        )?;
        info!(document_id, page = page_number, "page notes generated");
        Ok(NotesOutcome::Generated)
    }

    /// Combine every page's notes into one chapter document.
    ///
    /// Failures are logged and dropped: the per-page notes remain usable,
    /// and the next completed extraction (or a forced restart) re-runs the
    /// combine.
    pub async fn combine_notes(&self, document_id: &str) -> StoreResult<()> {
        let page_notes = self.store.list_page_notes(document_id)?;
        if page_notes.is_empty() {
            warn!(document_id, "no page notes to combine");
            return Ok(());
        }
        let owner = page_notes[0].owner.clone();

        let combined = page_notes
            .iter()
            .map(|n| format!("--- Page {} ---\n{}", n.page_number, n.notes))
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = prompts::combine_notes_prompt(&combined);
        let response = self
            .vision
            .notes_chat(
                prompts::COMBINE_NOTES_SYSTEM_PROMPT,
                &prompt,
                self.config.combine_max_tokens,
                self.config.notes_temperature,
            )
            .await;

        let final_notes = match response {
            Ok(notes) => notes,
            Err(e) => {
                warn!(document_id, %e, "combining notes failed; keeping per-page notes");
                return Ok(());
            }
        };
        if final_notes.trim().is_empty() {
            warn!(document_id, "combine pass returned empty notes");
            return Ok(());
        }

        let (title, body) = split_title(&final_notes);
        self.store.upsert_chapter_notes(
            document_id,
            title.as_deref(),
            &body,
            &self.config.notes_model,
            &owner,
        )?;
        info!(document_id, pages = page_notes.len(), title = ?title, "chapter notes combined");
        Ok(())
    }
}

/// Split a `TITLE:` marker line out of a notes response.
///
/// The first line containing `TITLE:` becomes the title; that line is
/// removed from the body along with a horizontal rule immediately following
/// it. Returns `(None, trimmed_body)` when no marker is present.
pub(crate) fn split_title(notes: &str) -> (Option<String>, String) {
    let Some(title_line) = notes.lines().find(|l| l.contains("TITLE:")) else {
        return (None, notes.trim().to_string());
    };

    let title = title_line
        .split("TITLE:")
        .nth(1)
        .unwrap_or("")
        .trim()
        .to_string();

    let mut body = notes.replacen(title_line, "", 1).trim().to_string();
    if let Some(rest) = body.strip_prefix("---") {
        body = rest.trim().to_string();
    }

    let title = if title.is_empty() { None } else { Some(title) };
    (title, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_leading_title_and_rule() {
        let notes = "TITLE: The Cell Cycle\n---\n## Overview\nCells divide.";
        let (title, body) = split_title(notes);
        assert_eq!(title.as_deref(), Some("The Cell Cycle"));
        assert_eq!(body, "## Overview\nCells divide.");
    }

    #[test]
    fn finds_title_not_on_first_line() {
        let notes = "Some preamble\nTITLE: Photosynthesis\nBody text";
        let (title, body) = split_title(notes);
        assert_eq!(title.as_deref(), Some("Photosynthesis"));
        assert!(body.contains("Some preamble"));
        assert!(body.contains("Body text"));
        assert!(!body.contains("TITLE:"));
    }

    #[test]
    fn no_marker_returns_trimmed_body() {
        let (title, body) = split_title("  just notes\n");
        assert_eq!(title, None);
        assert_eq!(body, "just notes");
    }

    #[test]
    fn empty_title_is_none() {
        let (title, body) = split_title("TITLE:\ncontent");
        assert_eq!(title, None);
        assert_eq!(body, "content");
    }

    #[test]
    fn rule_only_stripped_when_adjacent() {
        let notes = "TITLE: X\nBody\n---\nMore";
        let (title, body) = split_title(notes);
        assert_eq!(title.as_deref(), Some("X"));
        // The later rule separates content and must survive.
        assert!(body.contains("---"));
    }
}
