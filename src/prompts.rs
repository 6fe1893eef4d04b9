//! Prompts for page transcription and note generation.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the transcription rules and the notes
//!    formatting contract each live in exactly one place.
//!
//! 2. **Testability** — unit tests can import and inspect prompts directly
//!    without spinning up a real model, so contract regressions (like losing
//!    the `TITLE:` marker instruction) are easy to catch.

/// System message accompanying every page-transcription call.
pub const TRANSCRIBE_SYSTEM_PROMPT: &str = "You are an OCR + study-note agent.";

/// Build the user prompt for transcribing a single page image.
///
/// The page number is included so the model does not confuse a continuation
/// page with the start of a new section.
pub fn transcribe_page_prompt(page_number: u32) -> String {
    format!(
        r#"You are reading a single page of a school textbook PDF.

Task:
- TRANSCRIBE all visible text exactly (keep headings, bullet points, formulas).
- If the page includes diagrams/images/graphs, describe them EXTREMELY DETAILED and explain what they show.
- If there are labels in a diagram, include the labels and what they point to.
- Output plain text only (no JSON, no markdown fences).

Page number: {page_number}
Be thorough."#
    )
}

/// System message for per-page note generation.
pub const PAGE_NOTES_SYSTEM_PROMPT: &str =
    "You are a helpful education assistant that creates perfect study notes.";

/// Build the user prompt for generating study notes from one page's text.
///
/// Page 1 additionally asks the model to emit a `TITLE:` marker line so the
/// document gets a real title as early as possible; the marker is parsed out
/// and stripped by the caller.
pub fn page_notes_prompt(page_number: u32, content: &str) -> String {
    let title_instruction = if page_number == 1 {
        "CRITICAL: Since this is the first page, identify the ACTUAL CHAPTER TITLE (e.g. \"The Cell Cycle\") and include it on the very first line as \"TITLE: [Title]\" followed by a horizontal rule \"---\"."
    } else {
        ""
    };
    format!(
        r#"You are an expert tutor creating detailed, high-quality study notes for a student.
Based on the following textbook page text, generate comprehensive and well-structured notes.
Use markdown formatting, including headings, bullet points, and bold text for key terms.
If there are diagrams described, incorporate their explanations into the notes.
{title_instruction}
Page Number: {page_number}
Text Content:
{content}"#
    )
}

/// System message for the combine pass.
pub const COMBINE_NOTES_SYSTEM_PROMPT: &str =
    "You are an expert editor creating professional study guides. You always identify the real chapter title.";

/// Build the user prompt for combining per-page notes into one document.
///
/// `combined` is the page notes joined with `--- Page N ---` markers. The
/// output contract (first line `TITLE: …`, then `---`, then the body) matches
/// what [`crate::notes::split_title`] parses.
pub fn combine_notes_prompt(combined: &str) -> String {
    format!(
        r#"You are an expert editor. You have a collection of study notes generated page-by-page from a textbook chapter.
Your task is to combine these into a single, cohesive, and perfectly formatted set of chapter notes.

CRITICAL INSTRUCTIONS:
1. Identify the ACTUAL CHAPTER TITLE from the content (e.g., "The Cell Cycle", not "chapter1.pdf").
2. Start your response with exactly this format on the first line:
TITLE: [The Identified Chapter Title]
3. Then follow with a horizontal rule (---) and the full cohesive notes.
4. Organize with clear headings (H2 for main sections).
5. Remove redundancies and ensure smooth transitions.
6. Keep all important facts, definitions, and explanations.
7. Make it look premium and professional.

Combined Page Notes:
{combined}"#
    )
}
