//! Generated notes: per-page rows and the combined chapter-level row.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_ms, Store};
use crate::error::{StoreError, StoreResult};

/// Study notes generated from one page's transcription.
#[derive(Debug, Clone)]
pub struct PageNotes {
    pub id: i64,
    pub document_id: String,
    pub page_number: u32,
    pub notes: String,
    pub model: String,
    pub owner: String,
    pub created_at: i64,
}

impl PageNotes {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            page_number: row.get::<_, i64>("page_number")? as u32,
            notes: row.get("notes")?,
            model: row.get("model")?,
            owner: row.get("owner")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// The combined chapter notes (one row per document).
///
/// `title` is filled from the `TITLE:` marker the model emits — either during
/// the first page's notes pass or during the combine pass, whichever lands
/// first; the combine pass overwrites.
#[derive(Debug, Clone)]
pub struct ChapterNotes {
    pub id: i64,
    pub document_id: String,
    pub title: Option<String>,
    pub content: String,
    pub model: Option<String>,
    pub owner: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChapterNotes {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            title: row.get("title")?,
            content: row.get("content")?,
            model: row.get("model")?,
            owner: row.get("owner")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl Store {
    pub fn page_notes_exist(&self, document_id: &str, page_number: u32) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM page_notes WHERE document_id = ?1 AND page_number = ?2",
                params![document_id, page_number as i64],
                |row| row.get(0),
            )
            .map_err(StoreError::Query)?;
        Ok(count > 0)
    }

    pub fn upsert_page_notes(
        &self,
        document_id: &str,
        page_number: u32,
        notes: &str,
        model: &str,
        owner: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO page_notes (document_id, page_number, notes, model, owner, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
             ON CONFLICT(document_id, page_number) DO UPDATE SET \
             notes = excluded.notes, model = excluded.model",
            params![document_id, page_number as i64, notes, model, owner, now_ms()],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    /// All page notes for a document in page order. The combine pass input.
    pub fn list_page_notes(&self, document_id: &str) -> StoreResult<Vec<PageNotes>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, document_id, page_number, notes, model, owner, created_at \
                 FROM page_notes WHERE document_id = ?1 ORDER BY page_number",
            )
            .map_err(StoreError::Query)?;
        let rows = stmt
            .query_map([document_id], PageNotes::from_row)
            .map_err(StoreError::Query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Query)?;
        Ok(rows)
    }

    /// Record the document title without touching existing note content.
    pub fn set_chapter_title(
        &self,
        document_id: &str,
        title: &str,
        owner: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        conn.execute(
            "INSERT INTO chapter_notes (document_id, title, owner, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?4) \
             ON CONFLICT(document_id) DO UPDATE SET \
             title = excluded.title, updated_at = excluded.updated_at",
            params![document_id, title, owner, now],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Store the combined chapter notes. `title` only overwrites when the
    /// combine pass actually identified one.
    pub fn upsert_chapter_notes(
        &self,
        document_id: &str,
        title: Option<&str>,
        content: &str,
        model: &str,
        owner: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        conn.execute(
            "INSERT INTO chapter_notes (document_id, title, content, model, owner, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT(document_id) DO UPDATE SET \
             title = COALESCE(excluded.title, chapter_notes.title), \
             content = excluded.content, model = excluded.model, \
             updated_at = excluded.updated_at",
            params![document_id, title, content, model, owner, now],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    pub fn get_chapter_notes(&self, document_id: &str) -> StoreResult<Option<ChapterNotes>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, document_id, title, content, model, owner, created_at, updated_at \
             FROM chapter_notes WHERE document_id = ?1",
            [document_id],
            ChapterNotes::from_row,
        )
        .optional()
        .map_err(StoreError::Query)
    }
}
