//! Page text rows.
//!
//! One row per (document, page). Upsert patches content in place so a forced
//! re-extraction overwrites stale text without growing the table.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_ms, Store};
use crate::error::{StoreError, StoreResult};

/// One page's stored transcription.
#[derive(Debug, Clone)]
pub struct PageText {
    pub id: i64,
    pub document_id: String,
    pub page_number: u32,
    pub content: String,
    pub model: String,
    pub owner: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl PageText {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            document_id: row.get("document_id")?,
            page_number: row.get::<_, i64>("page_number")? as u32,
            content: row.get("content")?,
            model: row.get("model")?,
            owner: row.get("owner")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl Store {
    /// Whether a transcription is already stored for this page. The resume
    /// guard: steps skip pages for which this returns true.
    pub fn page_text_exists(&self, document_id: &str, page_number: u32) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM page_texts WHERE document_id = ?1 AND page_number = ?2",
                params![document_id, page_number as i64],
                |row| row.get(0),
            )
            .map_err(StoreError::Query)?;
        Ok(count > 0)
    }

    /// Insert or patch the transcription for one page. On conflict the
    /// original id and `created_at` are preserved; only content, model, and
    /// `updated_at` change.
    pub fn upsert_page_text(
        &self,
        document_id: &str,
        page_number: u32,
        content: &str,
        model: &str,
        owner: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let now = now_ms();
        conn.execute(
            "INSERT INTO page_texts (document_id, page_number, content, model, owner, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT(document_id, page_number) DO UPDATE SET \
             content = excluded.content, model = excluded.model, updated_at = excluded.updated_at",
            params![document_id, page_number as i64, content, model, owner, now],
        )
        .map_err(StoreError::Query)?;
        Ok(())
    }

    /// Fetch one page's transcription.
    pub fn get_page_text(
        &self,
        document_id: &str,
        page_number: u32,
    ) -> StoreResult<Option<PageText>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, document_id, page_number, content, model, owner, created_at, updated_at \
             FROM page_texts WHERE document_id = ?1 AND page_number = ?2",
            params![document_id, page_number as i64],
            PageText::from_row,
        )
        .optional()
        .map_err(StoreError::Query)
    }

    /// Number of pages transcribed so far for a document.
    pub fn count_page_texts(&self, document_id: &str) -> StoreResult<u32> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM page_texts WHERE document_id = ?1",
                [document_id],
                |row| row.get(0),
            )
            .map_err(StoreError::Query)?;
        Ok(count as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_patches_in_place() {
        let s = Store::open_in_memory().unwrap();
        s.upsert_page_text("doc", 1, "first", "m/a", "u1").unwrap();
        let original = s.get_page_text("doc", 1).unwrap().unwrap();

        s.upsert_page_text("doc", 1, "second", "m/b", "u1").unwrap();
        let patched = s.get_page_text("doc", 1).unwrap().unwrap();

        assert_eq!(patched.id, original.id);
        assert_eq!(patched.created_at, original.created_at);
        assert_eq!(patched.content, "second");
        assert_eq!(patched.model, "m/b");
        assert_eq!(s.count_page_texts("doc").unwrap(), 1);
    }

    #[test]
    fn exists_reflects_upserts() {
        let s = Store::open_in_memory().unwrap();
        assert!(!s.page_text_exists("doc", 2).unwrap());
        s.upsert_page_text("doc", 2, "text", "m/a", "u1").unwrap();
        assert!(s.page_text_exists("doc", 2).unwrap());
        assert!(!s.page_text_exists("other", 2).unwrap());
    }
}
