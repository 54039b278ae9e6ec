//! Translation cache operations
//!
//! Both `original_name` and `readable_name` carry a case-insensitive unique
//! constraint. Writers never update an existing entry: inserts use
//! `ON CONFLICT DO NOTHING` and re-read the winner afterwards.

use rusqlite::{params, OptionalExtension};
use tracing::debug;

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{NewTranslation, TranslationEntry};

/// Result of an insert-if-absent
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// The entry was new and is now stored
    Inserted(TranslationEntry),
    /// Another entry already held one of the names; this is the stored winner
    Existing(TranslationEntry),
}

impl InsertOutcome {
    pub fn entry(&self) -> &TranslationEntry {
        match self {
            Self::Inserted(entry) | Self::Existing(entry) => entry,
        }
    }

    pub fn into_entry(self) -> TranslationEntry {
        match self {
            Self::Inserted(entry) | Self::Existing(entry) => entry,
        }
    }

    pub fn was_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

impl Database {
    /// Look up a translation by its (corrected) original name, ignoring case
    pub fn find_translation_by_original(&self, name: &str) -> Result<Option<TranslationEntry>> {
        self.find_translation_where("original_name", name)
    }

    /// Look up a translation by its readable name, ignoring case
    pub fn find_translation_by_readable(&self, name: &str) -> Result<Option<TranslationEntry>> {
        self.find_translation_where("readable_name", name)
    }

    fn find_translation_where(&self, column: &str, name: &str) -> Result<Option<TranslationEntry>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT id, original_name, readable_name, category_id, created_at
             FROM item_translations WHERE {} = ?",
            column
        );
        let entry = conn
            .query_row(&sql, params![name], Self::row_to_translation)
            .optional()?;
        Ok(entry)
    }

    /// List cached translations, most recent first
    pub fn list_translations(&self, limit: i64) -> Result<Vec<TranslationEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, original_name, readable_name, category_id, created_at
             FROM item_translations ORDER BY id DESC LIMIT ?",
        )?;
        let entries = stmt
            .query_map(params![limit], Self::row_to_translation)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Count cached translations
    pub fn count_translations(&self) -> Result<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM item_translations", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Insert a translation unless either name is already taken
    ///
    /// On conflict the stored entry is re-read (by original name first, then
    /// by readable name) and returned as [`InsertOutcome::Existing`].
    pub fn insert_translation_if_absent(&self, new: &NewTranslation) -> Result<InsertOutcome> {
        let original = new.original_name.trim();
        let readable = new.readable_name.trim();
        if original.is_empty() || readable.is_empty() {
            return Err(Error::InvalidData(
                "translation names must not be empty".to_string(),
            ));
        }

        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO item_translations (original_name, readable_name, category_id)
             VALUES (?, ?, ?)
             ON CONFLICT DO NOTHING",
            params![original, readable, new.category_id],
        )?;

        if inserted == 1 {
            let id = conn.last_insert_rowid();
            let entry = conn.query_row(
                "SELECT id, original_name, readable_name, category_id, created_at
                 FROM item_translations WHERE id = ?",
                params![id],
                Self::row_to_translation,
            )?;
            return Ok(InsertOutcome::Inserted(entry));
        }
        drop(conn);

        debug!(original, readable, "Translation already cached, re-reading winner");
        if let Some(entry) = self.find_translation_by_original(original)? {
            return Ok(InsertOutcome::Existing(entry));
        }
        if let Some(entry) = self.find_translation_by_readable(readable)? {
            return Ok(InsertOutcome::Existing(entry));
        }

        Err(Error::NotFound(format!(
            "translation conflict for '{}' but no stored entry",
            original
        )))
    }

    fn row_to_translation(row: &rusqlite::Row) -> rusqlite::Result<TranslationEntry> {
        let created_at_str: String = row.get(4)?;
        Ok(TranslationEntry {
            id: row.get(0)?,
            original_name: row.get(1)?,
            readable_name: row.get(2)?,
            category_id: row.get(3)?,
            created_at: parse_datetime(&created_at_str),
        })
    }
}
