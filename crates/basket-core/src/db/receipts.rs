//! Receipt and line item operations

use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension};

use super::{parse_datetime, Database};
use crate::error::Result;
use crate::models::*;

const RECEIPT_COLUMNS: &str = "id, owner_id, store_name, purchase_date, date_inferred,
    total_amount, total_discount, currency_code, currency_evidence, image_path,
    status, processing_attempts, last_processed_at, error_message, created_at, updated_at";

impl Database {
    /// Insert a near-empty placeholder receipt, returning its ID
    pub fn create_placeholder_receipt(
        &self,
        owner_id: &str,
        purchase_date: NaiveDate,
        currency: CurrencyCode,
    ) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO receipts (owner_id, purchase_date, total_amount, currency_code, status)
             VALUES (?, ?, 0, ?, 'pending')",
            params![owner_id, purchase_date.to_string(), currency.as_str()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Record where the receipt image was stored
    pub fn set_receipt_image_path(&self, id: i64, image_path: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE receipts SET image_path = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
            params![image_path, id],
        )?;
        Ok(())
    }

    /// Get receipt by ID
    pub fn get_receipt(&self, id: i64) -> Result<Option<Receipt>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM receipts WHERE id = ?", RECEIPT_COLUMNS);
        let receipt = conn
            .query_row(&sql, params![id], Self::row_to_receipt)
            .optional()?;
        Ok(receipt)
    }

    /// Get receipt by ID, only if it belongs to the given owner
    pub fn get_receipt_for_owner(&self, id: i64, owner_id: &str) -> Result<Option<Receipt>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM receipts WHERE id = ? AND owner_id = ?",
            RECEIPT_COLUMNS
        );
        let receipt = conn
            .query_row(&sql, params![id, owner_id], Self::row_to_receipt)
            .optional()?;
        Ok(receipt)
    }

    /// Get a receipt together with its line items
    pub fn get_receipt_with_items(
        &self,
        id: i64,
        owner_id: &str,
    ) -> Result<Option<ReceiptWithItems>> {
        let Some(receipt) = self.get_receipt_for_owner(id, owner_id)? else {
            return Ok(None);
        };
        let items = self.get_receipt_items(id)?;
        Ok(Some(ReceiptWithItems { receipt, items }))
    }

    /// List an owner's receipts, newest purchase first
    pub fn list_receipts(&self, owner_id: &str, limit: i64) -> Result<Vec<Receipt>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM receipts WHERE owner_id = ?
             ORDER BY purchase_date DESC, id DESC LIMIT ?",
            RECEIPT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let receipts = stmt
            .query_map(params![owner_id, limit], Self::row_to_receipt)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(receipts)
    }

    /// Receipts whose header was written but whose items never landed
    ///
    /// Detected as `total_amount > 0` with no line items.
    pub fn list_partial_receipts(&self, owner_id: Option<&str>) -> Result<Vec<Receipt>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM receipts r
             WHERE r.total_amount > 0
               AND NOT EXISTS (SELECT 1 FROM receipt_items i WHERE i.receipt_id = r.id)
               AND (?1 IS NULL OR r.owner_id = ?1)
             ORDER BY r.id",
            RECEIPT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let receipts = stmt
            .query_map(params![owner_id], Self::row_to_receipt)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(receipts)
    }

    /// Helper to convert a row to Receipt
    fn row_to_receipt(row: &rusqlite::Row) -> rusqlite::Result<Receipt> {
        let purchase_date_str: String = row.get(3)?;
        let currency_str: String = row.get(7)?;
        let status_str: String = row.get(10)?;
        let last_processed_str: Option<String> = row.get(12)?;
        let created_at_str: String = row.get(14)?;
        let updated_at_str: String = row.get(15)?;

        let purchase_date = NaiveDate::parse_from_str(&purchase_date_str, "%Y-%m-%d")
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(e)))?;
        let currency_code = currency_str
            .parse::<CurrencyCode>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, e.into()))?;

        Ok(Receipt {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            store_name: row.get(2)?,
            purchase_date,
            date_inferred: row.get(4)?,
            total_amount: row.get(5)?,
            total_discount: row.get(6)?,
            currency_code,
            currency_evidence: row.get(8)?,
            image_path: row.get(9)?,
            status: status_str.parse().unwrap_or_default(),
            processing_attempts: row.get(11)?,
            last_processed_at: last_processed_str.map(|s| parse_datetime(&s)),
            error_message: row.get(13)?,
            created_at: parse_datetime(&created_at_str),
            updated_at: parse_datetime(&updated_at_str),
        })
    }

    /// Write the resolved header fields
    ///
    /// Status is left alone; it flips to processed only once the items commit.
    pub fn update_receipt_header(&self, id: i64, header: &ReceiptHeader) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE receipts SET store_name = ?, purchase_date = ?, date_inferred = ?,
             total_amount = ?, total_discount = ?, currency_code = ?, currency_evidence = ?,
             updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
            params![
                header.store_name,
                header.purchase_date.to_string(),
                header.date_inferred,
                header.total_amount,
                header.total_discount,
                header.currency_code.as_str(),
                header.currency_evidence,
                id,
            ],
        )?;
        if updated == 0 {
            return Err(crate::error::Error::NotFound(format!("receipt {}", id)));
        }
        Ok(())
    }

    /// Bump the attempt counter at the start of a processing run
    pub fn record_processing_started(&self, id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE receipts SET processing_attempts = processing_attempts + 1,
             last_processed_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
            params![id],
        )?;
        Ok(())
    }

    /// Mark a processing run as failed
    pub fn record_processing_failed(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE receipts SET status = 'failed', error_message = ?,
             updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
            params![message, id],
        )?;
        Ok(())
    }

    /// Replace all line items of a receipt in one transaction
    ///
    /// Either every item is written and the receipt is marked processed, or
    /// nothing changes.
    pub fn replace_receipt_items(
        &self,
        receipt_id: i64,
        items: &[NewReceiptItem],
    ) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM receipt_items WHERE receipt_id = ?",
            params![receipt_id],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO receipt_items (receipt_id, raw_name, readable_name, unit_price,
                 quantity, discount_amount, original_unit_price, is_discounted, total_price,
                 category_id)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;
            for item in items {
                stmt.execute(params![
                    receipt_id,
                    item.raw_name,
                    item.readable_name,
                    item.unit_price,
                    item.quantity,
                    item.discount_amount,
                    item.original_unit_price,
                    item.is_discounted(),
                    item.total_price(),
                    item.category_id,
                ])?;
            }
        }

        tx.execute(
            "UPDATE receipts SET status = 'processed', error_message = NULL,
             updated_at = CURRENT_TIMESTAMP
             WHERE id = ?",
            params![receipt_id],
        )?;

        tx.commit()?;
        Ok(items.len())
    }

    /// Get the line items of a receipt
    pub fn get_receipt_items(&self, receipt_id: i64) -> Result<Vec<ReceiptItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, receipt_id, raw_name, readable_name, unit_price, quantity,
                    discount_amount, original_unit_price, is_discounted, total_price,
                    category_id, created_at
             FROM receipt_items WHERE receipt_id = ? ORDER BY id",
        )?;

        let items = stmt
            .query_map(params![receipt_id], |row| {
                let created_at_str: String = row.get(11)?;
                Ok(ReceiptItem {
                    id: row.get(0)?,
                    receipt_id: row.get(1)?,
                    raw_name: row.get(2)?,
                    readable_name: row.get(3)?,
                    unit_price: row.get(4)?,
                    quantity: row.get(5)?,
                    discount_amount: row.get(6)?,
                    original_unit_price: row.get(7)?,
                    is_discounted: row.get(8)?,
                    total_price: row.get(9)?,
                    category_id: row.get(10)?,
                    created_at: parse_datetime(&created_at_str),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }
}
