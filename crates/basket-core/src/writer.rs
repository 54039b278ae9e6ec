//! Commit a normalized receipt to the database
//!
//! Three steps, in order: new translations (best-effort), the receipt header,
//! then the item batch. The item batch is replaced in a single transaction; if
//! it fails after the header was written the receipt shows up in
//! [`Database::list_partial_receipts`] until it is reprocessed.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::{Database, InsertOutcome};
use crate::error::Result;
use crate::models::{NewReceiptItem, NewTranslation, ReceiptHeader};
use crate::translate::NormalizedItem;

/// What a commit wrote
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitSummary {
    pub items_written: usize,
    pub translations_inserted: usize,
    /// Entries another writer inserted first; items were repointed at the winner
    pub translations_reused: usize,
    pub translations_failed: usize,
    /// Sum of item totals after discounts
    pub items_total: f64,
    pub total_discount: f64,
}

pub struct PersistenceWriter<'a> {
    db: &'a Database,
    total_tolerance: f64,
}

impl<'a> PersistenceWriter<'a> {
    pub fn new(db: &'a Database, total_tolerance: f64) -> Self {
        Self {
            db,
            total_tolerance,
        }
    }

    pub fn commit(
        &self,
        receipt_id: i64,
        mut header: ReceiptHeader,
        items: Vec<NormalizedItem>,
        new_translations: &[NewTranslation],
    ) -> Result<CommitSummary> {
        let mut summary = CommitSummary::default();
        let mut items = items;

        // 1. Translations. Failures here never block the receipt.
        for (index, new) in new_translations.iter().enumerate() {
            match self.db.insert_translation_if_absent(new) {
                Ok(InsertOutcome::Inserted(entry)) => {
                    debug!(id = entry.id, original = %entry.original_name, "Inserted translation");
                    summary.translations_inserted += 1;
                }
                Ok(InsertOutcome::Existing(winner)) => {
                    debug!(
                        original = %new.original_name,
                        winner = %winner.readable_name,
                        "Translation already present, repointing items"
                    );
                    summary.translations_reused += 1;
                    let repointed = items
                        .iter_mut()
                        .filter(|i| i.pending_entry == Some(index));
                    for normalized in repointed {
                        normalized.item.readable_name = winner.readable_name.clone();
                        if normalized.item.category_id.is_none() {
                            normalized.item.category_id = winner.category_id;
                        }
                    }
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        original = %new.original_name,
                        "Failed to store translation, keeping item names"
                    );
                    summary.translations_failed += 1;
                }
            }
        }

        let items: Vec<NewReceiptItem> = items.into_iter().map(|n| n.item).collect();
        summary.total_discount = round_cents(items.iter().map(|i| i.discount_amount).sum());
        summary.items_total = round_cents(items.iter().map(|i| i.total_price()).sum());

        let divergence = (summary.items_total - header.total_amount).abs();
        if !items.is_empty() && divergence > self.total_tolerance {
            warn!(
                receipt_id,
                items_total = summary.items_total,
                total_amount = header.total_amount,
                "Item sum diverges from printed total"
            );
        }

        // 2. Header
        header.total_discount = summary.total_discount;
        self.db.update_receipt_header(receipt_id, &header)?;

        // 3. Items, atomically
        summary.items_written = self.db.replace_receipt_items(receipt_id, &items)?;

        info!(
            receipt_id,
            items = summary.items_written,
            translations_inserted = summary.translations_inserted,
            translations_reused = summary.translations_reused,
            "Committed receipt"
        );
        Ok(summary)
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}
