//! Item name normalization against the translation cache
//!
//! Receipt item names are abbreviated, misspelled, and often not in English.
//! Known names are resolved from the cache; unseen names go to the model in
//! one batched request. A translation is only queued as a new cache entry
//! when neither its corrected name nor its readable name is already taken,
//! in the cache or earlier in the same batch, so the cache never grows two
//! spellings of one product.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ai::{AIBackend, AIClient, ItemTranslation, RawItem};
use crate::db::Database;
use crate::error::Result;
use crate::models::{Category, NewReceiptItem, NewTranslation, TranslationEntry};

/// Where an item's readable name came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NameSource {
    /// Raw name found in the cache
    Cache,
    /// Model translation matched an existing cache entry
    CacheMatch,
    /// Model translation queued as a new entry
    Translated,
    /// Translation unavailable; raw name used as-is
    Fallback,
}

/// One line item ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedItem {
    pub item: NewReceiptItem,
    pub source: NameSource,
    /// Index into [`Normalization::new_entries`] the name was taken from
    pub pending_entry: Option<usize>,
}

/// Result of normalizing one receipt's items
#[derive(Debug, Clone, Default)]
pub struct Normalization {
    pub items: Vec<NormalizedItem>,
    /// Entries to insert with insert-if-absent semantics
    pub new_entries: Vec<NewTranslation>,
    /// True when some names fell back to their raw form
    pub degraded: bool,
}

/// Resolution for one distinct raw name
#[derive(Debug, Clone)]
struct Resolved {
    readable_name: String,
    category_id: Option<i64>,
    source: NameSource,
    pending_entry: Option<usize>,
}

impl Resolved {
    fn from_entry(entry: &TranslationEntry, source: NameSource) -> Self {
        Self {
            readable_name: entry.readable_name.clone(),
            category_id: entry.category_id,
            source,
            pending_entry: None,
        }
    }

    fn fallback(raw_name: &str) -> Self {
        Self {
            readable_name: raw_name.to_string(),
            category_id: None,
            source: NameSource::Fallback,
            pending_entry: None,
        }
    }
}

fn key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Reconciles extracted item names with the translation cache
pub struct TranslationNormalizer<'a> {
    db: &'a Database,
    ai: &'a AIClient,
    timeout: Duration,
    few_shot_limit: usize,
}

impl<'a> TranslationNormalizer<'a> {
    pub fn new(
        db: &'a Database,
        ai: &'a AIClient,
        timeout: Duration,
        few_shot_limit: usize,
    ) -> Self {
        Self {
            db,
            ai,
            timeout,
            few_shot_limit,
        }
    }

    /// Normalize a receipt's items
    ///
    /// Database errors are returned; a failed or timed-out model call is not,
    /// it only marks the result as degraded.
    pub async fn normalize(
        &self,
        items: &[RawItem],
        categories: &[Category],
    ) -> Result<Normalization> {
        let mut resolved: HashMap<String, Resolved> = HashMap::new();
        let mut unseen: Vec<String> = Vec::new();

        for item in items {
            let k = key(&item.name);
            if resolved.contains_key(&k) || unseen.iter().any(|n| key(n) == k) {
                continue;
            }
            match self.db.find_translation_by_original(&item.name)? {
                Some(entry) => {
                    resolved.insert(k, Resolved::from_entry(&entry, NameSource::Cache));
                }
                None => unseen.push(item.name.trim().to_string()),
            }
        }

        let mut new_entries: Vec<NewTranslation> = Vec::new();
        let mut degraded = false;

        if !unseen.is_empty() {
            debug!(
                cached = resolved.len(),
                unseen = unseen.len(),
                "Requesting translations for unseen item names"
            );
            match self.request_translations(&unseen, categories).await {
                Some(translations) => {
                    for translation in translations {
                        let k = key(&translation.raw_name);
                        if resolved.contains_key(&k) {
                            continue;
                        }
                        let r = self.reconcile(&translation, &mut new_entries)?;
                        resolved.insert(k, r);
                    }
                }
                None => degraded = true,
            }

            for name in &unseen {
                let k = key(name);
                if !resolved.contains_key(&k) {
                    if !degraded {
                        warn!(raw_name = %name, "No translation returned, using raw name");
                    }
                    degraded = true;
                    resolved.insert(k, Resolved::fallback(name));
                }
            }
        }

        let items = items
            .iter()
            .map(|raw| {
                let r = resolved
                    .get(&key(&raw.name))
                    .cloned()
                    .unwrap_or_else(|| Resolved::fallback(raw.name.trim()));
                NormalizedItem {
                    item: NewReceiptItem {
                        raw_name: raw.name.trim().to_string(),
                        readable_name: r.readable_name,
                        unit_price: raw.unit_price,
                        quantity: raw.quantity,
                        discount_amount: raw.discount_amount,
                        original_unit_price: raw.original_unit_price,
                        // Per-receipt extraction wins over the cache's advisory category
                        category_id: raw.category_id.or(r.category_id),
                    },
                    source: r.source,
                    pending_entry: r.pending_entry,
                }
            })
            .collect();

        if !new_entries.is_empty() {
            info!(count = new_entries.len(), "Queued new translation entries");
        }

        Ok(Normalization {
            items,
            new_entries,
            degraded,
        })
    }

    /// One batched model call; `None` on failure or timeout
    async fn request_translations(
        &self,
        names: &[String],
        categories: &[Category],
    ) -> Option<Vec<ItemTranslation>> {
        let examples = if self.few_shot_limit == 0 {
            Vec::new()
        } else {
            match self.db.list_translations(self.few_shot_limit as i64) {
                Ok(examples) => examples,
                Err(e) => {
                    warn!(error = %e, "Failed to load few-shot examples, continuing without");
                    Vec::new()
                }
            }
        };

        let call = self.ai.translate_items(names, &examples, categories);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(translations)) => Some(translations),
            Ok(Err(e)) => {
                warn!(
                    error = %e,
                    model = self.ai.model(),
                    "Translation request failed, falling back to raw names"
                );
                None
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    model = self.ai.model(),
                    "Translation request timed out, falling back to raw names"
                );
                None
            }
        }
    }

    /// Two-key dedup: corrected name, then readable name, cache then batch
    fn reconcile(
        &self,
        translation: &ItemTranslation,
        new_entries: &mut Vec<NewTranslation>,
    ) -> Result<Resolved> {
        let corrected = translation.corrected_name.trim();
        let readable = translation.readable_name.trim();
        if readable.is_empty() {
            return Ok(Resolved::fallback(translation.raw_name.trim()));
        }
        let corrected = if corrected.is_empty() {
            translation.raw_name.trim()
        } else {
            corrected
        };

        if let Some(entry) = self.db.find_translation_by_original(corrected)? {
            debug!(corrected, readable = %entry.readable_name, "Corrected name already cached");
            return Ok(Resolved::from_entry(&entry, NameSource::CacheMatch));
        }
        if let Some(entry) = self.db.find_translation_by_readable(readable)? {
            debug!(readable, original = %entry.original_name, "Readable name already cached");
            return Ok(Resolved::from_entry(&entry, NameSource::CacheMatch));
        }

        let (corrected_key, readable_key) = (key(corrected), key(readable));
        if let Some((index, queued)) = new_entries.iter().enumerate().find(|(_, e)| {
            key(&e.original_name) == corrected_key || key(&e.readable_name) == readable_key
        }) {
            return Ok(Resolved {
                readable_name: queued.readable_name.clone(),
                category_id: queued.category_id,
                source: NameSource::Translated,
                pending_entry: Some(index),
            });
        }

        new_entries.push(NewTranslation {
            original_name: corrected.to_string(),
            readable_name: readable.to_string(),
            category_id: translation.category_id,
        });
        Ok(Resolved {
            readable_name: readable.to_string(),
            category_id: translation.category_id,
            source: NameSource::Translated,
            pending_entry: Some(new_entries.len() - 1),
        })
    }
}
