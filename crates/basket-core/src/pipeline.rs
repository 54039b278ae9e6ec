//! Receipt ingestion coordinator
//!
//! Drives one receipt through placeholder, upload, signed URL, extraction,
//! translation, date/currency resolution, and commit. Nothing here spans a
//! transaction across services: each step leaves the receipt in a state that
//! a later [`IngestionPipeline::process`] call can pick up and overwrite.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ai::{AIBackend, AIClient, ExtractionParseError, RawExtraction};
use crate::config::PipelineConfig;
use crate::db::Database;
use crate::error::Error;
use crate::models::{Category, Receipt, ReceiptHeader, ReceiptWithItems};
use crate::resolve::{CurrencySource, DateCurrencyResolver};
use crate::storage::{content_type_for, BlobStore};
use crate::translate::TranslationNormalizer;
use crate::writer::PersistenceWriter;

/// Why an ingestion run stopped
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to create placeholder receipt: {0}")]
    Placeholder(#[source] Error),

    #[error("Failed to upload image for receipt {receipt_id}: {source}")]
    Upload {
        receipt_id: i64,
        #[source]
        source: Error,
    },

    #[error("Failed to sign image URL for receipt {receipt_id}: {source}")]
    SignUrl {
        receipt_id: i64,
        #[source]
        source: Error,
    },

    #[error("Extraction failed for receipt {receipt_id}: {source}")]
    Extraction {
        receipt_id: i64,
        #[source]
        source: Error,
    },

    #[error("Malformed extraction for receipt {receipt_id}: {source}")]
    MalformedExtraction {
        receipt_id: i64,
        #[source]
        source: ExtractionParseError,
    },

    #[error("Failed to commit receipt {receipt_id}: {source}")]
    Commit {
        receipt_id: i64,
        #[source]
        source: Error,
    },

    #[error("Database read failed for receipt {receipt_id}: {source}")]
    Database {
        receipt_id: i64,
        #[source]
        source: Error,
    },

    #[error("Receipt {0} not found")]
    NotFound(i64),

    #[error("Receipt {0} has no stored image")]
    MissingImage(i64),
}

impl IngestError {
    /// Whether re-running the same receipt may succeed without changes
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestError::Placeholder(_)
                | IngestError::Upload { .. }
                | IngestError::SignUrl { .. }
                | IngestError::Extraction { .. }
                | IngestError::Commit { .. }
                | IngestError::Database { .. }
        )
    }

    /// Receipt the failure belongs to, when one exists
    pub fn receipt_id(&self) -> Option<i64> {
        match self {
            IngestError::Placeholder(_) => None,
            IngestError::Upload { receipt_id, .. }
            | IngestError::SignUrl { receipt_id, .. }
            | IngestError::Extraction { receipt_id, .. }
            | IngestError::MalformedExtraction { receipt_id, .. }
            | IngestError::Commit { receipt_id, .. }
            | IngestError::Database { receipt_id, .. } => Some(*receipt_id),
            IngestError::NotFound(id) | IngestError::MissingImage(id) => Some(*id),
        }
    }

    /// Short machine-readable kind (API responses, logs)
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::Placeholder(_) => "placeholder",
            IngestError::Upload { .. } => "upload",
            IngestError::SignUrl { .. } => "sign_url",
            IngestError::Extraction { .. } => "extraction",
            IngestError::MalformedExtraction { .. } => "malformed_extraction",
            IngestError::Commit { .. } => "commit",
            IngestError::Database { .. } => "database",
            IngestError::NotFound(_) => "not_found",
            IngestError::MissingImage(_) => "missing_image",
        }
    }
}

/// A receipt after a successful run
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedReceipt {
    #[serde(flatten)]
    pub receipt: ReceiptWithItems,
    /// Some item names fell back to their raw form
    pub degraded: bool,
    pub currency_source: CurrencySource,
    /// Sum of item totals after discounts, for comparison with `total_amount`
    pub items_total: f64,
    pub translations_inserted: usize,
}

impl ProcessedReceipt {
    pub fn id(&self) -> i64 {
        self.receipt.receipt.id
    }
}

/// File extension for an image, sniffed from its leading bytes
pub fn detect_image_extension(bytes: &[u8]) -> &'static str {
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.starts_with(PNG) {
        "png"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "webp"
    } else if bytes.len() >= 12
        && &bytes[4..8] == b"ftyp"
        && matches!(
            &bytes[8..12],
            b"heic" | b"heix" | b"hevc" | b"heim" | b"heis" | b"mif1" | b"msf1"
        )
    {
        "heic"
    } else {
        "jpg"
    }
}

/// Object path for a receipt image
///
/// The owner segment is the hex of the owner id's UTF-8 bytes, so any owner
/// id maps to a distinct, path-safe directory.
pub fn image_object_path(owner_id: &str, receipt_id: i64, ext: &str) -> String {
    format!("{}/{}.{}", hex::encode(owner_id.as_bytes()), receipt_id, ext)
}

async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> crate::Result<T>
where
    F: Future<Output = crate::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}

/// The ingestion coordinator
#[derive(Clone)]
pub struct IngestionPipeline {
    db: Database,
    storage: Arc<dyn BlobStore>,
    ai: AIClient,
    config: PipelineConfig,
}

impl IngestionPipeline {
    pub fn new(
        db: Database,
        storage: Arc<dyn BlobStore>,
        ai: AIClient,
        config: PipelineConfig,
    ) -> Self {
        Self {
            db,
            storage,
            ai,
            config,
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn storage(&self) -> &Arc<dyn BlobStore> {
        &self.storage
    }

    pub fn ai(&self) -> &AIClient {
        &self.ai
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Full run for a freshly uploaded image
    pub async fn ingest(
        &self,
        image: &[u8],
        owner_id: &str,
    ) -> Result<ProcessedReceipt, IngestError> {
        let today = Utc::now().date_naive();
        let receipt_id = self
            .db
            .create_placeholder_receipt(owner_id, today, self.config.default_currency)
            .map_err(IngestError::Placeholder)?;
        info!(receipt_id, owner_id, size = image.len(), "Created placeholder receipt");

        let ext = detect_image_extension(image);
        let path = image_object_path(owner_id, receipt_id, ext);
        let upload = with_timeout(
            "image upload",
            self.config.storage_timeout,
            self.storage.upload(&path, image, content_type_for(ext)),
        )
        .await
        .and_then(|()| self.db.set_receipt_image_path(receipt_id, &path));
        if let Err(source) = upload {
            return Err(self.fail(IngestError::Upload { receipt_id, source }));
        }

        self.record_started(receipt_id);
        let url = self.sign(receipt_id, &path).await?;
        self.run(receipt_id, owner_id, &url, today).await
    }

    /// Re-run signing, extraction, and commit for a stored receipt
    pub async fn process(
        &self,
        receipt_id: i64,
        owner_id: &str,
    ) -> Result<ProcessedReceipt, IngestError> {
        let receipt = self.owned_receipt(receipt_id, owner_id)?;
        let path = receipt
            .image_path
            .ok_or(IngestError::MissingImage(receipt_id))?;

        self.record_started(receipt_id);
        let url = self.sign(receipt_id, &path).await?;
        self.run(receipt_id, owner_id, &url, Utc::now().date_naive()).await
    }

    /// Run extraction and commit against a caller-supplied image URL
    pub async fn process_with_url(
        &self,
        receipt_id: i64,
        owner_id: &str,
        image_url: &str,
    ) -> Result<ProcessedReceipt, IngestError> {
        self.owned_receipt(receipt_id, owner_id)?;
        self.record_started(receipt_id);
        self.run(receipt_id, owner_id, image_url, Utc::now().date_naive()).await
    }

    fn owned_receipt(&self, receipt_id: i64, owner_id: &str) -> Result<Receipt, IngestError> {
        match self.db.get_receipt_for_owner(receipt_id, owner_id) {
            Ok(Some(receipt)) => Ok(receipt),
            Ok(None) => Err(IngestError::NotFound(receipt_id)),
            Err(source) => Err(IngestError::Database { receipt_id, source }),
        }
    }

    async fn sign(&self, receipt_id: i64, path: &str) -> Result<String, IngestError> {
        with_timeout(
            "sign image URL",
            self.config.storage_timeout,
            self.storage.sign_url(path, self.config.signed_url_ttl_secs),
        )
        .await
        .map_err(|source| self.fail(IngestError::SignUrl { receipt_id, source }))
    }

    async fn extract(
        &self,
        receipt_id: i64,
        image_url: &str,
        categories: &[Category],
    ) -> Result<RawExtraction, IngestError> {
        let result = with_timeout(
            "receipt extraction",
            self.config.extraction_timeout,
            self.ai.extract_receipt(image_url, categories),
        )
        .await;

        result.map_err(|e| {
            self.fail(match e {
                Error::Extraction(source) => {
                    IngestError::MalformedExtraction { receipt_id, source }
                }
                source => IngestError::Extraction { receipt_id, source },
            })
        })
    }

    async fn run(
        &self,
        receipt_id: i64,
        owner_id: &str,
        image_url: &str,
        today: NaiveDate,
    ) -> Result<ProcessedReceipt, IngestError> {
        let categories = self
            .db
            .list_categories()
            .map_err(|source| self.fail(IngestError::Database { receipt_id, source }))?;

        let extraction = self.extract(receipt_id, image_url, &categories).await?;
        info!(
            receipt_id,
            items = extraction.items.len(),
            total = extraction.total_amount,
            model = self.ai.model(),
            "Extracted receipt"
        );

        let normalizer = TranslationNormalizer::new(
            &self.db,
            &self.ai,
            self.config.translation_timeout,
            self.config.few_shot_limit,
        );
        let normalized = normalizer
            .normalize(&extraction.items, &categories)
            .await
            .map_err(|source| self.fail(IngestError::Database { receipt_id, source }))?;

        let resolution = DateCurrencyResolver::new(self.config.default_currency).resolve(
            extraction.purchase_date.as_deref(),
            extraction.currency_code.as_deref(),
            extraction.currency_evidence.as_deref(),
            today,
        );

        let header = ReceiptHeader {
            store_name: extraction
                .store_name
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            purchase_date: resolution.purchase_date,
            date_inferred: resolution.date_inferred,
            total_amount: extraction.total_amount,
            total_discount: 0.0,
            currency_code: resolution.currency,
            currency_evidence: extraction.currency_evidence.clone(),
        };

        let summary = PersistenceWriter::new(&self.db, self.config.total_tolerance)
            .commit(receipt_id, header, normalized.items, &normalized.new_entries)
            .map_err(|source| self.fail(IngestError::Commit { receipt_id, source }))?;

        let receipt = self
            .db
            .get_receipt_with_items(receipt_id, owner_id)
            .map_err(|source| IngestError::Database { receipt_id, source })?
            .ok_or(IngestError::NotFound(receipt_id))?;

        if normalized.degraded {
            warn!(receipt_id, "Receipt committed with untranslated item names");
        }

        Ok(ProcessedReceipt {
            receipt,
            degraded: normalized.degraded,
            currency_source: resolution.currency_source,
            items_total: summary.items_total,
            translations_inserted: summary.translations_inserted,
        })
    }

    fn record_started(&self, receipt_id: i64) {
        if let Err(e) = self.db.record_processing_started(receipt_id) {
            warn!(receipt_id, error = %e, "Failed to record processing attempt");
        }
    }

    /// Log a stage failure and store it on the receipt
    fn fail(&self, err: IngestError) -> IngestError {
        error!(kind = err.kind(), retryable = err.is_retryable(), "{}", err);
        if let Some(receipt_id) = err.receipt_id() {
            if let Err(e) = self.db.record_processing_failed(receipt_id, &err.to_string()) {
                warn!(receipt_id, error = %e, "Failed to record processing failure");
            }
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_image_extension() {
        assert_eq!(detect_image_extension(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), "jpg");
        assert_eq!(
            detect_image_extension(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0]),
            "png"
        );
        assert_eq!(detect_image_extension(b"RIFF\x10\x00\x00\x00WEBPVP8 "), "webp");
        assert_eq!(detect_image_extension(b"\x00\x00\x00\x18ftypheic\x00\x00"), "heic");
        assert_eq!(detect_image_extension(b"not an image"), "jpg");
        assert_eq!(detect_image_extension(&[]), "jpg");
    }

    #[test]
    fn test_image_object_path() {
        assert_eq!(image_object_path("alice", 42, "png"), "616c696365/42.png");
        assert_eq!(image_object_path("Jane Doe", 1, "jpg"), "4a616e6520446f65/1.jpg");
        // Distinct owners never share a directory
        assert_ne!(
            image_object_path("a/b", 1, "jpg"),
            image_object_path("a_b", 1, "jpg")
        );
        for owner in ["Zoë Ünal", "../etc", "local-dev", "bob@example.com"] {
            let path = image_object_path(owner, 7, "jpg");
            assert!(crate::storage::validate_path(&path).is_ok(), "{owner:?}");
        }
    }

    #[test]
    fn test_error_classification() {
        let upload = IngestError::Upload {
            receipt_id: 3,
            source: Error::Storage("disk full".into()),
        };
        assert!(upload.is_retryable());
        assert_eq!(upload.receipt_id(), Some(3));
        assert_eq!(upload.kind(), "upload");

        let malformed = IngestError::MalformedExtraction {
            receipt_id: 4,
            source: ExtractionParseError::MissingField("total_amount"),
        };
        assert!(!malformed.is_retryable());
        assert_eq!(malformed.receipt_id(), Some(4));

        let read = IngestError::Database {
            receipt_id: 5,
            source: Error::InvalidData("no such table: categories".into()),
        };
        assert!(read.is_retryable());
        assert_eq!(read.receipt_id(), Some(5));
        assert_eq!(read.kind(), "database");

        assert!(!IngestError::NotFound(1).is_retryable());
        assert!(!IngestError::MissingImage(1).is_retryable());
    }
}
