//! Integration tests for basket-core
//!
//! These tests exercise the full placeholder → upload → extract → translate →
//! commit workflow against a temp database, a temp blob directory, and the
//! mock AI backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use basket_core::{
    image_object_path, AIClient, BlobStore, CurrencyCode, CurrencySource, Database, Error,
    IngestError, IngestionPipeline, LocalBlobStore, MockBackend, PipelineConfig, ReceiptStatus,
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;

const OWNER: &str = "alice@example.com";
const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// A date ten days ago, printed US style
fn recent_us_date() -> (String, chrono::NaiveDate) {
    let date = Utc::now().date_naive() - ChronoDuration::days(10);
    (date.format("%m/%d/%Y").to_string(), date)
}

/// Model output for a one-item corner store receipt
fn gatorade_receipt(date: &str) -> String {
    let body = json!({
        "store_name": "Corner Market",
        "purchase_date": date,
        "total_amount": 2.49,
        "currency_code": null,
        "currency_evidence": "$",
        "items": [
            {"name": "GTRD FRST BOISS", "unit_price": 2.49, "quantity": 1, "category_id": 7, "discount_amount": 0}
        ]
    });
    format!("Here is the receipt:\n```json\n{}\n```", body)
}

fn gatorade_mock(date: &str) -> MockBackend {
    MockBackend::new()
        .with_extraction_response(gatorade_receipt(date))
        .with_translation(
            "GTRD FRST BOISS",
            "Gatorade Frost Glacier Freeze",
            "Gatorade Frost Glacier",
            Some(7),
        )
}

struct Harness {
    db: Database,
    storage: Arc<LocalBlobStore>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let db = Database::in_memory().expect("Failed to create in-memory database");
        db.seed_default_categories().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let storage =
            Arc::new(LocalBlobStore::new(dir.path().join("blobs"), "http://localhost:3000", "test-secret").unwrap());
        Self {
            db,
            storage,
            _dir: dir,
        }
    }

    fn pipeline(&self, mock: MockBackend) -> IngestionPipeline {
        self.pipeline_with(mock, PipelineConfig::default())
    }

    fn pipeline_with(&self, mock: MockBackend, config: PipelineConfig) -> IngestionPipeline {
        IngestionPipeline::new(
            self.db.clone(),
            self.storage.clone(),
            AIClient::Mock(mock),
            config,
        )
    }
}

/// Blob store whose uploads always fail
struct BrokenStore;

#[async_trait]
impl BlobStore for BrokenStore {
    fn name(&self) -> &str {
        "broken"
    }

    async fn upload(&self, _path: &str, _bytes: &[u8], _content_type: &str) -> basket_core::Result<()> {
        Err(Error::Storage("bucket unavailable".into()))
    }

    async fn sign_url(&self, _path: &str, _ttl_secs: u64) -> basket_core::Result<String> {
        Err(Error::Storage("bucket unavailable".into()))
    }

    async fn read(&self, path: &str) -> basket_core::Result<Vec<u8>> {
        Err(Error::NotFound(path.to_string()))
    }
}

// =============================================================================
// End-to-end
// =============================================================================

#[tokio::test]
async fn test_gatorade_receipt_end_to_end() {
    let harness = Harness::new();
    let (printed, expected_date) = recent_us_date();
    let pipeline = harness.pipeline(gatorade_mock(&printed));

    let processed = pipeline.ingest(JPEG, OWNER).await.expect("ingest failed");
    let receipt = &processed.receipt.receipt;

    assert_eq!(receipt.store_name.as_deref(), Some("Corner Market"));
    assert_eq!(receipt.purchase_date, expected_date);
    assert!(!receipt.date_inferred);
    assert_eq!(receipt.total_amount, 2.49);
    assert_eq!(receipt.currency_code, CurrencyCode::Usd);
    assert_eq!(processed.currency_source, CurrencySource::Evidence);
    assert_eq!(receipt.status, ReceiptStatus::Processed);
    assert_eq!(receipt.processing_attempts, 1);
    assert!(receipt.error_message.is_none());

    let image_path = image_object_path(OWNER, receipt.id, "jpg");
    assert_eq!(receipt.image_path.as_deref(), Some(image_path.as_str()));
    assert_eq!(harness.storage.read(&image_path).await.unwrap(), JPEG);

    let items = &processed.receipt.items;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].raw_name, "GTRD FRST BOISS");
    assert_eq!(items[0].readable_name, "Gatorade Frost Glacier");
    assert_eq!(items[0].category_id, Some(7));
    assert!(!processed.degraded);

    let entry = harness
        .db
        .find_translation_by_original("Gatorade Frost Glacier Freeze")
        .unwrap()
        .expect("translation cached");
    assert_eq!(entry.readable_name, "Gatorade Frost Glacier");
    assert_eq!(processed.translations_inserted, 1);
}

#[tokio::test]
async fn test_dedup_is_idempotent_across_receipts() {
    let harness = Harness::new();
    let (printed, _) = recent_us_date();
    let pipeline = harness.pipeline(gatorade_mock(&printed));

    pipeline.ingest(JPEG, OWNER).await.unwrap();
    let second = pipeline.ingest(JPEG, OWNER).await.unwrap();

    assert_eq!(harness.db.count_translations().unwrap(), 1);
    assert_eq!(second.translations_inserted, 0);
    assert_eq!(second.receipt.items[0].readable_name, "Gatorade Frost Glacier");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingests_write_one_translation() {
    let harness = Harness::new();
    let (printed, _) = recent_us_date();
    let mock = gatorade_mock(&printed).with_delay(Duration::from_millis(50));
    let pipeline = harness.pipeline(mock.clone());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let pipeline = pipeline.clone();
        handles.push(tokio::spawn(async move { pipeline.ingest(JPEG, OWNER).await }));
    }

    let mut inserted = 0;
    for handle in handles {
        let processed = handle.await.unwrap().expect("ingest failed");
        assert_eq!(processed.receipt.items[0].readable_name, "Gatorade Frost Glacier");
        inserted += processed.translations_inserted;
    }

    assert_eq!(inserted, 1);
    assert_eq!(harness.db.count_translations().unwrap(), 1);
    assert_eq!(harness.db.list_receipts(OWNER, 10).unwrap().len(), 4);
}

// =============================================================================
// Resolver fallbacks
// =============================================================================

#[tokio::test]
async fn test_unparseable_date_falls_back_to_today() {
    let harness = Harness::new();
    let mock = MockBackend::new().with_extraction_response(
        json!({
            "store_name": "Bäckerei",
            "purchase_date": "Mittwoch",
            "total_amount": 1.10,
            "currency_code": "EUR",
            "items": [{"name": "BROT", "unit_price": 1.10, "quantity": 1}]
        })
        .to_string(),
    );
    let pipeline = harness.pipeline(mock);

    let processed = pipeline.ingest(JPEG, OWNER).await.unwrap();
    let receipt = &processed.receipt.receipt;
    assert_eq!(receipt.purchase_date, Utc::now().date_naive());
    assert!(receipt.date_inferred);
    assert_eq!(receipt.currency_code, CurrencyCode::Eur);
    assert_eq!(processed.currency_source, CurrencySource::Explicit);
}

#[tokio::test]
async fn test_missing_currency_uses_configured_default() {
    let harness = Harness::new();
    let (printed, _) = recent_us_date();
    let mock = MockBackend::new().with_extraction_response(
        json!({
            "store_name": null,
            "purchase_date": printed,
            "total_amount": 4.00,
            "currency_code": null,
            "currency_evidence": null,
            "items": [{"name": "APPLES", "unit_price": 2.00, "quantity": 2}]
        })
        .to_string(),
    );
    let config = PipelineConfig {
        default_currency: CurrencyCode::Cad,
        ..PipelineConfig::default()
    };
    let pipeline = harness.pipeline_with(mock, config);

    let processed = pipeline.ingest(JPEG, OWNER).await.unwrap();
    assert_eq!(processed.receipt.receipt.currency_code, CurrencyCode::Cad);
    assert_eq!(processed.currency_source, CurrencySource::Default);
    assert_eq!(processed.items_total, 4.00);
}

#[tokio::test]
async fn test_owner_ids_with_spaces_and_non_ascii() {
    let harness = Harness::new();
    let (printed, _) = recent_us_date();
    let pipeline = harness.pipeline(gatorade_mock(&printed));

    for owner in ["Jane Doe", "Zoë Ünal"] {
        let processed = pipeline.ingest(JPEG, owner).await.expect("ingest failed");
        let receipt = &processed.receipt.receipt;
        assert_eq!(receipt.owner_id, owner);
        assert_eq!(receipt.status, ReceiptStatus::Processed);

        let path = receipt.image_path.clone().unwrap();
        assert_eq!(harness.storage.read(&path).await.unwrap(), JPEG);

        // Reprocessing signs the stored path again
        let again = pipeline.process(processed.id(), owner).await.unwrap();
        assert_eq!(again.receipt.receipt.processing_attempts, 2);
    }
}

// =============================================================================
// Partial failure
// =============================================================================

#[tokio::test]
async fn test_upload_failure_keeps_placeholder() {
    let harness = Harness::new();
    let mock = MockBackend::new();
    let pipeline = IngestionPipeline::new(
        harness.db.clone(),
        Arc::new(BrokenStore),
        AIClient::Mock(mock.clone()),
        PipelineConfig::default(),
    );

    let err = pipeline.ingest(JPEG, OWNER).await.unwrap_err();
    assert!(matches!(err, IngestError::Upload { .. }));
    assert!(err.is_retryable());
    assert_eq!(mock.extraction_calls(), 0);

    let receipt = harness.db.get_receipt(err.receipt_id().unwrap()).unwrap().unwrap();
    assert!(receipt.image_path.is_none());
    assert!(receipt.error_message.unwrap().contains("bucket unavailable"));
    assert_eq!(receipt.total_amount, 0.0);
}

#[tokio::test]
async fn test_malformed_extraction_keeps_placeholder() {
    let harness = Harness::new();
    let pipeline =
        harness.pipeline(MockBackend::new().with_extraction_response("I can't read this image."));

    let err = pipeline.ingest(JPEG, OWNER).await.unwrap_err();
    assert!(matches!(err, IngestError::MalformedExtraction { .. }));
    assert!(!err.is_retryable());

    let id = err.receipt_id().unwrap();
    let receipt = harness.db.get_receipt(id).unwrap().unwrap();
    assert_eq!(receipt.status, ReceiptStatus::Failed);
    assert!(receipt.image_path.is_some());
    assert!(receipt.error_message.is_some());
    assert!(harness.db.get_receipt_items(id).unwrap().is_empty());
    // Never got a header, so it is not a partial commit
    assert!(harness.db.list_partial_receipts(Some(OWNER)).unwrap().is_empty());
}

#[tokio::test]
async fn test_extraction_timeout_then_reprocess() {
    let harness = Harness::new();
    let (printed, _) = recent_us_date();
    let config = PipelineConfig {
        extraction_timeout: Duration::from_millis(20),
        ..PipelineConfig::default()
    };
    let slow = harness.pipeline_with(
        gatorade_mock(&printed).with_delay(Duration::from_millis(300)),
        config,
    );

    let err = slow.ingest(JPEG, OWNER).await.unwrap_err();
    let id = err.receipt_id().unwrap();
    match &err {
        IngestError::Extraction { source, .. } => {
            assert!(matches!(source, Error::Timeout { .. }))
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.is_retryable());

    // Retry from the signing step with a responsive backend
    let fast = harness.pipeline(gatorade_mock(&printed));
    let processed = fast.process(id, OWNER).await.unwrap();
    assert_eq!(processed.id(), id);
    assert_eq!(processed.receipt.receipt.status, ReceiptStatus::Processed);
    assert_eq!(processed.receipt.receipt.processing_attempts, 2);
    assert!(processed.receipt.receipt.error_message.is_none());
}

#[tokio::test]
async fn test_partial_commit_is_detectable_and_recoverable() {
    let harness = Harness::new();
    let (printed, _) = recent_us_date();
    let pipeline = harness.pipeline(gatorade_mock(&printed));

    harness
        .db
        .conn()
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER fail_items BEFORE INSERT ON receipt_items
             BEGIN SELECT RAISE(ABORT, 'simulated item write failure'); END;",
        )
        .unwrap();

    let err = pipeline.ingest(JPEG, OWNER).await.unwrap_err();
    assert!(matches!(err, IngestError::Commit { .. }));
    let id = err.receipt_id().unwrap();

    let partial = harness.db.list_partial_receipts(Some(OWNER)).unwrap();
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].id, id);
    assert_eq!(partial[0].total_amount, 2.49);

    harness
        .db
        .conn()
        .unwrap()
        .execute_batch("DROP TRIGGER fail_items;")
        .unwrap();

    let processed = pipeline.process(id, OWNER).await.unwrap();
    assert_eq!(processed.receipt.items.len(), 1);
    assert!(harness.db.list_partial_receipts(Some(OWNER)).unwrap().is_empty());
}

#[tokio::test]
async fn test_database_read_failure_is_classified() {
    let harness = Harness::new();
    let (printed, _) = recent_us_date();
    let mock = gatorade_mock(&printed);
    let pipeline = harness.pipeline(mock.clone());

    let id = harness
        .db
        .create_placeholder_receipt(OWNER, Utc::now().date_naive(), CurrencyCode::Usd)
        .unwrap();
    harness
        .db
        .conn()
        .unwrap()
        .execute_batch("ALTER TABLE categories RENAME TO categories_offline;")
        .unwrap();

    let err = pipeline
        .process_with_url(id, OWNER, "https://cdn.example.com/receipts/1.jpg")
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Database { .. }));
    assert_eq!(err.kind(), "database");
    assert!(err.is_retryable());
    assert_eq!(err.receipt_id(), Some(id));
    assert_eq!(mock.extraction_calls(), 0);
    let receipt = harness.db.get_receipt(id).unwrap().unwrap();
    assert_eq!(receipt.status, ReceiptStatus::Failed);

    harness
        .db
        .conn()
        .unwrap()
        .execute_batch("ALTER TABLE categories_offline RENAME TO categories;")
        .unwrap();
    let processed = pipeline
        .process_with_url(id, OWNER, "https://cdn.example.com/receipts/1.jpg")
        .await
        .unwrap();
    assert_eq!(processed.receipt.items.len(), 1);
}

#[tokio::test]
async fn test_translation_failure_is_not_fatal() {
    let harness = Harness::new();
    let (printed, _) = recent_us_date();
    let pipeline = harness.pipeline(gatorade_mock(&printed).failing_translation());

    let processed = pipeline.ingest(JPEG, OWNER).await.unwrap();
    assert!(processed.degraded);
    assert_eq!(processed.receipt.items[0].readable_name, "GTRD FRST BOISS");
    assert_eq!(processed.receipt.receipt.status, ReceiptStatus::Processed);
    assert_eq!(harness.db.count_translations().unwrap(), 0);
}

// =============================================================================
// Ownership and triggers
// =============================================================================

#[tokio::test]
async fn test_process_checks_owner_and_image() {
    let harness = Harness::new();
    let (printed, _) = recent_us_date();
    let pipeline = harness.pipeline(gatorade_mock(&printed));

    let processed = pipeline.ingest(JPEG, OWNER).await.unwrap();
    let err = pipeline.process(processed.id(), "mallory").await.unwrap_err();
    assert!(matches!(err, IngestError::NotFound(_)));

    let bare = harness
        .db
        .create_placeholder_receipt(OWNER, Utc::now().date_naive(), CurrencyCode::Eur)
        .unwrap();
    let err = pipeline.process(bare, OWNER).await.unwrap_err();
    assert!(matches!(err, IngestError::MissingImage(_)));
}

#[tokio::test]
async fn test_process_with_external_url() {
    let harness = Harness::new();
    let (printed, _) = recent_us_date();
    let pipeline = harness.pipeline(gatorade_mock(&printed));

    let id = harness
        .db
        .create_placeholder_receipt(OWNER, Utc::now().date_naive(), CurrencyCode::Eur)
        .unwrap();
    let processed = pipeline
        .process_with_url(id, OWNER, "https://cdn.example.com/receipts/1.jpg")
        .await
        .unwrap();
    assert_eq!(processed.id(), id);
    assert_eq!(processed.receipt.items.len(), 1);
}
