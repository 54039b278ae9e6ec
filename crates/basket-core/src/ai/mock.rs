//! Mock backend for testing
//!
//! Extraction output is a scripted model response run through the real
//! parser, so malformed output can be simulated as well as good output.
//! Translations come from a dictionary, with a title-cased fallback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Category, TranslationEntry};

use super::parsing::parse_extraction;
use super::types::{ItemTranslation, RawExtraction};
use super::{category_ids, AIBackend};

const DEFAULT_EXTRACTION: &str = r#"{
  "store_name": "Mock Market",
  "purchase_date": "2024-03-14",
  "total_amount": 3.48,
  "currency_code": "EUR",
  "currency_evidence": "€",
  "items": [
    {"name": "VOLLMILCH", "unit_price": 1.19, "quantity": 2, "category_id": null, "discount_amount": 0},
    {"name": "BROT", "unit_price": 1.10, "quantity": 1, "category_id": null, "discount_amount": 0}
  ]
}"#;

/// Mock AI backend for testing
#[derive(Clone)]
pub struct MockBackend {
    /// Whether health_check should return true
    pub healthy: bool,
    extraction_response: Arc<Mutex<String>>,
    translations: Arc<Mutex<HashMap<String, ItemTranslation>>>,
    fail_extraction: bool,
    fail_translation: bool,
    delay: Option<Duration>,
    extraction_calls: Arc<AtomicUsize>,
    translation_calls: Arc<AtomicUsize>,
    last_examples: Arc<Mutex<Vec<TranslationEntry>>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Healthy mock returning a small two-item receipt
    pub fn new() -> Self {
        Self {
            healthy: true,
            extraction_response: Arc::new(Mutex::new(DEFAULT_EXTRACTION.to_string())),
            translations: Arc::new(Mutex::new(HashMap::new())),
            fail_extraction: false,
            fail_translation: false,
            delay: None,
            extraction_calls: Arc::new(AtomicUsize::new(0)),
            translation_calls: Arc::new(AtomicUsize::new(0)),
            last_examples: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            healthy: false,
            ..Self::new()
        }
    }

    /// No-op for mock; kept for parity with the real backends
    pub fn with_model(&self, _model: &str) -> Self {
        self.clone()
    }

    /// Raw model text returned by the next extraction calls
    pub fn with_extraction_response(self, response: impl Into<String>) -> Self {
        self.set_extraction_response(response);
        self
    }

    /// Replace the scripted extraction text (shared between clones)
    pub fn set_extraction_response(&self, response: impl Into<String>) {
        if let Ok(mut current) = self.extraction_response.lock() {
            *current = response.into();
        }
    }

    /// Script the translation for one raw name
    pub fn with_translation(
        self,
        raw_name: &str,
        corrected_name: &str,
        readable_name: &str,
        category_id: Option<i64>,
    ) -> Self {
        if let Ok(mut translations) = self.translations.lock() {
            translations.insert(
                raw_name.trim().to_lowercase(),
                ItemTranslation {
                    raw_name: raw_name.to_string(),
                    corrected_name: corrected_name.to_string(),
                    readable_name: readable_name.to_string(),
                    category_id,
                },
            );
        }
        self
    }

    /// Make every extraction call fail like an unreachable model host
    pub fn failing_extraction(mut self) -> Self {
        self.fail_extraction = true;
        self
    }

    /// Make every translation call fail like an unreachable model host
    pub fn failing_translation(mut self) -> Self {
        self.fail_translation = true;
        self
    }

    /// Sleep before answering (for timeout tests)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn extraction_calls(&self) -> usize {
        self.extraction_calls.load(Ordering::SeqCst)
    }

    pub fn translation_calls(&self) -> usize {
        self.translation_calls.load(Ordering::SeqCst)
    }

    /// Few-shot examples sent with the latest translation call
    pub fn last_examples(&self) -> Vec<TranslationEntry> {
        self.last_examples
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[async_trait]
impl AIBackend for MockBackend {
    async fn extract_receipt(
        &self,
        _image_url: &str,
        categories: &[Category],
    ) -> Result<RawExtraction> {
        self.extraction_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_extraction {
            return Err(Error::InvalidData("Mock extraction failure".into()));
        }

        let response = self
            .extraction_response
            .lock()
            .map(|r| r.clone())
            .map_err(|_| Error::InvalidData("Mock extraction lock poisoned".into()))?;
        Ok(parse_extraction(&response, &category_ids(categories))?)
    }

    async fn translate_items(
        &self,
        names: &[String],
        examples: &[TranslationEntry],
        categories: &[Category],
    ) -> Result<Vec<ItemTranslation>> {
        self.translation_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_examples.lock() {
            *last = examples.to_vec();
        }
        self.pause().await;
        if self.fail_translation {
            return Err(Error::InvalidData("Mock translation failure".into()));
        }

        let ids = category_ids(categories);
        let scripted = self
            .translations
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default();

        Ok(names
            .iter()
            .map(|name| match scripted.get(&name.trim().to_lowercase()) {
                Some(t) => ItemTranslation {
                    raw_name: name.clone(),
                    category_id: t.category_id.filter(|id| ids.contains(id)),
                    ..t.clone()
                },
                None => ItemTranslation {
                    raw_name: name.clone(),
                    corrected_name: title_case(name),
                    readable_name: title_case(name),
                    category_id: None,
                },
            })
            .collect())
    }

    async fn health_check(&self) -> bool {
        self.healthy
    }

    fn model(&self) -> &str {
        "mock"
    }

    fn host(&self) -> &str {
        "mock://localhost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_extraction() {
        let mock = MockBackend::new();
        let extraction = mock.extract_receipt("mock://image", &[]).await.unwrap();
        assert_eq!(extraction.items.len(), 2);
        assert_eq!(extraction.currency_code.as_deref(), Some("EUR"));
        assert_eq!(mock.extraction_calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_extraction() {
        let mock = MockBackend::new().with_extraction_response("Sorry, too blurry.");
        let result = mock.extract_receipt("mock://image", &[]).await;
        assert!(matches!(result, Err(Error::Extraction(_))));
    }

    #[tokio::test]
    async fn test_scripted_translation_and_fallback() {
        let mock = MockBackend::new().with_translation(
            "GTRD FRST BOISS",
            "Gatorade Frost Glacier Freeze",
            "Gatorade Frost Glacier",
            Some(7),
        );
        let categories = vec![Category {
            id: 7,
            name: "Beverages".to_string(),
            keywords: None,
        }];

        let result = mock
            .translate_items(
                &["gtrd frst boiss".to_string(), "BIO BANANEN".to_string()],
                &[],
                &categories,
            )
            .await
            .unwrap();
        assert_eq!(result[0].raw_name, "gtrd frst boiss");
        assert_eq!(result[0].readable_name, "Gatorade Frost Glacier");
        assert_eq!(result[0].category_id, Some(7));
        assert_eq!(result[1].readable_name, "Bio Bananen");
    }

    #[tokio::test]
    async fn test_failure_flags() {
        let mock = MockBackend::new().failing_translation();
        assert!(mock.translate_items(&["A".into()], &[], &[]).await.is_err());
        assert!(mock.extract_receipt("mock://image", &[]).await.is_ok());
        assert_eq!(mock.translation_calls(), 1);
    }

    #[tokio::test]
    async fn test_counters_shared_between_clones() {
        let mock = MockBackend::new();
        let clone = mock.clone();
        clone.extract_receipt("mock://image", &[]).await.unwrap();
        assert_eq!(mock.extraction_calls(), 1);
    }
}
