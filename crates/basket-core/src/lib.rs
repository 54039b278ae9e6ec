//! Basket Core Library
//!
//! Receipt ingestion and normalization for the Basket grocery tracker:
//! - Database access and migrations (receipts, items, categories, translations)
//! - Pluggable AI backends for receipt extraction and item-name translation
//! - Prompt library for customizable AI prompts
//! - Blob storage with signed URLs for receipt images
//! - Date/currency resolution and translation cache reconciliation
//! - The ingestion pipeline tying it all together

pub mod ai;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod resolve;
pub mod storage;
pub mod translate;
pub mod writer;

/// Test utilities including a mock model server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use ai::{
    AIBackend, AIClient, ExtractionParseError, ItemTranslation, MockBackend, OllamaBackend,
    OpenAICompatibleBackend, RawExtraction, RawItem,
};
pub use config::PipelineConfig;
pub use db::{Database, InsertOutcome};
pub use error::{Error, Result};
pub use models::*;
pub use pipeline::{image_object_path, IngestError, IngestionPipeline, ProcessedReceipt};
pub use prompts::{Prompt, PromptId, PromptInfo, PromptLibrary};
pub use resolve::{CurrencySource, DateCurrencyResolver, Resolution};
pub use storage::{BlobStore, LocalBlobStore, SignedUrlParams};
pub use translate::{NameSource, Normalization, NormalizedItem, TranslationNormalizer};
pub use writer::{CommitSummary, PersistenceWriter};
