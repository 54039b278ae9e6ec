//! Pluggable AI backend abstraction
//!
//! The pipeline makes exactly two kinds of model calls: one vision call that
//! turns a receipt image into structured data, and one batched call that
//! corrects and translates item names.
//!
//! # Architecture
//!
//! - `AIBackend` trait: the interface every backend implements
//! - `AIClient` enum: concrete wrapper providing Clone + compile-time dispatch
//! - Backend implementations: `OpenAICompatibleBackend`, `OllamaBackend`, `MockBackend`
//!
//! # Configuration
//!
//! Environment variables:
//! - `AI_BACKEND`: Backend to use (openai_compatible, ollama, mock). Default: openai_compatible
//! - `OPENAI_COMPATIBLE_HOST`: Server URL (required for openai_compatible backend)
//! - `OPENAI_COMPATIBLE_MODEL`: Vision-capable model name (default: gpt-4o-mini)
//! - `OPENAI_COMPATIBLE_API_KEY`: API key if required (optional)
//! - `OLLAMA_HOST`: Ollama server URL (required for ollama backend)
//! - `OLLAMA_MODEL`: Vision-capable model name (default: llama3.2-vision)

mod mock;
mod ollama;
mod openai_compatible;
pub mod parsing;
pub mod types;

pub use mock::MockBackend;
pub use ollama::OllamaBackend;
pub use openai_compatible::OpenAICompatibleBackend;
pub use parsing::ExtractionParseError;
pub use types::*;

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{Category, TranslationEntry};
use crate::prompts::{PromptId, PromptLibrary};

/// Trait defining the interface for all AI backends
#[async_trait]
pub trait AIBackend: Send + Sync {
    /// Read a receipt image reachable at `image_url`
    ///
    /// `categories` is the closed set the model may assign; ids outside it are
    /// cleared during validation. Output that cannot be parsed is returned as
    /// [`Error::Extraction`].
    async fn extract_receipt(&self, image_url: &str, categories: &[Category])
        -> Result<RawExtraction>;

    /// Correct and translate a batch of item names in one request
    ///
    /// `examples` are existing cache entries sent as few-shot context.
    async fn translate_items(
        &self,
        names: &[String],
        examples: &[TranslationEntry],
        categories: &[Category],
    ) -> Result<Vec<ItemTranslation>>;

    /// Check if the backend is available
    async fn health_check(&self) -> bool;

    /// Get the model name (for logging)
    fn model(&self) -> &str;

    /// Get the host URL (for logging)
    fn host(&self) -> &str;
}

/// Concrete AI client enum
#[derive(Clone)]
pub enum AIClient {
    /// OpenAI-compatible chat completions (vLLM, LocalAI, llama-server, hosted APIs)
    OpenAICompatible(OpenAICompatibleBackend),
    /// Ollama backend (HTTP API)
    Ollama(OllamaBackend),
    /// Mock backend for testing
    Mock(MockBackend),
}

impl AIClient {
    /// Create an AI client from environment variables
    ///
    /// Returns None if the selected backend's host variable is not set.
    pub fn from_env() -> Option<Self> {
        let backend =
            std::env::var("AI_BACKEND").unwrap_or_else(|_| "openai_compatible".to_string());

        match backend.to_lowercase().as_str() {
            "openai_compatible" | "openai" | "vllm" | "localai" | "llamacpp" => {
                OpenAICompatibleBackend::from_env().map(AIClient::OpenAICompatible)
            }
            "ollama" => OllamaBackend::from_env().map(AIClient::Ollama),
            "mock" => Some(AIClient::Mock(MockBackend::new())),
            _ => {
                tracing::warn!(backend = %backend, "Unknown AI_BACKEND, falling back to openai_compatible");
                OpenAICompatibleBackend::from_env().map(AIClient::OpenAICompatible)
            }
        }
    }

    /// Create a mock backend for testing
    pub fn mock() -> Self {
        AIClient::Mock(MockBackend::new())
    }

    /// Create a new instance with a different model
    pub fn with_model(&self, model: &str) -> Self {
        match self {
            AIClient::OpenAICompatible(b) => AIClient::OpenAICompatible(b.with_model(model)),
            AIClient::Ollama(b) => AIClient::Ollama(b.with_model(model)),
            AIClient::Mock(b) => AIClient::Mock(b.with_model(model)),
        }
    }
}

#[async_trait]
impl AIBackend for AIClient {
    async fn extract_receipt(
        &self,
        image_url: &str,
        categories: &[Category],
    ) -> Result<RawExtraction> {
        match self {
            AIClient::OpenAICompatible(b) => b.extract_receipt(image_url, categories).await,
            AIClient::Ollama(b) => b.extract_receipt(image_url, categories).await,
            AIClient::Mock(b) => b.extract_receipt(image_url, categories).await,
        }
    }

    async fn translate_items(
        &self,
        names: &[String],
        examples: &[TranslationEntry],
        categories: &[Category],
    ) -> Result<Vec<ItemTranslation>> {
        match self {
            AIClient::OpenAICompatible(b) => b.translate_items(names, examples, categories).await,
            AIClient::Ollama(b) => b.translate_items(names, examples, categories).await,
            AIClient::Mock(b) => b.translate_items(names, examples, categories).await,
        }
    }

    async fn health_check(&self) -> bool {
        match self {
            AIClient::OpenAICompatible(b) => b.health_check().await,
            AIClient::Ollama(b) => b.health_check().await,
            AIClient::Mock(b) => b.health_check().await,
        }
    }

    fn model(&self) -> &str {
        match self {
            AIClient::OpenAICompatible(b) => b.model(),
            AIClient::Ollama(b) => b.model(),
            AIClient::Mock(b) => b.model(),
        }
    }

    fn host(&self) -> &str {
        match self {
            AIClient::OpenAICompatible(b) => b.host(),
            AIClient::Ollama(b) => b.host(),
            AIClient::Mock(b) => b.host(),
        }
    }
}

/// System and user text for one model call
#[derive(Debug, Clone)]
pub(crate) struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// Category set as offered to the model, one `id: name (keywords)` per line
pub(crate) fn category_lines(categories: &[Category]) -> String {
    categories
        .iter()
        .map(|c| match c.keywords.as_deref().filter(|k| !k.is_empty()) {
            Some(keywords) => format!("{}: {} ({})", c.id, c.name, keywords),
            None => format!("{}: {}", c.id, c.name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn category_ids(categories: &[Category]) -> HashSet<i64> {
    categories.iter().map(|c| c.id).collect()
}

fn render(
    prompts: &RwLock<PromptLibrary>,
    id: PromptId,
    vars: &HashMap<&str, &str>,
) -> Result<RenderedPrompt> {
    let mut prompts = prompts
        .write()
        .map_err(|_| Error::InvalidData("Failed to acquire prompt library lock".into()))?;
    let template = prompts.get(id)?;
    Ok(RenderedPrompt {
        system: template.render_system(vars),
        user: template.render_user(vars),
    })
}

pub(crate) fn extraction_prompt(
    prompts: &RwLock<PromptLibrary>,
    categories: &[Category],
) -> Result<RenderedPrompt> {
    let categories = category_lines(categories);
    let mut vars = HashMap::new();
    vars.insert("categories", categories.as_str());
    render(prompts, PromptId::ExtractReceipt, &vars)
}

pub(crate) fn translation_prompt(
    prompts: &RwLock<PromptLibrary>,
    names: &[String],
    examples: &[TranslationEntry],
    categories: &[Category],
) -> Result<RenderedPrompt> {
    let names_json = serde_json::to_string(names)?;
    let categories = category_lines(categories);
    let examples = examples
        .iter()
        .map(|e| {
            format!(
                "- corrected_name: \"{}\", readable_name: \"{}\"",
                e.original_name, e.readable_name
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut vars = HashMap::new();
    vars.insert("names", names_json.as_str());
    vars.insert("categories", categories.as_str());
    vars.insert("examples", examples.as_str());
    render(prompts, PromptId::TranslateItems, &vars)
}
