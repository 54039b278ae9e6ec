//! Ollama backend implementation
//!
//! Ollama's generate API takes images inline, so the signed receipt URL is
//! downloaded first and sent base64-encoded.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Category, TranslationEntry};
use crate::prompts::PromptLibrary;

use super::parsing::{parse_extraction, parse_translations};
use super::types::{ItemTranslation, RawExtraction};
use super::{category_ids, extraction_prompt, translation_prompt, AIBackend, RenderedPrompt};

const DEFAULT_MODEL: &str = "llama3.2-vision";

/// Ollama backend
#[derive(Clone)]
pub struct OllamaBackend {
    http_client: Client,
    base_url: String,
    model: String,
    prompts: Arc<RwLock<PromptLibrary>>,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            http_client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            prompts: Arc::new(RwLock::new(PromptLibrary::new())),
        }
    }

    pub fn with_prompts(mut self, prompts: PromptLibrary) -> Self {
        self.prompts = Arc::new(RwLock::new(prompts));
        self
    }

    /// Create a new instance with a different model
    pub fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("OLLAMA_HOST").ok()?;
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Some(Self::new(&host, &model))
    }

    /// Fetch the receipt image behind a (signed) URL
    async fn download_image(&self, image_url: &str) -> Result<Vec<u8>> {
        let response = self.http_client.get(image_url).send().await?;
        let response = response.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn generate(&self, prompt: RenderedPrompt, images: Vec<String>) -> Result<String> {
        let request = GenerateRequest {
            model: self.model.clone(),
            system: (!prompt.system.is_empty()).then_some(prompt.system),
            prompt: prompt.user,
            images,
            format: "json",
            stream: false,
        };

        let response = self
            .http_client
            .post(format!("{}/api/generate", self.base_url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::InvalidData(format!(
                "Ollama API error {}: {}",
                status, body
            )));
        }

        let generated: GenerateResponse = response.json().await?;
        Ok(generated.response)
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    format: &'static str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait]
impl AIBackend for OllamaBackend {
    async fn extract_receipt(
        &self,
        image_url: &str,
        categories: &[Category],
    ) -> Result<RawExtraction> {
        let image = self.download_image(image_url).await?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&image);

        let prompt = extraction_prompt(&self.prompts, categories)?;
        let response = self.generate(prompt, vec![encoded]).await?;
        debug!(model = %self.model, "Ollama extraction response: {}", response);

        Ok(parse_extraction(&response, &category_ids(categories))?)
    }

    async fn translate_items(
        &self,
        names: &[String],
        examples: &[TranslationEntry],
        categories: &[Category],
    ) -> Result<Vec<ItemTranslation>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let prompt = translation_prompt(&self.prompts, names, examples, categories)?;
        let response = self.generate(prompt, Vec::new()).await?;
        debug!(model = %self.model, "Ollama translation response: {}", response);

        parse_translations(&response, names, &category_ids(categories))
    }

    async fn health_check(&self) -> bool {
        match self
            .http_client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn host(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockChatServer, FAKE_JPEG};

    fn backend(url: &str) -> OllamaBackend {
        OllamaBackend::new(url, "llava").with_prompts(PromptLibrary::embedded_only())
    }

    #[tokio::test]
    async fn test_extract_sends_inline_image() {
        let server = MockChatServer::start().await;
        let backend = backend(&server.url());
        let categories = vec![Category {
            id: 7,
            name: "Beverages".to_string(),
            keywords: None,
        }];

        let extraction = backend
            .extract_receipt(&server.image_url(), &categories)
            .await
            .unwrap();
        assert_eq!(extraction.total_amount, 2.49);

        let request = server.last_request().unwrap();
        let expected = base64::engine::general_purpose::STANDARD.encode(FAKE_JPEG);
        assert_eq!(request["images"][0], expected.as_str());
        assert_eq!(request["format"], "json");
        assert_eq!(request["model"], "llava");
        server.shutdown();
    }

    #[tokio::test]
    async fn test_extract_fails_when_image_unreachable() {
        let server = MockChatServer::start().await;
        let backend = backend(&server.url());

        let result = backend
            .extract_receipt(&format!("{}/images/missing.jpg", server.url()), &[])
            .await;
        assert!(matches!(result, Err(Error::Http(_))));
        assert_eq!(server.calls(), 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_translate_without_images() {
        let server = MockChatServer::start().await;
        let backend = backend(&server.url());

        let translations = backend
            .translate_items(&["VOLLMILCH".to_string()], &[], &[])
            .await
            .unwrap();
        assert_eq!(translations[0].readable_name, "Whole Milk");
        // Category 2 was not offered
        assert_eq!(translations[0].category_id, None);

        let request = server.last_request().unwrap();
        assert!(request.get("images").is_none());
        server.shutdown();
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockChatServer::start().await;
        assert!(backend(&server.url()).health_check().await);
        server.shutdown();
    }
}
