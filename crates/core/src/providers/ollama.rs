use super::{ensure_success, join_endpoint};
use crate::embeddings::EmbeddingGateway;
use crate::error::GatewayError;
use crate::traits::LlmGateway;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

const BACKEND: &str = "ollama";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Option<Vec<f32>>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: Option<String>,
}

/// Client for a local Ollama server. One instance serves one model, so the
/// embedding and generation roles use separate instances.
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    base_url: Url,
    model: String,
    dimensions: usize,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: impl Into<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(base_url)?,
            model: model.into(),
            dimensions: 0,
        })
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl EmbeddingGateway for OllamaClient {
    fn name(&self) -> &str {
        BACKEND
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let url = join_endpoint(&self.base_url, "api/embeddings")?;
        let request = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response = self.client.post(url).json(&request).send().await?;
        let response = ensure_success(BACKEND, response).await?;
        let payload: EmbeddingResponse = response.json().await?;

        payload
            .embedding
            .filter(|embedding| !embedding.is_empty())
            .ok_or_else(|| GatewayError::malformed(BACKEND, "response without embedding"))
    }
}

#[async_trait]
impl LlmGateway for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        let url = join_endpoint(&self.base_url, "api/generate")?;
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
        };

        let response = self.client.post(url).json(&request).send().await?;
        let response = ensure_success(BACKEND, response).await?;
        let payload: GenerateResponse = response.json().await?;

        payload
            .response
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| GatewayError::malformed(BACKEND, "response without generated text"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_disables_streaming() -> Result<(), Box<dyn std::error::Error>> {
        let request = GenerateRequest {
            model: "llama3",
            prompt: "hello",
            stream: false,
        };
        let value = serde_json::to_value(&request)?;
        assert_eq!(value["stream"], false);
        assert_eq!(value["model"], "llama3");
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_server_is_a_gateway_error() -> Result<(), Box<dyn std::error::Error>> {
        let client = OllamaClient::new("http://127.0.0.1:9", "llama3")?;
        let result = client.generate("anything").await;
        assert!(matches!(result, Err(GatewayError::Http(_))));
        Ok(())
    }
}
