use super::{ensure_success, join_endpoint};
use crate::embeddings::EmbeddingGateway;
use crate::error::GatewayError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

const BACKEND: &str = "openai";

/// Inputs sent in a single `/v1/embeddings` request.
pub const MAX_INPUTS_PER_REQUEST: usize = 64;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Embeddings over an OpenAI-compatible `/v1/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: Client,
    base_url: Url,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(base_url)?,
            model: model.into(),
            api_key,
            dimensions,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAiEmbedder {
    fn name(&self) -> &str {
        BACKEND
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn batch_size(&self) -> usize {
        MAX_INPUTS_PER_REQUEST
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::malformed(BACKEND, "empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for inputs in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            vectors.extend(self.request_embeddings(inputs).await?);
        }
        Ok(vectors)
    }
}

impl OpenAiEmbedder {
    async fn request_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let url = join_endpoint(&self.base_url, "v1/embeddings")?;
        let mut request = self.client.post(url).json(&EmbeddingRequest {
            model: &self.model,
            input: inputs,
        });
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = ensure_success(BACKEND, request.send().await?).await?;
        let payload: EmbeddingResponse = response.json().await?;
        ordered_embeddings(payload, inputs.len())
    }
}

fn ordered_embeddings(
    payload: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, GatewayError> {
    let mut items = payload.data;
    if items.len() != expected {
        return Err(GatewayError::malformed(
            BACKEND,
            format!("returned {} embeddings for {} inputs", items.len(), expected),
        ));
    }

    items.sort_by_key(|item| item.index);
    if items.iter().enumerate().any(|(position, item)| item.index != position) {
        return Err(GatewayError::malformed(BACKEND, "embedding indices are not contiguous"));
    }

    Ok(items.into_iter().map(|item| item.embedding).collect())
}
