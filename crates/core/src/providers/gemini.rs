use super::{ensure_success, join_endpoint};
use crate::error::GatewayError;
use crate::traits::LlmGateway;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use url::Url;

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

const BACKEND: &str = "gemini";

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: Option<f32>,
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

pub struct GeminiClient {
    client: Client,
    base_url: Url,
    model: String,
    api_key: String,
    generation: GenerationConfig,
}

impl GeminiClient {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(base_url)?,
            model: model.into(),
            api_key: api_key.into(),
            generation: GenerationConfig::default(),
        })
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.generation.temperature = temperature;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: Option<u32>) -> Self {
        self.generation.max_output_tokens = max_output_tokens;
        self
    }
}

#[async_trait]
impl LlmGateway for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, GatewayError> {
        let url = join_endpoint(
            &self.base_url,
            &format!("v1beta/models/{}:generateContent", self.model),
        )?;

        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: self.generation.clone(),
        };

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;
        let response = ensure_success(BACKEND, response).await?;

        let payload: GenerateResponse = response.json().await?;
        answer_text(payload)
    }
}

fn answer_text(payload: GenerateResponse) -> Result<String, GatewayError> {
    let candidate = payload
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GatewayError::malformed(BACKEND, "response had no candidates"))?;

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    let text = text.trim();
    if text.is_empty() {
        let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".to_string());
        return Err(GatewayError::malformed(
            BACKEND,
            format!("candidate had no text (finish reason: {reason})"),
        ));
    }

    Ok(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> GenerateResponse {
        serde_json::from_value(value).expect("response shape")
    }

    #[test]
    fn joins_text_parts_of_first_candidate() {
        let payload = parse(json!({
            "candidates": [
                {"content": {"parts": [{"text": "The pump "}, {"text": "runs at 200 bar.\n"}]}, "finishReason": "STOP"},
                {"content": {"parts": [{"text": "ignored"}]}}
            ]
        }));
        assert_eq!(answer_text(payload).expect("answer"), "The pump runs at 200 bar.");
    }

    #[test]
    fn blocked_or_empty_candidates_are_errors() {
        let blocked = parse(json!({"candidates": [{"finishReason": "SAFETY"}]}));
        let error = answer_text(blocked).expect_err("no text");
        assert!(error.to_string().contains("SAFETY"));

        let empty = parse(json!({"promptFeedback": {"blockReason": "OTHER"}}));
        assert!(matches!(answer_text(empty), Err(GatewayError::Malformed { .. })));
    }

    #[test]
    fn generation_config_omits_unset_fields() -> Result<(), Box<dyn std::error::Error>> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: "hi" }],
            }],
            generation_config: GenerationConfig {
                temperature: Some(0.2),
                max_output_tokens: None,
            },
        };
        let value = serde_json::to_value(&request)?;
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hi");
        assert!((value["generationConfig"]["temperature"].as_f64().unwrap_or_default() - 0.2).abs() < 1e-6);
        assert!(value["generationConfig"].get("maxOutputTokens").is_none());
        Ok(())
    }
}
