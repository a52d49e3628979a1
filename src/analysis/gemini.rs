// Gemini `generateContent` provider
use super::prompt::OVERLAY_LABEL;
use super::provider::{
    api_key_from_env, build_client, non_empty_text, send_request, AnalysisRequest, ProviderError,
    VisionProvider,
};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const TOP_K: u32 = 40;
const TOP_P: f32 = 0.95;

pub struct GeminiProvider {
    client: Client,
    model: String,
    endpoint: String,
    api_key: String,
    timeout_secs: u64,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiProvider {
    /// Build from configuration, reading the API key from the environment
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = api_key_from_env(&config.api_key_env)?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ProviderConfig, api_key: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            model: config.model.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    fn url(&self) -> String {
        format!("{}/{}:generateContent", self.endpoint, self.model)
    }

    fn request_body(&self, request: &AnalysisRequest<'_>) -> Value {
        let mut parts = vec![
            json!({ "text": request.prompt() }),
            json!({
                "inline_data": {
                    "mime_type": request.image_mime_type(),
                    "data": request.image_base64(),
                }
            }),
        ];

        if let Some(overlay) = request.overlay {
            parts.push(json!({ "text": OVERLAY_LABEL }));
            parts.push(json!({
                "inline_data": {
                    "mime_type": overlay.mime_type(),
                    "data": overlay.to_base64(),
                }
            }));
        }

        json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "temperature": self.temperature,
                "topK": TOP_K,
                "topP": TOP_P,
                "maxOutputTokens": self.max_output_tokens,
            }
        })
    }
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

/// Extract `candidates[0].content.parts[0].text`
pub(crate) fn parse_response(body: &str) -> Result<String, ProviderError> {
    let envelope: GenerateContentResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedEnvelope(format!("invalid JSON: {}", e)))?;

    let candidate = envelope
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedEnvelope("response has no candidates".to_string()))?;

    let text = candidate
        .content
        .and_then(|content| content.parts.into_iter().next())
        .and_then(|part| part.text);

    non_empty_text(text, "candidate has no text part")
}

#[async_trait]
impl VisionProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &AnalysisRequest<'_>) -> Result<String, ProviderError> {
        let builder = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(request));

        let body = send_request(builder, self.timeout_secs).await?;
        parse_response(&body)
    }
}
