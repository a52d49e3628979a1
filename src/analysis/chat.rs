// OpenAI-compatible chat completions provider (Groq and similar)
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

const TOP_P: f32 = 0.95;

pub struct ChatCompletionsProvider {
    client: Client,
    model: String,
    endpoint: String,
    api_key: String,
    timeout_secs: u64,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionsProvider {
    /// Build from configuration, reading the API key from the environment
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let api_key = api_key_from_env(&config.api_key_env)?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ProviderConfig, api_key: String) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
        })
    }

    fn request_body(&self, request: &AnalysisRequest<'_>) -> Value {
        let image_url = format!(
            "data:{};base64,{}",
            request.image_mime_type(),
            request.image_base64()
        );

        let mut content = vec![
            json!({ "type": "text", "text": request.prompt() }),
            json!({ "type": "image_url", "image_url": { "url": image_url } }),
        ];

        if let Some(overlay) = request.overlay {
            content.push(json!({ "type": "text", "text": OVERLAY_LABEL }));
            content.push(json!({ "type": "image_url", "image_url": { "url": overlay.to_data_url() } }));
        }

        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": content }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "top_p": TOP_P,
        })
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<Message>,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

/// Extract `choices[0].message.content`
pub(crate) fn parse_response(body: &str) -> Result<String, ProviderError> {
    let envelope: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::MalformedEnvelope(format!("invalid JSON: {}", e)))?;

    let choice = envelope
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::MalformedEnvelope("response has no choices".to_string()))?;

    non_empty_text(
        choice.message.and_then(|message| message.content),
        "choice has no message content",
    )
}

#[async_trait]
impl VisionProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        "openai_chat"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &AnalysisRequest<'_>) -> Result<String, ProviderError> {
        let builder = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(request));

        let body = send_request(builder, self.timeout_secs).await?;
        parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ClassificationResult;
    use crate::explainer::ExplanationOverlay;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    #[test]
    fn test_parse_response() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"Benign nevus"}}]}"#;
        assert_eq!(parse_response(body).unwrap(), "Benign nevus");

        assert!(matches!(
            parse_response(r#"{"choices":[]}"#),
            Err(ProviderError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            parse_response(r#"{"choices":[{"message":{"content":null}}]}"#),
            Err(ProviderError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            parse_response(r#"{"choices":[{"message":{"content":""}}]}"#),
            Err(ProviderError::EmptyText)
        ));
    }

    #[test]
    fn test_request_body_with_overlay() {
        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(4, 4))
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();
        let png = png.into_inner();

        let provider =
            ChatCompletionsProvider::with_api_key(&ProviderConfig::groq(), "k".into()).unwrap();
        let classification = ClassificationResult::from_probability(0.4);
        // A passthrough overlay is degraded and must not be sent
        let degraded = ExplanationOverlay::passthrough(&png);
        let request = AnalysisRequest::new(&png, &classification, Some(&degraded));

        let body = provider.request_body(&request);
        let content = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[0]["type"], "text");
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(body["max_tokens"], 2048);
        assert_eq!(body["model"], "meta-llama/llama-4-scout-17b-16e-instruct");
    }
}
