// Vision provider trait, request/result types and shared HTTP plumbing
use crate::classifier::ClassificationResult;
use crate::explainer::ExplanationOverlay;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Longest error body kept from a failed HTTP response
const MAX_ERROR_BODY_CHARS: usize = 500;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("API key not configured: environment variable {env} is not set")]
    MissingCredential { env: String },

    #[error("Request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedEnvelope(String),

    #[error("Provider returned empty text")]
    EmptyText,
}

/// Position of a result in the analysis cascade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStage {
    Primary,
    Secondary,
    Fallback,
    /// Failure before any provider was reached
    Error,
}

impl ProviderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStage::Primary => "primary",
            ProviderStage::Secondary => "secondary",
            ProviderStage::Fallback => "fallback",
            ProviderStage::Error => "error",
        }
    }
}

impl fmt::Display for ProviderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one analysis attempt
///
/// Only the constructors below can build a value, which keeps
/// `success => is_multimodal => !analysis_text.is_empty()` true for every instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAnalysisResult {
    success: bool,
    analysis_text: String,
    model_identifier: String,
    is_multimodal: bool,
    provider: ProviderStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ProviderAnalysisResult {
    /// Translate a provider outcome; blank text counts as a failure
    pub fn from_outcome(
        provider: ProviderStage,
        model_identifier: &str,
        outcome: Result<String, ProviderError>,
    ) -> Self {
        match outcome {
            Ok(text) if !text.trim().is_empty() => Self {
                success: true,
                analysis_text: text,
                model_identifier: model_identifier.to_string(),
                is_multimodal: true,
                provider,
                error: None,
            },
            Ok(_) => Self::failure(provider, model_identifier, ProviderError::EmptyText.to_string()),
            Err(e) => Self::failure(provider, model_identifier, e.to_string()),
        }
    }

    pub fn failure(provider: ProviderStage, model_identifier: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            analysis_text: String::new(),
            model_identifier: model_identifier.to_string(),
            is_multimodal: false,
            provider,
            error: Some(error.into()),
        }
    }

    /// Locally generated report; never counts as a success
    pub(crate) fn local(text: String, model_identifier: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            analysis_text: text,
            model_identifier: model_identifier.to_string(),
            is_multimodal: false,
            provider: ProviderStage::Fallback,
            error: Some(error.into()),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn analysis_text(&self) -> &str {
        &self.analysis_text
    }

    pub fn model_identifier(&self) -> &str {
        &self.model_identifier
    }

    pub fn is_multimodal(&self) -> bool {
        self.is_multimodal
    }

    pub fn provider(&self) -> ProviderStage {
        self.provider
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Everything a provider needs to analyze one lesion
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub image: &'a [u8],
    pub classification: &'a ClassificationResult,
    /// Attention map, only present when it is a real (non-degraded) heatmap
    pub overlay: Option<&'a ExplanationOverlay>,
}

impl<'a> AnalysisRequest<'a> {
    pub fn new(
        image: &'a [u8],
        classification: &'a ClassificationResult,
        overlay: Option<&'a ExplanationOverlay>,
    ) -> Self {
        Self {
            image,
            classification,
            overlay: overlay.filter(|o| !o.is_degraded()),
        }
    }

    pub fn prompt(&self) -> String {
        super::prompt::build_prompt(self.classification, self.overlay.is_some())
    }

    pub fn image_mime_type(&self) -> &'static str {
        image::guess_format(self.image)
            .map(|format| format.to_mime_type())
            .unwrap_or("image/png")
    }

    pub fn image_base64(&self) -> String {
        STANDARD.encode(self.image)
    }
}

/// A remote multimodal model that turns an analysis request into markdown text
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Short backend name, e.g. "gemini"
    fn name(&self) -> &str;

    /// Backend model identifier
    fn model(&self) -> &str;

    async fn generate(&self, request: &AnalysisRequest<'_>) -> Result<String, ProviderError>;
}

/// Runs one provider and folds its outcome into a `ProviderAnalysisResult`
pub struct SingleProviderAnalyzer {
    stage: ProviderStage,
    provider: Box<dyn VisionProvider>,
}

impl SingleProviderAnalyzer {
    pub fn new(stage: ProviderStage, provider: Box<dyn VisionProvider>) -> Self {
        Self { stage, provider }
    }

    pub fn stage(&self) -> ProviderStage {
        self.stage
    }

    pub fn provider(&self) -> &dyn VisionProvider {
        self.provider.as_ref()
    }

    /// Never fails; errors are reported inside the result
    pub async fn analyze(&self, request: &AnalysisRequest<'_>) -> ProviderAnalysisResult {
        tracing::info!(
            "Requesting {} analysis from {} ({})",
            self.stage,
            self.provider.name(),
            self.provider.model()
        );

        let outcome = self.provider.generate(request).await;
        let result = ProviderAnalysisResult::from_outcome(self.stage, self.provider.model(), outcome);

        match result.error() {
            None => tracing::info!("{} analysis succeeded ({})", self.stage, self.provider.name()),
            Some(e) => tracing::warn!("{} analysis failed ({}): {}", self.stage, self.provider.name(), e),
        }
        result
    }
}

/// Read an API key from the named environment variable
pub(crate) fn api_key_from_env(env: &str) -> Result<String, ProviderError> {
    std::env::var(env)
        .ok()
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ProviderError::MissingCredential {
            env: env.to_string(),
        })
}

/// HTTPS-only client with a whole-request timeout
pub(crate) fn build_client(timeout_secs: u64) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .https_only(true)
        .build()
        .map_err(|e| ProviderError::Transport(format!("Failed to build HTTP client: {}", e)))
}

/// Send a request and return the body of a successful response
pub(crate) async fn send_request(
    request: reqwest::RequestBuilder,
    timeout_secs: u64,
) -> Result<String, ProviderError> {
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            ProviderError::Timeout { secs: timeout_secs }
        } else {
            ProviderError::Transport(e.to_string())
        }
    };

    let response = request.send().await.map_err(classify)?;
    let status = response.status();
    let body = response.text().await.map_err(classify)?;

    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        });
    }
    Ok(body)
}

/// Final check shared by the envelope parsers
pub(crate) fn non_empty_text(text: Option<String>, missing: &str) -> Result<String, ProviderError> {
    let text = text.ok_or_else(|| ProviderError::MalformedEnvelope(missing.to_string()))?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ProviderError::EmptyText);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_invariant_holds_for_every_constructor() {
        let results = [
            ProviderAnalysisResult::from_outcome(ProviderStage::Primary, "m", Ok("## Report".into())),
            ProviderAnalysisResult::from_outcome(ProviderStage::Primary, "m", Ok("   ".into())),
            ProviderAnalysisResult::from_outcome(
                ProviderStage::Secondary,
                "m",
                Err(ProviderError::Timeout { secs: 30 }),
            ),
            ProviderAnalysisResult::failure(ProviderStage::Error, "m", "bad request"),
            ProviderAnalysisResult::local("text".into(), "cnn_only", "all failed"),
        ];

        for result in &results {
            if result.success() {
                assert!(result.is_multimodal());
            }
            if result.is_multimodal() {
                assert!(!result.analysis_text().is_empty());
            }
            assert_eq!(result.success(), result.error().is_none());
        }
        assert!(results[0].success());
        assert_eq!(results[1].error(), Some("Provider returned empty text"));
        assert_eq!(results[2].error(), Some("Request timed out after 30s"));
    }

    #[test]
    fn test_result_serialization() {
        let result = ProviderAnalysisResult::failure(ProviderStage::Secondary, "llama", "HTTP 500: boom");
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["provider"], "secondary");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "HTTP 500: boom");

        let ok = ProviderAnalysisResult::from_outcome(ProviderStage::Primary, "gemini", Ok("x".into()));
        let json = serde_json::to_value(&ok).unwrap();
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_missing_credential() {
        let err = api_key_from_env("LESIONSCOPE_TEST_UNSET_KEY_93b1").unwrap_err();
        assert!(matches!(err, ProviderError::MissingCredential { .. }));
    }

    #[test]
    fn test_request_drops_degraded_overlay() {
        let classification = ClassificationResult::from_probability(0.3);
        let overlay = ExplanationOverlay::passthrough(b"not an image");
        let request = AnalysisRequest::new(b"not an image", &classification, Some(&overlay));

        assert!(request.overlay.is_none());
        assert_eq!(request.image_mime_type(), "image/png");
        assert!(!request.prompt().contains("Attention map"));
    }

    #[test]
    fn test_non_empty_text() {
        assert_eq!(non_empty_text(Some(" hi \n".into()), "x").unwrap(), "hi");
        assert!(matches!(non_empty_text(Some("".into()), "x"), Err(ProviderError::EmptyText)));
        assert!(matches!(
            non_empty_text(None, "x"),
            Err(ProviderError::MalformedEnvelope(_))
        ));
    }
}
