//! Multimodal lesion analysis
//!
//! - `VisionProvider` trait for remote multimodal backends
//! - Gemini and OpenAI-compatible chat implementations
//! - `CascadeOrchestrator` trying providers in order with a local fallback report

mod cascade;
mod chat;
mod fallback;
mod gemini;
mod prompt;
mod provider;

pub use cascade::{CascadeOrchestrator, StageStatus};
pub use chat::ChatCompletionsProvider;
pub use fallback::{local_report, render_report, LOCAL_MODEL_ID};
pub use gemini::GeminiProvider;
pub use prompt::{build_prompt, OVERLAY_LABEL};
pub use provider::{
    AnalysisRequest, ProviderAnalysisResult, ProviderError, ProviderStage, SingleProviderAnalyzer,
    VisionProvider,
};

use crate::config::{ProviderConfig, ProviderKind};

/// Build the provider described by `config`
///
/// Fails when the API key is missing or the HTTP client cannot be built.
pub fn build_provider(config: &ProviderConfig) -> Result<Box<dyn VisionProvider>, ProviderError> {
    let provider: Box<dyn VisionProvider> = match config.kind {
        ProviderKind::Gemini => Box::new(GeminiProvider::from_config(config)?),
        ProviderKind::OpenaiChat => Box::new(ChatCompletionsProvider::from_config(config)?),
    };
    Ok(provider)
}
