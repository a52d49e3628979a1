//! Ordered provider cascade with deterministic local fallback
//!
//! Stages run strictly in order and at most once per call. The first stage whose result
//! reports success ends the cascade; when none does, the local report is returned.
//! Which stages exist is decided once, when the orchestrator is built.

use super::fallback::local_report;
use super::provider::{
    AnalysisRequest, ProviderAnalysisResult, ProviderStage, SingleProviderAnalyzer, VisionProvider,
};
use super::build_provider;
use crate::config::{ProviderConfig, ProvidersConfig};
use serde::Serialize;

enum Slot {
    Ready(SingleProviderAnalyzer),
    Unavailable { stage: ProviderStage, reason: String },
}

/// Availability of one cascade stage, as reported by the health check
#[derive(Debug, Clone, Serialize)]
pub struct StageStatus {
    pub stage: ProviderStage,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub struct CascadeOrchestrator {
    slots: Vec<Slot>,
}

impl CascadeOrchestrator {
    /// Build the primary and secondary stages from configuration
    ///
    /// Disabled providers and providers whose credential or client cannot be set up are
    /// recorded as unavailable and never contacted.
    pub fn from_config(config: &ProvidersConfig) -> Self {
        let slots = [
            (ProviderStage::Primary, &config.primary),
            (ProviderStage::Secondary, &config.secondary),
        ]
        .into_iter()
        .map(|(stage, provider)| Self::slot_from_config(config.enabled, stage, provider))
        .collect();

        Self { slots }
    }

    fn slot_from_config(enabled: bool, stage: ProviderStage, config: &ProviderConfig) -> Slot {
        if !enabled {
            return Slot::Unavailable {
                stage,
                reason: "remote providers disabled".to_string(),
            };
        }
        if !config.enabled {
            return Slot::Unavailable {
                stage,
                reason: "disabled in configuration".to_string(),
            };
        }

        match build_provider(config) {
            Ok(provider) => {
                tracing::info!(
                    "{} provider ready: {} ({})",
                    stage,
                    provider.name(),
                    provider.model()
                );
                Slot::Ready(SingleProviderAnalyzer::new(stage, provider))
            }
            Err(e) => {
                tracing::warn!("{} provider unavailable: {}", stage, e);
                Slot::Unavailable {
                    stage,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Build from explicit providers, tried in the given order
    pub fn new(providers: Vec<(ProviderStage, Box<dyn VisionProvider>)>) -> Self {
        let slots = providers
            .into_iter()
            .map(|(stage, provider)| Slot::Ready(SingleProviderAnalyzer::new(stage, provider)))
            .collect();
        Self { slots }
    }

    /// Cascade with no remote stage; always answers with the local report
    pub fn local_only() -> Self {
        Self { slots: Vec::new() }
    }

    /// Number of stages that will actually be attempted
    pub fn available_stages(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn status(&self) -> Vec<StageStatus> {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Ready(analyzer) => StageStatus {
                    stage: analyzer.stage(),
                    available: true,
                    provider: Some(analyzer.provider().name().to_string()),
                    model: Some(analyzer.provider().model().to_string()),
                    reason: None,
                },
                Slot::Unavailable { stage, reason } => StageStatus {
                    stage: *stage,
                    available: false,
                    provider: None,
                    model: None,
                    reason: Some(reason.clone()),
                },
            })
            .collect()
    }

    /// Run the cascade. Never fails.
    pub async fn analyze_lesion(&self, request: &AnalysisRequest<'_>) -> ProviderAnalysisResult {
        let mut failures = Vec::new();

        for slot in &self.slots {
            match slot {
                Slot::Ready(analyzer) => {
                    let result = analyzer.analyze(request).await;
                    if result.success() {
                        return result;
                    }
                    failures.push(format!(
                        "{}: {}",
                        analyzer.stage(),
                        result.error().unwrap_or("unknown error")
                    ));
                }
                Slot::Unavailable { stage, reason } => {
                    tracing::debug!("Skipping {} provider: {}", stage, reason);
                    failures.push(format!("{}: skipped ({})", stage, reason));
                }
            }
        }

        tracing::info!("Using local fallback report");
        let reason = if failures.is_empty() {
            "No vision provider available".to_string()
        } else {
            format!("All vision providers failed: {}", failures.join("; "))
        };
        local_report(request.classification, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::ProviderError;
    use crate::classifier::ClassificationResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        calls: Arc<AtomicUsize>,
        reply: Option<&'static str>,
    }

    #[async_trait]
    impl VisionProvider for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn model(&self) -> &str {
            "scripted-v1"
        }

        async fn generate(&self, _request: &AnalysisRequest<'_>) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(text) => Ok(text.to_string()),
                None => Err(ProviderError::HttpStatus {
                    status: 503,
                    body: "unavailable".to_string(),
                }),
            }
        }
    }

    fn scripted(reply: Option<&'static str>) -> (Box<dyn VisionProvider>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Scripted {
            calls: Arc::clone(&calls),
            reply,
        };
        (Box::new(provider), calls)
    }

    #[tokio::test]
    async fn test_primary_success_stops_cascade() {
        let (primary, primary_calls) = scripted(Some("primary report"));
        let (secondary, secondary_calls) = scripted(Some("secondary report"));
        let cascade = CascadeOrchestrator::new(vec![
            (ProviderStage::Primary, primary),
            (ProviderStage::Secondary, secondary),
        ]);

        let classification = ClassificationResult::from_probability(0.8);
        let result = cascade
            .analyze_lesion(&AnalysisRequest::new(b"img", &classification, None))
            .await;

        assert!(result.success());
        assert_eq!(result.provider(), ProviderStage::Primary);
        assert_eq!(result.analysis_text(), "primary report");
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_text_moves_to_next_stage() {
        let (primary, primary_calls) = scripted(Some("   "));
        let (secondary, secondary_calls) = scripted(Some("secondary report"));
        let cascade = CascadeOrchestrator::new(vec![
            (ProviderStage::Primary, primary),
            (ProviderStage::Secondary, secondary),
        ]);

        let classification = ClassificationResult::from_probability(0.3);
        let result = cascade
            .analyze_lesion(&AnalysisRequest::new(b"img", &classification, None))
            .await;

        assert_eq!(result.provider(), ProviderStage::Secondary);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_failures_fall_back_locally() {
        let (primary, primary_calls) = scripted(None);
        let (secondary, secondary_calls) = scripted(None);
        let cascade = CascadeOrchestrator::new(vec![
            (ProviderStage::Primary, primary),
            (ProviderStage::Secondary, secondary),
        ]);

        let classification = ClassificationResult::from_probability(0.92);
        let result = cascade
            .analyze_lesion(&AnalysisRequest::new(b"img", &classification, None))
            .await;

        assert!(!result.success());
        assert_eq!(result.provider(), ProviderStage::Fallback);
        assert_eq!(result.model_identifier(), "cnn_only");
        assert!(result.analysis_text().contains("URGENT"));
        let error = result.error().unwrap();
        assert!(error.contains("primary: HTTP 503"));
        assert!(error.contains("secondary: HTTP 503"));
        assert_eq!(primary_calls.load(Ordering::SeqCst), 1);
        assert_eq!(secondary_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_providers_are_skipped() {
        let mut config = ProvidersConfig::default();
        config.primary.api_key_env = "LESIONSCOPE_TEST_MISSING_PRIMARY_KEY".to_string();
        config.secondary.enabled = false;
        let cascade = CascadeOrchestrator::from_config(&config);

        assert_eq!(cascade.available_stages(), 0);
        let status = cascade.status();
        assert_eq!(status.len(), 2);
        assert!(status[0].reason.as_deref().unwrap().contains("LESIONSCOPE_TEST_MISSING_PRIMARY_KEY"));
        assert_eq!(status[1].reason.as_deref(), Some("disabled in configuration"));

        let classification = ClassificationResult::from_probability(0.1);
        let result = cascade
            .analyze_lesion(&AnalysisRequest::new(b"img", &classification, None))
            .await;
        assert_eq!(result.provider(), ProviderStage::Fallback);
        assert!(result.error().unwrap().contains("skipped"));
    }

    #[tokio::test]
    async fn test_local_only() {
        let cascade = CascadeOrchestrator::local_only();
        let classification = ClassificationResult::from_probability(0.1);
        let result = cascade
            .analyze_lesion(&AnalysisRequest::new(b"img", &classification, None))
            .await;

        assert_eq!(result.error(), Some("No vision provider available"));
    }
}
