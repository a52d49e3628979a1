mod common;

use async_trait::async_trait;
use lesionscope::analysis::{
    AnalysisRequest, CascadeOrchestrator, ProviderError, ProviderStage, VisionProvider,
};
use lesionscope::classifier::ClassificationResult;
use lesionscope::config::ExplainerConfig;
use lesionscope::explainer::{ExplanationOverlay, GradCamExplainer};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Provider that records the prompts it was sent and replies from a script
struct RecordingProvider {
    name: &'static str,
    reply: Result<&'static str, u16>,
    prompts: Arc<Mutex<Vec<String>>>,
    overlays_seen: Arc<Mutex<Vec<bool>>>,
}

impl RecordingProvider {
    fn boxed(
        name: &'static str,
        reply: Result<&'static str, u16>,
    ) -> (Box<dyn VisionProvider>, Arc<Mutex<Vec<String>>>, Arc<Mutex<Vec<bool>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let overlays_seen = Arc::new(Mutex::new(Vec::new()));
        let provider = Self {
            name,
            reply,
            prompts: Arc::clone(&prompts),
            overlays_seen: Arc::clone(&overlays_seen),
        };
        (Box::new(provider), prompts, overlays_seen)
    }
}

#[async_trait]
impl VisionProvider for RecordingProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        "recording-v1"
    }

    async fn generate(&self, request: &AnalysisRequest<'_>) -> Result<String, ProviderError> {
        self.prompts.lock().unwrap().push(request.prompt());
        self.overlays_seen
            .lock()
            .unwrap()
            .push(request.overlay.is_some());
        match self.reply {
            Ok(text) => Ok(text.to_string()),
            Err(status) => Err(ProviderError::HttpStatus {
                status,
                body: "scripted failure".to_string(),
            }),
        }
    }
}

/// Provider that never answers within the test's patience
struct StalledProvider;

#[async_trait]
impl VisionProvider for StalledProvider {
    fn name(&self) -> &str {
        "stalled"
    }

    fn model(&self) -> &str {
        "stalled-v1"
    }

    async fn generate(&self, _request: &AnalysisRequest<'_>) -> Result<String, ProviderError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err(ProviderError::Timeout { secs: 60 })
    }
}

#[tokio::test]
async fn test_secondary_answers_after_primary_error() {
    let (primary, primary_prompts, _) = RecordingProvider::boxed("primary", Err(429));
    let (secondary, secondary_prompts, _) =
        RecordingProvider::boxed("secondary", Ok("## Report\nFindings"));
    let cascade = CascadeOrchestrator::new(vec![
        (ProviderStage::Primary, primary),
        (ProviderStage::Secondary, secondary),
    ]);

    let classification = ClassificationResult::from_probability(0.92);
    let image = common::png_bytes(32, 32, 1);
    let result = cascade
        .analyze_lesion(&AnalysisRequest::new(&image, &classification, None))
        .await;

    assert!(result.success());
    assert!(result.is_multimodal());
    assert_eq!(result.provider(), ProviderStage::Secondary);
    assert_eq!(result.analysis_text(), "## Report\nFindings");
    assert_eq!(primary_prompts.lock().unwrap().len(), 1);
    assert_eq!(secondary_prompts.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_timeouts_fall_back_to_local_report() {
    let cascade = CascadeOrchestrator::new(vec![
        (ProviderStage::Primary, Box::new(StalledProvider) as Box<dyn VisionProvider>),
        (ProviderStage::Secondary, Box::new(StalledProvider) as Box<dyn VisionProvider>),
    ]);

    let classification = ClassificationResult::from_probability(0.2);
    let image = common::png_bytes(32, 32, 2);
    let result = cascade
        .analyze_lesion(&AnalysisRequest::new(&image, &classification, None))
        .await;

    assert!(!result.success());
    assert_eq!(result.provider(), ProviderStage::Fallback);
    assert!(result.analysis_text().contains("BENIGN"));
    assert!(result.error().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_real_overlay_is_forwarded_and_degraded_one_is_not() {
    let temp_dir = TempDir::new().unwrap();
    let classifier = common::load_classifier(temp_dir.path());
    let image = common::png_bytes(80, 60, 3);
    let classification = classifier.predict(&image).unwrap();

    let overlay = GradCamExplainer::new(&ExplainerConfig::default()).explain(&classifier, &image);
    let degraded = ExplanationOverlay::passthrough(&image);
    assert!(degraded.is_degraded());

    let (provider, prompts, overlays_seen) = RecordingProvider::boxed("primary", Ok("text"));
    let cascade = CascadeOrchestrator::new(vec![(ProviderStage::Primary, provider)]);

    cascade
        .analyze_lesion(&AnalysisRequest::new(&image, &classification, Some(&overlay)))
        .await;
    cascade
        .analyze_lesion(&AnalysisRequest::new(&image, &classification, Some(&degraded)))
        .await;

    let seen = overlays_seen.lock().unwrap().clone();
    assert_eq!(seen, vec![!overlay.is_degraded(), false]);

    let prompts = prompts.lock().unwrap().clone();
    assert_eq!(
        prompts[0].contains("Attention map provided"),
        !overlay.is_degraded()
    );
    assert!(!prompts[1].contains("Attention map provided"));
}
