//! Request-scoped lesion analysis pipeline
//!
//! classify -> explain -> narrative cascade -> dataset store -> report
//!
//! Only classification failures abort a request. Explanation, narrative and storage
//! problems are absorbed by their own stages and show up inside the report.

mod input;

pub use input::ImageInput;

use crate::analysis::{
    local_report, AnalysisRequest, CascadeOrchestrator, ProviderAnalysisResult, StageStatus,
};
use crate::audit::{open_audit_sink, AuditEvent, AuditLevel, AuditSink};
use crate::classifier::{ClassificationResult, LesionClassifier};
use crate::config::{expand_path, Config};
use crate::error::{LesionError, Result};
use crate::explainer::{ExplanationOverlay, GradCamExplainer};
use crate::storage::{open_dataset, IncrementalStore, SaveOutcome};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

const AUDIT_COMPONENT: &str = "pipeline";

/// Per-request stage switches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineOptions {
    pub explain: bool,
    pub narrative: bool,
    pub save: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            explain: true,
            narrative: true,
            save: true,
        }
    }
}

/// Full response for one image
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub success: bool,
    pub classification: ClassificationResult,
    pub explanation: ExplanationOverlay,
    pub narrative: ProviderAnalysisResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_to_dataset: Option<SaveOutcome>,
    pub processing_time_ms: u64,
}

/// Readiness summary for the health command
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub model_loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_path: Option<PathBuf>,
    pub explainer_enabled: bool,
    pub dataset_enabled: bool,
    pub providers: Vec<StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }

    /// Report for a pipeline that could not be built
    pub fn unhealthy(error: &LesionError) -> Self {
        Self {
            status: "unhealthy",
            model_loaded: !matches!(error, LesionError::ModelNotLoaded { .. }),
            artifact_version: None,
            model_path: None,
            explainer_enabled: false,
            dataset_enabled: false,
            providers: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

pub struct LesionPipeline {
    classifier: Arc<LesionClassifier>,
    explainer: Arc<GradCamExplainer>,
    explainer_enabled: bool,
    cascade: CascadeOrchestrator,
    store: Option<Arc<IncrementalStore>>,
    audit: Arc<dyn AuditSink>,
}

impl LesionPipeline {
    pub fn new(
        classifier: Arc<LesionClassifier>,
        explainer: GradCamExplainer,
        cascade: CascadeOrchestrator,
        store: Option<IncrementalStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            classifier,
            explainer: Arc::new(explainer),
            explainer_enabled: true,
            cascade,
            store: store.map(Arc::new),
            audit,
        }
    }

    /// Build every component from configuration; fails if the classifier cannot load
    pub fn from_config(config: &Config) -> Result<Self> {
        let manifest_path = expand_path(&config.model.manifest_path)?;
        let weights_path = expand_path(&config.model.weights_path)?;
        let classifier = Arc::new(LesionClassifier::load(&manifest_path, &weights_path)?);

        let mut pipeline = Self::new(
            classifier,
            GradCamExplainer::new(&config.explainer),
            CascadeOrchestrator::from_config(&config.providers),
            open_dataset(&config.dataset)?,
            open_audit_sink(&config.audit)?,
        );
        pipeline.explainer_enabled = config.explainer.enabled;
        Ok(pipeline)
    }

    pub fn classifier(&self) -> &LesionClassifier {
        &self.classifier
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "healthy",
            model_loaded: true,
            artifact_version: Some(self.classifier.artifact_version().to_string()),
            model_path: Some(self.classifier.model_path().to_path_buf()),
            explainer_enabled: self.explainer_enabled,
            dataset_enabled: self.store.is_some(),
            providers: self.cascade.status(),
            error: None,
        }
    }

    /// Build the pipeline from configuration and report its readiness. Never fails.
    pub fn check_health(config: &Config) -> HealthReport {
        match Self::from_config(config) {
            Ok(pipeline) => pipeline.health(),
            Err(e) => {
                tracing::error!("Health check failed: {}", e);
                HealthReport::unhealthy(&e)
            }
        }
    }

    fn event(&self, event_type: &str, level: AuditLevel, message: impl Into<String>) -> AuditEvent {
        AuditEvent::new(AUDIT_COMPONENT, event_type, level, message)
    }

    /// Run every enabled stage for one image
    pub async fn run(&self, input: ImageInput, options: PipelineOptions) -> Result<PipelineReport> {
        let started = Instant::now();
        let input = Arc::new(input);

        self.audit.record(
            &self
                .event("classification_start", AuditLevel::Info, "Classification started")
                .with_context(json!({
                    "source": input.describe(),
                    "size_bytes": input.bytes().len(),
                    "options": options,
                })),
        );

        let classification = match self.classify(&input).await {
            Ok(classification) => classification,
            Err(e) => {
                self.audit.record(
                    &self
                        .event("classification_error", AuditLevel::Error, "Classification failed")
                        .with_context(json!({ "source": input.describe() }))
                        .with_error(e.kind(), e.to_string()),
                );
                return Err(e);
            }
        };

        self.audit.record(
            &self
                .event(
                    "classification_complete",
                    AuditLevel::Info,
                    format!(
                        "{} ({:.2}%)",
                        classification.predicted_class,
                        classification.confidence * 100.0
                    ),
                )
                .with_context(json!({
                    "predicted_class": classification.predicted_class,
                    "confidence": classification.confidence,
                    "risk_tier": classification.risk_tier,
                })),
        );

        let explanation = if options.explain && self.explainer_enabled {
            self.explain(&input).await
        } else {
            ExplanationOverlay::passthrough(input.bytes())
        };

        let narrative = if options.narrative {
            let request = AnalysisRequest::new(input.bytes(), &classification, Some(&explanation));
            self.cascade.analyze_lesion(&request).await
        } else {
            local_report(&classification, "Narrative generation disabled")
        };

        self.audit.record(
            &self
                .event(
                    "narrative_complete",
                    if narrative.success() {
                        AuditLevel::Info
                    } else {
                        AuditLevel::Warning
                    },
                    format!("Narrative from {}", narrative.provider()),
                )
                .with_context(json!({
                    "provider": narrative.provider(),
                    "model": narrative.model_identifier(),
                    "success": narrative.success(),
                    "error": narrative.error(),
                    "explanation_degraded": explanation.is_degraded(),
                })),
        );

        let saved_to_dataset = if options.save {
            self.save(&input, &classification).await
        } else {
            None
        };

        Ok(PipelineReport {
            success: true,
            classification,
            explanation,
            narrative,
            saved_to_dataset,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn classify(&self, input: &Arc<ImageInput>) -> Result<ClassificationResult> {
        let classifier = Arc::clone(&self.classifier);
        let job = Arc::clone(input);

        tokio::task::spawn_blocking(move || classifier.predict(job.bytes()))
            .await
            .map_err(|e| LesionError::Inference(format!("Classification task failed: {}", e)))?
    }

    async fn explain(&self, input: &Arc<ImageInput>) -> ExplanationOverlay {
        let classifier = Arc::clone(&self.classifier);
        let explainer = Arc::clone(&self.explainer);
        let job = Arc::clone(input);

        match tokio::task::spawn_blocking(move || explainer.explain(&classifier, job.bytes())).await {
            Ok(overlay) => overlay,
            Err(e) => {
                tracing::warn!("Explanation task failed: {}", e);
                ExplanationOverlay::passthrough(input.bytes())
            }
        }
    }

    async fn save(
        &self,
        input: &Arc<ImageInput>,
        classification: &ClassificationResult,
    ) -> Option<SaveOutcome> {
        let store = Arc::clone(self.store.as_ref()?);
        let job = Arc::clone(input);
        let result = classification.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            store.save(job.bytes(), &result, job.source_path(), job.extension())
        })
        .await
        .unwrap_or_else(|e| SaveOutcome {
            success: false,
            reason: None,
            error: Some(format!("Dataset task failed: {}", e)),
            stored_path: None,
            filename: None,
            content_hash: None,
        });

        let (level, message) = match (&outcome.success, &outcome.reason, &outcome.error) {
            (true, _, _) => (AuditLevel::Info, "Image stored in dataset".to_string()),
            (false, Some(reason), _) => (AuditLevel::Info, format!("Image not stored: {}", reason)),
            (false, None, Some(error)) => (AuditLevel::Warning, format!("Dataset save failed: {}", error)),
            (false, None, None) => (AuditLevel::Warning, "Dataset save failed".to_string()),
        };
        self.audit.record(
            &self
                .event("dataset_save", level, message)
                .with_context(json!({
                    "success": outcome.success,
                    "reason": outcome.reason,
                    "filename": outcome.filename,
                    "content_hash": outcome.content_hash,
                })),
        );

        Some(outcome)
    }
}
