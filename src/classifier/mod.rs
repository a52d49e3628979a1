//! Binary lesion classifier facade
//!
//! Wraps a loaded [`LesionNet`]: preprocessing, a single forward pass, and derivation of
//! the predicted class, its confidence, and the five-level risk tier. The facade is built
//! once at startup and shared read-only between requests.

mod network;
mod preprocess;

pub use network::{LayerInfo, LayerKind, LayerSpec, LesionNet, ModelManifest};
pub use preprocess::{decode_image, to_input_tensor};

use crate::error::{LesionError, Result};
use candle_core::{DType, Device, Tensor};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Sigmoid output above this value is classified as malignant
pub const DECISION_THRESHOLD: f64 = 0.5;

const HIGH_CONFIDENCE: f64 = 0.8;
const MEDIUM_CONFIDENCE: f64 = 0.6;

/// Lesion class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LesionClass {
    Benign,
    Malignant,
}

impl LesionClass {
    pub const ALL: [LesionClass; 2] = [LesionClass::Benign, LesionClass::Malignant];

    pub fn as_str(&self) -> &'static str {
        match self {
            LesionClass::Benign => "BENIGN",
            LesionClass::Malignant => "MALIGNANT",
        }
    }
}

impl fmt::Display for LesionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LesionClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "BENIGN" => Ok(LesionClass::Benign),
            "MALIGNANT" => Ok(LesionClass::Malignant),
            other => Err(format!(
                "Invalid class label '{}', expected BENIGN or MALIGNANT",
                other
            )),
        }
    }
}

/// Qualitative risk tier, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskTier {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "LOW-MODERATE")]
    LowModerate,
    #[serde(rename = "MODERATE")]
    Moderate,
    #[serde(rename = "MODERATE-HIGH")]
    ModerateHigh,
    #[serde(rename = "HIGH")]
    High,
}

impl RiskTier {
    /// Derive the tier from the predicted class and its confidence
    pub fn from_prediction(class: LesionClass, confidence: f64) -> Self {
        match class {
            LesionClass::Benign if confidence > HIGH_CONFIDENCE => RiskTier::Low,
            LesionClass::Benign if confidence > MEDIUM_CONFIDENCE => RiskTier::LowModerate,
            LesionClass::Malignant if confidence > HIGH_CONFIDENCE => RiskTier::High,
            LesionClass::Malignant if confidence > MEDIUM_CONFIDENCE => RiskTier::ModerateHigh,
            _ => RiskTier::Moderate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Low => "LOW",
            RiskTier::LowModerate => "LOW-MODERATE",
            RiskTier::Moderate => "MODERATE",
            RiskTier::ModerateHigh => "MODERATE-HIGH",
            RiskTier::High => "HIGH",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a single classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub predicted_class: LesionClass,
    /// Probability assigned to `predicted_class`
    pub confidence: f64,
    pub probabilities: BTreeMap<LesionClass, f64>,
    pub risk_tier: RiskTier,
}

impl ClassificationResult {
    /// Build a result from the raw sigmoid output (probability of malignancy)
    pub fn from_probability(p: f64) -> Self {
        let p = p.clamp(0.0, 1.0);
        let predicted_class = if p > DECISION_THRESHOLD {
            LesionClass::Malignant
        } else {
            LesionClass::Benign
        };
        let confidence = match predicted_class {
            LesionClass::Malignant => p,
            LesionClass::Benign => 1.0 - p,
        };

        let mut probabilities = BTreeMap::new();
        probabilities.insert(LesionClass::Benign, 1.0 - p);
        probabilities.insert(LesionClass::Malignant, p);

        Self {
            predicted_class,
            confidence,
            probabilities,
            risk_tier: RiskTier::from_prediction(predicted_class, confidence),
        }
    }

    pub fn probability_of(&self, class: LesionClass) -> f64 {
        self.probabilities.get(&class).copied().unwrap_or(0.0)
    }

    pub fn is_malignant(&self) -> bool {
        self.predicted_class == LesionClass::Malignant
    }
}

/// Loaded, warmed-up classifier
pub struct LesionClassifier {
    network: LesionNet,
    model_path: PathBuf,
}

impl LesionClassifier {
    /// Load the classifier artifact from disk
    ///
    /// Any failure (missing files, malformed manifest, missing tensors, failing warm-up
    /// pass) is reported as `ModelNotLoaded`.
    pub fn load(manifest_path: &Path, weights_path: &Path) -> Result<Self> {
        if !manifest_path.exists() {
            return Err(LesionError::ModelNotLoaded {
                path: manifest_path.to_path_buf(),
                reason: "model manifest not found".to_string(),
            });
        }

        let network = LesionNet::load(manifest_path, weights_path, &Device::Cpu).map_err(
            |e| match e {
                LesionError::ModelNotLoaded { .. } => e,
                other => LesionError::ModelNotLoaded {
                    path: weights_path.to_path_buf(),
                    reason: other.to_string(),
                },
            },
        )?;

        Self::from_network(network, weights_path.to_path_buf())
    }

    /// Wrap an already built network, running the warm-up pass
    pub fn from_network(network: LesionNet, model_path: PathBuf) -> Result<Self> {
        let classifier = Self {
            network,
            model_path,
        };
        classifier.warm_up()?;

        tracing::info!(
            "Classifier ready: artifact {} ({} layers, {}px input)",
            classifier.network.artifact_version(),
            classifier.network.num_layers(),
            classifier.network.input_size()
        );
        Ok(classifier)
    }

    /// Dummy forward pass so that no predict call is the first to exercise the graph
    fn warm_up(&self) -> Result<()> {
        let size = self.network.input_size();
        let run = || -> Result<f64> {
            let dummy = Tensor::zeros((1, size, size, 3), DType::F32, self.network.device())?;
            self.run(&dummy)
        };

        run().map(|_| ()).map_err(|e| LesionError::ModelNotLoaded {
            path: self.model_path.clone(),
            reason: format!("warm-up inference failed: {}", e),
        })
    }

    /// Classify raw image bytes
    pub fn predict(&self, image: &[u8]) -> Result<ClassificationResult> {
        let decoded = decode_image(image)?;
        self.predict_image(&decoded)
    }

    /// Classify an already decoded image
    pub fn predict_image(&self, image: &DynamicImage) -> Result<ClassificationResult> {
        let input = self.preprocess(image)?;
        let p = self.run(&input)?;
        let result = ClassificationResult::from_probability(p);

        tracing::info!(
            "Prediction: {} ({:.2}%, risk {})",
            result.predicted_class,
            result.confidence * 100.0,
            result.risk_tier
        );
        Ok(result)
    }

    /// Preprocess an image into the network's input tensor
    pub fn preprocess(&self, image: &DynamicImage) -> Result<Tensor> {
        to_input_tensor(image, self.network.input_size(), self.network.device())
    }

    fn run(&self, input: &Tensor) -> Result<f64> {
        let output = self.network.forward(input)?;
        let values = output.flatten_all()?.to_vec1::<f32>()?;

        match values.as_slice() {
            [p] if p.is_finite() => Ok(f64::from(*p)),
            [p] => Err(LesionError::Inference(format!(
                "Network produced a non-finite output: {}",
                p
            ))),
            other => Err(LesionError::Inference(format!(
                "Network produced {} outputs, expected 1",
                other.len()
            ))),
        }
    }

    pub fn network(&self) -> &LesionNet {
        &self.network
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn artifact_version(&self) -> &str {
        self.network.artifact_version()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    pub(crate) use super::network::tests::{tiny_manifest, tiny_network};
}
