//! Gradient-weighted class activation maps
//!
//! Produces a same-resolution overlay showing which regions of the input drove the
//! classifier's decision. Explanation is best effort: every failure degrades to the
//! unmodified input image instead of an error.

mod colormap;
mod layers;

pub use colormap::{blend, jet, HEATMAP_WEIGHT, ORIGINAL_WEIGHT};
pub use layers::{ResolutionSource, ResolvedLayer, TargetLayerResolver};

use crate::classifier::{decode_image, LesionClass, LesionClassifier, DECISION_THRESHOLD};
use crate::config::ExplainerConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use candle_core::{Tensor, Var};
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use ndarray::{Array2, Array3, Axis};
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::io::Cursor;

/// Encoded overlay image
#[derive(Debug, Clone, PartialEq)]
pub struct ExplanationOverlay {
    bytes: Vec<u8>,
    mime_type: String,
    dimensions: Option<(u32, u32)>,
    degraded: bool,
    target_layer: Option<String>,
}

impl ExplanationOverlay {
    /// The original image re-encoded as PNG, or the raw bytes when they cannot be decoded
    pub fn passthrough(image: &[u8]) -> Self {
        match decode_image(image) {
            Ok(decoded) => Self::from_original(&decoded),
            Err(e) => {
                tracing::warn!("Explanation input is not decodable, passing raw bytes through: {}", e);
                Self::raw(image)
            }
        }
    }

    fn from_original(image: &DynamicImage) -> Self {
        let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
        match encode_png(&rgb) {
            Ok(bytes) => Self {
                bytes,
                mime_type: "image/png".to_string(),
                dimensions: Some((rgb.width(), rgb.height())),
                degraded: true,
                target_layer: None,
            },
            Err(e) => {
                tracing::warn!("Failed to re-encode original image: {}", e);
                Self {
                    bytes: Vec::new(),
                    mime_type: "image/png".to_string(),
                    dimensions: Some((rgb.width(), rgb.height())),
                    degraded: true,
                    target_layer: None,
                }
            }
        }
    }

    fn raw(image: &[u8]) -> Self {
        let mime_type = image::guess_format(image)
            .map(|format| format.to_mime_type())
            .unwrap_or("application/octet-stream");
        Self {
            bytes: image.to_vec(),
            mime_type: mime_type.to_string(),
            dimensions: None,
            degraded: true,
            target_layer: None,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn width(&self) -> Option<u32> {
        self.dimensions.map(|(w, _)| w)
    }

    pub fn height(&self) -> Option<u32> {
        self.dimensions.map(|(_, h)| h)
    }

    /// True when the overlay is not a real heatmap
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn target_layer(&self) -> Option<&str> {
        self.target_layer.as_deref()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

impl Serialize for ExplanationOverlay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ExplanationOverlay", 5)?;
        state.serialize_field("image", &self.to_data_url())?;
        state.serialize_field("width", &self.width())?;
        state.serialize_field("height", &self.height())?;
        state.serialize_field("degraded", &self.degraded)?;
        state.serialize_field("target_layer", &self.target_layer)?;
        state.end()
    }
}

/// Grad-CAM explainer bound to a target layer resolution policy
pub struct GradCamExplainer {
    resolver: TargetLayerResolver,
}

impl GradCamExplainer {
    pub fn new(config: &ExplainerConfig) -> Self {
        Self {
            resolver: TargetLayerResolver::new(config),
        }
    }

    /// Explain the classifier's decision on raw image bytes. Never fails.
    pub fn explain(&self, classifier: &LesionClassifier, image: &[u8]) -> ExplanationOverlay {
        match decode_image(image) {
            Ok(decoded) => self.explain_image(classifier, &decoded),
            Err(e) => {
                tracing::warn!("Cannot explain undecodable image: {}", e);
                ExplanationOverlay::raw(image)
            }
        }
    }

    /// Explain the classifier's decision on a decoded image. Never fails.
    pub fn explain_image(
        &self,
        classifier: &LesionClassifier,
        image: &DynamicImage,
    ) -> ExplanationOverlay {
        match self.render(classifier, image) {
            Ok(overlay) => overlay,
            Err(e) => {
                tracing::warn!("Grad-CAM failed, returning original image: {}", e);
                ExplanationOverlay::from_original(image)
            }
        }
    }

    fn render(
        &self,
        classifier: &LesionClassifier,
        image: &DynamicImage,
    ) -> Result<ExplanationOverlay, String> {
        let target = self.resolver.resolve(classifier.network())?;
        let (activations, gradients) =
            Self::activations_and_gradients(classifier, image, &target).map_err(|e| e.to_string())?;

        let cam = grad_cam_map(&activations, &gradients)?;
        let original = image.to_rgb8();
        let (width, height) = original.dimensions();
        let heatmap = upsample(&cam, width, height)?;

        let blended = blend(&original, &heatmap)
            .ok_or_else(|| "Heatmap does not match image dimensions".to_string())?;
        let bytes =
            encode_png(&DynamicImage::ImageRgb8(blended)).map_err(|e| format!("PNG encode: {}", e))?;

        tracing::debug!(
            "Grad-CAM rendered on layer '{}' ({:?}), {}x{}",
            target.name,
            target.source,
            width,
            height
        );

        Ok(ExplanationOverlay {
            bytes,
            mime_type: "image/png".to_string(),
            dimensions: Some((width, height)),
            degraded: false,
            target_layer: Some(target.name),
        })
    }

    /// Target activations and the gradient of the predicted-class score with respect to them
    fn activations_and_gradients(
        classifier: &LesionClassifier,
        image: &DynamicImage,
        target: &ResolvedLayer,
    ) -> anyhow::Result<(Array3<f32>, Array3<f32>)> {
        let network = classifier.network();
        let input = classifier.preprocess(image)?;

        let activations = network.forward_until(target.index, &input)?;
        let var = Var::from_tensor(&activations)?;
        let output = network.forward_from(target.index + 1, var.as_tensor())?;

        let p = output
            .flatten_all()?
            .to_vec1::<f32>()?
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("network produced no output"))?;
        let class = if f64::from(p) > DECISION_THRESHOLD {
            LesionClass::Malignant
        } else {
            LesionClass::Benign
        };
        let score = match class {
            LesionClass::Malignant => output,
            LesionClass::Benign => output.affine(-1.0, 1.0)?,
        };

        let grads = score.sum_all()?.backward()?;
        let gradient = grads
            .get(var.as_tensor())
            .ok_or_else(|| anyhow::anyhow!("no gradient reached layer '{}'", target.name))?;

        Ok((to_array3(var.as_tensor())?, to_array3(gradient)?))
    }
}

/// Convert a `(1, C, H, W)` tensor into a `(C, H, W)` array
fn to_array3(tensor: &Tensor) -> anyhow::Result<Array3<f32>> {
    let (batch, c, h, w) = tensor.dims4()?;
    if batch != 1 {
        anyhow::bail!("expected a single-image batch, got {}", batch);
    }
    let data = tensor.flatten_all()?.to_vec1::<f32>()?;
    Ok(Array3::from_shape_vec((c, h, w), data)?)
}

/// Channel-weighted activation map, rectified and min-max normalized to [0, 1]
pub fn grad_cam_map(activations: &Array3<f32>, gradients: &Array3<f32>) -> Result<Array2<f32>, String> {
    if activations.shape() != gradients.shape() {
        return Err(format!(
            "activation shape {:?} differs from gradient shape {:?}",
            activations.shape(),
            gradients.shape()
        ));
    }

    let (_, h, w) = activations.dim();
    let weights = gradients
        .mean_axis(Axis(2))
        .and_then(|m| m.mean_axis(Axis(1)))
        .ok_or_else(|| "empty gradient tensor".to_string())?;

    let mut cam = Array2::<f32>::zeros((h, w));
    for (weight, channel) in weights.iter().zip(activations.outer_iter()) {
        cam.scaled_add(*weight, &channel);
    }
    cam.mapv_inplace(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });

    let min = cam.fold(f32::INFINITY, |acc, v| acc.min(*v));
    let max = cam.fold(f32::NEG_INFINITY, |acc, v| acc.max(*v));
    let range = max - min;
    if range > f32::EPSILON {
        cam.mapv_inplace(|v| (v - min) / range);
    } else {
        cam.fill(0.0);
    }
    Ok(cam)
}

/// Bilinear upsampling of the map to `width x height`, row-major
fn upsample(cam: &Array2<f32>, width: u32, height: u32) -> Result<Vec<f32>, String> {
    let (h, w) = cam.dim();
    let values: Vec<f32> = cam.iter().copied().collect();
    let small: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_raw(w as u32, h as u32, values)
            .ok_or_else(|| "activation map has inconsistent dimensions".to_string())?;

    let resized = image::imageops::resize(&small, width, height, FilterType::Triangle);
    Ok(resized
        .into_raw()
        .into_iter()
        .map(|v| v.clamp(0.0, 1.0))
        .collect())
}

fn encode_png(image: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png)?;
    Ok(buffer.into_inner())
}
