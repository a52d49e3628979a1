//! Declarative sequential convolutional network
//!
//! The classifier artifact is a JSON manifest describing an ordered list of named layers
//! plus a safetensors file holding `{layer}.weight` / `{layer}.bias` tensors. Keeping the
//! layer list explicit lets the explainer introspect the graph and split the forward pass
//! at any spatial layer.

use crate::error::{LesionError, Result};
use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Conv2d, Conv2dConfig, Linear, VarBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

fn default_input_size() -> usize {
    224
}

fn default_stride() -> usize {
    1
}

/// Classifier artifact manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Identifier of the trained artifact, used to look up the explainer target layer
    pub artifact_version: String,
    /// Square input resolution expected by the network
    #[serde(default = "default_input_size")]
    pub input_size: usize,
    /// Ordered layer definitions
    pub layers: Vec<LayerSpec>,
}

/// A single layer definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerSpec {
    Conv2d {
        name: String,
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default)]
        padding: usize,
    },
    Relu {
        name: String,
    },
    Relu6 {
        name: String,
    },
    MaxPool {
        name: String,
        size: usize,
    },
    GlobalAvgPool {
        name: String,
    },
    Dense {
        name: String,
        in_features: usize,
        out_features: usize,
    },
    Sigmoid {
        name: String,
    },
}

impl LayerSpec {
    pub fn name(&self) -> &str {
        match self {
            LayerSpec::Conv2d { name, .. }
            | LayerSpec::Relu { name }
            | LayerSpec::Relu6 { name }
            | LayerSpec::MaxPool { name, .. }
            | LayerSpec::GlobalAvgPool { name }
            | LayerSpec::Dense { name, .. }
            | LayerSpec::Sigmoid { name } => name,
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            LayerSpec::Conv2d { .. } => LayerKind::Conv2d,
            LayerSpec::Relu { .. } => LayerKind::Relu,
            LayerSpec::Relu6 { .. } => LayerKind::Relu6,
            LayerSpec::MaxPool { .. } => LayerKind::MaxPool,
            LayerSpec::GlobalAvgPool { .. } => LayerKind::GlobalAvgPool,
            LayerSpec::Dense { .. } => LayerKind::Dense,
            LayerSpec::Sigmoid { .. } => LayerKind::Sigmoid,
        }
    }
}

/// Layer kind, without parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Conv2d,
    Relu,
    Relu6,
    MaxPool,
    GlobalAvgPool,
    Dense,
    Sigmoid,
}

/// Introspection record for one layer of a built network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerInfo {
    pub index: usize,
    pub name: String,
    pub kind: LayerKind,
    /// Number of spatial dimensions in the layer output (2 for feature maps, 0 after pooling)
    pub spatial_rank: usize,
}

impl ModelManifest {
    /// Load a manifest from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| LesionError::Io {
            source: e,
            context: format!("Failed to read model manifest: {}", path.display()),
        })?;
        let manifest: ModelManifest =
            serde_json::from_str(&content).map_err(|e| LesionError::Json {
                source: e,
                context: format!("Failed to parse model manifest: {}", path.display()),
            })?;
        Ok(manifest)
    }

    /// Check structural consistency of the layer list
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.artifact_version.trim().is_empty() {
            return Err("artifact_version cannot be empty".to_string());
        }
        if self.input_size == 0 {
            return Err("input_size must be greater than 0".to_string());
        }
        if self.layers.is_empty() {
            return Err("manifest declares no layers".to_string());
        }

        let mut names = HashSet::new();
        let mut spatial = true;
        let mut channels = 3usize;
        let mut resolution = self.input_size;

        for layer in &self.layers {
            if !names.insert(layer.name()) {
                return Err(format!("duplicate layer name '{}'", layer.name()));
            }

            match layer {
                LayerSpec::Conv2d {
                    name,
                    in_channels,
                    out_channels,
                    kernel_size,
                    stride,
                    padding,
                } => {
                    if !spatial {
                        return Err(format!("conv layer '{}' follows global pooling", name));
                    }
                    if *in_channels != channels {
                        return Err(format!(
                            "conv layer '{}' expects {} input channels, previous layer produces {}",
                            name, in_channels, channels
                        ));
                    }
                    if *kernel_size == 0 || *stride == 0 || *out_channels == 0 {
                        return Err(format!("conv layer '{}' has a zero-sized parameter", name));
                    }
                    if resolution + 2 * padding < *kernel_size {
                        return Err(format!("conv layer '{}' kernel exceeds its input", name));
                    }
                    resolution = (resolution + 2 * padding - kernel_size) / stride + 1;
                    channels = *out_channels;
                }
                LayerSpec::MaxPool { name, size } => {
                    if !spatial {
                        return Err(format!("pool layer '{}' follows global pooling", name));
                    }
                    if *size == 0 || *size > resolution {
                        return Err(format!("pool layer '{}' has an invalid size", name));
                    }
                    resolution /= size;
                }
                LayerSpec::GlobalAvgPool { name } => {
                    if !spatial {
                        return Err(format!("layer '{}' pools an already pooled tensor", name));
                    }
                    spatial = false;
                }
                LayerSpec::Dense {
                    name,
                    in_features,
                    out_features,
                } => {
                    if spatial {
                        return Err(format!(
                            "dense layer '{}' must follow global pooling",
                            name
                        ));
                    }
                    if *in_features != channels {
                        return Err(format!(
                            "dense layer '{}' expects {} features, previous layer produces {}",
                            name, in_features, channels
                        ));
                    }
                    channels = *out_features;
                }
                LayerSpec::Relu { .. } | LayerSpec::Relu6 { .. } | LayerSpec::Sigmoid { .. } => {}
            }
        }

        if spatial {
            return Err("network never pools its feature maps".to_string());
        }
        if channels != 1 {
            return Err(format!(
                "network must produce a single sigmoid output, produces {}",
                channels
            ));
        }
        match self.layers.last() {
            Some(LayerSpec::Sigmoid { .. }) => Ok(()),
            Some(last) => Err(format!(
                "network must end with a sigmoid layer, ends with '{}'",
                last.name()
            )),
            None => Err("manifest declares no layers".to_string()),
        }
    }
}

enum Layer {
    Conv(Conv2d),
    Relu,
    Relu6,
    MaxPool(usize),
    GlobalAvgPool,
    Dense(Linear),
    Sigmoid,
}

impl Layer {
    fn forward(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Layer::Conv(conv) => conv.forward(x),
            Layer::Relu => x.relu(),
            Layer::Relu6 => x.relu()?.minimum(6f32),
            Layer::MaxPool(size) => x.max_pool2d(*size),
            Layer::GlobalAvgPool => x.mean(D::Minus1)?.mean(D::Minus1),
            Layer::Dense(linear) => linear.forward(x),
            // Built from primitive ops so gradients flow through it
            Layer::Sigmoid => x.neg()?.exp()?.affine(1.0, 1.0)?.recip(),
        }
    }
}

/// Sequential lesion classification network
pub struct LesionNet {
    manifest: ModelManifest,
    layers: Vec<(LayerInfo, Layer)>,
    device: Device,
}

impl LesionNet {
    /// Build the network from a manifest, pulling weights from the given var builder
    pub fn build(manifest: ModelManifest, vb: VarBuilder) -> Result<Self> {
        manifest
            .validate()
            .map_err(|e| LesionError::Inference(format!("Invalid model manifest: {}", e)))?;

        let device = vb.device().clone();
        let mut layers = Vec::with_capacity(manifest.layers.len());
        let mut spatial_rank = 2;

        for (index, spec) in manifest.layers.iter().enumerate() {
            let layer = match spec {
                LayerSpec::Conv2d {
                    name,
                    in_channels,
                    out_channels,
                    kernel_size,
                    stride,
                    padding,
                } => {
                    let config = Conv2dConfig {
                        padding: *padding,
                        stride: *stride,
                        ..Default::default()
                    };
                    Layer::Conv(candle_nn::conv2d(
                        *in_channels,
                        *out_channels,
                        *kernel_size,
                        config,
                        vb.pp(name),
                    )?)
                }
                LayerSpec::Relu { .. } => Layer::Relu,
                LayerSpec::Relu6 { .. } => Layer::Relu6,
                LayerSpec::MaxPool { size, .. } => Layer::MaxPool(*size),
                LayerSpec::GlobalAvgPool { .. } => {
                    spatial_rank = 0;
                    Layer::GlobalAvgPool
                }
                LayerSpec::Dense {
                    name,
                    in_features,
                    out_features,
                } => Layer::Dense(candle_nn::linear(*in_features, *out_features, vb.pp(name))?),
                LayerSpec::Sigmoid { .. } => Layer::Sigmoid,
            };

            let info = LayerInfo {
                index,
                name: spec.name().to_string(),
                kind: spec.kind(),
                spatial_rank,
            };
            layers.push((info, layer));
        }

        Ok(Self {
            manifest,
            layers,
            device,
        })
    }

    /// Load manifest and safetensors weights from disk
    pub fn load(manifest_path: &Path, weights_path: &Path, device: &Device) -> Result<Self> {
        let manifest = ModelManifest::load(manifest_path)?;
        if !weights_path.exists() {
            return Err(LesionError::ModelNotLoaded {
                path: weights_path.to_path_buf(),
                reason: "weights file not found".to_string(),
            });
        }

        tracing::info!(
            "Loading classifier weights: {} (artifact {})",
            weights_path.display(),
            manifest.artifact_version
        );
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)? };
        Self::build(manifest, vb)
    }

    pub fn manifest(&self) -> &ModelManifest {
        &self.manifest
    }

    pub fn artifact_version(&self) -> &str {
        &self.manifest.artifact_version
    }

    pub fn input_size(&self) -> usize {
        self.manifest.input_size
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Introspection view of every layer, in execution order
    pub fn layer_infos(&self) -> Vec<LayerInfo> {
        self.layers.iter().map(|(info, _)| info.clone()).collect()
    }

    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|(info, _)| info.name == name)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Full forward pass on an NHWC batch, returning the sigmoid output
    pub fn forward(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        let x = Self::channels_first(input)?;
        self.forward_from(0, &x)
    }

    /// Run layers `0..=last` on an NHWC batch, returning that layer's activations
    pub fn forward_until(&self, last: usize, input: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = Self::channels_first(input)?;
        for (_, layer) in self.layers.iter().take(last + 1) {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    /// Run layers `first..` on an intermediate tensor
    pub fn forward_from(&self, first: usize, x: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = x.clone();
        for (_, layer) in self.layers.iter().skip(first) {
            x = layer.forward(&x)?;
        }
        Ok(x)
    }

    fn channels_first(input: &Tensor) -> candle_core::Result<Tensor> {
        input.permute((0, 3, 1, 2))?.contiguous()
    }
}
