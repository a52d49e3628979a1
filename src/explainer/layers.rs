//! Target layer resolution for Grad-CAM
//!
//! The explicit per-artifact mapping is authoritative. Every other strategy is a guess and
//! is logged as a warning so that a wrong choice shows up in the logs instead of silently
//! producing a misleading heatmap.

use crate::classifier::{LayerInfo, LesionNet};
use crate::config::ExplainerConfig;
use serde::Serialize;
use std::collections::BTreeMap;

/// How the target layer was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    /// `explainer.target_layers[artifact_version]`
    Configured,
    /// Deepest spatial layer whose name contains the hint
    NameHint,
    /// Deepest spatial layer
    Introspection,
    /// `explainer.default_target_layer`
    Default,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLayer {
    pub index: usize,
    pub name: String,
    pub source: ResolutionSource,
}

pub struct TargetLayerResolver {
    target_layers: BTreeMap<String, String>,
    layer_name_hint: String,
    default_target_layer: String,
}

impl TargetLayerResolver {
    pub fn new(config: &ExplainerConfig) -> Self {
        Self {
            target_layers: config.target_layers.clone(),
            layer_name_hint: config.layer_name_hint.clone(),
            default_target_layer: config.default_target_layer.clone(),
        }
    }

    /// Pick the feature layer to explain for the given network
    pub fn resolve(&self, network: &LesionNet) -> Result<ResolvedLayer, String> {
        let infos = network.layer_infos();
        let version = network.artifact_version();

        if let Some(name) = self.target_layers.get(version) {
            match infos.iter().find(|info| &info.name == name) {
                Some(info) if info.spatial_rank >= 2 => {
                    return Ok(Self::resolved(info, ResolutionSource::Configured));
                }
                Some(_) => tracing::warn!(
                    "Configured target layer '{}' for artifact {} is not spatial, falling back to heuristics",
                    name,
                    version
                ),
                None => tracing::warn!(
                    "Configured target layer '{}' not found in artifact {}, falling back to heuristics",
                    name,
                    version
                ),
            }
        }

        let spatial = || infos.iter().rev().filter(|info| info.spatial_rank >= 2);

        if !self.layer_name_hint.is_empty() {
            if let Some(info) = spatial().find(|info| info.name.contains(&self.layer_name_hint)) {
                tracing::warn!(
                    "No target layer configured for artifact {}, using '{}' (name contains '{}')",
                    version,
                    info.name,
                    self.layer_name_hint
                );
                return Ok(Self::resolved(info, ResolutionSource::NameHint));
            }
        }

        if let Some(info) = spatial().next() {
            tracing::warn!(
                "No target layer configured for artifact {}, using deepest spatial layer '{}'",
                version,
                info.name
            );
            return Ok(Self::resolved(info, ResolutionSource::Introspection));
        }

        tracing::warn!(
            "Artifact {} exposes no spatial layer, trying default target '{}'",
            version,
            self.default_target_layer
        );
        infos
            .iter()
            .find(|info| info.name == self.default_target_layer)
            .map(|info| Self::resolved(info, ResolutionSource::Default))
            .ok_or_else(|| {
                format!(
                    "Default target layer '{}' not found in artifact {}",
                    self.default_target_layer, version
                )
            })
    }

    fn resolved(info: &LayerInfo, source: ResolutionSource) -> ResolvedLayer {
        ResolvedLayer {
            index: info.index,
            name: info.name.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{LayerSpec, ModelManifest};
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn network(manifest: ModelManifest) -> LesionNet {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        LesionNet::build(manifest, vb).unwrap()
    }

    fn tiny() -> LesionNet {
        network(crate::classifier::test_support::tiny_manifest())
    }

    fn pool_only() -> LesionNet {
        network(ModelManifest {
            artifact_version: "pool-only".to_string(),
            input_size: 32,
            layers: vec![
                LayerSpec::GlobalAvgPool {
                    name: "pool".to_string(),
                },
                LayerSpec::Dense {
                    name: "head".to_string(),
                    in_features: 3,
                    out_features: 1,
                },
                LayerSpec::Sigmoid {
                    name: "output".to_string(),
                },
            ],
        })
    }

    fn resolver(map: &[(&str, &str)], hint: &str) -> TargetLayerResolver {
        let config = ExplainerConfig {
            layer_name_hint: hint.to_string(),
            target_layers: map
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..ExplainerConfig::default()
        };
        TargetLayerResolver::new(&config)
    }

    #[test]
    fn test_configured_mapping_wins() {
        let resolved = resolver(&[("lesionnet-tiny-test", "stem_relu")], "conv")
            .resolve(&tiny())
            .unwrap();
        assert_eq!(resolved.name, "stem_relu");
        assert_eq!(resolved.index, 1);
        assert_eq!(resolved.source, ResolutionSource::Configured);
    }

    #[test]
    fn test_name_hint_then_introspection() {
        let resolved = resolver(&[], "conv").resolve(&tiny()).unwrap();
        assert_eq!(resolved.name, "features_conv");
        assert_eq!(resolved.source, ResolutionSource::NameHint);

        let resolved = resolver(&[], "no-such-substring").resolve(&tiny()).unwrap();
        assert_eq!(resolved.name, "features_out");
        assert_eq!(resolved.source, ResolutionSource::Introspection);
    }

    #[test]
    fn test_unknown_configured_layer_falls_back() {
        let resolved = resolver(&[("lesionnet-tiny-test", "missing")], "conv")
            .resolve(&tiny())
            .unwrap();
        assert_eq!(resolved.source, ResolutionSource::NameHint);
    }

    #[test]
    fn test_no_spatial_layer_uses_default_or_fails() {
        let err = resolver(&[], "conv").resolve(&pool_only()).unwrap_err();
        assert!(err.contains("features_out"));
    }
}
