//! Shared fixtures for integration tests
#![allow(dead_code)]

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use image::{ImageFormat, Rgb, RgbImage};
use lesionscope::audit::{AuditEvent, AuditSink};
use lesionscope::classifier::{LesionClassifier, LesionNet, ModelManifest};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const TINY_MANIFEST: &str = r#"{
    "artifact_version": "lesionnet-integration",
    "input_size": 64,
    "layers": [
        {"kind": "conv2d", "name": "stem_conv", "in_channels": 3, "out_channels": 4, "kernel_size": 3, "stride": 2, "padding": 1},
        {"kind": "relu", "name": "stem_relu"},
        {"kind": "conv2d", "name": "features_conv", "in_channels": 4, "out_channels": 8, "kernel_size": 3, "stride": 2, "padding": 1},
        {"kind": "relu", "name": "features_out"},
        {"kind": "global_avg_pool", "name": "pool"},
        {"kind": "dense", "name": "head", "in_features": 8, "out_features": 1},
        {"kind": "sigmoid", "name": "output"}
    ]
}"#;

/// Write a manifest plus randomly initialised safetensors weights into `dir`
pub fn write_model_artifact(dir: &Path) -> (PathBuf, PathBuf) {
    let manifest_path = dir.join("manifest.json");
    let weights_path = dir.join("model.safetensors");
    std::fs::write(&manifest_path, TINY_MANIFEST).unwrap();

    let manifest: ModelManifest = serde_json::from_str(TINY_MANIFEST).unwrap();
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    LesionNet::build(manifest, vb).unwrap();
    varmap.save(&weights_path).unwrap();

    (manifest_path, weights_path)
}

pub fn load_classifier(dir: &Path) -> LesionClassifier {
    let (manifest_path, weights_path) = write_model_artifact(dir);
    LesionClassifier::load(&manifest_path, &weights_path).unwrap()
}

/// PNG bytes of a gradient image; `seed` changes the pixel content
pub fn png_bytes(width: u32, height: u32, seed: u8) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            seed,
        ])
    });
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    buffer.into_inner()
}

/// Audit sink that keeps every event in memory
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingSink {
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl AuditSink for RecordingSink {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
