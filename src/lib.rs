//! lesionscope - Dermoscopic Lesion Triage Companion
//!
//! Classifies skin-lesion images as benign or malignant with a small convolutional network,
//! explains each prediction with a Grad-CAM overlay, requests a written analysis from
//! multimodal providers with a local fallback, and accumulates a deduplicated dataset of
//! classified images for later retraining. Educational use only.

pub mod analysis;
pub mod audit;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod explainer;
pub mod pipeline;
pub mod storage;

pub use error::{LesionError, Result};
