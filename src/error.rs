use std::path::PathBuf;
use thiserror::Error;

/// Main error type for lesionscope
///
/// Only configuration problems and the classifier's own failures (unreadable image,
/// missing model, broken inference) are represented here. Explanation, provider and
/// dataset failures are absorbed by their own layers and never become a `LesionError`.
#[derive(Error, Debug)]
pub enum LesionError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Input image could not be read or decoded
    #[error("Image decode error: {reason}")]
    ImageDecode { reason: String },

    /// Classifier artifact missing, malformed or not runnable
    #[error("Model not loaded ({path}): {reason}")]
    ModelNotLoaded { path: PathBuf, reason: String },

    /// Forward pass produced an unusable result
    #[error("Inference error: {0}")]
    Inference(String),

    /// Tensor backend errors
    #[error("Tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl LesionError {
    /// Short machine-readable name of the variant, used in CLI error output
    pub fn kind(&self) -> &'static str {
        match self {
            LesionError::Config(_)
            | LesionError::ConfigValidation { .. }
            | LesionError::ConfigNotFound { .. }
            | LesionError::InvalidConfigValue { .. } => "ConfigError",
            LesionError::ImageDecode { .. } => "ImageDecodeError",
            LesionError::ModelNotLoaded { .. } => "ModelNotLoadedError",
            LesionError::Inference(_) | LesionError::Tensor(_) => "InferenceError",
            LesionError::Io { .. } => "IoError",
            LesionError::Toml(_) | LesionError::TomlSerialization(_) => "TomlError",
            LesionError::Json { .. } => "JsonError",
            LesionError::Other(_) => "Error",
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for lesionscope operations
pub type Result<T> = std::result::Result<T, LesionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = LesionError::ImageDecode {
            reason: "bad bytes".to_string(),
        };
        assert_eq!(err.kind(), "ImageDecodeError");

        let err = LesionError::ModelNotLoaded {
            path: PathBuf::from("/nope"),
            reason: "missing".to_string(),
        };
        assert_eq!(err.kind(), "ModelNotLoadedError");
        assert!(err.to_string().contains("/nope"));
    }
}
