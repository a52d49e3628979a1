use crate::config::{Config, ProviderConfig, SCHEMA_VERSION};
use crate::error::{LesionError, Result, ValidationError};

const MAX_TIMEOUT_SECS: u64 = 300;

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_model(config, &mut errors);
        Self::validate_explainer(config, &mut errors);
        Self::validate_provider("providers.primary", &config.providers.primary, &mut errors);
        Self::validate_provider(
            "providers.secondary",
            &config.providers.secondary,
            &mut errors,
        );
        Self::validate_dataset(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(LesionError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_model(config: &Config, errors: &mut Vec<ValidationError>) {
        // Existence is checked when the classifier loads, paths may still contain ~
        if config.model.manifest_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "model.manifest_path",
                "Manifest path cannot be empty",
            ));
        }
        if config.model.weights_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "model.weights_path",
                "Weights path cannot be empty",
            ));
        }
    }

    fn validate_explainer(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.explainer.default_target_layer.trim().is_empty() {
            errors.push(ValidationError::new(
                "explainer.default_target_layer",
                "Default target layer cannot be empty",
            ));
        }
        for (version, layer) in &config.explainer.target_layers {
            if layer.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("explainer.target_layers.{}", version),
                    "Target layer name cannot be empty",
                ));
            }
        }
    }

    fn validate_provider(prefix: &str, provider: &ProviderConfig, errors: &mut Vec<ValidationError>) {
        // Credentials are not checked here: a missing key only disables the provider

        if !provider.endpoint.starts_with("https://") {
            errors.push(ValidationError::new(
                format!("{}.endpoint", prefix),
                format!("Endpoint must use https, got '{}'", provider.endpoint),
            ));
        }

        if provider.model.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("{}.model", prefix),
                "Model name cannot be empty",
            ));
        }

        if provider.api_key_env.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("{}.api_key_env", prefix),
                "API key environment variable name cannot be empty",
            ));
        }

        if provider.timeout_secs == 0 || provider.timeout_secs > MAX_TIMEOUT_SECS {
            errors.push(ValidationError::new(
                format!("{}.timeout_secs", prefix),
                format!(
                    "Timeout must be between 1 and {} seconds, got {}",
                    MAX_TIMEOUT_SECS, provider.timeout_secs
                ),
            ));
        }

        let temp = provider.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                format!("{}.temperature", prefix),
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if provider.max_output_tokens == 0 {
            errors.push(ValidationError::new(
                format!("{}.max_output_tokens", prefix),
                "Max output tokens must be greater than 0",
            ));
        }
    }

    fn validate_dataset(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.dataset.enabled && config.dataset.root_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "dataset.root_dir",
                "Dataset root directory cannot be empty",
            ));
        }
    }
}
