//! Configuration management for lesionscope
//!
//! Loads the TOML configuration file, applies profile and environment overrides, and
//! validates the result before any component is built from it.

use crate::error::{LesionError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub model: ModelConfig,
    #[serde(default)]
    pub explainer: ExplainerConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Classifier artifact location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub manifest_path: PathBuf,
    pub weights_path: PathBuf,
}

/// Visual explainer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Substring used by the name-matching fallback when no mapping is configured
    #[serde(default = "default_layer_name_hint")]
    pub layer_name_hint: String,
    /// Last-resort target layer name
    #[serde(default = "default_target_layer")]
    pub default_target_layer: String,
    /// Artifact version -> target layer name
    #[serde(default)]
    pub target_layers: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_layer_name_hint() -> String {
    "conv".to_string()
}

fn default_target_layer() -> String {
    "features_out".to_string()
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            layer_name_hint: default_layer_name_hint(),
            default_target_layer: default_target_layer(),
            target_layers: BTreeMap::new(),
        }
    }
}

/// Remote analysis cascade settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Master switch; when off only the local report is produced
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "ProviderConfig::gemini")]
    pub primary: ProviderConfig,
    #[serde(default = "ProviderConfig::groq")]
    pub secondary: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            primary: ProviderConfig::gemini(),
            secondary: ProviderConfig::groq(),
        }
    }
}

/// Wire protocol spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// `models/{model}:generateContent`
    Gemini,
    /// OpenAI-compatible `chat/completions`
    OpenaiChat,
}

/// One remote multimodal provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub enabled: bool,
    pub kind: ProviderKind,
    pub model: String,
    pub endpoint: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl ProviderConfig {
    pub fn gemini() -> Self {
        Self {
            enabled: true,
            kind: ProviderKind::Gemini,
            model: "gemini-2.0-flash".to_string(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            timeout_secs: 60,
            temperature: 0.4,
            max_output_tokens: 2048,
        }
    }

    pub fn groq() -> Self {
        Self {
            enabled: true,
            kind: ProviderKind::OpenaiChat,
            model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            timeout_secs: 30,
            temperature: 0.4,
            max_output_tokens: 2048,
        }
    }
}

/// Incremental dataset store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub enabled: bool,
    pub root_dir: PathBuf,
    pub min_samples_for_training: usize,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            root_dir: PathBuf::from("~/.lesionscope/dataset"),
            min_samples_for_training: 10,
        }
    }
}

/// Structured audit log settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    pub enabled: bool,
    pub log_dir: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: PathBuf::from("~/.lesionscope/logs"),
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub providers_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explainer_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_enabled: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LesionError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LesionError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| LesionError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| LesionError::InvalidConfigValue {
                path: format!("profiles.{}", profile),
                message: "Unknown profile".to_string(),
            })?;

        if let Some(enabled) = overrides.providers_enabled {
            self.providers.enabled = enabled;
        }
        if let Some(enabled) = overrides.explainer_enabled {
            self.explainer.enabled = enabled;
        }
        if let Some(enabled) = overrides.dataset_enabled {
            self.dataset.enabled = enabled;
        }
        tracing::debug!("Applied profile '{}'", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LESIONSCOPE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("LESIONSCOPE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        let parse_bool = |value: &str| -> Result<bool> {
            value.parse().map_err(|_| LesionError::InvalidConfigValue {
                path: path.to_string(),
                message: format!("Cannot parse '{}' as boolean", value),
            })
        };

        match path {
            "MODEL__MANIFEST_PATH" => self.model.manifest_path = PathBuf::from(value),
            "MODEL__WEIGHTS_PATH" => self.model.weights_path = PathBuf::from(value),
            "EXPLAINER__ENABLED" => self.explainer.enabled = parse_bool(value)?,
            "PROVIDERS__ENABLED" => self.providers.enabled = parse_bool(value)?,
            "PROVIDERS__PRIMARY__MODEL" => self.providers.primary.model = value.to_string(),
            "PROVIDERS__SECONDARY__MODEL" => self.providers.secondary.model = value.to_string(),
            "DATASET__ENABLED" => self.dataset.enabled = parse_bool(value)?,
            "DATASET__ROOT_DIR" => self.dataset.root_dir = PathBuf::from(value),
            "AUDIT__ENABLED" => self.audit.enabled = parse_bool(value)?,
            "AUDIT__LOG_DIR" => self.audit.log_dir = PathBuf::from(value),
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| LesionError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("lesionscope").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let model_dir = PathBuf::from("~/.lesionscope/model");

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            model: ModelConfig {
                manifest_path: model_dir.join("manifest.json"),
                weights_path: model_dir.join("model.safetensors"),
            },
            explainer: ExplainerConfig::default(),
            providers: ProvidersConfig::default(),
            dataset: DatasetConfig::default(),
            audit: AuditConfig::default(),
            profiles: default_profiles(),
        }
    }
}

fn default_profiles() -> HashMap<String, ProfileOverrides> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "offline".to_string(),
        ProfileOverrides {
            providers_enabled: Some(false),
            ..Default::default()
        },
    );
    profiles.insert(
        "fast".to_string(),
        ProfileOverrides {
            providers_enabled: Some(false),
            explainer_enabled: Some(false),
            ..Default::default()
        },
    );
    profiles
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| LesionError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| LesionError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
