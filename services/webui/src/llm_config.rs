//! services/webui/src/llm_config.rs
//!
//! Loads and validates the LLM provider settings from the `[llm]` section of a
//! TOML file.
//!
//! Scalar keys directly under `[llm]` form the default profile. Every nested
//! table (for example `[llm.vision]`) is a named profile whose keys override
//! the defaults, so a profile only needs to list what it changes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TEMPERATURE: f32 = 1.0;
const MAX_TEMPERATURE: f32 = 2.0;

/// Name of the secondary multimodal profile.
pub const VISION_PROFILE: &str = "vision";

#[derive(Debug, thiserror::Error)]
pub enum LlmConfigError {
    #[error("Configuration file not found: {0} (copy config.example.toml to config.toml and edit it)")]
    NotFound(PathBuf),
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Missing [llm] section")]
    MissingSection,
    #[error("Invalid [{profile}] settings: {reason}")]
    Invalid { profile: String, reason: String },
}

/// Connection and sampling settings for one model.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_api_type")]
    pub api_type: String,
    pub model: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub max_input_tokens: Option<u32>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub api_version: Option<String>,
}

fn default_api_type() -> String {
    "openai".to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

// The API key never reaches the logs.
impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("api_type", &self.api_type)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("max_tokens", &self.max_tokens)
            .field("max_input_tokens", &self.max_input_tokens)
            .field("temperature", &self.temperature)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl LlmSettings {
    /// Checks the invariants every usable profile must satisfy.
    pub fn validate(&self, profile: &str) -> Result<(), LlmConfigError> {
        let invalid = |reason: String| LlmConfigError::Invalid {
            profile: profile.to_string(),
            reason,
        };

        for (key, value) in [
            ("model", &self.model),
            ("base_url", &self.base_url),
            ("api_key", &self.api_key),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(format!("'{}' must not be empty", key)));
            }
        }

        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(invalid(format!(
                "'base_url' must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }

        if !self.temperature.is_finite()
            || !(0.0..=MAX_TEMPERATURE).contains(&self.temperature)
        {
            return Err(invalid(format!(
                "'temperature' must be within [0.0, {:.1}], got {}",
                MAX_TEMPERATURE, self.temperature
            )));
        }

        if self.max_tokens == 0 {
            return Err(invalid("'max_tokens' must be positive".to_string()));
        }

        Ok(())
    }
}

/// The validated contents of the `[llm]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmConfig {
    pub default: LlmSettings,
    pub profiles: BTreeMap<String, LlmSettings>,
}

impl LlmConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, LlmConfigError> {
        let document: toml::Table = source.parse()?;
        let llm = match document.get("llm") {
            Some(toml::Value::Table(table)) => table,
            _ => return Err(LlmConfigError::MissingSection),
        };

        let base: toml::Table = llm
            .iter()
            .filter(|(_, value)| !value.is_table())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let default: LlmSettings = toml::Value::Table(base.clone()).try_into()?;
        default.validate("llm")?;

        let mut profiles = BTreeMap::new();
        for (name, value) in llm {
            let toml::Value::Table(overrides) = value else {
                continue;
            };
            let mut merged = base.clone();
            merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

            let settings: LlmSettings = toml::Value::Table(merged).try_into()?;
            settings.validate(&format!("llm.{}", name))?;
            profiles.insert(name.clone(), settings);
        }

        Ok(Self { default, profiles })
    }

    /// Reads the configuration from `path`, falling back to `config.example.toml`
    /// in the same directory when `path` does not exist.
    pub fn load(path: &Path) -> Result<Self, LlmConfigError> {
        let resolved = resolve_config_path(path)?;
        let source = std::fs::read_to_string(&resolved).map_err(|source| LlmConfigError::Io {
            path: resolved.clone(),
            source,
        })?;
        let config = Self::from_toml_str(&source)?;
        info!(
            path = %resolved.display(),
            model = %config.default.model,
            profiles = config.profiles.len(),
            "LLM configuration loaded"
        );
        Ok(config)
    }

    pub fn vision(&self) -> Option<&LlmSettings> {
        self.profiles.get(VISION_PROFILE)
    }
}

fn resolve_config_path(path: &Path) -> Result<PathBuf, LlmConfigError> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    let example = path.with_file_name("config.example.toml");
    if example.exists() {
        warn!(
            missing = %path.display(),
            fallback = %example.display(),
            "LLM config not found, using the example file"
        );
        return Ok(example);
    }
    Err(LlmConfigError::NotFound(path.to_path_buf()))
}
