// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration loading and processing for uapub.
//!
//! # Loading Pipeline
//!
//! 1. Read the YAML, TOML or JSON file
//! 2. Resolve `${VAR}` / `${VAR:default}` placeholders in the raw text
//! 3. Parse into [`UapubConfig`]
//! 4. Apply `UAPUB_*` environment overrides
//! 5. Resolve the published nodes path against the config directory
//! 6. Validate
//!
//! # Environment Variable Override
//!
//! ```text
//! UAPUB_BATCH_SIZE=100
//! UAPUB_BATCH_TRIGGER_INTERVAL=250ms
//! UAPUB_MAX_EGRESS_MESSAGE_QUEUE=8192
//! UAPUB_MESSAGING_MODE=pub_sub
//! UAPUB_MESSAGE_ENCODING=binary
//! UAPUB_LOG_LEVEL=debug
//! UAPUB_PUBLISHED_NODES_FILE=/etc/uapub/publishednodes.json
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::schema::{parse_duration, UapubConfig};

/// Default environment variable prefix.
pub const DEFAULT_ENV_PREFIX: &str = "UAPUB";

// =============================================================================
// ConfigLoader
// =============================================================================

/// Configuration loader for uapub.
///
/// # Examples
///
/// ```no_run
/// use uapub_config::loader::ConfigLoader;
///
/// let loader = ConfigLoader::new();
/// let config = loader.load("uapub.yaml").unwrap();
/// let engine = config.resolve();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Base directory for resolving relative paths.
    base_path: Option<PathBuf>,

    /// Environment variable prefix.
    env_prefix: String,

    /// Whether to resolve environment variables in values.
    resolve_env_vars: bool,
}

impl ConfigLoader {
    /// Creates a new configuration loader with default settings.
    pub fn new() -> Self {
        Self {
            base_path: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            resolve_env_vars: true,
        }
    }

    /// Sets the base path for resolving relative paths.
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Sets the environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Enables or disables environment variable resolution.
    pub fn with_env_vars(mut self, enabled: bool) -> Self {
        self.resolve_env_vars = enabled;
        self
    }

    /// Loads configuration from a file.
    ///
    /// The format follows the extension: `.yaml`/`.yml`, `.toml` or `.json`.
    pub fn load(&self, path: impl AsRef<Path>) -> ConfigResult<UapubConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let base_path = self.base_path.clone().unwrap_or_else(|| {
            path.parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from("."))
        });

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;

        let format = ConfigFormat::from_path(path)?;
        let mut config = self
            .parse_content(&content, format)
            .map_err(|e| match e {
                ConfigError::Serialization { message } => ConfigError::parse(path, message),
                other => other,
            })?;

        if let Some(nodes) = &mut config.published_nodes_file {
            if nodes.is_relative() && !nodes.as_os_str().is_empty() {
                *nodes = base_path.join(&nodes);
            }
        }

        config.validate()?;
        debug!(?config, "Configuration loaded");
        Ok(config)
    }

    /// Loads configuration from a string.
    pub fn load_from_str(&self, content: &str, format: ConfigFormat) -> ConfigResult<UapubConfig> {
        let config = self.parse_content(content, format)?;
        config.validate()?;
        Ok(config)
    }

    fn parse_content(&self, content: &str, format: ConfigFormat) -> ConfigResult<UapubConfig> {
        let mut config: UapubConfig = if self.resolve_env_vars {
            parse_str(&resolve_env_placeholders(content), format)?
        } else {
            parse_str(content, format)?
        };

        if self.resolve_env_vars {
            self.apply_env_overrides(&mut config)?;
        }
        Ok(config)
    }

    fn env_var(&self, name: &str) -> Option<(String, String)> {
        let key = format!("{}_{}", self.env_prefix, name);
        env::var(&key).ok().map(|value| (key, value))
    }

    /// Applies `<PREFIX>_*` environment overrides.
    fn apply_env_overrides(&self, config: &mut UapubConfig) -> ConfigResult<()> {
        let engine = &mut config.engine;

        if let Some((key, value)) = self.env_var("BATCH_SIZE") {
            engine.batch_size = Some(parse_env(&key, &value)?);
        }
        if let Some((key, value)) = self.env_var("BATCH_TRIGGER_INTERVAL") {
            engine.batch_trigger_interval = Some(parse_env_duration(&key, &value)?);
        }
        if let Some((key, value)) = self.env_var("MAX_EGRESS_MESSAGE_QUEUE") {
            engine.max_egress_message_queue = Some(parse_env(&key, &value)?);
        }
        if let Some((key, value)) = self.env_var("MESSAGING_MODE") {
            engine.messaging_mode = Some(parse_env(&key, &value)?);
        }
        if let Some((key, value)) = self.env_var("MESSAGE_ENCODING") {
            engine.message_encoding = Some(parse_env(&key, &value)?);
        }
        if let Some((key, value)) = self.env_var("MAX_MESSAGE_SIZE") {
            engine.max_message_size = Some(parse_env(&key, &value)?);
        }
        if let Some((key, value)) = self.env_var("METADATA_MESSAGE_INTERVAL") {
            engine.metadata_message_interval = Some(parse_env_duration(&key, &value)?);
        }
        if let Some((_, value)) = self.env_var("ENABLE_RUNTIME_STATE_REPORTING") {
            engine.enable_runtime_state_reporting = Some(parse_bool(&value));
        }

        if let Some((key, value)) = self.env_var("LOG_LEVEL") {
            config.logging.level = parse_env(&key, &value)?;
        }
        if let Some((key, value)) = self.env_var("LOG_FORMAT") {
            config.logging.format = parse_env(&key, &value)?;
        }
        if let Some((_, value)) = self.env_var("PUBLISHED_NODES_FILE") {
            config.published_nodes_file = Some(PathBuf::from(value));
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// ConfigFormat
// =============================================================================

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// YAML format.
    Yaml,
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Determines the format from a file path.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());

        match ext.as_deref() {
            Some("yaml") | Some("yml") => Ok(ConfigFormat::Yaml),
            Some("toml") => Ok(ConfigFormat::Toml),
            Some("json") => Ok(ConfigFormat::Json),
            Some(other) => Err(ConfigError::unsupported_format(other)),
            None => Err(ConfigError::unsupported_format("(no extension)")),
        }
    }

    /// Returns the file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Yaml => "yaml",
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn parse_str<T: DeserializeOwned>(content: &str, format: ConfigFormat) -> ConfigResult<T> {
    match format {
        ConfigFormat::Yaml => yaml_parse(content),
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
        ConfigFormat::Json => {
            serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))
        }
    }
}

/// YAML parsing through the `config` crate.
fn yaml_parse<T: DeserializeOwned>(content: &str) -> ConfigResult<T> {
    let config = config::Config::builder()
        .add_source(config::File::from_str(content, config::FileFormat::Yaml))
        .build()
        .map_err(|e| ConfigError::serialization(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::serialization(e.to_string()))
}

/// Resolves `${VAR_NAME}` and `${VAR_NAME:default}` placeholders.
///
/// Unknown variables without a default are kept verbatim.
pub fn resolve_env_placeholders(content: &str) -> String {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' || chars.peek() != Some(&'{') {
            result.push(c);
            continue;
        }
        chars.next();

        let mut var_content = String::new();
        let mut found_close = false;
        for c in chars.by_ref() {
            if c == '}' {
                found_close = true;
                break;
            }
            var_content.push(c);
        }

        if !found_close {
            result.push_str("${");
            result.push_str(&var_content);
            continue;
        }

        let (var_name, default_value) = match var_content.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (var_content.as_str(), None),
        };

        match (env::var(var_name), default_value) {
            (Ok(value), _) => result.push_str(&value),
            (Err(_), Some(default)) => result.push_str(default),
            (Err(_), None) => {
                warn!(variable = var_name, "Environment variable not found");
                result.push_str(&format!("${{{}}}", var_name));
            }
        }
    }

    result
}

fn parse_env<T>(key: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid_env_var(key, e.to_string()))
}

fn parse_env_duration(key: &str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).map_err(|e| ConfigError::invalid_env_var(key, e))
}

/// Parses a string to bool.
fn parse_bool(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "true" | "1" | "yes" | "on" | "enabled"
    )
}

// =============================================================================
// Convenience Functions
// =============================================================================

/// Loads configuration from a file with default settings.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<UapubConfig> {
    ConfigLoader::new().load(path)
}

/// Loads configuration from a string with the specified format.
pub fn load_config_str(content: &str, format: ConfigFormat) -> ConfigResult<UapubConfig> {
    ConfigLoader::new().load_from_str(content, format)
}

// =============================================================================
// Tests
// =============================================================================
