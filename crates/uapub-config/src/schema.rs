// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Configuration file schema.
//!
//! Every engine field is optional in the file. [`UapubConfig::resolve`]
//! turns the raw values into the single [`EngineConfiguration`] the core
//! consumes, replacing anything out of range by its default with a warning.
//!
//! ```yaml
//! engine:
//!   batch_trigger_interval: 500ms     # or a number of milliseconds
//!   batch_size: 50
//!   max_egress_message_queue: 4096
//!   messaging_mode: samples           # samples | pub_sub
//!   message_encoding: json            # json | binary
//!   enable_runtime_state_reporting: true
//! logging:
//!   level: info
//!   format: text                      # text | json | compact
//! published_nodes_file: ./publishednodes.json
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use uapub_core::config::EngineConfiguration;
use uapub_core::message::{MessageEncoding, MessagingMode};
use uapub_core::retry::RetryConfig;

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// UapubConfig
// =============================================================================

/// Root of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UapubConfig {
    /// Engine tunables.
    #[serde(default)]
    pub engine: EngineSection,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path of the published nodes file, relative to the config file.
    #[serde(default)]
    pub published_nodes_file: Option<PathBuf>,
}

impl UapubConfig {
    /// Validates values that have no sensible fallback.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(path) = &self.published_nodes_file {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::validation(
                    "published_nodes_file",
                    "must not be empty",
                ));
            }
        }
        self.engine.validate()?;
        self.logging.validate()
    }

    /// Resolves the engine tunables. Never fails.
    pub fn resolve(&self) -> EngineConfiguration {
        self.engine.resolve()
    }
}

// =============================================================================
// EngineSection
// =============================================================================

/// Raw engine tunables as they appear in the file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    /// Time after which a non-empty batch is flushed.
    #[serde(default, with = "flexible_duration", skip_serializing_if = "Option::is_none")]
    pub batch_trigger_interval: Option<Duration>,

    /// Notifications per batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,

    /// Egress queue capacity per pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_egress_message_queue: Option<usize>,

    /// `samples` or `pub_sub`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_mode: Option<MessagingMode>,

    /// `json` or `binary`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_encoding: Option<MessageEncoding>,

    /// Metadata refresh interval; zero disables metadata messages.
    #[serde(default, with = "flexible_duration", skip_serializing_if = "Option::is_none")]
    pub metadata_message_interval: Option<Duration>,

    /// Maximum encoded message size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_message_size: Option<usize>,

    /// Send a restart announcement at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_runtime_state_reporting: Option<bool>,

    /// Notification channel capacity per connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_channel_capacity: Option<usize>,

    /// Bound on every protocol call.
    #[serde(default, with = "flexible_duration", skip_serializing_if = "Option::is_none")]
    pub operation_timeout: Option<Duration>,

    /// Session keep-alive check interval.
    #[serde(default, with = "flexible_duration", skip_serializing_if = "Option::is_none")]
    pub keep_alive_interval: Option<Duration>,

    /// Bound on one message send.
    #[serde(default, with = "flexible_duration", skip_serializing_if = "Option::is_none")]
    pub send_timeout: Option<Duration>,

    /// Bound on each shutdown phase.
    #[serde(default, with = "flexible_duration", skip_serializing_if = "Option::is_none")]
    pub shutdown_phase_timeout: Option<Duration>,

    /// Publishing interval when an entry names none.
    #[serde(default, with = "flexible_duration", skip_serializing_if = "Option::is_none")]
    pub default_publishing_interval: Option<Duration>,

    /// Sampling interval when a node names none.
    #[serde(default, with = "flexible_duration", skip_serializing_if = "Option::is_none")]
    pub default_sampling_interval: Option<Duration>,

    /// Retry policy for connect, subscribe and add-item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
}

impl EngineSection {
    /// Validates values that have no sensible fallback.
    pub fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("operation_timeout", self.operation_timeout),
            ("send_timeout", self.send_timeout),
            ("shutdown_phase_timeout", self.shutdown_phase_timeout),
            ("default_publishing_interval", self.default_publishing_interval),
        ] {
            if value == Some(Duration::ZERO) {
                return Err(ConfigError::validation(field, "must be greater than zero"));
            }
        }
        Ok(())
    }

    /// Builds the engine configuration, clamping out-of-range values.
    pub fn resolve(&self) -> EngineConfiguration {
        let defaults = EngineConfiguration::default();
        let config = EngineConfiguration {
            batch_trigger_interval: self
                .batch_trigger_interval
                .unwrap_or(defaults.batch_trigger_interval),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            max_egress_message_queue: self
                .max_egress_message_queue
                .unwrap_or(defaults.max_egress_message_queue),
            messaging_mode: self.messaging_mode.unwrap_or(defaults.messaging_mode),
            message_encoding: self.message_encoding.unwrap_or(defaults.message_encoding),
            metadata_message_interval: self
                .metadata_message_interval
                .unwrap_or(defaults.metadata_message_interval),
            max_message_size: self.max_message_size.unwrap_or(defaults.max_message_size),
            enable_runtime_state_reporting: self
                .enable_runtime_state_reporting
                .unwrap_or(defaults.enable_runtime_state_reporting),
            notification_channel_capacity: self
                .notification_channel_capacity
                .unwrap_or(defaults.notification_channel_capacity),
            operation_timeout: self.operation_timeout.unwrap_or(defaults.operation_timeout),
            keep_alive_interval: self
                .keep_alive_interval
                .unwrap_or(defaults.keep_alive_interval),
            send_timeout: self.send_timeout.unwrap_or(defaults.send_timeout),
            shutdown_phase_timeout: self
                .shutdown_phase_timeout
                .unwrap_or(defaults.shutdown_phase_timeout),
            default_publishing_interval: self
                .default_publishing_interval
                .unwrap_or(defaults.default_publishing_interval),
            default_sampling_interval: self
                .default_sampling_interval
                .unwrap_or(defaults.default_sampling_interval),
            retry: self.retry.clone().map(resolve_retry).unwrap_or(defaults.retry),
        };
        config.clamped()
    }
}

fn resolve_retry(mut retry: RetryConfig) -> RetryConfig {
    let defaults = RetryConfig::default();
    if !(0.0..=1.0).contains(&retry.jitter) {
        tracing::warn!(value = retry.jitter, "retry.jitter out of range, using default");
        retry.jitter = defaults.jitter;
    }
    if retry.multiplier < 1.0 {
        tracing::warn!(value = retry.multiplier, "retry.multiplier below 1, using default");
        retry.multiplier = defaults.multiplier;
    }
    if retry.max_delay < retry.initial_delay {
        tracing::warn!(
            initial_delay_ms = retry.initial_delay.as_millis() as u64,
            max_delay_ms = retry.max_delay.as_millis() as u64,
            "retry.max_delay below initial_delay, raising it"
        );
        retry.max_delay = retry.initial_delay;
    }
    if retry.max_attempts == Some(0) {
        tracing::warn!("retry.max_attempts of 0 means one attempt");
        retry.max_attempts = Some(1);
    }
    if retry.attempt_timeout.is_some_and(|timeout| timeout.is_zero()) {
        tracing::warn!("retry.attempt_timeout of 0 disables the bound");
        retry.attempt_timeout = None;
    }
    retry
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include span targets in logs.
    #[serde(default = "default_enabled")]
    pub with_target: bool,

    /// Include thread IDs in logs.
    #[serde(default)]
    pub with_thread_ids: bool,
}

fn default_enabled() -> bool {
    true
}

impl LoggingConfig {
    /// Validates the logging configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            with_target: true,
            with_thread_ids: false,
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl LogLevel {
    /// Returns the level as an `EnvFilter` directive.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// Compact single-line text.
    Compact,
    /// JSON lines for log shippers.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

// =============================================================================
// Durations
// =============================================================================

/// Parses a duration given as milliseconds or as a humantime string.
///
/// `"1500"` and `1500` are both 1.5 seconds; `"1m 30s"` is 90 seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(millis) = value.parse::<u64>() {
        return Ok(Duration::from_millis(millis));
    }
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

/// Optional durations written as milliseconds or humantime strings.
pub(crate) mod flexible_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        value
            .map(|d| d.as_millis() as u64)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Repr::Millis(millis)) => Ok(Some(Duration::from_millis(millis))),
            Some(Repr::Text(text)) => super::parse_duration(&text)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_resolves_to_defaults() {
        let config = UapubConfig::default();
        assert_eq!(config.resolve(), EngineConfiguration::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_values_fall_back() {
        let config = UapubConfig {
            engine: EngineSection {
                batch_trigger_interval: Some(Duration::from_millis(10)),
                batch_size: Some(5000),
                max_egress_message_queue: Some(1),
                ..Default::default()
            },
            ..Default::default()
        };

        let resolved = config.resolve();
        assert_eq!(resolved.batch_trigger_interval, Duration::from_millis(500));
        assert_eq!(resolved.batch_size, 50);
        assert_eq!(resolved.max_egress_message_queue, 4096);
    }

    #[test]
    fn test_in_range_values_kept() {
        let section = EngineSection {
            batch_trigger_interval: Some(Duration::from_millis(100)),
            batch_size: Some(2),
            max_egress_message_queue: Some(25_000),
            messaging_mode: Some(MessagingMode::PubSub),
            message_encoding: Some(MessageEncoding::Binary),
            ..Default::default()
        };

        let resolved = section.resolve();
        assert_eq!(resolved.batch_trigger_interval, Duration::from_millis(100));
        assert_eq!(resolved.batch_size, 2);
        assert_eq!(resolved.max_egress_message_queue, 25_000);
        assert_eq!(resolved.messaging_mode, MessagingMode::PubSub);
        assert_eq!(resolved.message_encoding, MessageEncoding::Binary);
    }

    #[test]
    fn test_retry_sanitized() {
        let section = EngineSection {
            retry: Some(RetryConfig {
                jitter: 4.0,
                multiplier: 0.5,
                max_attempts: Some(0),
                attempt_timeout: Some(Duration::ZERO),
                ..RetryConfig::default()
            }),
            ..Default::default()
        };

        let retry = section.resolve().retry;
        assert_eq!(retry.jitter, RetryConfig::default().jitter);
        assert_eq!(retry.multiplier, 2.0);
        assert_eq!(retry.max_attempts, Some(1));
        assert_eq!(retry.attempt_timeout, None);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let section = EngineSection {
            send_timeout: Some(Duration::ZERO),
            ..Default::default()
        };
        let err = section.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "send_timeout"));
    }

    #[test]
    fn test_parse_duration_forms() {
        assert_eq!(parse_duration("1500").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1m 30s").unwrap(), Duration::from_secs(90));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_json_durations_accept_both_forms() {
        let section: EngineSection = serde_json::from_str(
            r#"{"batch_trigger_interval": 250, "send_timeout": "2s"}"#,
        )
        .unwrap();
        assert_eq!(section.batch_trigger_interval, Some(Duration::from_millis(250)));
        assert_eq!(section.send_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<EngineSection, _> = serde_json::from_str(r#"{"batch_sise": 10}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_log_level_and_format_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
