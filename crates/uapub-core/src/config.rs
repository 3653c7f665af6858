// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Resolved engine configuration.
//!
//! The core never reads configuration sources itself. A loader builds one
//! [`EngineConfiguration`] at startup, with every range already enforced by
//! [`in_range_or_default`], and hands it to the engine.

use std::fmt::Display;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::{MessageEncoding, MessagingMode};
use crate::retry::RetryConfig;

// =============================================================================
// Limits
// =============================================================================

/// Default batch trigger interval.
pub const DEFAULT_BATCH_TRIGGER_INTERVAL: Duration = Duration::from_millis(500);
/// Smallest accepted batch trigger interval.
pub const MIN_BATCH_TRIGGER_INTERVAL: Duration = Duration::from_millis(100);
/// Largest accepted batch trigger interval.
pub const MAX_BATCH_TRIGGER_INTERVAL: Duration = Duration::from_millis(3_600_000);

/// Default batch size.
pub const DEFAULT_BATCH_SIZE: usize = 50;
/// Smallest accepted batch size.
pub const MIN_BATCH_SIZE: usize = 2;
/// Largest accepted batch size.
pub const MAX_BATCH_SIZE: usize = 1000;

/// Default egress queue capacity.
pub const DEFAULT_MAX_EGRESS_MESSAGE_QUEUE: usize = 4096;
/// Smallest accepted egress queue capacity.
pub const MIN_MAX_EGRESS_MESSAGE_QUEUE: usize = 2;
/// Largest accepted egress queue capacity.
pub const MAX_MAX_EGRESS_MESSAGE_QUEUE: usize = 25_000;

/// Default maximum encoded message size (bytes).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256 * 1024;
/// Bytes reserved for transport headers out of the maximum message size.
pub const MESSAGE_HEADER_RESERVE: usize = 2048;

/// Longest accepted heartbeat interval.
pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(86_400);

/// Returns `value` when it lies in `[min, max]`, otherwise logs a warning
/// and returns `default`.
///
/// # Examples
///
/// ```
/// use uapub_core::config::in_range_or_default;
///
/// assert_eq!(in_range_or_default("batch_size", 10usize, 2, 1000, 50), 10);
/// assert_eq!(in_range_or_default("batch_size", 1usize, 2, 1000, 50), 50);
/// ```
pub fn in_range_or_default<T>(name: &str, value: T, min: T, max: T, default: T) -> T
where
    T: PartialOrd + Display + Copy,
{
    if value < min || value > max {
        tracing::warn!(
            setting = name,
            value = %value,
            min = %min,
            max = %max,
            default = %default,
            "Configuration value out of range, using default"
        );
        default
    } else {
        value
    }
}

/// [`in_range_or_default`] for durations, compared in milliseconds.
pub fn duration_in_range_or_default(
    name: &str,
    value: Duration,
    min: Duration,
    max: Duration,
    default: Duration,
) -> Duration {
    let millis = in_range_or_default(
        name,
        value.as_millis() as u64,
        min.as_millis() as u64,
        max.as_millis() as u64,
        default.as_millis() as u64,
    );
    Duration::from_millis(millis)
}

// =============================================================================
// EngineConfiguration
// =============================================================================

/// Process-wide tunables, resolved once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfiguration {
    /// Time after which a non-empty batch is flushed.
    pub batch_trigger_interval: Duration,
    /// Number of notifications that flushes a batch immediately.
    pub batch_size: usize,
    /// Capacity of each egress queue.
    pub max_egress_message_queue: usize,
    /// Shape of data messages.
    pub messaging_mode: MessagingMode,
    /// Payload encoding of data messages.
    pub message_encoding: MessageEncoding,
    /// Metadata refresh interval; zero disables metadata messages.
    pub metadata_message_interval: Duration,
    /// Maximum encoded message size in bytes, headers included.
    pub max_message_size: usize,
    /// Whether the restart announcement is sent.
    pub enable_runtime_state_reporting: bool,
    /// Capacity of the notification channel fed by the transport callback.
    pub notification_channel_capacity: usize,
    /// Upper bound on every protocol call.
    pub operation_timeout: Duration,
    /// Keep-alive check interval.
    pub keep_alive_interval: Duration,
    /// Upper bound on a single message send.
    pub send_timeout: Duration,
    /// Upper bound on each shutdown phase.
    pub shutdown_phase_timeout: Duration,
    /// Default publishing interval of new subscriptions.
    pub default_publishing_interval: Duration,
    /// Default sampling interval of new monitored items.
    pub default_sampling_interval: Duration,
    /// Retry policy for connect, subscribe and add-item.
    pub retry: RetryConfig,
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            batch_trigger_interval: DEFAULT_BATCH_TRIGGER_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            max_egress_message_queue: DEFAULT_MAX_EGRESS_MESSAGE_QUEUE,
            messaging_mode: MessagingMode::default(),
            message_encoding: MessageEncoding::default(),
            metadata_message_interval: Duration::ZERO,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            enable_runtime_state_reporting: false,
            notification_channel_capacity: 8192,
            operation_timeout: Duration::from_secs(15),
            keep_alive_interval: Duration::from_secs(5),
            send_timeout: Duration::from_secs(30),
            shutdown_phase_timeout: Duration::from_secs(10),
            default_publishing_interval: Duration::from_secs(1),
            default_sampling_interval: Duration::from_secs(1),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfiguration {
    /// Returns a configuration with short timeouts for tests.
    pub fn for_testing() -> Self {
        Self {
            operation_timeout: Duration::from_secs(2),
            keep_alive_interval: Duration::from_millis(200),
            send_timeout: Duration::from_secs(1),
            shutdown_phase_timeout: Duration::from_secs(1),
            retry: RetryConfig::for_testing(),
            ..Default::default()
        }
    }

    /// Returns the payload budget: maximum message size minus the header reserve.
    pub fn payload_limit(&self) -> usize {
        self.max_message_size.saturating_sub(MESSAGE_HEADER_RESERVE).max(1)
    }

    /// Re-applies every range check; out-of-range values fall back to defaults.
    pub fn clamped(mut self) -> Self {
        self.batch_trigger_interval = duration_in_range_or_default(
            "batch_trigger_interval",
            self.batch_trigger_interval,
            MIN_BATCH_TRIGGER_INTERVAL,
            MAX_BATCH_TRIGGER_INTERVAL,
            DEFAULT_BATCH_TRIGGER_INTERVAL,
        );
        self.batch_size = in_range_or_default(
            "batch_size",
            self.batch_size,
            MIN_BATCH_SIZE,
            MAX_BATCH_SIZE,
            DEFAULT_BATCH_SIZE,
        );
        self.max_egress_message_queue = in_range_or_default(
            "max_egress_message_queue",
            self.max_egress_message_queue,
            MIN_MAX_EGRESS_MESSAGE_QUEUE,
            MAX_MAX_EGRESS_MESSAGE_QUEUE,
            DEFAULT_MAX_EGRESS_MESSAGE_QUEUE,
        );
        if self.max_message_size <= MESSAGE_HEADER_RESERVE {
            tracing::warn!(
                value = self.max_message_size,
                default = DEFAULT_MAX_MESSAGE_SIZE,
                "max_message_size does not leave room for headers, using default"
            );
            self.max_message_size = DEFAULT_MAX_MESSAGE_SIZE;
        }
        if self.notification_channel_capacity == 0 {
            self.notification_channel_capacity = 8192;
        }
        self
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfiguration::default();
        assert_eq!(config.batch_trigger_interval, Duration::from_millis(500));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_egress_message_queue, 4096);
        assert_eq!(config.messaging_mode, MessagingMode::Samples);
        assert_eq!(config.message_encoding, MessageEncoding::Json);
        assert_eq!(config.payload_limit(), 256 * 1024 - 2048);
    }

    #[test]
    fn test_out_of_range_falls_back_to_default() {
        let config = EngineConfiguration {
            batch_trigger_interval: Duration::from_millis(10),
            batch_size: 5000,
            max_egress_message_queue: 1,
            max_message_size: 100,
            ..Default::default()
        }
        .clamped();

        assert_eq!(config.batch_trigger_interval, DEFAULT_BATCH_TRIGGER_INTERVAL);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.max_egress_message_queue, DEFAULT_MAX_EGRESS_MESSAGE_QUEUE);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_boundaries_are_accepted() {
        let config = EngineConfiguration {
            batch_trigger_interval: MAX_BATCH_TRIGGER_INTERVAL,
            batch_size: MIN_BATCH_SIZE,
            max_egress_message_queue: MAX_MAX_EGRESS_MESSAGE_QUEUE,
            ..Default::default()
        }
        .clamped();

        assert_eq!(config.batch_trigger_interval, MAX_BATCH_TRIGGER_INTERVAL);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.max_egress_message_queue, 25_000);
    }
}
