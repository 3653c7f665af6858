// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Retry coordination for protocol operations.
//!
//! Connect, subscribe and add-item calls are wrapped by a [`RetryCoordinator`]
//! which applies a [`RetryStrategy`] and distinguishes between:
//!
//! - **recoverable** failures (timeouts, transient disconnects), retried with
//!   backoff, indefinitely unless an attempt ceiling is configured;
//! - every other class (fatal configuration errors, conflicts, missing
//!   objects), surfaced on the first occurrence.
//!
//! Exceeding the attempt ceiling turns the last recoverable error into a
//! fatal [`RetryError::Exhausted`]. An attempt that outlives
//! [`RetryConfig::attempt_timeout`] is abandoned and counts as a
//! [`ErrorClass::Timeout`] failure.
//!
//! # Example
//!
//! ```rust,ignore
//! use uapub_core::retry::{RetryCoordinator, RetryConfig};
//! use std::time::Duration;
//!
//! let coordinator = RetryCoordinator::exponential(
//!     RetryConfig::default().with_initial_delay(Duration::from_millis(200)),
//! );
//!
//! let session = coordinator
//!     .run("connect", |_attempt| async { transport.connect().await })
//!     .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{Classified, ErrorClass};

// =============================================================================
// Retry Configuration
// =============================================================================

/// Configuration for retry strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts. `None` retries recoverable errors forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,

    /// Initial delay before the first retry.
    #[serde(default = "default_initial_delay", with = "duration_millis")]
    pub initial_delay: Duration,

    /// Maximum delay between retries.
    #[serde(default = "default_max_delay", with = "duration_millis")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0) to randomize delays.
    #[serde(default)]
    pub jitter: f64,

    /// Upper bound on a single attempt. `None` lets an attempt run until it
    /// resolves on its own.
    #[serde(default, with = "option_duration_millis", skip_serializing_if = "Option::is_none")]
    pub attempt_timeout: Option<Duration>,
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(500)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
            jitter: 0.1,
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    /// Creates a new retry configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(1),
            ..Default::default()
        }
    }

    /// Creates a configuration suited to unit tests: tiny delays, no jitter.
    pub fn for_testing() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            multiplier: 2.0,
            jitter: 0.0,
            attempt_timeout: None,
        }
    }

    /// Sets the attempt ceiling.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    /// Removes the attempt ceiling.
    pub fn unbounded(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    /// Sets the jitter factor.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Bounds every attempt by `timeout`.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

// =============================================================================
// Retry Decision & Strategy
// =============================================================================

/// Decision on whether to retry an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry(Duration),
    /// Do not retry, the error is not recoverable.
    DoNotRetry,
    /// Do not retry, the attempt ceiling was reached.
    Exhausted,
}

/// A strategy for determining when and how to retry failed operations.
pub trait RetryStrategy: Send + Sync {
    /// Returns the name of this strategy for logging/metrics.
    fn name(&self) -> &str;

    /// Determines whether to retry after attempt number `attempt` (1-based)
    /// failed with an error of class `class`.
    fn should_retry(&self, class: ErrorClass, attempt: u32) -> RetryDecision;

    /// Upper bound on a single attempt, if any.
    fn attempt_timeout(&self) -> Option<Duration> {
        None
    }
}

/// A strategy with exponentially increasing delays.
///
/// Delay formula: `min(initial_delay * multiplier^(attempt-1), max_delay)`
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    config: RetryConfig,
}

impl ExponentialBackoff {
    /// Creates a new exponential backoff strategy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay.as_millis() as f64;
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let multiplied = base * self.config.multiplier.powi(exponent);
        let capped = multiplied.min(self.config.max_delay.as_millis() as f64);

        Duration::from_millis(capped as u64)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential_backoff"
    }

    fn should_retry(&self, class: ErrorClass, attempt: u32) -> RetryDecision {
        gate(&self.config, class, attempt).unwrap_or_else(|| {
            RetryDecision::Retry(apply_jitter(self.calculate_delay(attempt), self.config.jitter))
        })
    }

    fn attempt_timeout(&self) -> Option<Duration> {
        self.config.attempt_timeout
    }
}

/// Shared checks: class must be retryable and the ceiling not reached.
fn gate(config: &RetryConfig, class: ErrorClass, attempt: u32) -> Option<RetryDecision> {
    if !class.is_retryable() {
        return Some(RetryDecision::DoNotRetry);
    }
    match config.max_attempts {
        Some(max) if attempt >= max => Some(RetryDecision::Exhausted),
        _ => None,
    }
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }
    let millis = duration.as_millis() as f64;
    let spread = millis * jitter_factor;
    let offset = (rand::random::<f64>() * 2.0 - 1.0) * spread;
    Duration::from_millis((millis + offset).max(0.0) as u64)
}

// =============================================================================
// Retry Error
// =============================================================================

/// An attempt that outlived [`RetryConfig::attempt_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Attempt {attempt} timed out after {timeout:?}")]
pub struct AttemptTimeout {
    /// The 1-based attempt number.
    pub attempt: u32,
    /// The configured bound.
    pub timeout: Duration,
}

impl Classified for AttemptTimeout {
    fn class(&self) -> ErrorClass {
        ErrorClass::Timeout
    }
}

/// Terminal outcome of a coordinated operation.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The error was not retryable and is surfaced unchanged.
    #[error("{error}")]
    NotRetryable {
        /// Attempts made.
        attempts: u32,
        /// The error.
        error: E,
    },

    /// Recoverable errors persisted past the attempt ceiling.
    #[error("Gave up after {attempts} attempts: {error}")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// The last error.
        error: E,
    },

    /// The coordinator was cancelled while waiting to retry.
    #[error("Cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts made.
        attempts: u32,
    },
}

impl<E> RetryError<E> {
    /// Returns the number of attempts that were made.
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::NotRetryable { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    /// Returns the underlying error, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::NotRetryable { error, .. } | RetryError::Exhausted { error, .. } => {
                Some(error)
            }
            RetryError::Cancelled { .. } => None,
        }
    }
}

impl<E: Classified> Classified for RetryError<E> {
    fn class(&self) -> ErrorClass {
        match self {
            RetryError::NotRetryable { error, .. } => error.class(),
            RetryError::Exhausted { .. } => ErrorClass::Fatal,
            RetryError::Cancelled { .. } => ErrorClass::InvalidState,
        }
    }
}

// =============================================================================
// Retry Metrics
// =============================================================================

/// Counters kept by a [`RetryCoordinator`].
#[derive(Debug, Default)]
pub struct RetryMetrics {
    first_try_successes: AtomicU64,
    retry_successes: AtomicU64,
    total_retries: AtomicU64,
    exhausted: AtomicU64,
    not_retryable: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
}

impl RetryMetrics {
    /// Creates new empty metrics.
    pub fn new() -> Self {
        Self::default()
    }

    fn record_success(&self, retries: u32) {
        if retries == 0 {
            self.first_try_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.retry_successes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns a point-in-time snapshot.
    pub fn snapshot(&self) -> RetryMetricsSnapshot {
        RetryMetricsSnapshot {
            first_try_successes: self.first_try_successes.load(Ordering::Relaxed),
            retry_successes: self.retry_successes.load(Ordering::Relaxed),
            total_retries: self.total_retries.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            not_retryable: self.not_retryable.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`RetryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryMetricsSnapshot {
    /// Operations that succeeded without retrying.
    pub first_try_successes: u64,
    /// Operations that succeeded after at least one retry.
    pub retry_successes: u64,
    /// Total retries scheduled.
    pub total_retries: u64,
    /// Operations that hit the attempt ceiling.
    pub exhausted: u64,
    /// Operations that failed with a non-retryable error.
    pub not_retryable: u64,
    /// Operations cancelled while backing off.
    pub cancelled: u64,
    /// Attempts abandoned at the attempt timeout.
    pub timed_out: u64,
}

// =============================================================================
// Retry Coordinator
// =============================================================================

/// Runs protocol operations under a retry strategy.
pub struct RetryCoordinator<S: RetryStrategy = ExponentialBackoff> {
    strategy: S,
    metrics: Arc<RetryMetrics>,
    cancel: CancellationToken,
}

impl RetryCoordinator<ExponentialBackoff> {
    /// Creates a coordinator using exponential backoff.
    pub fn exponential(config: RetryConfig) -> Self {
        Self::new(ExponentialBackoff::new(config))
    }
}

impl<S: RetryStrategy> RetryCoordinator<S> {
    /// Creates a coordinator around `strategy`.
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            metrics: Arc::new(RetryMetrics::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Aborts pending backoff waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the coordinator's metrics.
    pub fn metrics(&self) -> &Arc<RetryMetrics> {
        &self.metrics
    }

    /// Returns the strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// exhausts the attempt ceiling, or the coordinator is cancelled.
    ///
    /// The closure receives the 1-based attempt number. With an
    /// [`attempt_timeout`](RetryConfig::attempt_timeout) configured, an
    /// attempt still pending at the bound is dropped and fails with the
    /// error converted from [`AttemptTimeout`].
    pub async fn run<F, Fut, T, E>(&self, operation: &str, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classified + fmt::Display + From<AttemptTimeout>,
    {
        let mut attempt = 0u32;
        let attempt_timeout = self.strategy.attempt_timeout();

        loop {
            attempt += 1;

            let outcome = match attempt_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, op(attempt)).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.metrics.timed_out.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            operation,
                            attempt,
                            timeout_ms = timeout.as_millis() as u64,
                            "Attempt timed out"
                        );
                        Err(E::from(AttemptTimeout { attempt, timeout }))
                    }
                },
                None => op(attempt).await,
            };

            let error = match outcome {
                Ok(value) => {
                    self.metrics.record_success(attempt - 1);
                    if attempt > 1 {
                        tracing::info!(operation, attempts = attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            match self.strategy.should_retry(error.class(), attempt) {
                RetryDecision::Retry(delay) => {
                    self.metrics.total_retries.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        operation,
                        strategy = %self.strategy.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying operation"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
                            return Err(RetryError::Cancelled { attempts: attempt });
                        }
                    }
                }
                RetryDecision::Exhausted => {
                    self.metrics.exhausted.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(operation, attempts = attempt, error = %error, "Retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
                RetryDecision::DoNotRetry => {
                    self.metrics.not_retryable.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        operation,
                        attempt,
                        class = %error.class(),
                        error = %error,
                        "Operation failed with non-retryable error"
                    );
                    return Err(RetryError::NotRetryable {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

impl<S: RetryStrategy + fmt::Debug> fmt::Debug for RetryCoordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryCoordinator")
            .field("strategy", &self.strategy)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
