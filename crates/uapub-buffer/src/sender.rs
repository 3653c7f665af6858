// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Egress sender: the consumer side of an [`EgressQueue`].
//!
//! ```text
//! ┌─────────────┐  dequeue(poll)  ┌──────────────┐  send(timeout)  ┌───────────────┐
//! │ EgressQueue │────────────────▶│ EgressSender │────────────────▶│ MessageClient │
//! └──────▲──────┘                 └──────┬───────┘                 └───────────────┘
//!        │      requeue_failed (once)    │
//!        └───────────────────────────────┘
//! ```
//!
//! Every transport message is disposed exactly once, whether the send
//! succeeded, failed or timed out.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use uapub_core::client::{build_message, MessageClient, OutgoingMessage};
use uapub_core::config::EngineConfiguration;
use uapub_core::error::EgressError;

use crate::egress::{EgressQueue, QueuedMessage, RequeueOutcome};

// =============================================================================
// SenderConfig
// =============================================================================

/// Timing of an [`EgressSender`].
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Upper bound on a single send.
    pub send_timeout: Duration,
    /// How long one dequeue waits before re-checking for cancellation.
    pub poll_interval: Duration,
    /// Pause after a failed send.
    pub retry_delay: Duration,
    /// Jitter factor (0.0 - 1.0) applied to `retry_delay`.
    pub jitter: f64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            retry_delay: Duration::from_millis(500),
            jitter: 0.1,
        }
    }
}

impl SenderConfig {
    /// Short, deterministic timings for tests.
    pub fn for_testing() -> Self {
        Self {
            send_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
            retry_delay: Duration::from_millis(5),
            jitter: 0.0,
        }
    }

    /// Delay before the next send after a failure.
    fn backoff(&self) -> Duration {
        let base = self.retry_delay.as_millis() as f64;
        let jitter_range = base * self.jitter.clamp(0.0, 1.0);
        let jitter = if jitter_range > 0.0 {
            let random: f64 = rand::random();
            (random * 2.0 - 1.0) * jitter_range
        } else {
            0.0
        };
        Duration::from_millis((base + jitter).max(0.0) as u64)
    }
}

impl From<&EngineConfiguration> for SenderConfig {
    fn from(config: &EngineConfiguration) -> Self {
        Self {
            send_timeout: config.send_timeout,
            ..Default::default()
        }
    }
}

// =============================================================================
// DrainReport
// =============================================================================

/// Outcome of [`EgressSender::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages sent during the drain.
    pub sent: usize,
    /// Messages that failed twice and were dropped.
    pub failed: usize,
    /// Messages still queued when the deadline expired.
    pub abandoned: usize,
}

// =============================================================================
// EgressSender
// =============================================================================

/// Sends queued messages through a [`MessageClient`].
pub struct EgressSender<C: MessageClient> {
    queue: Arc<EgressQueue>,
    client: Arc<C>,
    config: SenderConfig,
}

impl<C: MessageClient> EgressSender<C> {
    /// Creates a sender.
    pub fn new(queue: Arc<EgressQueue>, client: Arc<C>, config: SenderConfig) -> Self {
        Self {
            queue,
            client,
            config,
        }
    }

    /// The queue this sender consumes.
    pub fn queue(&self) -> &Arc<EgressQueue> {
        &self.queue
    }

    /// Sends one message with the configured timeout.
    ///
    /// # Errors
    ///
    /// `ClientUnavailable` if the client refuses work, `SendTimeout` when the
    /// send outlives `send_timeout`, or the client's own error.
    pub async fn send_one(&self, queued: &QueuedMessage) -> Result<(), EgressError> {
        self.send_within(queued, self.config.send_timeout).await
    }

    async fn send_within(
        &self,
        queued: &QueuedMessage,
        timeout: Duration,
    ) -> Result<(), EgressError> {
        if !self.client.is_available() {
            return Err(EgressError::client_unavailable(self.client.name()));
        }

        let mut outgoing = build_message(self.client.as_ref(), &queued.message);
        let result = match tokio::time::timeout(timeout, self.client.send(&mut outgoing)).await {
            Ok(result) => result,
            Err(_) => Err(EgressError::send_timeout(timeout)),
        };
        outgoing.dispose();

        let stats = self.queue.stats_inner();
        match &result {
            Ok(()) => stats.record_sent(queued.message.size()),
            Err(_) => stats.record_send_failure(),
        }
        result
    }

    /// Sends one message; on failure hands it back to the queue once.
    ///
    /// Returns `true` if the message was sent.
    async fn deliver(&self, queued: QueuedMessage) -> bool {
        match self.send_one(&queued).await {
            Ok(()) => {
                debug!(
                    message_id = %queued.message.id,
                    writer = %queued.message.writer,
                    bytes = queued.message.size(),
                    notifications = queued.message.notification_count,
                    "Message sent"
                );
                true
            }
            Err(e) => {
                warn!(
                    client = %self.client.name(),
                    message_id = %queued.message.id,
                    retry = queued.is_retry(),
                    error = %e,
                    "Message send failed"
                );
                self.queue.requeue_failed(queued);
                false
            }
        }
    }

    /// Consumes the queue until `cancel` fires or the queue is closed and
    /// empty.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            client = %self.client.name(),
            capacity = self.queue.capacity(),
            send_timeout_ms = self.config.send_timeout.as_millis() as u64,
            "Egress sender started"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.queue.dequeue(self.config.poll_interval) => next,
            };

            let queued = match next {
                Some(queued) => queued,
                None if self.queue.is_closed() && self.queue.is_empty() => break,
                None => continue,
            };

            if !self.deliver(queued).await {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.config.backoff()) => {}
                }
            }
        }

        info!(client = %self.client.name(), remaining = self.queue.len(), "Egress sender stopped");
    }

    /// Closes the queue and sends what it still holds, within `timeout`.
    ///
    /// Failed messages get their one requeue. Whatever remains at the
    /// deadline is discarded and reported as abandoned.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        self.queue.close();
        let deadline = Instant::now() + timeout;
        let mut report = DrainReport::default();

        while let Some(queued) = self.queue.try_dequeue() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                report.abandoned += 1;
                break;
            }

            let timeout = remaining.min(self.config.send_timeout);
            match self.send_within(&queued, timeout).await {
                Ok(()) => report.sent += 1,
                Err(_) => {
                    if self.queue.requeue_failed(queued) != RequeueOutcome::Requeued {
                        report.failed += 1;
                    }
                }
            }
        }

        report.abandoned += self.queue.take_all().len();
        if report.abandoned > 0 || report.failed > 0 {
            warn!(
                sent = report.sent,
                failed = report.failed,
                abandoned = report.abandoned,
                "Egress drain incomplete"
            );
        } else {
            info!(sent = report.sent, "Egress drained");
        }
        report
    }
}

impl<C: MessageClient> std::fmt::Debug for EgressSender<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EgressSender")
            .field("client", &self.client.name())
            .field("queue_len", &self.queue.len())
            .field("config", &self.config)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
