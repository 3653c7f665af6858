// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The publishing pipeline of one connection.
//!
//! ```text
//! transport callback ──try_send──► notification channel
//!                                        │
//!                              delivery task: match, heartbeat, batch
//!                                        │ bounded channel
//!                              encoder task: encode, split
//!                                        │
//!      metadata task ───────────────► EgressQueue ──► EgressSender ──► MessageClient
//! ```
//!
//! Pipelines share nothing with each other; a fault in one connection never
//! stalls another.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use uapub_buffer::{DrainReport, EgressQueue, EgressSender, EgressStats, SenderConfig};
use uapub_core::{ConnectionState, EngineConfiguration, HealthState, MessageClient, WriterId};
use uapub_opcua::heartbeat;
use uapub_opcua::{
    ConnectionStatsSnapshot, EndpointConnection, MatchedNotification, NotificationBatch,
    NotificationMatcher,
};

use crate::batcher::{Batch, MessageBatcher, Sample};
use crate::encoder::{EncoderSettings, EncoderStats, FieldMetadata, MessageEncoder};

/// Longest the delivery task sleeps without re-checking timers.
const MAX_IDLE: Duration = Duration::from_secs(1);

// =============================================================================
// Settings
// =============================================================================

/// Tunables of one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Notifications that flush a batch immediately.
    pub batch_size: usize,
    /// Time after which a non-empty batch is flushed.
    pub batch_trigger_interval: Duration,
    /// Metadata refresh interval; zero disables metadata.
    pub metadata_interval: Duration,
    /// Budget of each shutdown phase.
    pub shutdown_phase_timeout: Duration,
    /// Capacity of the egress queue.
    pub queue_capacity: usize,
    /// Capacity of the channel between delivery and encoder tasks.
    pub encoder_channel_capacity: usize,
    /// Encoding.
    pub encoder: EncoderSettings,
    /// Egress sender timing.
    pub sender: SenderConfig,
}

impl From<&EngineConfiguration> for PipelineSettings {
    fn from(config: &EngineConfiguration) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_trigger_interval: config.batch_trigger_interval,
            metadata_interval: config.metadata_message_interval,
            shutdown_phase_timeout: config.shutdown_phase_timeout,
            queue_capacity: config.max_egress_message_queue,
            encoder_channel_capacity: 64,
            encoder: EncoderSettings::from(config),
            sender: SenderConfig::from(config),
        }
    }
}

// =============================================================================
// Statistics & Reports
// =============================================================================

#[derive(Debug, Default)]
struct PipelineCounters {
    samples: AtomicU64,
    heartbeats: AtomicU64,
    batches: AtomicU64,
    enqueue_failures: AtomicU64,
}

/// Point-in-time statistics of a pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    /// Endpoint URL.
    pub endpoint: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Matched samples handed to the batcher.
    pub samples: u64,
    /// Heartbeat samples synthesized.
    pub heartbeats: u64,
    /// Batches handed to the encoder.
    pub batches: u64,
    /// Messages the egress queue refused.
    pub enqueue_failures: u64,
    /// Encoder statistics.
    pub encoder: EncoderStats,
    /// Egress statistics.
    pub egress: EgressStats,
    /// Connection statistics.
    pub connection: ConnectionStatsSnapshot,
}

/// Shutdown phases in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPhase {
    /// Stop accepting notifications.
    StopIntake,
    /// Flush partial batches through the encoder.
    FlushBatches,
    /// Remove items, then subscriptions.
    CloseSubscriptions,
    /// Tear down the session.
    StopConnection,
    /// Send what the egress queue still holds.
    DrainEgress,
}

impl ShutdownPhase {
    /// Phase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownPhase::StopIntake => "stop_intake",
            ShutdownPhase::FlushBatches => "flush_batches",
            ShutdownPhase::CloseSubscriptions => "close_subscriptions",
            ShutdownPhase::StopConnection => "stop_connection",
            ShutdownPhase::DrainEgress => "drain_egress",
        }
    }
}

/// Outcome of [`PublishingPipeline::shutdown`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Phases that hit their timeout and were forced.
    pub timed_out: Vec<ShutdownPhase>,
    /// Egress drain outcome.
    pub drain: DrainReport,
}

impl ShutdownReport {
    /// Returns `true` if every phase finished in time and nothing was abandoned.
    pub fn is_clean(&self) -> bool {
        self.timed_out.is_empty() && self.drain.abandoned == 0 && self.drain.failed == 0
    }

    fn record(&mut self, phase: ShutdownPhase, completed: bool) {
        if !completed {
            warn!(phase = phase.as_str(), "Shutdown phase timed out, forcing");
            self.timed_out.push(phase);
        }
    }
}

// =============================================================================
// PublishingPipeline
// =============================================================================

#[derive(Default)]
struct PipelineTasks {
    delivery: Option<JoinHandle<()>>,
    encoder: Option<JoinHandle<()>>,
    metadata: Option<JoinHandle<()>>,
    sender: Option<JoinHandle<()>>,
}

/// Delivery, encoding and egress for one connection.
pub struct PublishingPipeline<C: MessageClient> {
    connection: Arc<EndpointConnection>,
    queue: Arc<EgressQueue>,
    encoder: Arc<MessageEncoder>,
    sender: Arc<EgressSender<C>>,
    settings: PipelineSettings,
    counters: Arc<PipelineCounters>,
    intake: CancellationToken,
    background: CancellationToken,
    metadata_refresh: Arc<Notify>,
    tasks: Mutex<PipelineTasks>,
    shut_down: AtomicBool,
}

impl<C: MessageClient> PublishingPipeline<C> {
    /// Starts the pipeline tasks. Must be called inside a Tokio runtime.
    pub fn start(
        connection: Arc<EndpointConnection>,
        notifications: mpsc::Receiver<NotificationBatch>,
        client: Arc<C>,
        settings: PipelineSettings,
    ) -> Arc<Self> {
        let queue = Arc::new(EgressQueue::new(settings.queue_capacity));
        let encoder = Arc::new(MessageEncoder::new(settings.encoder.clone()));
        let sender = Arc::new(EgressSender::new(
            Arc::clone(&queue),
            client,
            settings.sender.clone(),
        ));
        let counters = Arc::new(PipelineCounters::default());
        let intake = CancellationToken::new();
        let background = CancellationToken::new();
        let metadata_refresh = Arc::new(Notify::new());

        let (batch_tx, batch_rx) = mpsc::channel(settings.encoder_channel_capacity.max(1));

        let mut tasks = PipelineTasks {
            delivery: Some(tokio::spawn(run_delivery(
                Arc::clone(connection.matcher()),
                notifications,
                batch_tx,
                MessageBatcher::new(settings.batch_size, settings.batch_trigger_interval),
                Arc::clone(&counters),
                intake.clone(),
            ))),
            encoder: Some(tokio::spawn(run_encoder(
                Arc::clone(&encoder),
                batch_rx,
                Arc::clone(&queue),
                Arc::clone(&counters),
            ))),
            ..Default::default()
        };

        if !settings.metadata_interval.is_zero() {
            tasks.metadata = Some(tokio::spawn(run_metadata(
                Arc::clone(&connection),
                Arc::clone(&encoder),
                Arc::clone(&queue),
                settings.metadata_interval,
                Arc::clone(&metadata_refresh),
                background.clone(),
            )));
        }

        {
            let sender = Arc::clone(&sender);
            let cancel = background.clone();
            tasks.sender = Some(tokio::spawn(async move { sender.run(cancel).await }));
        }

        info!(
            endpoint = %connection.endpoint(),
            batch_size = settings.batch_size,
            batch_trigger_ms = settings.batch_trigger_interval.as_millis() as u64,
            encoding = %settings.encoder.encoding,
            mode = %settings.encoder.mode,
            "Publishing pipeline started"
        );

        Arc::new(Self {
            connection,
            queue,
            encoder,
            sender,
            settings,
            counters,
            intake,
            background,
            metadata_refresh,
            tasks: Mutex::new(tasks),
            shut_down: AtomicBool::new(false),
        })
    }

    /// The connection this pipeline publishes for.
    pub fn connection(&self) -> &Arc<EndpointConnection> {
        &self.connection
    }

    /// The egress queue.
    pub fn queue(&self) -> &Arc<EgressQueue> {
        &self.queue
    }

    /// The encoder.
    pub fn encoder(&self) -> &Arc<MessageEncoder> {
        &self.encoder
    }

    /// Health of the connection and its items.
    pub fn health(&self) -> HealthState {
        self.connection.health()
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Requests an immediate metadata message for every writer.
    ///
    /// No-op when metadata is disabled.
    pub fn refresh_metadata(&self) {
        if !self.settings.metadata_interval.is_zero() {
            self.metadata_refresh.notify_one();
        }
    }

    /// Returns statistics.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            endpoint: self.connection.endpoint().to_string(),
            state: self.connection.state(),
            samples: self.counters.samples.load(Ordering::Relaxed),
            heartbeats: self.counters.heartbeats.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            enqueue_failures: self.counters.enqueue_failures.load(Ordering::Relaxed),
            encoder: self.encoder.stats(),
            egress: self.queue.stats(),
            connection: self.connection.stats(),
        }
    }

    /// Shuts the pipeline down in phases, each bounded by the phase timeout.
    ///
    /// A phase that overruns is forced and recorded in the report. Calling
    /// this twice returns an empty report the second time.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return report;
        }

        let budget = self.settings.shutdown_phase_timeout;
        let tasks = std::mem::take(&mut *self.tasks.lock());
        info!(endpoint = %self.connection.endpoint(), budget_ms = budget.as_millis() as u64, "Shutting down pipeline");

        self.intake.cancel();
        report.record(ShutdownPhase::StopIntake, join_within(tasks.delivery, budget).await);
        report.record(ShutdownPhase::FlushBatches, join_within(tasks.encoder, budget).await);

        let closed = tokio::time::timeout(budget, self.close_subscriptions()).await.is_ok();
        report.record(ShutdownPhase::CloseSubscriptions, closed);

        let stopped = tokio::time::timeout(budget, self.connection.close()).await.is_ok();
        report.record(ShutdownPhase::StopConnection, stopped);

        self.background.cancel();
        let metadata_stopped = join_within(tasks.metadata, budget).await;
        let sender_stopped = join_within(tasks.sender, budget).await;
        report.drain = self.sender.drain(budget).await;
        report.record(
            ShutdownPhase::DrainEgress,
            metadata_stopped && sender_stopped && report.drain.abandoned == 0,
        );

        info!(
            endpoint = %self.connection.endpoint(),
            sent = report.drain.sent,
            failed = report.drain.failed,
            abandoned = report.drain.abandoned,
            forced = report.timed_out.len(),
            "Pipeline stopped"
        );
        report
    }

    async fn close_subscriptions(&self) {
        for subscription in self.connection.registry().snapshot() {
            let ids = subscription.items().ids();
            if !ids.is_empty() {
                if let Err(e) = self.connection.remove_items(subscription.name(), &ids).await {
                    e.log("shutdown remove items");
                }
            }
            if let Err(e) = self.connection.remove_subscription(subscription.name()).await {
                e.log("shutdown remove subscription");
            }
        }
    }
}

impl<C: MessageClient> std::fmt::Debug for PublishingPipeline<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishingPipeline")
            .field("endpoint", &self.connection.endpoint())
            .field("queue_len", &self.queue.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

async fn join_within(handle: Option<JoinHandle<()>>, budget: Duration) -> bool {
    let Some(mut handle) = handle else { return true };
    match tokio::time::timeout(budget, &mut handle).await {
        Ok(_) => true,
        Err(_) => {
            handle.abort();
            false
        }
    }
}

// =============================================================================
// Tasks
// =============================================================================

async fn forward(batches: &mpsc::Sender<Batch>, batch: Batch) -> bool {
    if batches.send(batch).await.is_err() {
        warn!("Encoder task gone, dropping batch");
        return false;
    }
    true
}

fn next_wake(batcher: &MessageBatcher, matcher: &NotificationMatcher) -> Instant {
    let idle = Instant::now() + MAX_IDLE;
    [
        batcher.next_deadline(),
        heartbeat::next_deadline(&matcher.items()),
    ]
    .into_iter()
    .flatten()
    .min()
    .map_or(idle, |deadline| deadline.min(idle))
}

/// Matches notifications, injects heartbeats and batches per writer.
///
/// On intake stop the remaining partial batches are flushed to the encoder.
async fn run_delivery(
    matcher: Arc<NotificationMatcher>,
    mut notifications: mpsc::Receiver<NotificationBatch>,
    batches: mpsc::Sender<Batch>,
    mut batcher: MessageBatcher,
    counters: Arc<PipelineCounters>,
    intake: CancellationToken,
) {
    loop {
        let wake = next_wake(&batcher, &matcher);
        tokio::select! {
            biased;
            _ = intake.cancelled() => break,
            received = notifications.recv() => {
                let Some(received) = received else { break };
                let now = Instant::now();
                for matched in matcher.match_batch(received.notifications) {
                    counters.samples.fetch_add(1, Ordering::Relaxed);
                    let writer = WriterId::new(matched.subscription());
                    if let Some(batch) = batcher.push(writer, Sample::from_matched(matched), now) {
                        if !forward(&batches, batch).await {
                            return;
                        }
                    }
                }
            }
            _ = tokio::time::sleep_until(wake) => {
                let now = Instant::now();
                for (item, notification) in heartbeat::collect_due(&matcher.items(), now) {
                    counters.heartbeats.fetch_add(1, Ordering::Relaxed);
                    let writer = WriterId::new(item.subscription());
                    let sample = Sample::from_matched(MatchedNotification { item, notification });
                    if let Some(batch) = batcher.push(writer, sample, now) {
                        if !forward(&batches, batch).await {
                            return;
                        }
                    }
                }
                for batch in batcher.poll_expired(now) {
                    if !forward(&batches, batch).await {
                        return;
                    }
                }
            }
        }
    }

    let remaining = batcher.flush_all();
    debug!(batches = remaining.len(), "Flushing partial batches");
    for batch in remaining {
        if !forward(&batches, batch).await {
            return;
        }
    }
}

/// Encodes batches into the egress queue until the delivery task is gone.
async fn run_encoder(
    encoder: Arc<MessageEncoder>,
    mut batches: mpsc::Receiver<Batch>,
    queue: Arc<EgressQueue>,
    counters: Arc<PipelineCounters>,
) {
    while let Some(batch) = batches.recv().await {
        counters.batches.fetch_add(1, Ordering::Relaxed);
        for message in encoder.encode(&batch) {
            if let Err(e) = queue.enqueue(message) {
                counters.enqueue_failures.fetch_add(1, Ordering::Relaxed);
                warn!(writer = %batch.writer, error = %e, "Failed to enqueue message");
            }
        }
    }
}

/// Emits metadata for every writer at start, on every interval and on refresh.
async fn run_metadata(
    connection: Arc<EndpointConnection>,
    encoder: Arc<MessageEncoder>,
    queue: Arc<EgressQueue>,
    interval: Duration,
    refresh: Arc<Notify>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = refresh.notified() => {}
        }
        publish_metadata(&connection, &encoder, &queue);
    }
}

fn publish_metadata(connection: &EndpointConnection, encoder: &MessageEncoder, queue: &EgressQueue) {
    for subscription in connection.registry().snapshot() {
        let items = subscription.items().snapshot();
        if items.is_empty() {
            continue;
        }

        let fields: Vec<FieldMetadata> = items
            .iter()
            .map(|item| FieldMetadata {
                name: item.display_name().to_string(),
                data_set_field_id: item.id().to_string(),
                node_id: item.node_id().to_opc_string(),
                built_in_type: item.last_value().map(|last| last.value.type_id()).unwrap_or(0),
            })
            .collect();

        let writer = WriterId::new(subscription.name());
        match encoder.encode_metadata(&writer, &fields) {
            Ok(message) => {
                if let Err(e) = queue.enqueue(message) {
                    warn!(writer = %writer, error = %e, "Failed to enqueue metadata");
                }
            }
            Err(e) => warn!(writer = %writer, error = %e, "Failed to encode metadata"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
