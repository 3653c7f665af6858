// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! One session to one server endpoint.
//!
//! ```text
//! Disconnected ─► Connecting ─► Connected ─► (Subscribing ─► Active)*
//!                     │                              │
//!                     ▼                              ▼ keep-alive failed
//!                  Faulted ◄──────────────────── Reconnecting ─► Connected | Active
//! ```
//!
//! A supervisor task checks the session every keep-alive interval. When a
//! check fails, every subscription and item is marked stale and replayed
//! once the session is back: subscriptions first, then their items. An item
//! that cannot be recreated is degraded without affecting the others.
//!
//! Subscriptions and items requested while no session is up are registered
//! stale and bound by the same replay once the session is established.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uapub_core::{
    Classified, ConnectionId, ConnectionState, EngineConfiguration, ExponentialBackoff,
    HealthState, RetryConfig, RetryCoordinator, RetryDecision, RetryError, RetryStrategy,
    StatusCode, Value,
};

use crate::client::channel::SessionChannel;
use crate::client::monitored::{HandleAllocator, ItemOutcome};
use crate::client::registry::{Subscription, SubscriptionRegistry};
use crate::client::transport::{
    BrowseReference, NotificationBatch, NotificationSink, ReadResult, UaTransport,
};
use crate::error::{ConnectionError, OpcUaError, OpcUaResult};
use crate::matcher::NotificationMatcher;
use crate::types::{ConnectionConfig, MonitoredItemSpec, NodeId, SubscriptionSettings};

/// Attempt ceiling for subscribe and add-item when the retry policy is unbounded.
pub const DEFAULT_OPERATION_ATTEMPTS: u32 = 5;

// =============================================================================
// Options
// =============================================================================

/// Tunables of one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    /// Upper bound on every protocol call.
    pub operation_timeout: Duration,
    /// Keep-alive check interval.
    pub keep_alive_interval: Duration,
    /// Retry policy for connect, subscribe and add-item.
    pub retry: RetryConfig,
    /// Capacity of the notification channel.
    pub notification_channel_capacity: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&EngineConfiguration::default())
    }
}

impl From<&EngineConfiguration> for ConnectionOptions {
    fn from(config: &EngineConfiguration) -> Self {
        Self {
            operation_timeout: config.operation_timeout,
            keep_alive_interval: config.keep_alive_interval,
            retry: config.retry.clone(),
            notification_channel_capacity: config.notification_channel_capacity,
        }
    }
}

impl ConnectionOptions {
    /// Short timeouts and tiny backoff for tests.
    pub fn for_testing() -> Self {
        Self::from(&EngineConfiguration::for_testing())
    }

    fn bounded_retry(&self) -> RetryConfig {
        let mut retry = self.retry.clone();
        if retry.max_attempts.is_none() {
            retry.max_attempts = Some(DEFAULT_OPERATION_ATTEMPTS);
        }
        retry
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Default)]
struct ConnectionStats {
    connect_attempts: AtomicU64,
    connect_failures: AtomicU64,
    reconnects: AtomicU64,
    keep_alive_failures: AtomicU64,
    replay_failures: AtomicU64,
}

/// Point-in-time statistics of a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatsSnapshot {
    /// Session establishment attempts.
    pub connect_attempts: u64,
    /// Failed establishment attempts.
    pub connect_failures: u64,
    /// Sessions lost and re-established (or abandoned).
    pub reconnects: u64,
    /// Failed keep-alive checks.
    pub keep_alive_failures: u64,
    /// Notifications accepted from the transport callback.
    pub notifications_received: u64,
    /// Notifications dropped because the channel was full.
    pub notifications_dropped: u64,
    /// Notifications with a client handle no item owns.
    pub unknown_handles: u64,
    /// Subscriptions and items that failed to replay.
    pub replay_failures: u64,
    /// Subscriptions.
    pub subscriptions: usize,
    /// Monitored items.
    pub items: usize,
    /// Degraded monitored items.
    pub degraded_items: usize,
}

// =============================================================================
// ReplayReport
// =============================================================================

/// One subscription or item that could not be recreated.
#[derive(Debug, Clone)]
pub struct ReplayFailure {
    /// Subscription name.
    pub subscription: String,
    /// Item id; `None` if the subscription itself failed.
    pub item: Option<String>,
    /// Why.
    pub error: OpcUaError,
}

/// Outcome of replaying subscriptions and items after a reconnect.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    /// Subscriptions recreated.
    pub subscriptions_restored: usize,
    /// Items recreated.
    pub items_restored: usize,
    /// Everything that failed.
    pub failures: Vec<ReplayFailure>,
}

impl ReplayReport {
    /// Returns `true` if everything was recreated.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ids of items left degraded, as `subscription/item`.
    pub fn degraded_items(&self) -> Vec<String> {
        self.failures
            .iter()
            .filter_map(|f| f.item.as_ref().map(|item| format!("{}/{}", f.subscription, item)))
            .collect()
    }
}

// =============================================================================
// EndpointConnection
// =============================================================================

/// A session to one endpoint with its subscriptions.
pub struct EndpointConnection {
    id: ConnectionId,
    config: ConnectionConfig,
    options: ConnectionOptions,
    channel: SessionChannel,
    registry: SubscriptionRegistry,
    matcher: Arc<NotificationMatcher>,
    sink: NotificationSink,
    state: watch::Sender<ConnectionState>,
    stats: ConnectionStats,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    connector: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<OpcUaError>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for EndpointConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConnection")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("subscriptions", &self.registry.len())
            .finish()
    }
}

impl EndpointConnection {
    /// Creates a disconnected connection around `transport`.
    ///
    /// Returns the receiving end of the notification channel; the transport
    /// callback feeds it without blocking.
    pub fn new(
        config: ConnectionConfig,
        mut transport: Box<dyn UaTransport>,
        options: ConnectionOptions,
    ) -> (Arc<Self>, mpsc::Receiver<NotificationBatch>) {
        let (sink, rx) = NotificationSink::channel(options.notification_channel_capacity);
        transport.set_notification_sink(sink.clone());

        let id = config.id();
        let allocator = Arc::new(HandleAllocator::new());
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let connection = Arc::new(Self {
            channel: SessionChannel::new(transport, options.operation_timeout),
            registry: SubscriptionRegistry::new(id.clone(), allocator),
            matcher: Arc::new(NotificationMatcher::new()),
            sink,
            state,
            stats: ConnectionStats::default(),
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
            connector: Mutex::new(None),
            last_error: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            id,
            config,
            options,
        });
        (connection, rx)
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Connection settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.config.endpoint_url
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observes state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The error of the last failed connect attempt since the session was
    /// last established.
    pub fn last_error(&self) -> Option<OpcUaError> {
        self.last_error.lock().clone()
    }

    /// The notification matcher of this connection.
    pub fn matcher(&self) -> &Arc<NotificationMatcher> {
        &self.matcher
    }

    /// The subscriptions of this connection.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Returns statistics.
    pub fn stats(&self) -> ConnectionStatsSnapshot {
        let items = self.registry.all_items();
        ConnectionStatsSnapshot {
            connect_attempts: self.stats.connect_attempts.load(Ordering::Relaxed),
            connect_failures: self.stats.connect_failures.load(Ordering::Relaxed),
            reconnects: self.stats.reconnects.load(Ordering::Relaxed),
            keep_alive_failures: self.stats.keep_alive_failures.load(Ordering::Relaxed),
            notifications_received: self.sink.delivered(),
            notifications_dropped: self.sink.dropped(),
            unknown_handles: self.matcher.stats().unknown,
            replay_failures: self.stats.replay_failures.load(Ordering::Relaxed),
            subscriptions: self.registry.len(),
            degraded_items: items.iter().filter(|i| i.is_degraded()).count(),
            items: items.len(),
        }
    }

    /// Health of this connection and its items.
    pub fn health(&self) -> HealthState {
        if !self.state().is_connected() {
            return HealthState::Down;
        }
        let items = self.registry.all_items();
        if items.iter().any(|i| i.is_degraded()) {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Makes one attempt to establish the session.
    ///
    /// # Errors
    ///
    /// Recoverable errors leave the connection `Disconnected`; anything else
    /// moves it to `Faulted`.
    pub async fn connect(&self) -> OpcUaResult<()> {
        self.ensure_not_faulted()?;
        self.validate_config()?;
        self.set_state(ConnectionState::Connecting);

        match self.attempt_connect().await {
            Ok(()) => {
                self.go_live("connect").await;
                Ok(())
            }
            Err(e) => {
                self.fail_connect(&e);
                Err(e)
            }
        }
    }

    /// Establishes the session, retrying recoverable failures, then starts
    /// the keep-alive supervisor.
    pub async fn connect_with_retry(self: &Arc<Self>) -> OpcUaResult<()> {
        if self.state().is_connected() {
            return Ok(());
        }
        self.ensure_not_faulted()?;
        self.validate_config()?;
        self.set_state(ConnectionState::Connecting);

        let result = self
            .with_retry("connect", self.options.retry.clone(), |_| self.attempt_connect())
            .await;
        match result {
            Ok(()) => {
                self.go_live("connect").await;
                self.start_supervisor();
                tracing::info!(connection = %self.id, endpoint = %self.endpoint(), "Session established");
                Ok(())
            }
            Err(e) => {
                self.fail_connect(&e);
                Err(e)
            }
        }
    }

    /// Runs [`connect_with_retry`](Self::connect_with_retry) in the
    /// background until it succeeds, faults or the connection is closed.
    ///
    /// Watch [`subscribe_state`](Self::subscribe_state) for the outcome.
    pub fn spawn_connect(self: &Arc<Self>) {
        let mut slot = self.connector.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let connection = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            if let Err(e) = connection.connect_with_retry().await {
                tracing::debug!(connection = %connection.id, error = %e, "Background connect ended");
            }
        }));
    }

    /// Re-establishes a lost session and replays subscriptions and items.
    pub async fn reconnect(&self) -> OpcUaResult<ReplayReport> {
        self.ensure_not_faulted()?;
        self.set_state(ConnectionState::Reconnecting);
        self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        self.registry.mark_stale();

        if let Err(e) = self.channel.disconnect().await {
            tracing::debug!(connection = %self.id, error = %e, "Ignoring teardown error before reconnect");
        }

        if let Err(e) = self
            .with_retry("reconnect", self.options.retry.clone(), |_| self.attempt_connect())
            .await
        {
            self.fail_connect(&e);
            return Err(e);
        }

        Ok(self.go_live("reconnect").await)
    }

    /// Removes items, then subscriptions, then tears down the session.
    ///
    /// Teardown errors are logged and swallowed.
    pub async fn close(&self) {
        self.cancel.cancel();
        for task in [&self.connector, &self.supervisor] {
            let handle = task.lock().take();
            if let Some(mut handle) = handle {
                if tokio::time::timeout(self.options.operation_timeout, &mut handle)
                    .await
                    .is_err()
                {
                    handle.abort();
                }
            }
        }

        let _guard = self.lifecycle.lock().await;
        for subscription in self.registry.snapshot() {
            let ids = subscription.items().ids();
            if !ids.is_empty() {
                subscription
                    .items()
                    .remove(&self.channel, subscription.server_id(), &ids)
                    .await;
            }
            if let Err(e) = self.registry.remove(&self.channel, subscription.name()).await {
                tracing::warn!(
                    connection = %self.id,
                    subscription = subscription.name(),
                    error = %e,
                    "Failed to remove subscription during close"
                );
            }
        }
        self.matcher.rebuild(Vec::new());

        if let Err(e) = self.channel.disconnect().await {
            tracing::warn!(connection = %self.id, error = %e, "Failed to close session cleanly");
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::info!(connection = %self.id, "Connection closed");
    }

    // =========================================================================
    // Subscriptions and items
    // =========================================================================

    /// Creates a named subscription.
    ///
    /// Without a session the subscription is registered stale and created
    /// once the session is established.
    pub async fn create_subscription(
        &self,
        name: &str,
        settings: SubscriptionSettings,
    ) -> OpcUaResult<Arc<Subscription>> {
        self.ensure_not_faulted()?;
        let _guard = self.lifecycle.lock().await;
        if !self.state().is_connected() {
            return self.registry.register_pending(name, settings);
        }
        let _subscribing = self.begin_subscribing();

        self.with_retry("create_subscription", self.options.bounded_retry(), |_| {
            self.registry.create(&self.channel, name, settings.clone())
        })
        .await
    }

    /// Removes an empty subscription.
    pub async fn remove_subscription(&self, name: &str) -> OpcUaResult<()> {
        let _guard = self.lifecycle.lock().await;
        let result = self.registry.remove(&self.channel, name).await;
        self.matcher.rebuild(self.registry.all_items());
        self.settle();
        result
    }

    /// Adds items to a subscription.
    ///
    /// Items failing with a recoverable error are retried with backoff; every
    /// other failure is reported for its item only. Outcomes follow the order
    /// of `specs`. Without a session the items are registered stale and
    /// created once the session is established.
    pub async fn add_items(
        &self,
        subscription: &str,
        specs: Vec<MonitoredItemSpec>,
    ) -> OpcUaResult<Vec<ItemOutcome>> {
        self.ensure_not_faulted()?;
        let target = self.registry.find(subscription)?;
        let strategy = ExponentialBackoff::new(self.options.bounded_retry());

        let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; specs.len()];
        let mut pending: Vec<(usize, MonitoredItemSpec)> = specs.into_iter().enumerate().collect();
        let mut attempt = 0u32;

        while !pending.is_empty() {
            attempt += 1;
            let results = {
                let _guard = self.lifecycle.lock().await;
                let _subscribing = self.begin_subscribing();
                let batch: Vec<MonitoredItemSpec> = pending.iter().map(|(_, s)| s.clone()).collect();
                let results = if target.is_stale() && !self.state().is_connected() {
                    target.items().add_pending(batch)
                } else if target.is_stale() {
                    batch
                        .iter()
                        .map(|spec| ItemOutcome {
                            id: spec.id.clone(),
                            result: Err(OpcUaError::not_connected()),
                        })
                        .collect()
                } else {
                    target.items().add(&self.channel, target.server_id(), batch).await
                };
                self.matcher.rebuild(self.registry.all_items());
                results
            };

            let mut retry = Vec::new();
            let mut retry_class = None;
            for ((index, spec), outcome) in pending.into_iter().zip(results) {
                match &outcome.result {
                    Err(e) if e.is_retryable() => {
                        retry_class = Some(e.class());
                        retry.push((index, spec, outcome));
                    }
                    _ => outcomes[index] = Some(outcome),
                }
            }

            let Some(class) = retry_class else { break };
            let delay = match strategy.should_retry(class, attempt) {
                RetryDecision::Retry(delay) => delay,
                RetryDecision::DoNotRetry | RetryDecision::Exhausted => {
                    tracing::warn!(
                        connection = %self.id,
                        subscription,
                        attempts = attempt,
                        failed = retry.len(),
                        "Giving up on monitored items"
                    );
                    for (index, _, outcome) in retry {
                        outcomes[index] = Some(outcome);
                    }
                    break;
                }
            };

            tracing::debug!(
                connection = %self.id,
                subscription,
                attempt,
                items = retry.len(),
                delay_ms = delay.as_millis() as u64,
                "Retrying monitored items"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel.cancelled() => {
                    for (index, _, outcome) in retry {
                        outcomes[index] = Some(outcome);
                    }
                    break;
                }
            }
            pending = retry.into_iter().map(|(index, spec, _)| (index, spec)).collect();
        }

        Ok(outcomes.into_iter().flatten().collect())
    }

    /// Removes items from a subscription; unknown ids are ignored.
    pub async fn remove_items(&self, subscription: &str, ids: &[String]) -> OpcUaResult<usize> {
        let target = self.registry.find(subscription)?;
        let _guard = self.lifecycle.lock().await;
        let removed = target
            .items()
            .remove(&self.channel, target.server_id(), ids)
            .await;
        self.matcher.rebuild(self.registry.all_items());
        Ok(removed)
    }

    // =========================================================================
    // Pass-through primitives
    // =========================================================================

    /// Reads current values.
    pub async fn read(&self, node_ids: &[NodeId]) -> OpcUaResult<Vec<ReadResult>> {
        self.ensure_connected()?;
        self.channel.read_values(node_ids).await
    }

    /// Writes values; returns one status per write.
    pub async fn write(&self, writes: &[(NodeId, Value)]) -> OpcUaResult<Vec<StatusCode>> {
        self.ensure_connected()?;
        self.channel.write_values(writes).await
    }

    /// Lists the references of a node.
    pub async fn browse(&self, node_id: &NodeId) -> OpcUaResult<Vec<BrowseReference>> {
        self.ensure_connected()?;
        self.channel.browse(node_id).await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn attempt_connect(&self) -> OpcUaResult<()> {
        self.stats.connect_attempts.fetch_add(1, Ordering::Relaxed);
        self.channel.connect(&self.config).await.map_err(|e| {
            self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(connection = %self.id, error = %e, "Connect attempt failed");
            *self.last_error.lock() = Some(e.clone());
            e
        })
    }

    /// Replays whatever is stale onto the fresh session, then marks the
    /// session `Connected` or `Active`.
    async fn go_live(&self, operation: &str) -> ReplayReport {
        let _guard = self.lifecycle.lock().await;
        let report = self.replay().await;
        self.matcher.rebuild(self.registry.all_items());
        self.last_error.lock().take();
        self.set_state(if self.registry.is_empty() {
            ConnectionState::Connected
        } else {
            ConnectionState::Active
        });

        if report.is_complete() {
            if report.subscriptions_restored > 0 {
                tracing::info!(
                    connection = %self.id,
                    operation,
                    subscriptions = report.subscriptions_restored,
                    items = report.items_restored,
                    "Subscriptions replayed"
                );
            }
        } else {
            tracing::warn!(
                connection = %self.id,
                operation,
                subscriptions = report.subscriptions_restored,
                items = report.items_restored,
                failures = report.failures.len(),
                "Subscriptions replayed with degraded items"
            );
        }
        report
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &str,
        retry: RetryConfig,
        op: F,
    ) -> OpcUaResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = OpcUaResult<T>>,
    {
        RetryCoordinator::exponential(retry)
            .with_cancellation(self.cancel.child_token())
            .run(operation, op)
            .await
            .map_err(|e| match e {
                RetryError::NotRetryable { error, .. } => error,
                RetryError::Exhausted { attempts, error } => {
                    ConnectionError::retries_exhausted(self.endpoint(), operation, attempts, error)
                        .into()
                }
                RetryError::Cancelled { .. } => {
                    ConnectionError::closed(format!("{operation} cancelled")).into()
                }
            })
    }

    async fn replay(&self) -> ReplayReport {
        let mut report = ReplayReport::default();

        for subscription in self.registry.snapshot() {
            if !subscription.is_stale() {
                continue;
            }
            let handle = match self.channel.create_subscription(subscription.settings()).await {
                Ok(handle) => handle,
                Err(e) => {
                    subscription.items().degrade_all();
                    self.stats.replay_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        connection = %self.id,
                        subscription = subscription.name(),
                        error = %e,
                        "Failed to recreate subscription"
                    );
                    report.failures.push(ReplayFailure {
                        subscription: subscription.name().to_string(),
                        item: None,
                        error: e,
                    });
                    continue;
                }
            };
            subscription.bind(handle);
            report.subscriptions_restored += 1;

            for replayed in subscription.items().replay(&self.channel, handle.server_id).await {
                match replayed.error {
                    None => report.items_restored += 1,
                    Some(error) => {
                        self.stats.replay_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            connection = %self.id,
                            subscription = subscription.name(),
                            item = %replayed.id,
                            error = %error,
                            "Monitored item degraded after reconnect"
                        );
                        report.failures.push(ReplayFailure {
                            subscription: subscription.name().to_string(),
                            item: Some(replayed.id),
                            error,
                        });
                    }
                }
            }
        }
        report
    }

    fn start_supervisor(self: &Arc<Self>) {
        let mut slot = self.supervisor.lock();
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let connection = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let interval = self.options.keep_alive_interval;
        *slot = Some(tokio::spawn(supervise(connection, cancel, interval)));
    }

    fn validate_config(&self) -> OpcUaResult<()> {
        self.config.validate().map_err(|e| {
            self.fail_connect(&e);
            e
        })
    }

    fn fail_connect(&self, error: &OpcUaError) {
        *self.last_error.lock() = Some(error.clone());
        if self.cancel.is_cancelled() {
            return;
        }
        if error.is_retryable() {
            self.set_state(ConnectionState::Disconnected);
        } else {
            self.set_state(ConnectionState::Faulted);
            error.log(&format!("connection {}", self.id));
        }
    }

    fn ensure_not_faulted(&self) -> OpcUaResult<()> {
        if self.state().is_terminal() {
            return Err(ConnectionError::faulted(self.endpoint(), "configuration rejected").into());
        }
        Ok(())
    }

    fn ensure_connected(&self) -> OpcUaResult<()> {
        self.ensure_not_faulted()?;
        if !self.state().is_connected() {
            return Err(OpcUaError::not_connected());
        }
        Ok(())
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(connection = %self.id, from = %previous, to = %next, "Connection state changed");
        }
    }

    /// Moves an established session to `Subscribing` until the returned
    /// guard is dropped.
    fn begin_subscribing(&self) -> Subscribing<'_> {
        self.state.send_if_modified(|state| {
            if matches!(state, ConnectionState::Connected | ConnectionState::Active) {
                *state = ConnectionState::Subscribing;
                true
            } else {
                false
            }
        });
        Subscribing(self)
    }

    /// Moves an established session to `Active` or `Connected` depending on
    /// whether it carries subscriptions.
    fn settle(&self) {
        let next = if self.registry.is_empty() {
            ConnectionState::Connected
        } else {
            ConnectionState::Active
        };
        self.state.send_if_modified(|state| {
            let live = state.is_connected();
            if live && *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
    }
}

/// Settles the connection state when a subscribe or add-item pass ends,
/// including when its future is dropped.
struct Subscribing<'a>(&'a EndpointConnection);

impl Drop for Subscribing<'_> {
    fn drop(&mut self) {
        self.0.settle();
    }
}

impl Drop for EndpointConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Keep-alive loop. Ends when the connection is dropped or cancelled.
async fn supervise(connection: Weak<EndpointConnection>, cancel: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(connection) = connection.upgrade() else { break };
        if !connection.state().is_connected() {
            continue;
        }

        let Err(error) = connection.channel.keep_alive().await else { continue };
        connection.stats.keep_alive_failures.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(
            connection = %connection.id,
            error = %error,
            "Keep-alive failed, reconnecting"
        );

        if let Err(e) = connection.reconnect().await {
            if connection.state().is_terminal() {
                tracing::error!(connection = %connection.id, error = %e, "Reconnect failed permanently");
                break;
            }
            tracing::warn!(connection = %connection.id, error = %e, "Reconnect failed, will retry");
        }
    }
    tracing::debug!("Connection supervisor stopped");
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{MockControl, MockTransport};
    use crate::error::SecurityError;
    use uapub_core::ErrorClass;

    const ENDPOINT: &str = "opc.tcp://plc:4840";

    fn connection() -> (Arc<EndpointConnection>, mpsc::Receiver<NotificationBatch>, MockControl) {
        let transport = MockTransport::new(ENDPOINT);
        let control = transport.control();
        let (connection, rx) = EndpointConnection::new(
            ConnectionConfig::new(ENDPOINT),
            Box::new(transport),
            ConnectionOptions::for_testing(),
        );
        (connection, rx, control)
    }

    fn spec(name: &str) -> MonitoredItemSpec {
        MonitoredItemSpec::new(format!("ns=2;s={name}").parse().unwrap())
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_retries_recoverable_errors() {
        let (connection, _rx, control) = connection();
        control.fail_next_connects(2, OpcUaError::connection_refused(ENDPOINT));

        connection.connect_with_retry().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(control.connect_calls(), 3);
        assert_eq!(connection.stats().connect_failures, 2);
        connection.close().await;
    }

    #[tokio::test]
    async fn test_security_failure_faults_without_retry() {
        let (connection, _rx, control) = connection();
        control.set_connect_error(Some(
            SecurityError::authentication_failed("bad password").into(),
        ));

        let err = connection.connect_with_retry().await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert_eq!(connection.state(), ConnectionState::Faulted);
        assert_eq!(control.connect_calls(), 1);

        let again = connection.connect().await.unwrap_err();
        assert_eq!(again.class(), ErrorClass::InvalidState);
        assert_eq!(control.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_single_connect_attempt_stays_disconnected() {
        let (connection, _rx, control) = connection();
        control.fail_next_connects(1, OpcUaError::connection_refused(ENDPOINT));

        assert!(connection.connect().await.is_err());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        connection.connect().await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fault() {
        let transport = MockTransport::new(ENDPOINT);
        let control = transport.control();
        let mut options = ConnectionOptions::for_testing();
        options.retry = options.retry.with_max_attempts(3);
        let (connection, _rx) =
            EndpointConnection::new(ConnectionConfig::new(ENDPOINT), Box::new(transport), options);
        control.set_connect_error(Some(OpcUaError::connection_refused(ENDPOINT)));

        let err = connection.connect_with_retry().await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert_eq!(control.connect_calls(), 3);
        assert_eq!(connection.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn test_invalid_endpoint_faults() {
        let transport = MockTransport::new("http://plc");
        let (connection, _rx) = EndpointConnection::new(
            ConnectionConfig::new("http://plc"),
            Box::new(transport),
            ConnectionOptions::for_testing(),
        );
        assert!(connection.connect_with_retry().await.is_err());
        assert_eq!(connection.state(), ConnectionState::Faulted);
    }

    #[tokio::test]
    async fn test_subscription_activates_connection() {
        let (connection, _rx, _control) = connection();
        connection.connect_with_retry().await.unwrap();

        let mut states = connection.subscribe_state();
        connection
            .create_subscription("fast", SubscriptionSettings::default())
            .await
            .unwrap();
        assert_eq!(*states.borrow_and_update(), ConnectionState::Active);

        let err = connection
            .create_subscription("fast", SubscriptionSettings::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);

        connection.remove_subscription("fast").await.unwrap();
        assert_eq!(connection.state(), ConnectionState::Connected);
        connection.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_items_retries_transient_failures() {
        let (connection, _rx, control) = connection();
        connection.connect_with_retry().await.unwrap();
        connection
            .create_subscription("fast", SubscriptionSettings::default())
            .await
            .unwrap();

        control.fail_next_item_calls(2, OpcUaError::not_connected());
        control.reject_node("ns=2;s=Bad".parse().unwrap(), StatusCode::BAD_NODE_ID_UNKNOWN);

        let outcomes = connection
            .add_items("fast", vec![spec("A"), spec("Bad"), spec("A")])
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1].result.as_ref().unwrap_err().class(), ErrorClass::Fatal);
        assert_eq!(outcomes[2].result.as_ref().unwrap_err().class(), ErrorClass::Conflict);
        assert_eq!(control.create_item_calls(), 3);
        assert_eq!(connection.matcher().stats().indexed, 1);
        connection.close().await;
    }

    #[tokio::test]
    async fn test_add_items_unknown_subscription() {
        let (connection, _rx, _control) = connection();
        connection.connect_with_retry().await.unwrap();
        let err = connection.add_items("nope", vec![spec("A")]).await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
        connection.close().await;
    }

    #[tokio::test]
    async fn test_notifications_flow_to_channel() {
        let (connection, mut rx, control) = connection();
        connection.connect_with_retry().await.unwrap();
        connection
            .create_subscription("fast", SubscriptionSettings::default())
            .await
            .unwrap();
        connection.add_items("fast", vec![spec("A")]).await.unwrap();

        assert_eq!(control.publish(&"ns=2;s=A".parse().unwrap(), 7i32), 1);
        let batch = rx.recv().await.unwrap();
        let matched = connection.matcher().match_batch(batch.notifications);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].item.id(), "ns=2;s=A");
        assert_eq!(connection.stats().notifications_received, 1);
        connection.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replays_and_isolates_degraded_item() {
        let (connection, mut rx, control) = connection();
        connection.connect_with_retry().await.unwrap();
        connection
            .create_subscription("fast", SubscriptionSettings::default())
            .await
            .unwrap();
        connection
            .add_items("fast", vec![spec("A"), spec("B"), spec("C")])
            .await
            .unwrap();
        let handles: Vec<u32> = connection
            .registry()
            .all_items()
            .iter()
            .map(|i| i.client_handle())
            .collect();

        control.drop_connection();
        control.reject_node("ns=2;s=B".parse().unwrap(), StatusCode::BAD_NODE_ID_UNKNOWN);

        let observed = Arc::clone(&connection);
        eventually(move || {
            observed.stats().reconnects >= 1 && observed.state() == ConnectionState::Active
        })
        .await;

        let subscription = connection.registry().find("fast").unwrap();
        assert!(!subscription.is_stale());
        assert!(!subscription.items().get("ns=2;s=A").unwrap().is_degraded());
        assert!(subscription.items().get("ns=2;s=B").unwrap().is_degraded());
        assert!(!subscription.items().get("ns=2;s=C").unwrap().is_degraded());
        assert_eq!(connection.health(), HealthState::Degraded);
        assert_eq!(connection.stats().replay_failures, 1);

        let replayed: Vec<u32> = connection
            .registry()
            .all_items()
            .iter()
            .map(|i| i.client_handle())
            .collect();
        assert_eq!(replayed, handles);

        assert_eq!(control.publish(&"ns=2;s=C".parse().unwrap(), 1i32), 1);
        let batch = rx.recv().await.unwrap();
        let matched = connection.matcher().match_batch(batch.notifications);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].item.id(), "ns=2;s=C");
        connection.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_rearms_skip_first() {
        let (connection, mut rx, control) = connection();
        connection.connect_with_retry().await.unwrap();
        connection
            .create_subscription("fast", SubscriptionSettings::default())
            .await
            .unwrap();
        connection
            .add_items("fast", vec![spec("A").with_skip_first(true)])
            .await
            .unwrap();
        let node: NodeId = "ns=2;s=A".parse().unwrap();

        control.publish(&node, 1i32);
        let first = rx.recv().await.unwrap();
        assert!(connection.matcher().match_batch(first.notifications).is_empty());

        control.drop_connection();
        let observed = Arc::clone(&connection);
        eventually(move || observed.stats().reconnects >= 1 && observed.state() == ConnectionState::Active)
            .await;

        control.publish(&node, 2i32);
        let after = rx.recv().await.unwrap();
        assert!(connection.matcher().match_batch(after.notifications).is_empty());
        control.publish(&node, 3i32);
        let next = rx.recv().await.unwrap();
        assert_eq!(connection.matcher().match_batch(next.notifications).len(), 1);
        connection.close().await;
    }

    #[tokio::test]
    async fn test_close_removes_items_then_subscriptions() {
        let (connection, _rx, control) = connection();
        connection.connect_with_retry().await.unwrap();
        connection
            .create_subscription("fast", SubscriptionSettings::default())
            .await
            .unwrap();
        connection.add_items("fast", vec![spec("A"), spec("B")]).await.unwrap();

        connection.close().await;
        assert_eq!(control.delete_item_calls(), 1);
        assert_eq!(control.delete_subscription_calls(), 1);
        assert!(connection.registry().is_empty());
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(!control.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_connect_binds_pending_registrations() {
        let (connection, mut rx, control) = connection();
        control.set_connect_error(Some(OpcUaError::connection_refused(ENDPOINT)));
        connection.spawn_connect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert!(connection.last_error().is_some());

        let subscription = connection
            .create_subscription("fast", SubscriptionSettings::default())
            .await
            .unwrap();
        assert!(subscription.is_stale());
        let outcomes = connection
            .add_items("fast", vec![spec("A"), spec("A")])
            .await
            .unwrap();
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1].result.as_ref().unwrap_err().class(), ErrorClass::Conflict);
        assert_eq!(control.subscription_count(), 0);
        assert_eq!(connection.health(), HealthState::Down);

        control.set_connect_error(None);
        let observed = Arc::clone(&connection);
        eventually(move || observed.state() == ConnectionState::Active).await;
        assert!(!subscription.is_stale());
        assert_eq!(control.item_count(), 1);
        assert!(connection.last_error().is_none());
        assert_eq!(connection.health(), HealthState::Healthy);

        assert_eq!(control.publish(&"ns=2;s=A".parse().unwrap(), 1i32), 1);
        let batch = rx.recv().await.unwrap();
        assert_eq!(connection.matcher().match_batch(batch.notifications).len(), 1);
        connection.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_background_connect() {
        let (connection, _rx, control) = connection();
        control.set_connect_error(Some(OpcUaError::connection_refused(ENDPOINT)));
        connection.spawn_connect();
        tokio::time::sleep(Duration::from_millis(50)).await;

        connection.close().await;
        assert_eq!(connection.state(), ConnectionState::Disconnected);
        let calls = control.connect_calls();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(control.connect_calls(), calls);
    }

    #[tokio::test]
    async fn test_pass_through_requires_session() {
        let (connection, _rx, control) = connection();
        let node: NodeId = "ns=2;s=A".parse().unwrap();
        assert!(connection.read(&[node.clone()]).await.is_err());

        connection.connect().await.unwrap();
        control.set_value(node.clone(), Value::Int32(5));
        let results = connection.read(&[node]).await.unwrap();
        assert_eq!(results[0].value, Value::Int32(5));
    }
}
