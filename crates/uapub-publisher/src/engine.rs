// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! The control surface of the gateway.
//!
//! [`PublisherEngine`] turns publish and unpublish requests into connections,
//! subscriptions and monitored items, one [`PublishingPipeline`] per
//! connection. Control operations are serialized; data flow is not.
//!
//! # Startup
//!
//! Opening an endpoint waits a bounded time for the session. An endpoint
//! that is still unreachable afterwards is kept: its subscriptions and items
//! are registered and created once the background connect succeeds, and it
//! reports [`HealthState::Down`] meanwhile. Only a faulted connection, such
//! as one with rejected credentials, fails the request.
//!
//! # Grouping
//!
//! Nodes of a request are grouped by writer (see
//! [`PublishedNodesEntry::writer_for`]). Each writer owns one subscription,
//! named after the writer id, so requests with the same endpoint and
//! publishing interval share a subscription.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use uapub_core::error::{Classified, ErrorClass};
use uapub_core::{
    ConnectionId, ConnectionState, EngineConfiguration, HealthState, MessageClient,
    OpcNodeModel, PublishedNodesEntry, ReportOutcome, RuntimeStateReporter, WriterId,
};
use uapub_opcua::client::DEFAULT_OPERATION_ATTEMPTS;
use uapub_opcua::{
    ConnectionConfig, ConnectionError, ConnectionOptions, EndpointConnection, MonitoredItemSpec,
    OpcUaError, SubscriptionSettings, TransportFactory,
};

use crate::error::{PublisherError, PublisherResult};
use crate::pipeline::{PipelineSettings, PipelineStats, PublishingPipeline, ShutdownReport};

// =============================================================================
// Reports
// =============================================================================

/// An item that could not be added.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    /// Item id.
    pub item_id: String,
    /// Why it failed.
    pub error: OpcUaError,
}

impl ItemFailure {
    fn new(item_id: impl Into<String>, error: OpcUaError) -> Self {
        Self {
            item_id: item_id.into(),
            error,
        }
    }

    /// Error class of the failure.
    pub fn class(&self) -> ErrorClass {
        self.error.class()
    }
}

/// Outcome of [`PublisherEngine::add_monitored_items`].
#[derive(Debug, Clone, Default)]
pub struct AddReport {
    /// Endpoint URL.
    pub endpoint: String,
    /// Ids of the items now monitored.
    pub added: Vec<String>,
    /// Items that were not added.
    pub failed: Vec<ItemFailure>,
    /// Subscriptions created by this request.
    pub subscriptions_created: Vec<String>,
    /// The endpoint has no session yet; added items are created on the
    /// server once it connects.
    pub deferred: bool,
}

impl AddReport {
    /// Returns `true` if every item was added.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Outcome of [`PublisherEngine::remove_monitored_items`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoveReport {
    /// Endpoint URL.
    pub endpoint: String,
    /// Number of items removed.
    pub removed: usize,
    /// Requested ids that were not monitored.
    pub not_found: Vec<String>,
    /// Subscriptions removed because they became empty.
    pub subscriptions_removed: Vec<String>,
    /// The connection was closed because it had no subscriptions left.
    pub connection_closed: bool,
}

/// Health of one connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionHealth {
    /// Endpoint URL.
    pub endpoint: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Health of the connection and its items.
    pub health: HealthState,
    /// Number of subscriptions.
    pub subscriptions: usize,
    /// Number of monitored items.
    pub items: usize,
    /// Items that failed to replay after a reconnect.
    pub degraded_items: usize,
}

/// Health of the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    /// Aggregated state.
    pub state: HealthState,
    /// Per-connection detail, ordered by endpoint.
    pub connections: Vec<ConnectionHealth>,
}

/// Engine-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Number of connections.
    pub connections: usize,
    /// Number of subscriptions across connections.
    pub subscriptions: usize,
    /// Number of monitored items across connections.
    pub monitored_items: usize,
    /// Aggregated health.
    pub health: HealthState,
    /// Per-pipeline statistics, ordered by endpoint.
    pub pipelines: Vec<PipelineStats>,
}

/// Outcome of [`PublisherEngine::shutdown`].
#[derive(Debug, Clone, Default)]
pub struct EngineShutdownReport {
    /// Per-endpoint pipeline reports, ordered by endpoint.
    pub pipelines: Vec<(String, ShutdownReport)>,
}

impl EngineShutdownReport {
    /// Returns `true` if every pipeline shut down cleanly.
    pub fn is_clean(&self) -> bool {
        self.pipelines.iter().all(|(_, report)| report.is_clean())
    }
}

// =============================================================================
// Endpoint State
// =============================================================================

#[derive(Debug, Clone)]
struct WriterRecord {
    header: PublishedNodesEntry,
    nodes: BTreeMap<String, OpcNodeModel>,
}

struct EndpointState<C: MessageClient> {
    pipeline: Arc<PublishingPipeline<C>>,
    writers: Mutex<BTreeMap<WriterId, WriterRecord>>,
}

impl<C: MessageClient> EndpointState<C> {
    fn connection(&self) -> &Arc<EndpointConnection> {
        self.pipeline.connection()
    }

    fn record(&self, writer: &WriterId, header: &PublishedNodesEntry, item_id: String, node: OpcNodeModel) {
        self.writers
            .lock()
            .entry(writer.clone())
            .or_insert_with(|| WriterRecord {
                header: header.header(),
                nodes: BTreeMap::new(),
            })
            .nodes
            .insert(item_id, node);
    }

    fn forget(&self, writer: &WriterId, item_ids: &[String]) {
        let mut writers = self.writers.lock();
        if let Some(record) = writers.get_mut(writer) {
            for id in item_ids {
                record.nodes.remove(id);
            }
        }
    }

    fn health(&self) -> ConnectionHealth {
        let connection = self.connection();
        let items = connection.registry().all_items();
        ConnectionHealth {
            endpoint: connection.endpoint().to_string(),
            state: connection.state(),
            health: connection.health(),
            subscriptions: connection.registry().len(),
            items: items.len(),
            degraded_items: items.iter().filter(|item| item.is_degraded()).count(),
        }
    }
}

/// Combines per-connection health: all healthy is healthy, all down is down.
fn aggregate_health(states: impl IntoIterator<Item = HealthState>) -> HealthState {
    let mut total = 0usize;
    let mut healthy = 0usize;
    let mut down = 0usize;
    for state in states {
        total += 1;
        match state {
            HealthState::Healthy => healthy += 1,
            HealthState::Down => down += 1,
            HealthState::Degraded => {}
        }
    }

    if total == healthy {
        HealthState::Healthy
    } else if total == down {
        HealthState::Down
    } else {
        HealthState::Degraded
    }
}

// =============================================================================
// PublisherEngine
// =============================================================================

/// Owns every connection and pipeline of the gateway.
pub struct PublisherEngine<C: MessageClient> {
    config: EngineConfiguration,
    transports: Arc<dyn TransportFactory>,
    client: Arc<C>,
    endpoints: DashMap<ConnectionId, Arc<EndpointState<C>>>,
    control: tokio::sync::Mutex<()>,
    reporter: RuntimeStateReporter<C>,
    shutting_down: AtomicBool,
}

impl<C: MessageClient> PublisherEngine<C> {
    /// Creates an engine. No connection is opened until items are added.
    pub fn new(config: EngineConfiguration, transports: Arc<dyn TransportFactory>, client: Arc<C>) -> Self {
        let reporter =
            RuntimeStateReporter::new(config.enable_runtime_state_reporting, Some(Arc::clone(&client)));
        Self {
            config,
            transports,
            client,
            endpoints: DashMap::new(),
            control: tokio::sync::Mutex::new(()),
            reporter,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// The resolved configuration.
    pub fn config(&self) -> &EngineConfiguration {
        &self.config
    }

    /// Announces the restart; a no-op when runtime state reporting is off.
    pub async fn start(&self) -> ReportOutcome {
        let outcome = self.reporter.send_restart_announcement().await;
        info!(client = self.client.name(), outcome = ?outcome, "Publisher engine started");
        outcome
    }

    /// Publishes the nodes of `entry`.
    ///
    /// Opens the connection on first use. Failures of single items are
    /// reported in the [`AddReport`]; only connection-scope failures fail the
    /// whole call.
    pub async fn add_monitored_items(&self, entry: &PublishedNodesEntry) -> PublisherResult<AddReport> {
        self.ensure_running()?;
        if entry.opc_nodes.is_empty() {
            return Err(PublisherError::invalid_entry("OpcNodes", "must not be empty"));
        }
        let config = ConnectionConfig::from_entry(entry)
            .map_err(|e| PublisherError::opcua(entry.endpoint_url.as_str(), e))?;

        let _control = self.control.lock().await;
        self.ensure_running()?;

        let id = config.id();
        let endpoint = config.endpoint_url.clone();
        let existing = self.endpoints.get(&id).map(|e| Arc::clone(e.value()));
        let (state, opened) = match existing {
            Some(state) => (state, false),
            None => {
                let state = self.open_endpoint(config).await?;
                self.endpoints.insert(id.clone(), Arc::clone(&state));
                (state, true)
            }
        };

        let mut report = AddReport {
            endpoint: endpoint.clone(),
            ..Default::default()
        };
        for (writer, (interval, nodes)) in self.group(entry) {
            self.add_writer(&state, entry, &writer, interval, nodes, &mut report)
                .await;
        }

        if opened && state.connection().registry().is_empty() {
            warn!(endpoint = %endpoint, "No item could be added, closing connection");
            self.close_endpoint(&id, &state).await;
        } else {
            report.deferred = !state.connection().state().is_connected();
            if !report.added.is_empty() {
                state.pipeline.refresh_metadata();
            }
        }

        info!(
            endpoint = %endpoint,
            added = report.added.len(),
            failed = report.failed.len(),
            subscriptions_created = report.subscriptions_created.len(),
            deferred = report.deferred,
            "Published nodes"
        );
        Ok(report)
    }

    /// Unpublishes the nodes of `entry`; an entry without nodes unpublishes
    /// everything on its endpoint.
    ///
    /// Subscriptions left empty are removed, and the connection is closed
    /// once it has no subscriptions.
    pub async fn remove_monitored_items(&self, entry: &PublishedNodesEntry) -> PublisherResult<RemoveReport> {
        self.ensure_running()?;
        let config = ConnectionConfig::from_entry(entry)
            .map_err(|e| PublisherError::opcua(entry.endpoint_url.as_str(), e))?;

        let _control = self.control.lock().await;
        self.ensure_running()?;

        let id = config.id();
        let state = self
            .endpoints
            .get(&id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| PublisherError::endpoint_not_found(config.endpoint_url.as_str()))?;
        let connection = Arc::clone(state.connection());

        let mut report = RemoveReport {
            endpoint: config.endpoint_url.clone(),
            ..Default::default()
        };

        if entry.opc_nodes.is_empty() {
            report.removed = connection.registry().all_items().len();
            report.subscriptions_removed = connection.registry().names();
            report.connection_closed = true;
            state.writers.lock().clear();
            self.close_endpoint(&id, &state).await;
            info!(endpoint = %report.endpoint, removed = report.removed, "Unpublished endpoint");
            return Ok(report);
        }

        for (writer, (_, nodes)) in self.group(entry) {
            let ids: Vec<String> = nodes.iter().map(|n| n.item_id()).collect();
            let Ok(subscription) = connection.registry().find(writer.as_str()) else {
                report.not_found.extend(ids);
                continue;
            };

            let (present, missing): (Vec<String>, Vec<String>) =
                ids.into_iter().partition(|id| subscription.items().contains(id));
            report.not_found.extend(missing);

            if !present.is_empty() {
                let removed = connection
                    .remove_items(writer.as_str(), &present)
                    .await
                    .map_err(|e| PublisherError::opcua(connection.endpoint(), e))?;
                report.removed += removed;
                state.forget(&writer, &present);
            }

            if subscription.items().is_empty() {
                match connection.remove_subscription(writer.as_str()).await {
                    Ok(()) => {
                        state.writers.lock().remove(&writer);
                        report.subscriptions_removed.push(writer.to_string());
                    }
                    Err(e) => e.log("remove empty subscription"),
                }
            }
        }

        if connection.registry().is_empty() {
            self.close_endpoint(&id, &state).await;
            report.connection_closed = true;
        } else if report.removed > 0 {
            state.pipeline.refresh_metadata();
        }

        info!(
            endpoint = %report.endpoint,
            removed = report.removed,
            not_found = report.not_found.len(),
            subscriptions_removed = report.subscriptions_removed.len(),
            connection_closed = report.connection_closed,
            "Unpublished nodes"
        );
        Ok(report)
    }

    /// Returns what is currently published, one entry per writer, ordered
    /// by endpoint and writer.
    pub fn get_configured_nodes(&self) -> Vec<PublishedNodesEntry> {
        let mut entries: Vec<(String, WriterId, PublishedNodesEntry)> = Vec::new();
        for endpoint in self.endpoints.iter() {
            for (writer, record) in endpoint.writers.lock().iter() {
                if record.nodes.is_empty() {
                    continue;
                }
                let mut entry = record.header.clone();
                entry.opc_nodes = record.nodes.values().cloned().collect();
                entries.push((entry.endpoint_url.clone(), writer.clone(), entry));
            }
        }
        entries.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        entries.into_iter().map(|(_, _, entry)| entry).collect()
    }

    /// Returns engine health.
    pub fn health(&self) -> EngineHealth {
        let mut connections: Vec<ConnectionHealth> =
            self.endpoints.iter().map(|e| e.value().health()).collect();
        connections.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        EngineHealth {
            state: aggregate_health(connections.iter().map(|c| c.health)),
            connections,
        }
    }

    /// Returns engine statistics.
    pub fn stats(&self) -> EngineStats {
        let health = self.health();
        let mut pipelines: Vec<PipelineStats> =
            self.endpoints.iter().map(|e| e.value().pipeline.stats()).collect();
        pipelines.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        EngineStats {
            connections: health.connections.len(),
            subscriptions: health.connections.iter().map(|c| c.subscriptions).sum(),
            monitored_items: health.connections.iter().map(|c| c.items).sum(),
            health: health.state,
            pipelines,
        }
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Shuts every pipeline down concurrently.
    ///
    /// Further control requests fail with [`PublisherError::ShuttingDown`].
    pub async fn shutdown(&self) -> EngineShutdownReport {
        let mut report = EngineShutdownReport::default();
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return report;
        }

        let _control = self.control.lock().await;
        let states: Vec<Arc<EndpointState<C>>> =
            self.endpoints.iter().map(|e| Arc::clone(e.value())).collect();
        self.endpoints.clear();
        info!(connections = states.len(), "Shutting down publisher engine");

        let mut tasks = JoinSet::new();
        for state in states {
            let pipeline = Arc::clone(&state.pipeline);
            tasks.spawn(async move {
                let endpoint = pipeline.connection().endpoint().to_string();
                (endpoint, pipeline.shutdown().await)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => report.pipelines.push(result),
                Err(e) => warn!(error = %e, "Pipeline shutdown task failed"),
            }
        }
        report.pipelines.sort_by(|a, b| a.0.cmp(&b.0));

        info!(clean = report.is_clean(), "Publisher engine stopped");
        report
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn ensure_running(&self) -> PublisherResult<()> {
        if self.is_shutting_down() {
            return Err(PublisherError::ShuttingDown);
        }
        Ok(())
    }

    /// Groups nodes by writer, keeping request order within a writer.
    fn group(&self, entry: &PublishedNodesEntry) -> BTreeMap<WriterId, (Duration, Vec<OpcNodeModel>)> {
        let default_interval = self.config.default_publishing_interval;
        let mut groups: BTreeMap<WriterId, (Duration, Vec<OpcNodeModel>)> = BTreeMap::new();
        for node in &entry.opc_nodes {
            let writer = entry.writer_for(node, default_interval);
            let interval = entry.publishing_interval_for(node, default_interval);
            groups
                .entry(writer)
                .or_insert_with(|| (interval, Vec::new()))
                .1
                .push(node.clone());
        }
        groups
    }

    async fn open_endpoint(&self, config: ConnectionConfig) -> PublisherResult<Arc<EndpointState<C>>> {
        let endpoint = config.endpoint_url.clone();
        let transport = self.transports.create(&config);
        let (connection, notifications) =
            EndpointConnection::new(config, transport, ConnectionOptions::from(&self.config));
        let pipeline = PublishingPipeline::start(
            Arc::clone(&connection),
            notifications,
            Arc::clone(&self.client),
            PipelineSettings::from(&self.config),
        );

        connection.spawn_connect();
        let budget = self.config.operation_timeout * DEFAULT_OPERATION_ATTEMPTS;
        let mut states = connection.subscribe_state();
        let settled = tokio::time::timeout(budget, async {
            states
                .wait_for(|state| state.is_connected() || state.is_terminal())
                .await
                .map(|state| *state)
        })
        .await;

        match settled {
            Ok(Ok(state)) if state.is_terminal() => {
                let error = connection.last_error().unwrap_or_else(|| {
                    ConnectionError::faulted(endpoint.as_str(), "connect failed").into()
                });
                error.log("open endpoint");
                pipeline.shutdown().await;
                return Err(PublisherError::opcua(endpoint, error));
            }
            Ok(Ok(_)) => debug!(endpoint = %endpoint, "Endpoint opened"),
            Ok(Err(_)) | Err(_) => warn!(
                endpoint = %endpoint,
                waited_ms = budget.as_millis() as u64,
                error = ?connection.last_error().map(|e| e.to_string()),
                "Endpoint not reachable yet, items are created once it connects"
            ),
        }

        Ok(Arc::new(EndpointState {
            pipeline,
            writers: Mutex::new(BTreeMap::new()),
        }))
    }

    async fn close_endpoint(&self, id: &ConnectionId, state: &EndpointState<C>) {
        self.endpoints.remove(id);
        let report = state.pipeline.shutdown().await;
        if !report.is_clean() {
            warn!(
                endpoint = %state.connection().endpoint(),
                forced = report.timed_out.len(),
                abandoned = report.drain.abandoned,
                "Endpoint closed with forced phases"
            );
        }
    }

    async fn add_writer(
        &self,
        state: &EndpointState<C>,
        entry: &PublishedNodesEntry,
        writer: &WriterId,
        interval: Duration,
        nodes: Vec<OpcNodeModel>,
        report: &mut AddReport,
    ) {
        let connection = state.connection();
        let name = writer.as_str();

        let created = if connection.registry().find(name).is_ok() {
            false
        } else {
            match connection
                .create_subscription(name, SubscriptionSettings::with_interval(interval))
                .await
            {
                Ok(_) => true,
                Err(e) => {
                    e.log("create subscription");
                    report
                        .failed
                        .extend(nodes.iter().map(|n| ItemFailure::new(n.item_id(), e.clone())));
                    return;
                }
            }
        };

        let mut specs = Vec::with_capacity(nodes.len());
        let mut models: HashMap<String, OpcNodeModel> = HashMap::with_capacity(nodes.len());
        for node in nodes {
            match MonitoredItemSpec::from_node(&node, self.config.default_sampling_interval) {
                Ok(spec) => {
                    models.entry(spec.id.clone()).or_insert(node);
                    specs.push(spec);
                }
                Err(e) => report.failed.push(ItemFailure::new(node.item_id(), e)),
            }
        }

        let mut added = 0usize;
        if !specs.is_empty() {
            let ids: Vec<String> = specs.iter().map(|s| s.id.clone()).collect();
            match connection.add_items(name, specs).await {
                Ok(outcomes) => {
                    for outcome in outcomes {
                        match outcome.result {
                            Ok(_) => {
                                if let Some(node) = models.get(&outcome.id) {
                                    state.record(writer, entry, outcome.id.clone(), node.clone());
                                }
                                report.added.push(outcome.id);
                                added += 1;
                            }
                            Err(e) => report.failed.push(ItemFailure::new(outcome.id, e)),
                        }
                    }
                }
                Err(e) => {
                    e.log("add items");
                    report
                        .failed
                        .extend(ids.into_iter().map(|id| ItemFailure::new(id, e.clone())));
                }
            }
        }

        if created {
            if added == 0 {
                if let Err(e) = connection.remove_subscription(name).await {
                    e.log("remove unused subscription");
                }
            } else {
                report.subscriptions_created.push(name.to_string());
            }
        }
    }
}

impl<C: MessageClient> std::fmt::Debug for PublisherEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherEngine")
            .field("endpoints", &self.endpoints.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use uapub_core::MockMessageClient;
    use uapub_opcua::{MockTransportFactory, NodeId};

    const PLC: &str = "opc.tcp://plc-1:4840";
    const OTHER: &str = "opc.tcp://plc-2:4840";

    fn engine() -> (PublisherEngine<MockMessageClient>, Arc<MockTransportFactory>, Arc<MockMessageClient>) {
        let factory = Arc::new(MockTransportFactory::new());
        let client = Arc::new(MockMessageClient::new());
        let engine = PublisherEngine::new(
            EngineConfiguration::for_testing(),
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
            Arc::clone(&client),
        );
        (engine, factory, client)
    }

    fn entry(endpoint: &str, nodes: &[&str]) -> PublishedNodesEntry {
        nodes.iter().fold(
            PublishedNodesEntry::new(endpoint).with_publishing_interval(Duration::from_secs(1)),
            |entry, node| entry.with_node(OpcNodeModel::new(*node)),
        )
    }

    #[test]
    fn test_aggregate_health() {
        use HealthState::*;
        assert_eq!(aggregate_health([]), Healthy);
        assert_eq!(aggregate_health([Healthy, Healthy]), Healthy);
        assert_eq!(aggregate_health([Healthy, Down]), Degraded);
        assert_eq!(aggregate_health([Degraded, Degraded]), Degraded);
        assert_eq!(aggregate_health([Down, Down]), Down);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_shares_subscription_per_interval() {
        let (engine, factory, _) = engine();

        let report = engine
            .add_monitored_items(&entry(PLC, &["ns=2;s=A", "ns=2;s=B"]))
            .await
            .unwrap();
        assert!(report.is_complete());
        assert_eq!(report.added.len(), 2);
        assert_eq!(report.subscriptions_created, vec![format!("{}_1000", PLC)]);

        let report = engine
            .add_monitored_items(&entry(PLC, &["ns=2;s=C"]))
            .await
            .unwrap();
        assert!(report.subscriptions_created.is_empty());

        let control = factory.control(PLC);
        assert_eq!(control.subscription_count(), 1);
        assert_eq!(control.item_count(), 3);

        let stats = engine.stats();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.subscriptions, 1);
        assert_eq!(stats.monitored_items, 3);
        assert_eq!(stats.health, HealthState::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_item_reported_as_conflict() {
        let (engine, _, _) = engine();
        engine.add_monitored_items(&entry(PLC, &["ns=2;s=A"])).await.unwrap();

        let report = engine.add_monitored_items(&entry(PLC, &["ns=2;s=A"])).await.unwrap();
        assert!(report.added.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].class(), ErrorClass::Conflict);
        assert_eq!(engine.get_configured_nodes()[0].opc_nodes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_keeps_good_items() {
        let (engine, factory, _) = engine();
        factory
            .control(PLC)
            .reject_node(NodeId::string(2, "Bad"), uapub_core::StatusCode::BAD_NODE_ID_UNKNOWN);

        let report = engine
            .add_monitored_items(&entry(PLC, &["ns=2;s=Good", "ns=2;s=Bad", "not a node id"]))
            .await
            .unwrap();

        assert_eq!(report.added, vec!["ns=2;s=Good".to_string()]);
        assert_eq!(report.failed.len(), 2);
        assert!(report.failed.iter().all(|f| f.class() == ErrorClass::Fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_items_failing_closes_new_connection() {
        let (engine, factory, _) = engine();
        factory
            .control(PLC)
            .reject_node(NodeId::string(2, "Bad"), uapub_core::StatusCode::BAD_NODE_ID_UNKNOWN);

        let report = engine.add_monitored_items(&entry(PLC, &["ns=2;s=Bad"])).await.unwrap();
        assert!(report.added.is_empty());
        assert!(report.subscriptions_created.is_empty());
        assert_eq!(engine.stats().connections, 0);
        assert_eq!(factory.control(PLC).subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_cascades_to_subscription_and_connection() {
        let (engine, factory, _) = engine();
        engine
            .add_monitored_items(&entry(PLC, &["ns=2;s=A", "ns=2;s=B"]))
            .await
            .unwrap();

        let report = engine
            .remove_monitored_items(&entry(PLC, &["ns=2;s=A", "ns=2;s=Missing"]))
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.not_found, vec!["ns=2;s=Missing".to_string()]);
        assert!(!report.connection_closed);

        let report = engine.remove_monitored_items(&entry(PLC, &["ns=2;s=B"])).await.unwrap();
        assert_eq!(report.subscriptions_removed.len(), 1);
        assert!(report.connection_closed);
        assert_eq!(engine.stats().connections, 0);
        assert!(!factory.control(PLC).is_connected());
        assert!(engine.get_configured_nodes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_endpoint_is_deferred_until_connected() {
        let (engine, factory, _) = engine();
        let control = factory.control(PLC);
        control.set_connect_error(Some(OpcUaError::connection_refused(PLC)));

        let report = engine.add_monitored_items(&entry(PLC, &["ns=2;s=A"])).await.unwrap();
        assert!(report.deferred);
        assert_eq!(report.added, vec!["ns=2;s=A".to_string()]);
        assert_eq!(engine.health().state, HealthState::Down);
        assert_eq!(engine.get_configured_nodes().len(), 1);
        assert_eq!(control.subscription_count(), 0);

        control.set_connect_error(None);
        for _ in 0..100 {
            if control.item_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(control.item_count(), 1);
        assert_eq!(engine.health().state, HealthState::Healthy);

        let report = engine.add_monitored_items(&entry(PLC, &["ns=2;s=B"])).await.unwrap();
        assert!(!report.deferred);
        assert_eq!(control.item_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_endpoint_can_be_unpublished() {
        let (engine, factory, _) = engine();
        let control = factory.control(PLC);
        control.set_connect_error(Some(OpcUaError::connection_refused(PLC)));
        engine.add_monitored_items(&entry(PLC, &["ns=2;s=A"])).await.unwrap();

        let report = engine.remove_monitored_items(&entry(PLC, &["ns=2;s=A"])).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.subscriptions_removed.len(), 1);
        assert!(report.connection_closed);
        assert_eq!(engine.stats().connections, 0);

        let calls = control.connect_calls();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(control.connect_calls(), calls);
        assert_eq!(control.delete_subscription_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_unknown_endpoint() {
        let (engine, _, _) = engine();
        let err = engine
            .remove_monitored_items(&entry(OTHER, &["ns=2;s=A"]))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_remove_unpublishes_endpoint() {
        let (engine, _, _) = engine();
        engine.add_monitored_items(&entry(PLC, &["ns=2;s=A"])).await.unwrap();
        engine.add_monitored_items(&entry(OTHER, &["ns=2;s=A"])).await.unwrap();

        let report = engine
            .remove_monitored_items(&PublishedNodesEntry::new(PLC))
            .await
            .unwrap();
        assert_eq!(report.removed, 1);
        assert!(report.connection_closed);

        let nodes = engine.get_configured_nodes();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].endpoint_url, OTHER);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_nodes_grouped_per_writer() {
        let (engine, _, _) = engine();
        let request = entry(PLC, &["ns=2;s=A"])
            .with_writer_id("line")
            .with_node(OpcNodeModel {
                opc_publishing_interval: Some(5000),
                ..OpcNodeModel::new("ns=2;s=Slow")
            });
        engine.add_monitored_items(&request).await.unwrap();

        let nodes = engine.get_configured_nodes();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].data_set_writer_id.as_deref(), Some("line"));
        assert_eq!(nodes[0].opc_nodes[0].id, "ns=2;s=A");
        assert_eq!(nodes[1].opc_nodes[0].id, "ns=2;s=Slow");
        assert_eq!(nodes[1].opc_nodes[0].opc_publishing_interval, Some(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_entry_rejected() {
        let (engine, _, _) = engine();
        let err = engine
            .add_monitored_items(&PublishedNodesEntry::new(PLC))
            .await
            .unwrap_err();
        assert!(matches!(err, PublisherError::InvalidEntry { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_rejects_requests() {
        let (engine, factory, _) = engine();
        engine.add_monitored_items(&entry(PLC, &["ns=2;s=A"])).await.unwrap();
        engine.add_monitored_items(&entry(OTHER, &["ns=2;s=A"])).await.unwrap();

        let report = engine.shutdown().await;
        assert_eq!(report.pipelines.len(), 2);
        assert!(report.is_clean());
        assert_eq!(factory.control(PLC).subscription_count(), 0);

        let err = engine.add_monitored_items(&entry(PLC, &["ns=2;s=A"])).await.unwrap_err();
        assert!(matches!(err, PublisherError::ShuttingDown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_reporting_disabled() {
        let (engine, _, client) = engine();
        assert_eq!(engine.start().await, ReportOutcome::Disabled);
        assert_eq!(client.sent_count(), 0);
    }
}
