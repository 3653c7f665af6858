// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Gateway runtime orchestration.
//!
//! 1. Resolve the engine configuration and load the published nodes.
//! 2. Start the [`PublisherEngine`] and announce the restart.
//! 3. Publish every configured entry.
//! 4. Log statistics periodically until shutdown is signaled.
//! 5. Shut the engine down phase by phase.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use uapub_config::{load_published_nodes, UapubConfig};
use uapub_core::{EngineConfiguration, MessageClient, PublishedNodesEntry};
use uapub_opcua::TransportFactory;
use uapub_publisher::PublisherEngine;

use crate::error::{BinError, BinResult};
use crate::shutdown::ShutdownCoordinator;

// =============================================================================
// RunSummary
// =============================================================================

/// What a gateway run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Entries in the published nodes file.
    pub entries: usize,
    /// Items added at startup.
    pub items_added: usize,
    /// Items that failed at startup.
    pub items_failed: usize,
    /// Entries whose endpoint could not be opened.
    pub endpoints_failed: usize,
    /// Entries whose endpoint was not reachable yet; their items are
    /// created once it connects.
    pub endpoints_deferred: usize,
    /// Every pipeline shut down cleanly.
    pub clean_shutdown: bool,
}

// =============================================================================
// GatewayRuntime
// =============================================================================

/// Runs one [`PublisherEngine`] until shutdown.
pub struct GatewayRuntime<C: MessageClient> {
    engine: PublisherEngine<C>,
    entries: Vec<PublishedNodesEntry>,
    shutdown: ShutdownCoordinator,
    stats_interval: Option<Duration>,
}

impl<C: MessageClient> GatewayRuntime<C> {
    /// The engine.
    pub fn engine(&self) -> &PublisherEngine<C> {
        &self.engine
    }

    /// The shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Runs until the shutdown coordinator fires.
    pub async fn run(self) -> BinResult<RunSummary> {
        info!(version = uapub_core::VERSION, entries = self.entries.len(), "Starting uapub gateway");
        let signal = self.shutdown.shutdown_signal();
        tokio::pin! {
            let stopped = signal.wait();
        }

        self.engine.start().await;

        let mut summary = RunSummary {
            entries: self.entries.len(),
            ..Default::default()
        };
        let interrupted = {
            let publish = self.publish_all(&mut summary);
            tokio::pin!(publish);
            tokio::select! {
                _ = &mut publish => false,
                _ = &mut stopped => true,
            }
        };

        if !interrupted {
            info!(
                items_added = summary.items_added,
                items_failed = summary.items_failed,
                endpoints_failed = summary.endpoints_failed,
                endpoints_deferred = summary.endpoints_deferred,
                "uapub gateway is ready"
            );
            self.wait_for_shutdown(&mut stopped).await;
        }

        info!("Shutdown initiated, draining pipelines");
        let report = self.engine.shutdown().await;
        summary.clean_shutdown = report.is_clean();
        for (endpoint, pipeline) in &report.pipelines {
            if !pipeline.is_clean() {
                warn!(
                    endpoint = %endpoint,
                    forced = ?pipeline.timed_out,
                    abandoned = pipeline.drain.abandoned,
                    "Pipeline did not shut down cleanly"
                );
            }
        }

        info!(clean = summary.clean_shutdown, "uapub gateway shutdown complete");
        Ok(summary)
    }

    async fn publish_all(&self, summary: &mut RunSummary) {
        for entry in &self.entries {
            match self.engine.add_monitored_items(entry).await {
                Ok(report) => {
                    summary.items_added += report.added.len();
                    summary.items_failed += report.failed.len();
                    if report.deferred {
                        summary.endpoints_deferred += 1;
                        warn!(endpoint = %report.endpoint, "Endpoint not connected yet, publishing deferred");
                    }
                    for failure in &report.failed {
                        warn!(
                            endpoint = %report.endpoint,
                            item = %failure.item_id,
                            class = ?failure.class(),
                            error = %failure.error,
                            "Item not published"
                        );
                    }
                }
                Err(e) => {
                    summary.endpoints_failed += 1;
                    summary.items_failed += entry.opc_nodes.len();
                    error!(
                        endpoint = %entry.endpoint_url,
                        code = e.error_code(),
                        error = %e,
                        "Endpoint not published"
                    );
                }
            }
        }
    }

    async fn wait_for_shutdown<F>(&self, stopped: &mut std::pin::Pin<&mut F>)
    where
        F: std::future::Future<Output = ()>,
    {
        let Some(period) = self.stats_interval else {
            stopped.await;
            return;
        };

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = &mut *stopped => return,
                _ = ticker.tick() => self.log_stats(),
            }
        }
    }

    fn log_stats(&self) {
        let stats = self.engine.stats();
        let (sent, dropped, queued) = stats.pipelines.iter().fold((0, 0, 0), |acc, p| {
            (acc.0 + p.egress.sent, acc.1 + p.egress.total_dropped(), acc.2 + p.egress.current_len)
        });
        info!(
            health = %stats.health,
            connections = stats.connections,
            subscriptions = stats.subscriptions,
            monitored_items = stats.monitored_items,
            sent,
            dropped,
            queued,
            "Gateway statistics"
        );
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`GatewayRuntime`].
#[derive(Default)]
pub struct RuntimeBuilder {
    config: Option<UapubConfig>,
    published_nodes: Option<PathBuf>,
    entries: Option<Vec<PublishedNodesEntry>>,
    transports: Option<Arc<dyn TransportFactory>>,
    shutdown: Option<ShutdownCoordinator>,
    stats_interval: Option<Duration>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    pub fn config(mut self, config: UapubConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Overrides the published nodes file named in the configuration.
    pub fn published_nodes_file(mut self, path: impl AsRef<Path>) -> Self {
        self.published_nodes = Some(path.as_ref().to_path_buf());
        self
    }

    /// Uses `entries` instead of a published nodes file.
    pub fn entries(mut self, entries: Vec<PublishedNodesEntry>) -> Self {
        self.entries = Some(entries);
        self
    }

    /// Sets the OPC UA transport factory.
    pub fn transports(mut self, transports: Arc<dyn TransportFactory>) -> Self {
        self.transports = Some(transports);
        self
    }

    /// Sets the shutdown coordinator.
    pub fn shutdown(mut self, shutdown: ShutdownCoordinator) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Sets the statistics log interval; zero disables it.
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Builds the runtime around `client`.
    pub fn build<C: MessageClient>(self, client: Arc<C>) -> BinResult<GatewayRuntime<C>> {
        let config = self.config.unwrap_or_default();
        let engine_config: EngineConfiguration = config.resolve();

        let entries = match self.entries {
            Some(entries) => entries,
            None => match self.published_nodes.or_else(|| config.published_nodes_file.clone()) {
                Some(path) => load_published_nodes(&path)
                    .map_err(|e| BinError::from(e).with_context("Failed to load published nodes"))?,
                None => {
                    warn!("No published nodes file configured; nothing will be published");
                    Vec::new()
                }
            },
        };

        let transports = match self.transports {
            Some(transports) => transports,
            None => default_transports()?,
        };

        Ok(GatewayRuntime {
            engine: PublisherEngine::new(engine_config, transports, client),
            entries,
            shutdown: self.shutdown.unwrap_or_default(),
            stats_interval: self.stats_interval,
        })
    }
}

#[cfg(feature = "real-transport")]
fn default_transports() -> BinResult<Arc<dyn TransportFactory>> {
    Ok(Arc::new(uapub_opcua::RealTransportFactory))
}

#[cfg(not(feature = "real-transport"))]
fn default_transports() -> BinResult<Arc<dyn TransportFactory>> {
    Err(BinError::init(
        "no OPC UA stack available; rebuild with the `real-transport` feature",
    ))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use uapub_core::{MockMessageClient, OpcNodeModel};
    use uapub_opcua::{MockTransportFactory, NodeId, OpcUaError};

    const PLC: &str = "opc.tcp://runtime-test:4840";

    fn entry() -> PublishedNodesEntry {
        PublishedNodesEntry::new(PLC)
            .with_publishing_interval(Duration::from_secs(1))
            .with_node(OpcNodeModel::new("ns=2;s=Temperature"))
            .with_node(OpcNodeModel::new("ns=2;s=Pressure"))
    }

    fn test_config() -> UapubConfig {
        uapub_config::load_config_str(
            "engine:\n  batch_size: 2\n  operation_timeout: 2s\n  shutdown_phase_timeout: 1s\n",
            uapub_config::ConfigFormat::Yaml,
        )
        .unwrap()
    }

    #[test]
    fn test_builder_loads_published_nodes_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"EndpointUrl":"{}","OpcNodes":[{{"Id":"ns=2;s=A"}}]}}]"#,
            PLC
        )
        .unwrap();

        let runtime = RuntimeBuilder::new()
            .published_nodes_file(file.path())
            .transports(Arc::new(MockTransportFactory::new()))
            .build(Arc::new(MockMessageClient::new()))
            .unwrap();
        assert_eq!(runtime.entries.len(), 1);
    }

    #[test]
    fn test_builder_missing_published_nodes_file() {
        let err = RuntimeBuilder::new()
            .published_nodes_file("/nonexistent/pn.json")
            .transports(Arc::new(MockTransportFactory::new()))
            .build(Arc::new(MockMessageClient::new()))
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 1);
    }

    #[cfg(not(feature = "real-transport"))]
    #[test]
    fn test_builder_without_transport() {
        let err = RuntimeBuilder::new()
            .entries(Vec::new())
            .build(Arc::new(MockMessageClient::new()))
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_until_shutdown() {
        let factory = Arc::new(MockTransportFactory::new());
        let control = factory.control(PLC);
        let client = Arc::new(MockMessageClient::new());
        let shutdown = ShutdownCoordinator::new();

        let runtime = RuntimeBuilder::new()
            .config(test_config())
            .entries(vec![entry()])
            .transports(factory)
            .shutdown(shutdown.clone())
            .build(Arc::clone(&client))
            .unwrap();
        let handle = tokio::spawn(runtime.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(control.item_count(), 2);
        control.publish(&NodeId::string(2, "Temperature"), 20.5f64);
        control.publish(&NodeId::string(2, "Pressure"), 1.2f64);
        tokio::time::sleep(Duration::from_millis(100)).await;

        shutdown.initiate_shutdown();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.items_added, 2);
        assert_eq!(summary.items_failed, 0);
        assert!(summary.clean_shutdown);
        assert_eq!(client.sent_count(), 1);
        assert_eq!(control.item_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_defers_unreachable_endpoint() {
        let factory = Arc::new(MockTransportFactory::new());
        let control = factory.control(PLC);
        control.set_connect_error(Some(OpcUaError::connection_refused(PLC)));
        let shutdown = ShutdownCoordinator::new();

        let runtime = RuntimeBuilder::new()
            .config(test_config())
            .entries(vec![entry()])
            .transports(factory)
            .shutdown(shutdown.clone())
            .build(Arc::new(MockMessageClient::new()))
            .unwrap();
        let handle = tokio::spawn(runtime.run());

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(control.item_count(), 0);
        control.set_connect_error(None);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(control.item_count(), 2);

        shutdown.initiate_shutdown();
        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.endpoints_deferred, 1);
        assert_eq!(summary.endpoints_failed, 0);
        assert_eq!(summary.items_added, 2);
    }
}
