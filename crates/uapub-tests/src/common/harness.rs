// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Harness
//!
//! A [`PublisherEngine`] wired to simulated OPC UA servers and a recording
//! message client. Each harness owns its servers, so tests stay isolated.

use std::sync::Arc;
use std::time::Duration;

use uapub_core::{EngineConfiguration, MockMessage, MockMessageClient, PublishedNodesEntry};
use uapub_opcua::{MockControl, MockTransportFactory, NodeId, TransportFactory};
use uapub_publisher::{AddReport, PublisherEngine};

/// Engine under test with its simulated servers and message client.
pub struct EngineHarness {
    /// The engine.
    pub engine: PublisherEngine<MockMessageClient>,
    /// One simulated server per endpoint URL.
    pub servers: Arc<MockTransportFactory>,
    /// Records every message the engine sends.
    pub client: Arc<MockMessageClient>,
}

impl EngineHarness {
    /// Creates a harness with [`EngineConfiguration::for_testing`].
    pub fn new() -> Self {
        Self::with_config(EngineConfiguration::for_testing())
    }

    /// Creates a harness with a custom configuration.
    pub fn with_config(config: EngineConfiguration) -> Self {
        let servers = Arc::new(MockTransportFactory::new());
        let client = Arc::new(MockMessageClient::new());
        let engine = PublisherEngine::new(
            config,
            Arc::clone(&servers) as Arc<dyn TransportFactory>,
            Arc::clone(&client),
        );
        Self {
            engine,
            servers,
            client,
        }
    }

    /// Creates a harness whose batches flush at `batch_size` samples.
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self::with_config(EngineConfiguration {
            batch_size,
            ..EngineConfiguration::for_testing()
        })
    }

    /// Control handle of the simulated server at `endpoint`.
    pub fn server(&self, endpoint: &str) -> MockControl {
        self.servers.control(endpoint)
    }

    /// Adds `entry` and asserts every item was published.
    pub async fn publish(&self, entry: &PublishedNodesEntry) -> AddReport {
        let report = self
            .engine
            .add_monitored_items(entry)
            .await
            .expect("Failed to publish entry");
        assert!(report.is_complete(), "Items failed: {:?}", report.failed);
        report
    }

    /// Publishes `value` on `node` from the server at `endpoint`.
    pub fn change(&self, endpoint: &str, node: &NodeId, value: f64) -> usize {
        self.server(endpoint).publish(node, value)
    }

    /// Lets the pipelines run for `duration` of (paused) time.
    pub async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<MockMessage> {
        self.client.sent()
    }
}

impl Default for EngineHarness {
    fn default() -> Self {
        Self::new()
    }
}
