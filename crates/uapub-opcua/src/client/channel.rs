// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Serialized, time-bounded access to one transport.
//!
//! Every protocol call on a connection goes through its [`SessionChannel`]:
//! one async mutex around the transport, and one timeout covering both the
//! wait for the lock and the call itself.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use uapub_core::{StatusCode, Value};

use crate::client::transport::{
    BrowseReference, MonitoredItemRequest, MonitoredItemResult, ReadResult, SubscriptionHandle,
    UaTransport,
};
use crate::error::{OpcUaError, OpcUaResult};
use crate::types::{ConnectionConfig, NodeId, SubscriptionSettings};

/// Serialized access to a transport.
#[derive(Clone)]
pub struct SessionChannel {
    transport: Arc<Mutex<Box<dyn UaTransport>>>,
    endpoint: Arc<str>,
    operation_timeout: Duration,
}

impl SessionChannel {
    /// Wraps a transport.
    pub fn new(transport: Box<dyn UaTransport>, operation_timeout: Duration) -> Self {
        let endpoint: Arc<str> = Arc::from(transport.endpoint());
        Self {
            transport: Arc::new(Mutex::new(transport)),
            endpoint,
            operation_timeout,
        }
    }

    /// Returns the endpoint URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the per-call timeout.
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    async fn bounded<R>(
        &self,
        operation: &'static str,
        call: impl Future<Output = OpcUaResult<R>>,
    ) -> OpcUaResult<R> {
        match tokio::time::timeout(self.operation_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    endpoint = %self.endpoint,
                    operation = operation,
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "Protocol call timed out"
                );
                Err(OpcUaError::timeout(operation, self.operation_timeout))
            }
        }
    }

    /// Establishes the session.
    pub async fn connect(&self, config: &ConnectionConfig) -> OpcUaResult<()> {
        self.bounded("connect", async {
            self.transport.lock().await.connect(config).await
        })
        .await
    }

    /// Tears the session down.
    pub async fn disconnect(&self) -> OpcUaResult<()> {
        self.bounded("disconnect", async {
            self.transport.lock().await.disconnect().await
        })
        .await
    }

    /// Probes the session.
    pub async fn keep_alive(&self) -> OpcUaResult<()> {
        self.bounded("keep_alive", async {
            self.transport.lock().await.keep_alive().await
        })
        .await
    }

    /// Reads node values.
    pub async fn read_values(&self, node_ids: &[NodeId]) -> OpcUaResult<Vec<ReadResult>> {
        self.bounded("read", async {
            self.transport.lock().await.read_values(node_ids).await
        })
        .await
    }

    /// Writes node values.
    pub async fn write_values(&self, writes: &[(NodeId, Value)]) -> OpcUaResult<Vec<StatusCode>> {
        self.bounded("write", async {
            self.transport.lock().await.write_values(writes).await
        })
        .await
    }

    /// Browses a node.
    pub async fn browse(&self, node_id: &NodeId) -> OpcUaResult<Vec<BrowseReference>> {
        self.bounded("browse", async {
            self.transport.lock().await.browse(node_id).await
        })
        .await
    }

    /// Creates a subscription.
    pub async fn create_subscription(
        &self,
        settings: &SubscriptionSettings,
    ) -> OpcUaResult<SubscriptionHandle> {
        self.bounded("create_subscription", async {
            self.transport.lock().await.create_subscription(settings).await
        })
        .await
    }

    /// Deletes a subscription.
    pub async fn delete_subscription(&self, subscription_id: u32) -> OpcUaResult<()> {
        self.bounded("delete_subscription", async {
            self.transport
                .lock()
                .await
                .delete_subscription(subscription_id)
                .await
        })
        .await
    }

    /// Creates monitored items.
    pub async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<MonitoredItemResult>> {
        self.bounded("create_monitored_items", async {
            self.transport
                .lock()
                .await
                .create_monitored_items(subscription_id, items)
                .await
        })
        .await
    }

    /// Deletes monitored items.
    pub async fn delete_monitored_items(
        &self,
        subscription_id: u32,
        item_ids: &[u32],
    ) -> OpcUaResult<()> {
        self.bounded("delete_monitored_items", async {
            self.transport
                .lock()
                .await
                .delete_monitored_items(subscription_id, item_ids)
                .await
        })
        .await
    }
}

impl std::fmt::Debug for SessionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionChannel")
            .field("endpoint", &self.endpoint)
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use uapub_core::{Classified, ErrorClass};

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out() {
        let transport = MockTransport::new("opc.tcp://slow:4840");
        let control = transport.control();
        control.set_call_delay(Some(Duration::from_secs(30)));

        let channel = SessionChannel::new(Box::new(transport), Duration::from_secs(1));
        let err = channel
            .connect(&ConnectionConfig::new("opc.tcp://slow:4840"))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Timeout);
    }

    #[tokio::test]
    async fn test_calls_are_forwarded() {
        let transport = MockTransport::new("opc.tcp://plc:4840");
        let control = transport.control();
        let channel = SessionChannel::new(Box::new(transport), Duration::from_secs(1));

        channel
            .connect(&ConnectionConfig::new("opc.tcp://plc:4840"))
            .await
            .unwrap();
        assert_eq!(channel.endpoint(), "opc.tcp://plc:4840");
        assert_eq!(control.connect_calls(), 1);

        let handle = channel
            .create_subscription(&SubscriptionSettings::default())
            .await
            .unwrap();
        assert!(handle.server_id > 0);
    }
}
