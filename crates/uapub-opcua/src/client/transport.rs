// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA transport abstraction layer.
//!
//! [`UaTransport`] is the seam to the protocol stack: session establishment,
//! read/write/browse primitives, subscriptions, monitored items and a
//! notification callback. The callback side is a [`NotificationSink`], which
//! only ever performs a non-blocking `try_send` into a bounded channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uapub_core::{StatusCode, Value};

use crate::error::OpcUaResult;
use crate::types::{ConnectionConfig, NodeId, SubscriptionSettings};

// =============================================================================
// Protocol results
// =============================================================================

/// Result of reading one node value.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResult {
    /// The node that was read.
    pub node_id: NodeId,
    /// The value; `Null` on a bad status.
    pub value: Value,
    /// Status of the read.
    pub status: StatusCode,
    /// Source timestamp.
    pub source_timestamp: Option<DateTime<Utc>>,
}

/// One reference returned by browse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowseReference {
    /// Target node.
    pub node_id: NodeId,
    /// Browse name.
    pub browse_name: String,
    /// Display name.
    pub display_name: String,
    /// Node class (`Object`, `Variable`, ...).
    pub node_class: String,
}

/// A subscription as created by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    /// Server-assigned subscription id.
    pub server_id: u32,
    /// Publishing interval granted by the server.
    pub revised_publishing_interval: Duration,
}

/// Request to create one monitored item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredItemRequest {
    /// Client handle carried by every notification of this item.
    pub client_handle: u32,
    /// Node to monitor.
    pub node_id: NodeId,
    /// Requested sampling interval.
    pub sampling_interval: Duration,
    /// Server-side queue size.
    pub queue_size: u32,
    /// Discard the oldest queued value on overflow.
    pub discard_oldest: bool,
}

/// Server answer for one monitored item request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredItemResult {
    /// Client handle of the request.
    pub client_handle: u32,
    /// Per-item status.
    pub status: StatusCode,
    /// Server-assigned monitored item id (0 when rejected).
    pub server_id: u32,
}

impl MonitoredItemResult {
    /// Creates an accepted result.
    pub fn accepted(client_handle: u32, server_id: u32) -> Self {
        Self {
            client_handle,
            status: StatusCode::GOOD,
            server_id,
        }
    }

    /// Creates a rejected result.
    pub fn rejected(client_handle: u32, status: StatusCode) -> Self {
        Self {
            client_handle,
            status,
            server_id: 0,
        }
    }
}

// =============================================================================
// Notifications
// =============================================================================

/// A data change delivered by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Client handle of the monitored item.
    pub client_handle: u32,
    /// Sequence number of the publish response.
    pub sequence_number: u32,
    /// The value.
    pub value: Value,
    /// Status of the value.
    pub status: StatusCode,
    /// Source timestamp.
    pub source_timestamp: DateTime<Utc>,
    /// Server timestamp.
    pub server_timestamp: Option<DateTime<Utc>>,
    /// Synthetic notification repeating the last value.
    pub is_heartbeat: bool,
}

impl Notification {
    /// Creates a good-status notification stamped now.
    pub fn new(client_handle: u32, value: impl Into<Value>) -> Self {
        Self {
            client_handle,
            sequence_number: 0,
            value: value.into(),
            status: StatusCode::GOOD,
            source_timestamp: Utc::now(),
            server_timestamp: None,
            is_heartbeat: false,
        }
    }

    /// Sets the sequence number.
    pub fn with_sequence(mut self, sequence_number: u32) -> Self {
        self.sequence_number = sequence_number;
        self
    }
}

/// Notifications of one publish response, in server order.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationBatch {
    /// Server subscription id.
    pub subscription_id: u32,
    /// Notifications in server order.
    pub notifications: Vec<Notification>,
}

/// Callback endpoint handed to the transport.
///
/// Delivery never blocks: when the channel is full or closed the batch is
/// dropped and counted.
#[derive(Clone)]
pub struct NotificationSink {
    tx: mpsc::Sender<NotificationBatch>,
    delivered: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl NotificationSink {
    /// Creates a sink and the receiving end of its bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<NotificationBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                delivered: Arc::new(AtomicU64::new(0)),
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Delivers a batch. Returns `false` if it was dropped.
    pub fn deliver(&self, batch: NotificationBatch) -> bool {
        let count = batch.notifications.len() as u64;
        match self.tx.try_send(batch) {
            Ok(()) => {
                self.delivered.fetch_add(count, Ordering::Relaxed);
                true
            }
            Err(_) => {
                let total = self.dropped.fetch_add(count, Ordering::Relaxed) + count;
                tracing::warn!(dropped = count, total_dropped = total, "Notification channel full, dropping batch");
                false
            }
        }
    }

    /// Notifications accepted into the channel.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Notifications dropped at the callback.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for NotificationSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationSink")
            .field("delivered", &self.delivered())
            .field("dropped", &self.dropped())
            .finish()
    }
}

// =============================================================================
// UaTransport
// =============================================================================

/// Protocol stack binding for one session.
///
/// Callers serialize access through [`SessionChannel`](super::SessionChannel);
/// implementations need not be reentrant.
#[async_trait]
pub trait UaTransport: Send + Sync + 'static {
    /// Returns the endpoint URL.
    fn endpoint(&self) -> &str;

    /// Returns `true` while a session exists.
    fn is_connected(&self) -> bool;

    /// Installs the notification callback.
    fn set_notification_sink(&mut self, sink: NotificationSink);

    /// Establishes transport, security and session.
    async fn connect(&mut self, config: &ConnectionConfig) -> OpcUaResult<()>;

    /// Tears the session down.
    async fn disconnect(&mut self) -> OpcUaResult<()>;

    /// Probes the session.
    async fn keep_alive(&mut self) -> OpcUaResult<()>;

    /// Reads node values.
    async fn read_values(&mut self, node_ids: &[NodeId]) -> OpcUaResult<Vec<ReadResult>>;

    /// Writes node values; one status per write.
    async fn write_values(&mut self, writes: &[(NodeId, Value)]) -> OpcUaResult<Vec<StatusCode>>;

    /// Browses the forward hierarchical references of a node.
    async fn browse(&mut self, node_id: &NodeId) -> OpcUaResult<Vec<BrowseReference>>;

    /// Creates a subscription.
    async fn create_subscription(
        &mut self,
        settings: &SubscriptionSettings,
    ) -> OpcUaResult<SubscriptionHandle>;

    /// Deletes a subscription.
    async fn delete_subscription(&mut self, subscription_id: u32) -> OpcUaResult<()>;

    /// Creates monitored items; one result per request, in request order.
    async fn create_monitored_items(
        &mut self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<MonitoredItemResult>>;

    /// Deletes monitored items by server id.
    async fn delete_monitored_items(
        &mut self,
        subscription_id: u32,
        item_ids: &[u32],
    ) -> OpcUaResult<()>;
}

/// Creates one transport per connection.
pub trait TransportFactory: Send + Sync + 'static {
    /// Creates an unconnected transport for `config`.
    fn create(&self, config: &ConnectionConfig) -> Box<dyn UaTransport>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(n: usize) -> NotificationBatch {
        NotificationBatch {
            subscription_id: 1,
            notifications: (0..n).map(|i| Notification::new(i as u32, i as i32)).collect(),
        }
    }

    #[tokio::test]
    async fn test_sink_delivers_in_order() {
        let (sink, mut rx) = NotificationSink::channel(4);
        assert!(sink.deliver(batch(3)));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.notifications.len(), 3);
        assert_eq!(received.notifications[2].client_handle, 2);
        assert_eq!(sink.delivered(), 3);
    }

    #[tokio::test]
    async fn test_sink_drops_when_full() {
        let (sink, _rx) = NotificationSink::channel(1);
        assert!(sink.deliver(batch(2)));
        assert!(!sink.deliver(batch(5)));
        assert_eq!(sink.dropped(), 5);
        assert_eq!(sink.delivered(), 2);
    }

    #[tokio::test]
    async fn test_sink_drops_when_closed() {
        let (sink, rx) = NotificationSink::channel(4);
        drop(rx);
        assert!(!sink.deliver(batch(1)));
        assert_eq!(sink.dropped(), 1);
    }
}
