// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! In-memory transport for tests and demos.
//!
//! A [`MockTransport`] simulates one server. Its [`MockControl`] handle stays
//! with the test and can inject failures, drop the session, reject nodes and
//! publish values through the installed notification sink.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use uapub_core::{StatusCode, Value};

use crate::client::transport::{
    BrowseReference, MonitoredItemRequest, MonitoredItemResult, Notification, NotificationBatch,
    NotificationSink, ReadResult, SubscriptionHandle, TransportFactory, UaTransport,
};
use crate::error::{OpcUaError, OpcUaResult, SessionError, SubscriptionError};
use crate::types::{ConnectionConfig, NodeId, SubscriptionSettings};

#[derive(Debug, Default)]
struct MockSubscription {
    settings: Option<SubscriptionSettings>,
    items: HashMap<u32, (u32, NodeId)>,
}

#[derive(Debug, Default)]
struct MockState {
    connected: bool,
    lost: bool,
    connect_calls: u64,
    disconnect_calls: u64,
    keep_alive_calls: u64,
    create_subscription_calls: u64,
    create_item_calls: u64,
    delete_item_calls: u64,
    delete_subscription_calls: u64,
    scripted_connect_errors: VecDeque<OpcUaError>,
    connect_error: Option<OpcUaError>,
    subscription_error: Option<OpcUaError>,
    item_call_errors: VecDeque<OpcUaError>,
    call_delay: Option<Duration>,
    next_subscription_id: u32,
    next_item_id: u32,
    sequence: u32,
    subscriptions: HashMap<u32, MockSubscription>,
    rejected_nodes: HashMap<NodeId, StatusCode>,
    values: HashMap<NodeId, Value>,
    sink: Option<NotificationSink>,
}

/// Test handle to a simulated server.
#[derive(Debug, Clone, Default)]
pub struct MockControl {
    state: Arc<Mutex<MockState>>,
}

impl MockControl {
    /// Fails the next `count` connect attempts with `error`.
    pub fn fail_next_connects(&self, count: usize, error: OpcUaError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.scripted_connect_errors.push_back(error.clone());
        }
    }

    /// Fails every connect attempt with `error` until cleared.
    pub fn set_connect_error(&self, error: Option<OpcUaError>) {
        self.state.lock().connect_error = error;
    }

    /// Fails every subscription creation with `error` until cleared.
    pub fn set_subscription_error(&self, error: Option<OpcUaError>) {
        self.state.lock().subscription_error = error;
    }

    /// Fails the next `count` create-monitored-items calls as a whole.
    pub fn fail_next_item_calls(&self, count: usize, error: OpcUaError) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.item_call_errors.push_back(error.clone());
        }
    }

    /// Delays every protocol call.
    pub fn set_call_delay(&self, delay: Option<Duration>) {
        self.state.lock().call_delay = delay;
    }

    /// Makes the server answer `status` for items on `node_id`.
    pub fn reject_node(&self, node_id: NodeId, status: StatusCode) {
        self.state.lock().rejected_nodes.insert(node_id, status);
    }

    /// Accepts items on `node_id` again.
    pub fn accept_node(&self, node_id: &NodeId) {
        self.state.lock().rejected_nodes.remove(node_id);
    }

    /// Sets the value returned by reads.
    pub fn set_value(&self, node_id: NodeId, value: Value) {
        self.state.lock().values.insert(node_id, value);
    }

    /// Simulates a lost session: keep-alive fails and server state is gone.
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.lost = true;
        state.connected = false;
        state.subscriptions.clear();
    }

    /// Publishes `value` for every monitored item on `node_id`.
    ///
    /// Returns the number of notifications handed to the sink.
    pub fn publish(&self, node_id: &NodeId, value: impl Into<Value>) -> usize {
        let value = value.into();
        let (sink, batches) = {
            let mut state = self.state.lock();
            if !state.connected {
                return 0;
            }
            state.sequence = state.sequence.wrapping_add(1);
            let sequence = state.sequence;
            let mut batches = Vec::new();
            for (subscription_id, subscription) in &state.subscriptions {
                let mut handles: Vec<u32> = subscription
                    .items
                    .values()
                    .filter(|(_, node)| node == node_id)
                    .map(|(handle, _)| *handle)
                    .collect();
                handles.sort_unstable();
                if handles.is_empty() {
                    continue;
                }
                let now = Utc::now();
                batches.push(NotificationBatch {
                    subscription_id: *subscription_id,
                    notifications: handles
                        .into_iter()
                        .map(|handle| Notification {
                            client_handle: handle,
                            sequence_number: sequence,
                            value: value.clone(),
                            status: StatusCode::GOOD,
                            source_timestamp: now,
                            server_timestamp: Some(now),
                            is_heartbeat: false,
                        })
                        .collect(),
                });
            }
            (state.sink.clone(), batches)
        };

        let Some(sink) = sink else { return 0 };
        batches
            .into_iter()
            .map(|batch| {
                let count = batch.notifications.len();
                if sink.deliver(batch) {
                    count
                } else {
                    0
                }
            })
            .sum()
    }

    /// Delivers a raw batch through the sink.
    pub fn deliver(&self, batch: NotificationBatch) -> bool {
        let sink = self.state.lock().sink.clone();
        sink.map(|sink| sink.deliver(batch)).unwrap_or(false)
    }

    /// Returns `true` while a session exists.
    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Number of connect attempts.
    pub fn connect_calls(&self) -> u64 {
        self.state.lock().connect_calls
    }

    /// Number of disconnects.
    pub fn disconnect_calls(&self) -> u64 {
        self.state.lock().disconnect_calls
    }

    /// Number of keep-alive checks.
    pub fn keep_alive_calls(&self) -> u64 {
        self.state.lock().keep_alive_calls
    }

    /// Number of create-subscription calls.
    pub fn create_subscription_calls(&self) -> u64 {
        self.state.lock().create_subscription_calls
    }

    /// Number of create-monitored-items calls.
    pub fn create_item_calls(&self) -> u64 {
        self.state.lock().create_item_calls
    }

    /// Number of delete-monitored-items calls.
    pub fn delete_item_calls(&self) -> u64 {
        self.state.lock().delete_item_calls
    }

    /// Number of delete-subscription calls.
    pub fn delete_subscription_calls(&self) -> u64 {
        self.state.lock().delete_subscription_calls
    }

    /// Number of live server-side subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// Number of live server-side monitored items.
    pub fn item_count(&self) -> usize {
        self.state
            .lock()
            .subscriptions
            .values()
            .map(|s| s.items.len())
            .sum()
    }

    /// Publishing intervals of live subscriptions, sorted.
    pub fn publishing_intervals(&self) -> Vec<Duration> {
        let mut intervals: Vec<Duration> = self
            .state
            .lock()
            .subscriptions
            .values()
            .filter_map(|s| s.settings.as_ref().map(|s| s.publishing_interval))
            .collect();
        intervals.sort();
        intervals
    }

    fn delay(&self) -> Option<Duration> {
        self.state.lock().call_delay
    }
}

// =============================================================================
// MockTransport
// =============================================================================

/// In-memory [`UaTransport`].
#[derive(Debug)]
pub struct MockTransport {
    endpoint: String,
    control: MockControl,
}

impl MockTransport {
    /// Creates a transport with its own simulated server.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_control(endpoint, MockControl::default())
    }

    /// Creates a transport bound to an existing simulated server.
    pub fn with_control(endpoint: impl Into<String>, control: MockControl) -> Self {
        {
            let mut state = control.state.lock();
            if state.next_subscription_id == 0 {
                state.next_subscription_id = 1;
                state.next_item_id = 1;
            }
        }
        Self {
            endpoint: endpoint.into(),
            control,
        }
    }

    /// Returns the control handle.
    pub fn control(&self) -> MockControl {
        self.control.clone()
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.control.delay() {
            tokio::time::sleep(delay).await;
        }
    }

    fn ensure_connected(state: &MockState) -> OpcUaResult<()> {
        if state.connected {
            Ok(())
        } else {
            Err(OpcUaError::not_connected())
        }
    }
}

#[async_trait]
impl UaTransport for MockTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.control.is_connected()
    }

    fn set_notification_sink(&mut self, sink: NotificationSink) {
        self.control.state.lock().sink = Some(sink);
    }

    async fn connect(&mut self, _config: &ConnectionConfig) -> OpcUaResult<()> {
        self.simulate_latency().await;
        let mut state = self.control.state.lock();
        state.connect_calls += 1;
        if let Some(error) = state.scripted_connect_errors.pop_front() {
            return Err(error);
        }
        if let Some(error) = state.connect_error.clone() {
            return Err(error);
        }
        state.connected = true;
        state.lost = false;
        Ok(())
    }

    async fn disconnect(&mut self) -> OpcUaResult<()> {
        let mut state = self.control.state.lock();
        state.disconnect_calls += 1;
        state.connected = false;
        state.subscriptions.clear();
        Ok(())
    }

    async fn keep_alive(&mut self) -> OpcUaResult<()> {
        self.simulate_latency().await;
        let mut state = self.control.state.lock();
        state.keep_alive_calls += 1;
        if state.lost {
            return Err(SessionError::keep_alive_failed("server unreachable").into());
        }
        Self::ensure_connected(&state)
    }

    async fn read_values(&mut self, node_ids: &[NodeId]) -> OpcUaResult<Vec<ReadResult>> {
        self.simulate_latency().await;
        let state = self.control.state.lock();
        Self::ensure_connected(&state)?;
        Ok(node_ids
            .iter()
            .map(|node_id| match state.values.get(node_id) {
                Some(value) => ReadResult {
                    node_id: node_id.clone(),
                    value: value.clone(),
                    status: StatusCode::GOOD,
                    source_timestamp: Some(Utc::now()),
                },
                None => ReadResult {
                    node_id: node_id.clone(),
                    value: Value::Null,
                    status: StatusCode::BAD_NODE_ID_UNKNOWN,
                    source_timestamp: None,
                },
            })
            .collect())
    }

    async fn write_values(&mut self, writes: &[(NodeId, Value)]) -> OpcUaResult<Vec<StatusCode>> {
        self.simulate_latency().await;
        let mut state = self.control.state.lock();
        Self::ensure_connected(&state)?;
        Ok(writes
            .iter()
            .map(|(node_id, value)| match state.rejected_nodes.get(node_id) {
                Some(status) => *status,
                None => {
                    state.values.insert(node_id.clone(), value.clone());
                    StatusCode::GOOD
                }
            })
            .collect())
    }

    async fn browse(&mut self, _node_id: &NodeId) -> OpcUaResult<Vec<BrowseReference>> {
        self.simulate_latency().await;
        let state = self.control.state.lock();
        Self::ensure_connected(&state)?;
        let mut references: Vec<BrowseReference> = state
            .values
            .keys()
            .map(|child| BrowseReference {
                node_id: child.clone(),
                browse_name: child.to_string(),
                display_name: child.to_string(),
                node_class: "Variable".to_string(),
            })
            .collect();
        references.sort_by_key(|r| r.browse_name.clone());
        Ok(references)
    }

    async fn create_subscription(
        &mut self,
        settings: &SubscriptionSettings,
    ) -> OpcUaResult<SubscriptionHandle> {
        self.simulate_latency().await;
        let mut state = self.control.state.lock();
        state.create_subscription_calls += 1;
        Self::ensure_connected(&state)?;
        if let Some(error) = state.subscription_error.clone() {
            return Err(error);
        }
        let server_id = state.next_subscription_id;
        state.next_subscription_id += 1;
        state.subscriptions.insert(
            server_id,
            MockSubscription {
                settings: Some(settings.clone()),
                items: HashMap::new(),
            },
        );
        Ok(SubscriptionHandle {
            server_id,
            revised_publishing_interval: settings.publishing_interval,
        })
    }

    async fn delete_subscription(&mut self, subscription_id: u32) -> OpcUaResult<()> {
        let mut state = self.control.state.lock();
        state.delete_subscription_calls += 1;
        Self::ensure_connected(&state)?;
        state
            .subscriptions
            .remove(&subscription_id)
            .map(|_| ())
            .ok_or_else(|| SubscriptionError::not_found(subscription_id.to_string()).into())
    }

    async fn create_monitored_items(
        &mut self,
        subscription_id: u32,
        items: &[MonitoredItemRequest],
    ) -> OpcUaResult<Vec<MonitoredItemResult>> {
        self.simulate_latency().await;
        let mut state = self.control.state.lock();
        state.create_item_calls += 1;
        Self::ensure_connected(&state)?;
        if let Some(error) = state.item_call_errors.pop_front() {
            return Err(error);
        }
        if !state.subscriptions.contains_key(&subscription_id) {
            return Err(SubscriptionError::not_found(subscription_id.to_string()).into());
        }

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            if let Some(status) = state.rejected_nodes.get(&item.node_id).copied() {
                results.push(MonitoredItemResult::rejected(item.client_handle, status));
                continue;
            }
            let server_id = state.next_item_id;
            state.next_item_id += 1;
            if let Some(subscription) = state.subscriptions.get_mut(&subscription_id) {
                subscription
                    .items
                    .insert(server_id, (item.client_handle, item.node_id.clone()));
            }
            results.push(MonitoredItemResult::accepted(item.client_handle, server_id));
        }
        Ok(results)
    }

    async fn delete_monitored_items(
        &mut self,
        subscription_id: u32,
        item_ids: &[u32],
    ) -> OpcUaResult<()> {
        let mut state = self.control.state.lock();
        state.delete_item_calls += 1;
        Self::ensure_connected(&state)?;
        let subscription = state
            .subscriptions
            .get_mut(&subscription_id)
            .ok_or_else(|| OpcUaError::from(SubscriptionError::not_found(subscription_id.to_string())))?;
        for id in item_ids {
            subscription.items.remove(id);
        }
        Ok(())
    }
}

// =============================================================================
// MockTransportFactory
// =============================================================================

/// Hands out mock transports, one simulated server per endpoint URL.
#[derive(Debug, Default)]
pub struct MockTransportFactory {
    servers: Mutex<HashMap<String, MockControl>>,
}

impl MockTransportFactory {
    /// Creates a factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the simulated server for `endpoint`, creating it on first use.
    pub fn control(&self, endpoint: &str) -> MockControl {
        self.servers
            .lock()
            .entry(endpoint.to_string())
            .or_default()
            .clone()
    }

    /// Number of simulated servers handed out.
    pub fn server_count(&self) -> usize {
        self.servers.lock().len()
    }
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, config: &ConnectionConfig) -> Box<dyn UaTransport> {
        let control = self.control(&config.endpoint_url);
        Box::new(MockTransport::with_control(config.endpoint_url.clone(), control))
    }
}
