// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Monitored items of one subscription.
//!
//! Item ids are unique within a [`MonitoredItemSet`]; client handles are
//! unique across the whole connection because every set of a connection
//! draws from the same [`HandleAllocator`]. The handle is the only key a
//! notification carries back.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use uapub_core::{StatusCode, Value};

use crate::client::channel::SessionChannel;
use crate::client::transport::{MonitoredItemRequest, Notification};
use crate::error::{OpcUaError, OpcUaResult, SubscriptionError};
use crate::types::{MonitoredItemSpec, NodeId};

// =============================================================================
// HandleAllocator
// =============================================================================

/// Connection-wide client handle source.
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU32,
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }
}

impl HandleAllocator {
    /// Creates an allocator starting at 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh non-zero handle.
    pub fn allocate(&self) -> u32 {
        loop {
            let handle = self.next.fetch_add(1, Ordering::Relaxed);
            if handle != 0 {
                return handle;
            }
        }
    }
}

// =============================================================================
// ItemState
// =============================================================================

/// The last real or heartbeat value of an item.
#[derive(Debug, Clone, PartialEq)]
pub struct LastValue {
    /// Value.
    pub value: Value,
    /// Status.
    pub status: StatusCode,
    /// Source timestamp of the value, advanced by each heartbeat.
    pub source_timestamp: DateTime<Utc>,
    /// When the value was last emitted.
    pub emitted_at: tokio::time::Instant,
}

/// Runtime state of one accepted monitored item.
#[derive(Debug)]
pub struct ItemState {
    spec: MonitoredItemSpec,
    subscription: Arc<str>,
    client_handle: u32,
    server_id: AtomicU32,
    skip_next: AtomicBool,
    degraded: AtomicBool,
    pub(crate) last: Mutex<Option<LastValue>>,
}

impl ItemState {
    fn new(spec: MonitoredItemSpec, subscription: Arc<str>, client_handle: u32) -> Self {
        Self {
            spec,
            subscription,
            client_handle,
            server_id: AtomicU32::new(0),
            skip_next: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            last: Mutex::new(None),
        }
    }

    /// Item id within its subscription.
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Monitored node.
    pub fn node_id(&self) -> &NodeId {
        &self.spec.node_id
    }

    /// Display name.
    pub fn display_name(&self) -> &str {
        &self.spec.display_name
    }

    /// The requested settings.
    pub fn spec(&self) -> &MonitoredItemSpec {
        &self.spec
    }

    /// Owning subscription name.
    pub fn subscription(&self) -> &str {
        &self.subscription
    }

    /// Connection-unique client handle.
    pub fn client_handle(&self) -> u32 {
        self.client_handle
    }

    /// Heartbeat interval, if any.
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.spec.heartbeat_interval
    }

    /// Server-assigned id; 0 while stale or rejected.
    pub fn server_id(&self) -> u32 {
        self.server_id.load(Ordering::Acquire)
    }

    /// Returns `true` if the last (re)creation failed.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Returns the last recorded value.
    pub fn last_value(&self) -> Option<LastValue> {
        self.last.lock().clone()
    }

    fn activate(&self, server_id: u32) {
        self.server_id.store(server_id, Ordering::Release);
        self.degraded.store(false, Ordering::Release);
        self.skip_next.store(self.spec.skip_first, Ordering::Release);
    }

    fn degrade(&self) {
        self.server_id.store(0, Ordering::Release);
        self.degraded.store(true, Ordering::Release);
    }

    /// Consumes the pending skip-first suppression, if armed.
    pub fn take_skip(&self) -> bool {
        self.skip_next.swap(false, Ordering::AcqRel)
    }

    /// Records a real value; restarts the heartbeat timer.
    pub fn record(&self, notification: &Notification, now: tokio::time::Instant) {
        *self.last.lock() = Some(LastValue {
            value: notification.value.clone(),
            status: notification.status,
            source_timestamp: notification.source_timestamp,
            emitted_at: now,
        });
    }

    fn request(&self) -> MonitoredItemRequest {
        MonitoredItemRequest {
            client_handle: self.client_handle,
            node_id: self.spec.node_id.clone(),
            sampling_interval: self.spec.sampling_interval,
            queue_size: self.spec.queue_size,
            discard_oldest: self.spec.discard_oldest,
        }
    }
}

// =============================================================================
// MonitoredItemSet
// =============================================================================

/// Result of adding one item.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    /// Item id.
    pub id: String,
    /// The client handle, or why the item was not added.
    pub result: OpcUaResult<u32>,
}

impl ItemOutcome {
    /// Returns `true` if the item was added.
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Result of recreating one item after reconnect.
#[derive(Debug, Clone)]
pub struct ItemReplay {
    /// Item id.
    pub id: String,
    /// Why recreation failed, if it did.
    pub error: Option<OpcUaError>,
}

/// The items of one subscription.
#[derive(Debug)]
pub struct MonitoredItemSet {
    subscription: Arc<str>,
    allocator: Arc<HandleAllocator>,
    items: RwLock<BTreeMap<String, Arc<ItemState>>>,
    pending: Mutex<HashSet<String>>,
}

impl MonitoredItemSet {
    /// Creates an empty set.
    pub fn new(subscription: impl Into<Arc<str>>, allocator: Arc<HandleAllocator>) -> Self {
        Self {
            subscription: subscription.into(),
            allocator,
            items: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(HashSet::new()),
        }
    }

    /// Number of registered items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Returns `true` if no item is registered.
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Returns `true` if `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.items.read().contains_key(id)
    }

    /// Returns an item by id.
    pub fn get(&self, id: &str) -> Option<Arc<ItemState>> {
        self.items.read().get(id).cloned()
    }

    /// Registered item ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        self.items.read().keys().cloned().collect()
    }

    /// All registered items.
    pub fn snapshot(&self) -> Vec<Arc<ItemState>> {
        self.items.read().values().cloned().collect()
    }

    /// Number of adds currently waiting for the server.
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of items whose last (re)creation failed.
    pub fn degraded_count(&self) -> usize {
        self.items.read().values().filter(|i| i.is_degraded()).count()
    }

    /// Adds items with one protocol call.
    ///
    /// Ids already registered, in flight in a concurrent add, or repeated in
    /// `specs` fail with Conflict. Items the server rejects fail individually
    /// and are not registered. Outcomes follow the order of `specs`.
    pub async fn add(
        &self,
        channel: &SessionChannel,
        subscription_id: u32,
        specs: Vec<MonitoredItemSpec>,
    ) -> Vec<ItemOutcome> {
        let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; specs.len()];
        let mut accepted: Vec<(usize, Arc<ItemState>)> = Vec::new();

        {
            let items = self.items.read();
            let mut pending = self.pending.lock();
            for (index, spec) in specs.into_iter().enumerate() {
                if items.contains_key(&spec.id) || !pending.insert(spec.id.clone()) {
                    outcomes[index] = Some(ItemOutcome {
                        result: Err(SubscriptionError::item_already_added(
                            self.subscription.as_ref(),
                            spec.id.as_str(),
                        )
                        .into()),
                        id: spec.id,
                    });
                    continue;
                }
                let handle = self.allocator.allocate();
                accepted.push((
                    index,
                    Arc::new(ItemState::new(spec, Arc::clone(&self.subscription), handle)),
                ));
            }
        }

        if !accepted.is_empty() {
            let _in_flight = InFlight {
                pending: &self.pending,
                ids: accepted.iter().map(|(_, item)| item.id().to_string()).collect(),
            };
            let requests: Vec<MonitoredItemRequest> =
                accepted.iter().map(|(_, item)| item.request()).collect();
            let response = channel.create_monitored_items(subscription_id, &requests).await;

            let results: HashMap<u32, _> = match &response {
                Ok(results) => results.iter().map(|r| (r.client_handle, *r)).collect(),
                Err(_) => HashMap::new(),
            };

            let mut items = self.items.write();
            for (index, item) in &accepted {
                let result = match &response {
                    Err(e) => Err(e.clone()),
                    Ok(_) => match results.get(&item.client_handle) {
                        Some(r) if r.status.is_good() => {
                            item.activate(r.server_id);
                            items.insert(item.id().to_string(), Arc::clone(item));
                            Ok(item.client_handle)
                        }
                        other => {
                            let status = other.map(|r| r.status).unwrap_or(StatusCode::BAD);
                            Err(SubscriptionError::item_rejected(
                                item.id(),
                                item.node_id().to_string(),
                                status,
                            )
                            .into())
                        }
                    },
                };
                if let Err(e) = &result {
                    tracing::warn!(
                        subscription = %self.subscription,
                        item = item.id(),
                        node_id = %item.node_id(),
                        error = %e,
                        "Monitored item not added"
                    );
                }
                outcomes[*index] = Some(ItemOutcome {
                    id: item.id().to_string(),
                    result,
                });
            }
        }

        let added = outcomes.iter().flatten().filter(|o| o.is_ok()).count();
        tracing::debug!(subscription = %self.subscription, added, requested = outcomes.len(), "Monitored items added");
        outcomes.into_iter().flatten().collect()
    }

    /// Registers items without a protocol call.
    ///
    /// Used while the subscription is not bound on the server; the items
    /// are created by the next [`replay`](Self::replay). Conflicts are
    /// checked as in [`add`](Self::add).
    pub fn add_pending(&self, specs: Vec<MonitoredItemSpec>) -> Vec<ItemOutcome> {
        let mut items = self.items.write();
        let pending = self.pending.lock();
        specs
            .into_iter()
            .map(|spec| {
                if items.contains_key(&spec.id) || pending.contains(&spec.id) {
                    return ItemOutcome {
                        result: Err(SubscriptionError::item_already_added(
                            self.subscription.as_ref(),
                            spec.id.as_str(),
                        )
                        .into()),
                        id: spec.id,
                    };
                }
                let handle = self.allocator.allocate();
                let item = Arc::new(ItemState::new(spec, Arc::clone(&self.subscription), handle));
                let id = item.id().to_string();
                items.insert(id.clone(), item);
                ItemOutcome {
                    id,
                    result: Ok(handle),
                }
            })
            .collect()
    }

    /// Removes items. Unknown ids are ignored; returns the number removed.
    ///
    /// Server-side deletion is best-effort.
    pub async fn remove(&self, channel: &SessionChannel, subscription_id: u32, ids: &[String]) -> usize {
        let removed: Vec<Arc<ItemState>> = {
            let mut items = self.items.write();
            ids.iter().filter_map(|id| items.remove(id)).collect()
        };

        let server_ids: Vec<u32> = removed
            .iter()
            .map(|i| i.server_id())
            .filter(|id| *id != 0)
            .collect();
        if !server_ids.is_empty() && subscription_id != 0 {
            if let Err(e) = channel.delete_monitored_items(subscription_id, &server_ids).await {
                tracing::warn!(
                    subscription = %self.subscription,
                    count = server_ids.len(),
                    error = %e,
                    "Failed to delete monitored items on server, continuing"
                );
            }
        }
        removed.len()
    }

    /// Forgets server-side ids after the session was lost.
    pub fn mark_stale(&self) {
        for item in self.items.read().values() {
            item.server_id.store(0, Ordering::Release);
        }
    }

    /// Marks every item degraded.
    pub fn degrade_all(&self) {
        for item in self.items.read().values() {
            item.degrade();
        }
    }

    /// Recreates every item on the server under its existing client handle.
    ///
    /// Items that fail are marked degraded and kept; skip-first is re-armed
    /// for the others.
    pub async fn replay(&self, channel: &SessionChannel, subscription_id: u32) -> Vec<ItemReplay> {
        let items = self.snapshot();
        if items.is_empty() {
            return Vec::new();
        }

        let requests: Vec<MonitoredItemRequest> = items.iter().map(|i| i.request()).collect();
        match channel.create_monitored_items(subscription_id, &requests).await {
            Ok(results) => {
                let by_handle: HashMap<u32, _> =
                    results.iter().map(|r| (r.client_handle, *r)).collect();
                items
                    .iter()
                    .map(|item| match by_handle.get(&item.client_handle) {
                        Some(r) if r.status.is_good() => {
                            item.activate(r.server_id);
                            ItemReplay {
                                id: item.id().to_string(),
                                error: None,
                            }
                        }
                        other => {
                            item.degrade();
                            let status = other.map(|r| r.status).unwrap_or(StatusCode::BAD);
                            ItemReplay {
                                id: item.id().to_string(),
                                error: Some(
                                    SubscriptionError::item_rejected(
                                        item.id(),
                                        item.node_id().to_string(),
                                        status,
                                    )
                                    .into(),
                                ),
                            }
                        }
                    })
                    .collect()
            }
            Err(e) => items
                .iter()
                .map(|item| {
                    item.degrade();
                    ItemReplay {
                        id: item.id().to_string(),
                        error: Some(e.clone()),
                    }
                })
                .collect(),
        }
    }
}

/// Ids reserved by an [`MonitoredItemSet::add`] waiting for the server.
/// Released on drop, so a cancelled add frees its ids.
struct InFlight<'a> {
    pending: &'a Mutex<HashSet<String>>,
    ids: Vec<String>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        for id in &self.ids {
            pending.remove(id);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::MockTransport;
    use crate::types::{ConnectionConfig, SubscriptionSettings};
    use uapub_core::{Classified, ErrorClass};

    async fn setup() -> (SessionChannel, crate::client::mock::MockControl, u32) {
        let transport = MockTransport::new("opc.tcp://plc:4840");
        let control = transport.control();
        let channel = SessionChannel::new(Box::new(transport), Duration::from_secs(1));
        channel
            .connect(&ConnectionConfig::new("opc.tcp://plc:4840"))
            .await
            .unwrap();
        let handle = channel
            .create_subscription(&SubscriptionSettings::default())
            .await
            .unwrap();
        (channel, control, handle.server_id)
    }

    fn spec(id: &str) -> MonitoredItemSpec {
        MonitoredItemSpec::new(format!("ns=2;s={id}").parse().unwrap())
    }

    #[tokio::test]
    async fn test_duplicate_ids_conflict() {
        let (channel, _control, sub) = setup().await;
        let set = MonitoredItemSet::new("s1", Arc::new(HandleAllocator::new()));

        let first = set.add(&channel, sub, vec![spec("A"), spec("A")]).await;
        assert!(first[0].is_ok());
        assert_eq!(
            first[1].result.as_ref().unwrap_err().class(),
            ErrorClass::Conflict
        );

        let second = set.add(&channel, sub, vec![spec("A"), spec("B")]).await;
        assert_eq!(
            second[0].result.as_ref().unwrap_err().class(),
            ErrorClass::Conflict
        );
        assert!(second[1].is_ok());
        assert_eq!(set.len(), 2);
    }

    #[tokio::test]
    async fn test_bad_node_fails_only_that_item() {
        let (channel, control, sub) = setup().await;
        control.reject_node("ns=2;s=Missing".parse().unwrap(), StatusCode::BAD_NODE_ID_UNKNOWN);
        let set = MonitoredItemSet::new("s1", Arc::new(HandleAllocator::new()));

        let outcomes = set
            .add(&channel, sub, vec![spec("A"), spec("Missing"), spec("C")])
            .await;
        assert!(outcomes[0].is_ok());
        assert_eq!(
            outcomes[1].result.as_ref().unwrap_err().class(),
            ErrorClass::Fatal
        );
        assert!(outcomes[2].is_ok());
        assert_eq!(set.ids(), vec!["ns=2;s=A".to_string(), "ns=2;s=C".to_string()]);
        assert_eq!(control.create_item_calls(), 1);
    }

    #[tokio::test]
    async fn test_handles_unique_across_sets() {
        let (channel, _control, sub) = setup().await;
        let allocator = Arc::new(HandleAllocator::new());
        let a = MonitoredItemSet::new("a", Arc::clone(&allocator));
        let b = MonitoredItemSet::new("b", Arc::clone(&allocator));

        let ha = a.add(&channel, sub, vec![spec("X")]).await[0].result.clone().unwrap();
        let hb = b.add(&channel, sub, vec![spec("X")]).await[0].result.clone().unwrap();
        assert_ne!(ha, hb);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let (channel, control, sub) = setup().await;
        let set = MonitoredItemSet::new("s1", Arc::new(HandleAllocator::new()));
        set.add(&channel, sub, vec![spec("A"), spec("B")]).await;

        let ids = vec!["ns=2;s=A".to_string(), "ns=2;s=Unknown".to_string()];
        assert_eq!(set.remove(&channel, sub, &ids).await, 1);
        assert_eq!(set.remove(&channel, sub, &ids).await, 0);
        assert_eq!(set.len(), 1);
        assert_eq!(control.item_count(), 1);
    }

    #[tokio::test]
    async fn test_whole_call_failure_registers_nothing() {
        let (channel, control, sub) = setup().await;
        control.fail_next_item_calls(1, OpcUaError::not_connected());
        let set = MonitoredItemSet::new("s1", Arc::new(HandleAllocator::new()));

        let outcomes = set.add(&channel, sub, vec![spec("A"), spec("B")]).await;
        assert!(outcomes.iter().all(|o| !o.is_ok()));
        assert!(set.is_empty());

        let retry = set.add(&channel, sub, vec![spec("A")]).await;
        assert!(retry[0].is_ok());
    }

    #[tokio::test]
    async fn test_replay_keeps_handles_and_degrades_failures() {
        let (channel, control, sub) = setup().await;
        let set = MonitoredItemSet::new("s1", Arc::new(HandleAllocator::new()));
        set.add(&channel, sub, vec![spec("A").with_skip_first(true), spec("B")])
            .await;
        let handle_a = set.get("ns=2;s=A").unwrap().client_handle();
        assert!(set.get("ns=2;s=A").unwrap().take_skip());

        set.mark_stale();
        control.reject_node("ns=2;s=B".parse().unwrap(), StatusCode::BAD_NODE_ID_UNKNOWN);
        let replay = set.replay(&channel, sub).await;

        assert_eq!(replay.len(), 2);
        let a = set.get("ns=2;s=A").unwrap();
        assert_eq!(a.client_handle(), handle_a);
        assert!(a.take_skip());
        assert!(set.get("ns=2;s=B").unwrap().is_degraded());
        assert_eq!(set.degraded_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_add_releases_ids() {
        let (channel, control, sub) = setup().await;
        control.set_call_delay(Some(Duration::from_millis(500)));
        let set = MonitoredItemSet::new("s1", Arc::new(HandleAllocator::new()));

        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), set.add(&channel, sub, vec![spec("A")]))
                .await;
        assert!(cancelled.is_err());
        assert_eq!(set.in_flight(), 0);
        assert!(set.is_empty());

        control.set_call_delay(None);
        let retry = set.add(&channel, sub, vec![spec("A")]).await;
        assert!(retry[0].is_ok());
        assert_eq!(control.item_count(), 1);
    }

    #[tokio::test]
    async fn test_pending_items_bound_by_replay() {
        let (channel, control, sub) = setup().await;
        let set = MonitoredItemSet::new("s1", Arc::new(HandleAllocator::new()));

        let outcomes = set.add_pending(vec![spec("A").with_skip_first(true), spec("A")]);
        assert!(outcomes[0].is_ok());
        assert_eq!(
            outcomes[1].result.as_ref().unwrap_err().class(),
            ErrorClass::Conflict
        );
        let a = set.get("ns=2;s=A").unwrap();
        assert_eq!(a.server_id(), 0);
        assert!(!a.is_degraded());
        assert_eq!(control.create_item_calls(), 0);

        let replay = set.replay(&channel, sub).await;
        assert!(replay.iter().all(|r| r.error.is_none()));
        assert_ne!(a.server_id(), 0);
        assert!(a.take_skip());
        assert_eq!(control.item_count(), 1);
    }
}
