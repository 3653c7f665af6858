// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Named subscriptions of one connection.
//!
//! A name is reserved before the protocol call that creates the
//! subscription, so two concurrent creates of the same name cannot both
//! succeed; the reservation is released if the call fails or is dropped.
//! A subscription owning items cannot be removed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use uapub_core::ConnectionId;

use crate::client::channel::SessionChannel;
use crate::client::monitored::{HandleAllocator, ItemState, MonitoredItemSet};
use crate::client::transport::SubscriptionHandle;
use crate::error::{OpcUaResult, SubscriptionError};
use crate::types::SubscriptionSettings;

// =============================================================================
// Subscription
// =============================================================================

/// One named subscription and its items.
#[derive(Debug)]
pub struct Subscription {
    name: Arc<str>,
    settings: SubscriptionSettings,
    server_id: AtomicU32,
    revised_publishing_interval: Mutex<Duration>,
    items: MonitoredItemSet,
}

impl Subscription {
    fn new(
        name: Arc<str>,
        settings: SubscriptionSettings,
        handle: SubscriptionHandle,
        allocator: Arc<HandleAllocator>,
    ) -> Self {
        Self {
            items: MonitoredItemSet::new(Arc::clone(&name), allocator),
            name,
            server_id: AtomicU32::new(handle.server_id),
            revised_publishing_interval: Mutex::new(handle.revised_publishing_interval),
            settings,
        }
    }

    /// Subscription name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Requested settings.
    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    /// Server-assigned id; 0 while stale.
    pub fn server_id(&self) -> u32 {
        self.server_id.load(Ordering::Acquire)
    }

    /// Returns `true` if the server-side subscription is gone.
    pub fn is_stale(&self) -> bool {
        self.server_id() == 0
    }

    /// Publishing interval granted by the server.
    pub fn revised_publishing_interval(&self) -> Duration {
        *self.revised_publishing_interval.lock()
    }

    /// The items of this subscription.
    pub fn items(&self) -> &MonitoredItemSet {
        &self.items
    }

    pub(crate) fn bind(&self, handle: SubscriptionHandle) {
        self.server_id.store(handle.server_id, Ordering::Release);
        *self.revised_publishing_interval.lock() = handle.revised_publishing_interval;
    }

    pub(crate) fn mark_stale(&self) {
        self.server_id.store(0, Ordering::Release);
        self.items.mark_stale();
    }
}

// =============================================================================
// SubscriptionRegistry
// =============================================================================

#[derive(Debug)]
enum Slot {
    Reserved,
    Ready(Arc<Subscription>),
}

/// The subscriptions of one connection, keyed by name.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    connection: ConnectionId,
    allocator: Arc<HandleAllocator>,
    slots: RwLock<BTreeMap<String, Slot>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new(connection: ConnectionId, allocator: Arc<HandleAllocator>) -> Self {
        Self {
            connection,
            allocator,
            slots: RwLock::new(BTreeMap::new()),
        }
    }

    /// Creates a subscription.
    ///
    /// # Errors
    ///
    /// Conflict if `name` exists or is being created; the protocol error if
    /// the server refuses. The name is released when the create fails or
    /// is dropped before completing.
    pub async fn create(
        &self,
        channel: &SessionChannel,
        name: &str,
        settings: SubscriptionSettings,
    ) -> OpcUaResult<Arc<Subscription>> {
        settings.validate()?;

        let reservation = {
            let mut slots = self.slots.write();
            if slots.contains_key(name) {
                return Err(SubscriptionError::already_exists(name).into());
            }
            slots.insert(name.to_string(), Slot::Reserved);
            Reservation {
                slots: &self.slots,
                name,
                committed: false,
            }
        };

        let handle = channel.create_subscription(&settings).await?;
        let subscription = Arc::new(Subscription::new(
            Arc::from(name),
            settings,
            handle,
            Arc::clone(&self.allocator),
        ));
        reservation.commit(Arc::clone(&subscription));
        tracing::info!(
            connection = %self.connection,
            subscription = name,
            server_id = handle.server_id,
            publishing_interval_ms = handle.revised_publishing_interval.as_millis() as u64,
            "Subscription created"
        );
        Ok(subscription)
    }

    /// Registers a subscription the server does not know yet.
    ///
    /// The subscription stays stale until the next replay creates it.
    ///
    /// # Errors
    ///
    /// Conflict if `name` exists or is being created.
    pub fn register_pending(
        &self,
        name: &str,
        settings: SubscriptionSettings,
    ) -> OpcUaResult<Arc<Subscription>> {
        settings.validate()?;

        let mut slots = self.slots.write();
        if slots.contains_key(name) {
            return Err(SubscriptionError::already_exists(name).into());
        }
        let handle = SubscriptionHandle {
            server_id: 0,
            revised_publishing_interval: settings.publishing_interval,
        };
        let subscription = Arc::new(Subscription::new(
            Arc::from(name),
            settings,
            handle,
            Arc::clone(&self.allocator),
        ));
        slots.insert(name.to_string(), Slot::Ready(Arc::clone(&subscription)));
        tracing::info!(
            connection = %self.connection,
            subscription = name,
            "Subscription registered, waiting for the session"
        );
        Ok(subscription)
    }

    /// Removes an empty subscription.
    ///
    /// # Errors
    ///
    /// NotFound for unknown names; InvalidState while the subscription owns
    /// items, leaving it untouched. Server-side deletion is best-effort.
    pub async fn remove(&self, channel: &SessionChannel, name: &str) -> OpcUaResult<()> {
        let subscription = {
            let mut slots = self.slots.write();
            let subscription = match slots.get(name) {
                Some(Slot::Ready(subscription)) => Arc::clone(subscription),
                Some(Slot::Reserved) | None => {
                    return Err(SubscriptionError::not_found(name).into())
                }
            };
            let remaining = subscription.items.len() + subscription.items.in_flight();
            if remaining > 0 {
                return Err(SubscriptionError::not_empty(name, remaining).into());
            }
            slots.remove(name);
            subscription
        };

        let server_id = subscription.server_id();
        if server_id != 0 {
            if let Err(e) = channel.delete_subscription(server_id).await {
                tracing::warn!(
                    connection = %self.connection,
                    subscription = name,
                    error = %e,
                    "Failed to delete subscription on server, continuing"
                );
            }
        }
        tracing::info!(connection = %self.connection, subscription = name, "Subscription removed");
        Ok(())
    }

    /// Returns a subscription by name.
    pub fn find(&self, name: &str) -> OpcUaResult<Arc<Subscription>> {
        match self.slots.read().get(name) {
            Some(Slot::Ready(subscription)) => Ok(Arc::clone(subscription)),
            _ => Err(SubscriptionError::not_found(name).into()),
        }
    }

    /// Names of created subscriptions, sorted.
    pub fn names(&self) -> Vec<String> {
        self.slots
            .read()
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of created subscriptions.
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    /// Returns `true` if no subscription exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All created subscriptions, sorted by name.
    pub fn snapshot(&self) -> Vec<Arc<Subscription>> {
        self.slots
            .read()
            .values()
            .filter_map(|slot| match slot {
                Slot::Ready(subscription) => Some(Arc::clone(subscription)),
                Slot::Reserved => None,
            })
            .collect()
    }

    /// Every item of every subscription.
    pub fn all_items(&self) -> Vec<Arc<ItemState>> {
        self.snapshot()
            .iter()
            .flat_map(|s| s.items.snapshot())
            .collect()
    }

    /// Marks every subscription and item stale after the session was lost.
    pub fn mark_stale(&self) {
        for subscription in self.snapshot() {
            subscription.mark_stale();
        }
    }
}

/// A name reserved for a create in progress.
struct Reservation<'a> {
    slots: &'a RwLock<BTreeMap<String, Slot>>,
    name: &'a str,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self, subscription: Arc<Subscription>) {
        self.slots
            .write()
            .insert(self.name.to_string(), Slot::Ready(subscription));
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut slots = self.slots.write();
        if matches!(slots.get(self.name), Some(Slot::Reserved)) {
            slots.remove(self.name);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{MockControl, MockTransport};
    use crate::types::{ConnectionConfig, MonitoredItemSpec};
    use uapub_core::{Classified, ErrorClass};

    async fn setup() -> (SessionChannel, MockControl, SubscriptionRegistry) {
        let transport = MockTransport::new("opc.tcp://plc:4840");
        let control = transport.control();
        let channel = SessionChannel::new(Box::new(transport), Duration::from_secs(1));
        channel
            .connect(&ConnectionConfig::new("opc.tcp://plc:4840"))
            .await
            .unwrap();
        let registry = SubscriptionRegistry::new(
            ConnectionId::new("test"),
            Arc::new(HandleAllocator::new()),
        );
        (channel, control, registry)
    }

    #[tokio::test]
    async fn test_duplicate_create_conflicts() {
        let (channel, control, registry) = setup().await;
        registry
            .create(&channel, "fast", SubscriptionSettings::default())
            .await
            .unwrap();

        let err = registry
            .create(&channel, "fast", SubscriptionSettings::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);
        assert_eq!(registry.len(), 1);
        assert_eq!(control.create_subscription_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_create_same_name() {
        let (channel, control, registry) = setup().await;
        control.set_call_delay(Some(Duration::from_millis(50)));

        let (a, b) = tokio::join!(
            registry.create(&channel, "fast", SubscriptionSettings::default()),
            registry.create(&channel, "fast", SubscriptionSettings::default()),
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(registry.names(), vec!["fast".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_create_releases_name() {
        let (channel, control, registry) = setup().await;
        control.set_subscription_error(Some(crate::error::OpcUaError::not_connected()));
        assert!(registry
            .create(&channel, "fast", SubscriptionSettings::default())
            .await
            .is_err());
        assert!(registry.is_empty());

        control.set_subscription_error(None);
        assert!(registry
            .create(&channel, "fast", SubscriptionSettings::default())
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_create_releases_name() {
        let (channel, control, registry) = setup().await;
        control.set_call_delay(Some(Duration::from_millis(500)));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(100),
            registry.create(&channel, "fast", SubscriptionSettings::default()),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(registry.is_empty());
        assert_eq!(control.subscription_count(), 0);

        control.set_call_delay(None);
        registry
            .create(&channel, "fast", SubscriptionSettings::default())
            .await
            .unwrap();
        assert_eq!(registry.names(), vec!["fast".to_string()]);
    }

    #[tokio::test]
    async fn test_pending_subscription_is_stale_until_bound() {
        let (channel, control, registry) = setup().await;
        let sub = registry
            .register_pending("slow", SubscriptionSettings::with_interval(Duration::from_secs(5)))
            .unwrap();
        assert!(sub.is_stale());
        assert_eq!(sub.revised_publishing_interval(), Duration::from_secs(5));
        assert_eq!(control.create_subscription_calls(), 0);

        let err = registry
            .create(&channel, "slow", SubscriptionSettings::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Conflict);

        registry.remove(&channel, "slow").await.unwrap();
        assert!(registry.is_empty());
        assert_eq!(control.delete_subscription_calls(), 0);
    }

    #[tokio::test]
    async fn test_remove_not_empty_leaves_state_intact() {
        let (channel, control, registry) = setup().await;
        let sub = registry
            .create(&channel, "fast", SubscriptionSettings::default())
            .await
            .unwrap();
        let spec = MonitoredItemSpec::new("ns=2;s=A".parse().unwrap());
        sub.items().add(&channel, sub.server_id(), vec![spec]).await;

        let err = registry.remove(&channel, "fast").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::InvalidState);
        assert_eq!(registry.find("fast").unwrap().items().len(), 1);
        assert_eq!(control.subscription_count(), 1);
        assert_eq!(control.item_count(), 1);

        sub.items()
            .remove(&channel, sub.server_id(), &["ns=2;s=A".to_string()])
            .await;
        registry.remove(&channel, "fast").await.unwrap();
        assert!(registry.is_empty());
        assert_eq!(control.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_find_and_remove_unknown() {
        let (channel, _control, registry) = setup().await;
        assert_eq!(registry.find("nope").unwrap_err().class(), ErrorClass::NotFound);
        assert_eq!(
            registry.remove(&channel, "nope").await.unwrap_err().class(),
            ErrorClass::NotFound
        );
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let (channel, control, registry) = setup().await;
        let err = registry
            .create(&channel, "bad", SubscriptionSettings::with_interval(Duration::ZERO))
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert_eq!(control.create_subscription_calls(), 0);
    }
}
