// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notification to monitored item matching.
//!
//! The matcher keeps a `client handle → item` index as an immutable snapshot
//! behind an `Arc`. Rebuilding swaps in a new snapshot; readers clone the
//! `Arc` and never hold the lock while matching.
//!
//! ```text
//! NotificationBatch ──► match_batch ──► [MatchedNotification] (server order)
//!                          │
//!                          ├─ unknown handle  → dropped, counted
//!                          └─ skip-first armed → suppressed, counted
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Instant;

use crate::client::monitored::ItemState;
use crate::client::transport::Notification;

/// A notification resolved to its monitored item.
#[derive(Debug, Clone)]
pub struct MatchedNotification {
    /// The item.
    pub item: Arc<ItemState>,
    /// The notification.
    pub notification: Notification,
}

impl MatchedNotification {
    /// Owning subscription name.
    pub fn subscription(&self) -> &str {
        self.item.subscription()
    }
}

/// Matcher statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatcherStats {
    /// Notifications matched to an item.
    pub matched: u64,
    /// Notifications with an unknown client handle.
    pub unknown: u64,
    /// Notifications suppressed by skip-first.
    pub suppressed: u64,
    /// Items in the current index.
    pub indexed: usize,
}

/// Resolves client handles to items.
#[derive(Debug, Default)]
pub struct NotificationMatcher {
    index: RwLock<Arc<HashMap<u32, Arc<ItemState>>>>,
    matched: AtomicU64,
    unknown: AtomicU64,
    suppressed: AtomicU64,
}

impl NotificationMatcher {
    /// Creates an empty matcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the index with one built from `items`.
    pub fn rebuild<I>(&self, items: I)
    where
        I: IntoIterator<Item = Arc<ItemState>>,
    {
        let index: HashMap<u32, Arc<ItemState>> = items
            .into_iter()
            .map(|item| (item.client_handle(), item))
            .collect();
        let size = index.len();
        *self.index.write() = Arc::new(index);
        tracing::trace!(indexed = size, "Notification matcher index rebuilt");
    }

    /// Returns the current index snapshot.
    pub fn snapshot(&self) -> Arc<HashMap<u32, Arc<ItemState>>> {
        self.index.read().clone()
    }

    /// Returns every indexed item.
    pub fn items(&self) -> Vec<Arc<ItemState>> {
        self.snapshot().values().cloned().collect()
    }

    /// Looks up one handle.
    pub fn lookup(&self, client_handle: u32) -> Option<Arc<ItemState>> {
        self.snapshot().get(&client_handle).cloned()
    }

    /// Matches a batch in one pass, preserving server order.
    ///
    /// Unknown handles are dropped. A notification whose item has skip-first
    /// armed is suppressed but still recorded as the item's last value, so
    /// it seeds the item's heartbeat (see [`crate::heartbeat`]).
    pub fn match_batch(&self, notifications: Vec<Notification>) -> Vec<MatchedNotification> {
        let index = self.snapshot();
        let now = Instant::now();
        let mut matched = Vec::with_capacity(notifications.len());
        let mut unknown = 0u64;
        let mut suppressed = 0u64;

        for notification in notifications {
            let Some(item) = index.get(&notification.client_handle) else {
                unknown += 1;
                continue;
            };
            item.record(&notification, now);
            if item.take_skip() {
                suppressed += 1;
                continue;
            }
            matched.push(MatchedNotification {
                item: Arc::clone(item),
                notification,
            });
        }

        if unknown > 0 {
            let total = self.unknown.fetch_add(unknown, Ordering::Relaxed) + unknown;
            tracing::debug!(dropped = unknown, total_unknown = total, "Dropped notifications with unknown client handle");
        }
        self.suppressed.fetch_add(suppressed, Ordering::Relaxed);
        self.matched.fetch_add(matched.len() as u64, Ordering::Relaxed);
        matched
    }

    /// Returns statistics.
    pub fn stats(&self) -> MatcherStats {
        MatcherStats {
            matched: self.matched.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            indexed: self.index.read().len(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::client::channel::SessionChannel;
    use crate::client::mock::MockTransport;
    use crate::client::monitored::{HandleAllocator, MonitoredItemSet};
    use crate::types::{ConnectionConfig, MonitoredItemSpec, SubscriptionSettings};

    async fn items(names: &[&str], skip_first: &[&str]) -> Vec<Arc<ItemState>> {
        let transport = MockTransport::new("opc.tcp://plc:4840");
        let channel = SessionChannel::new(Box::new(transport), Duration::from_secs(1));
        channel
            .connect(&ConnectionConfig::new("opc.tcp://plc:4840"))
            .await
            .unwrap();
        let sub = channel
            .create_subscription(&SubscriptionSettings::default())
            .await
            .unwrap();
        let set = MonitoredItemSet::new("s1", Arc::new(HandleAllocator::new()));
        let specs = names
            .iter()
            .map(|n| {
                MonitoredItemSpec::new(format!("ns=2;s={n}").parse().unwrap())
                    .with_skip_first(skip_first.contains(n))
            })
            .collect();
        set.add(&channel, sub.server_id, specs).await;
        set.snapshot()
    }

    fn naive(items: &[Arc<ItemState>], notifications: &[Notification]) -> Vec<(u32, String)> {
        notifications
            .iter()
            .filter_map(|n| {
                items
                    .iter()
                    .find(|i| i.client_handle() == n.client_handle)
                    .map(|i| (n.client_handle, i.id().to_string()))
            })
            .collect()
    }

    #[tokio::test]
    async fn test_matches_naive_scan_and_preserves_order() {
        let items = items(&["A", "B", "C", "D"], &[]).await;
        let matcher = NotificationMatcher::new();
        matcher.rebuild(items.clone());

        let handles: Vec<u32> = items.iter().map(|i| i.client_handle()).collect();
        let notifications: Vec<Notification> = [3usize, 0, 2, 0, 1, 3]
            .iter()
            .enumerate()
            .map(|(seq, i)| Notification::new(handles[*i], seq as i32).with_sequence(seq as u32))
            .chain(std::iter::once(Notification::new(9999, 0i32)))
            .collect();

        let expected = naive(&items, &notifications);
        let matched = matcher.match_batch(notifications);
        let actual: Vec<(u32, String)> = matched
            .iter()
            .map(|m| (m.notification.client_handle, m.item.id().to_string()))
            .collect();

        assert_eq!(actual, expected);
        assert!(matched
            .windows(2)
            .all(|w| w[0].notification.sequence_number < w[1].notification.sequence_number));
        assert_eq!(matcher.stats().unknown, 1);
        assert_eq!(matcher.stats().matched, 6);
    }

    #[tokio::test]
    async fn test_skip_first_suppresses_once() {
        let items = items(&["A", "B"], &["A"]).await;
        let matcher = NotificationMatcher::new();
        matcher.rebuild(items.clone());
        let a = items.iter().find(|i| i.id() == "ns=2;s=A").unwrap();

        let first = matcher.match_batch(vec![Notification::new(a.client_handle(), 1i32)]);
        assert!(first.is_empty());
        assert!(a.last_value().is_some());

        let second = matcher.match_batch(vec![Notification::new(a.client_handle(), 2i32)]);
        assert_eq!(second.len(), 1);
        assert_eq!(matcher.stats().suppressed, 1);
    }

    #[tokio::test]
    async fn test_rebuild_drops_removed_items() {
        let items = items(&["A", "B"], &[]).await;
        let matcher = NotificationMatcher::new();
        matcher.rebuild(items.clone());
        let removed = items[0].client_handle();

        matcher.rebuild(items[1..].to_vec());
        assert!(matcher.lookup(removed).is_none());
        assert!(matcher
            .match_batch(vec![Notification::new(removed, 1i32)])
            .is_empty());
        assert_eq!(matcher.stats().indexed, 1);
    }
}
