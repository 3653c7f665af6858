// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Heartbeat synthesis.
//!
//! An item with a heartbeat interval that has seen no new value for that
//! long gets a synthetic notification repeating its last value. The source
//! timestamp advances by one interval per heartbeat; a real value restarts
//! the timer (see [`ItemState::record`]).
//!
//! A value suppressed by skip-first is still recorded, so it seeds the
//! heartbeat: the first heartbeat of such an item may repeat a value that
//! was never published on its own.

use std::sync::Arc;

use tokio::time::Instant;

use crate::client::monitored::ItemState;
use crate::client::transport::Notification;

/// Returns the heartbeat notification of `item` if one is due at `now`.
///
/// Items without a live server-side counterpart (stale or degraded) and
/// items that never received a value produce nothing.
pub fn heartbeat_due(item: &ItemState, now: Instant) -> Option<Notification> {
    let interval = item.heartbeat_interval()?;
    if item.server_id() == 0 {
        return None;
    }

    let mut guard = item.last.lock();
    let last = guard.as_mut()?;
    if now.saturating_duration_since(last.emitted_at) < interval {
        return None;
    }

    let step = chrono::Duration::from_std(interval).ok()?;
    last.source_timestamp = last
        .source_timestamp
        .checked_add_signed(step)
        .unwrap_or(last.source_timestamp);
    last.emitted_at = now;

    Some(Notification {
        client_handle: item.client_handle(),
        sequence_number: 0,
        value: last.value.clone(),
        status: last.status,
        source_timestamp: last.source_timestamp,
        server_timestamp: None,
        is_heartbeat: true,
    })
}

/// Collects every heartbeat due at `now`.
pub fn collect_due(items: &[Arc<ItemState>], now: Instant) -> Vec<(Arc<ItemState>, Notification)> {
    items
        .iter()
        .filter_map(|item| heartbeat_due(item, now).map(|n| (Arc::clone(item), n)))
        .collect()
}

/// Returns the earliest instant at which a heartbeat becomes due.
pub fn next_deadline(items: &[Arc<ItemState>]) -> Option<Instant> {
    items
        .iter()
        .filter(|item| item.server_id() != 0)
        .filter_map(|item| {
            let interval = item.heartbeat_interval()?;
            let emitted_at = item.last.lock().as_ref()?.emitted_at;
            Some(emitted_at + interval)
        })
        .min()
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

    async fn item_with_heartbeat(secs: u64) -> Arc<ItemState> {
        item(
            MonitoredItemSpec::new("ns=2;s=Level".parse().unwrap())
                .with_heartbeat(Duration::from_secs(secs)),
        )
        .await
    }

    async fn item(spec: MonitoredItemSpec) -> Arc<ItemState> {
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
        let id = spec.id.clone();
        set.add(&channel, sub.server_id, vec![spec]).await;
        set.get(&id).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_heartbeat_without_value() {
        let item = item_with_heartbeat(10).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(heartbeat_due(&item, Instant::now()).is_none());
        assert!(next_deadline(&[item]).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_repeats_last_value() {
        let item = item_with_heartbeat(10).await;
        let first = Notification::new(item.client_handle(), 42i32);
        let source = first.source_timestamp;
        item.record(&first, Instant::now());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(heartbeat_due(&item, Instant::now()).is_none());

        tokio::time::advance(Duration::from_secs(5)).await;
        let beat = heartbeat_due(&item, Instant::now()).unwrap();
        assert!(beat.is_heartbeat);
        assert_eq!(beat.value, uapub_core::Value::Int32(42));
        assert_eq!(beat.source_timestamp, source + chrono::Duration::seconds(10));

        assert!(heartbeat_due(&item, Instant::now()).is_none());
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = heartbeat_due(&item, Instant::now()).unwrap();
        assert_eq!(second.source_timestamp, source + chrono::Duration::seconds(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_real_value_resets_timer() {
        let item = item_with_heartbeat(10).await;
        item.record(&Notification::new(item.client_handle(), 1i32), Instant::now());

        tokio::time::advance(Duration::from_secs(8)).await;
        item.record(&Notification::new(item.client_handle(), 2i32), Instant::now());

        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(collect_due(&[Arc::clone(&item)], Instant::now()).is_empty());
        assert_eq!(
            next_deadline(&[Arc::clone(&item)]),
            Some(Instant::now() + Duration::from_secs(2))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_first_value_seeds_heartbeat() {
        let item = item(
            MonitoredItemSpec::new("ns=2;s=Level".parse().unwrap())
                .with_heartbeat(Duration::from_secs(10))
                .with_skip_first(true),
        )
        .await;
        let matcher = crate::matcher::NotificationMatcher::new();
        matcher.rebuild(vec![Arc::clone(&item)]);

        let suppressed = matcher.match_batch(vec![Notification::new(item.client_handle(), 7i32)]);
        assert!(suppressed.is_empty());

        tokio::time::advance(Duration::from_secs(10)).await;
        let beat = heartbeat_due(&item, Instant::now()).unwrap();
        assert!(beat.is_heartbeat);
        assert_eq!(beat.value, uapub_core::Value::Int32(7));
    }
}
