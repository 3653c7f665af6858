// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA session, subscription and monitored item management.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    EndpointConnection                           │
//! │        (state machine, keep-alive supervisor, replay)           │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   SubscriptionRegistry  ──►  Subscription  ──►  MonitoredItemSet │
//! │       (named, unique)                        (handles, skip-first)│
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    SessionChannel                               │
//! │       (one async mutex, every call bounded by a timeout)        │
//! └─────────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    UaTransport                                  │
//! │          (protocol stack binding + notification sink)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use uapub_opcua::client::{ConnectionOptions, EndpointConnection, MockTransport};
//! use uapub_opcua::types::{ConnectionConfig, MonitoredItemSpec, SubscriptionSettings};
//!
//! let config = ConnectionConfig::new("opc.tcp://localhost:4840");
//! let transport = MockTransport::new(&config.endpoint_url);
//! let (connection, mut notifications) =
//!     EndpointConnection::new(config, Box::new(transport), ConnectionOptions::default());
//!
//! connection.connect_with_retry().await?;
//! connection.create_subscription("1000ms", SubscriptionSettings::default()).await?;
//! connection
//!     .add_items("1000ms", vec![MonitoredItemSpec::new("ns=2;s=Temperature".parse()?)])
//!     .await?;
//!
//! while let Some(batch) = notifications.recv().await {
//!     for matched in connection.matcher().match_batch(batch.notifications) {
//!         println!("{} = {:?}", matched.item.display_name(), matched.notification.value);
//!     }
//! }
//! ```

pub(crate) mod channel;
pub(crate) mod connection;
pub(crate) mod monitored;
pub(crate) mod registry;
pub(crate) mod transport;

#[cfg(any(test, feature = "mock"))]
pub(crate) mod mock;

#[cfg(feature = "real-transport")]
mod real_transport;

pub use channel::SessionChannel;
pub use connection::{
    ConnectionOptions, ConnectionStatsSnapshot, EndpointConnection, ReplayFailure, ReplayReport,
    DEFAULT_OPERATION_ATTEMPTS,
};
pub use monitored::{HandleAllocator, ItemOutcome, ItemReplay, ItemState, LastValue, MonitoredItemSet};
pub use registry::{Subscription, SubscriptionRegistry};
pub use transport::{
    BrowseReference, MonitoredItemRequest, MonitoredItemResult, Notification, NotificationBatch,
    NotificationSink, ReadResult, SubscriptionHandle, TransportFactory, UaTransport,
};

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockControl, MockTransport, MockTransportFactory};

#[cfg(feature = "real-transport")]
pub use real_transport::{RealTransportFactory, RealUaTransport};
