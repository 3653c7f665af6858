// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! OPC UA session and subscription management for the uapub gateway.
//!
//! This crate owns everything between a server endpoint and a stream of
//! matched notifications:
//!
//! - [`EndpointConnection`]: session lifecycle, credentials, keep-alive and
//!   reconnect with replay
//! - [`SubscriptionRegistry`]: named subscriptions, unique per connection
//! - [`MonitoredItemSet`]: items of a subscription, unique per subscription,
//!   each with a connection-wide client handle
//! - [`NotificationMatcher`]: client handle to item lookup
//! - [`heartbeat`]: synthetic notifications for quiet items
//!
//! The protocol stack sits behind [`UaTransport`]. The `mock` feature
//! provides an in-memory server; `real-transport` binds the `opcua` crate.
//!
//! # Error Handling
//!
//! ```text
//! OpcUaError
//! ├── Connection    - Endpoint reachability and faults
//! ├── Session       - Session lifecycle errors
//! ├── Security      - Authentication and policy errors
//! ├── Subscription  - Subscription and monitored item errors
//! ├── Operation     - Read, write and browse failures
//! ├── Configuration - Invalid settings
//! └── Timeout       - Expired bounded waits
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod error;
pub mod heartbeat;
pub mod matcher;
pub mod types;

// Re-export commonly used types
pub use error::{
    ConfigurationError, ConnectionError, ErrorCode, ErrorSeverity, OpcUaError, OpcUaResult,
    OperationError, SecurityError, SessionError, SubscriptionError, TimeoutError,
};

pub use types::{
    ConnectionConfig, MonitoredItemSpec, NodeId, NodeIdentifier, SecurityMode, SecurityPolicy,
    SubscriptionSettings, UserIdentity,
};

pub use client::{
    ConnectionOptions, ConnectionStatsSnapshot, EndpointConnection, ItemOutcome, ItemState,
    MonitoredItemSet, Notification, NotificationBatch, ReplayReport, SessionChannel,
    Subscription, SubscriptionRegistry, TransportFactory, UaTransport,
};

pub use matcher::{MatchedNotification, MatcherStats, NotificationMatcher};

#[cfg(any(test, feature = "mock"))]
pub use client::{MockControl, MockTransport, MockTransportFactory};

#[cfg(feature = "real-transport")]
pub use client::{RealTransportFactory, RealUaTransport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
