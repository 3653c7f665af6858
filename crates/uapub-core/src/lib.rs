// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub-core
//!
//! Core abstractions and shared types for the uapub OPC UA publisher gateway.
//!
//! This crate provides the foundational types used across all uapub crates:
//!
//! - **Types**: `ConnectionId`, `WriterId`, `Value`, `StatusCode`, `ConnectionState`
//! - **Error**: the `ErrorClass` taxonomy and the `Classified` trait
//! - **Retry**: `RetryCoordinator` with recoverable/fatal distinction
//! - **Message**: the `NetworkMessage` envelope and header constants
//! - **Client**: the `MessageClient` capability implemented by cloud transports
//! - **RuntimeState**: the restart announcement
//! - **Config**: the resolved `EngineConfiguration`
//! - **Nodes**: the published nodes request model
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uapub_core::{MockMessageClient, RuntimeStateReporter};
//!
//! let client = Arc::new(MockMessageClient::new());
//! let reporter = RuntimeStateReporter::new(true, Some(client));
//! reporter.send_restart_announcement().await;
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Core Modules
// =============================================================================

pub mod error;
pub mod types;
pub mod config;
pub mod nodes;

// =============================================================================
// Operation Modules
// =============================================================================

pub mod retry;
pub mod message;
pub mod client;
pub mod runtime_state;

// =============================================================================
// Re-exports for convenience
// =============================================================================

pub use error::*;
pub use types::*;

pub use client::{build_message, MessageClient, MockMessage, MockMessageClient, OutgoingMessage};
pub use config::EngineConfiguration;
pub use message::{MessageEncoding, MessageKind, MessagingMode, NetworkMessage};
pub use nodes::{AuthenticationMode, OpcNodeModel, PublishedNodesEntry};
pub use retry::{
    AttemptTimeout, ExponentialBackoff, RetryConfig, RetryCoordinator, RetryDecision, RetryError,
    RetryMetrics, RetryMetricsSnapshot, RetryStrategy,
};
pub use runtime_state::{ReportOutcome, RuntimeStateReporter};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
