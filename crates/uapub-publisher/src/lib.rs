// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub-publisher
//!
//! Batching, encoding and the per-connection publishing pipelines of the
//! uapub gateway, plus the [`PublisherEngine`] control surface.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      PublisherEngine                         │
//! │   add_monitored_items / remove_monitored_items / shutdown    │
//! └──────────────────────────────────────────────────────────────┘
//!                 │ one per connection
//!                 ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    PublishingPipeline                        │
//! │  matcher ─► MessageBatcher ─► MessageEncoder ─► EgressQueue  │
//! └──────────────────────────────────────────────────────────────┘
//!                                                  │
//!                                                  ▼
//!                                   EgressSender ─► MessageClient
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use uapub_core::{EngineConfiguration, MockMessageClient, OpcNodeModel, PublishedNodesEntry};
//! use uapub_opcua::MockTransportFactory;
//! use uapub_publisher::PublisherEngine;
//!
//! let engine = PublisherEngine::new(
//!     EngineConfiguration::default(),
//!     Arc::new(MockTransportFactory::new()),
//!     Arc::new(MockMessageClient::new()),
//! );
//! engine.start().await;
//!
//! let entry = PublishedNodesEntry::new("opc.tcp://plc:4840")
//!     .with_node(OpcNodeModel::new("ns=2;s=Temperature"));
//! let report = engine.add_monitored_items(&entry).await?;
//! assert!(report.is_complete());
//!
//! engine.shutdown().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod batcher;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod pipeline;

// =============================================================================
// Re-exports
// =============================================================================

pub use batcher::{Batch, FlushReason, MessageBatcher, Sample};
pub use encoder::{EncoderSettings, EncoderStats, FieldMetadata, MessageEncoder};
pub use engine::{
    AddReport, ConnectionHealth, EngineHealth, EngineShutdownReport, EngineStats, ItemFailure,
    PublisherEngine, RemoveReport,
};
pub use error::{PublisherError, PublisherResult};
pub use pipeline::{PipelineSettings, PipelineStats, PublishingPipeline, ShutdownPhase, ShutdownReport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
