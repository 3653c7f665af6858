// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub-buffer
//!
//! Egress buffering between the encoder of a publishing pipeline and the
//! cloud message client.
//!
//! - [`EgressQueue`]: bounded FIFO with drop-oldest overflow and a single
//!   requeue for messages whose first send failed
//! - [`EgressSender`]: consumes the queue, bounds every send with a timeout
//!   and drains what is left on shutdown
//! - [`EgressStats`]: lock-free counters for health and diagnostics
//!
//! ```text
//! encoder ──► EgressQueue ──► EgressSender ──► MessageClient
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod egress;
pub mod sender;
pub mod stats;

pub use egress::{EgressQueue, QueuedMessage, RequeueOutcome};
pub use sender::{DrainReport, EgressSender, SenderConfig};
pub use stats::{EgressStats, EgressStatsInner};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
