// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub-bin
//!
//! The uapub gateway executable.
//!
//! ## Architecture
//!
//! ```text
//!                 main.rs
//!                    │
//!                 cli.rs ──► commands ──► logging
//!                               │
//!                          runtime.rs ◄── shutdown
//!                               │
//!              PublisherEngine<StdoutMessageClient>
//! ```
//!
//! Messages are written to stdout as one JSON envelope per line; logs go to
//! stderr.
//!
//! ## Usage
//!
//! ```bash
//! # Start the gateway (default command)
//! uapub -n published_nodes.json
//!
//! # Start with a configuration file
//! uapub -c /etc/uapub/uapub.yaml run --stats-interval 30
//!
//! # Validate configuration and published nodes
//! uapub -c /etc/uapub/uapub.yaml validate --show-config
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod cli;
pub mod commands;
pub mod error;
pub mod logging;
pub mod runtime;
pub mod shutdown;
pub mod stdout;

// =============================================================================
// Re-exports
// =============================================================================

pub use cli::{Cli, Commands};
pub use error::{BinError, BinResult};
pub use logging::{init_logging, LogOptions};
pub use runtime::{GatewayRuntime, RunSummary, RuntimeBuilder};
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use stdout::{StdoutMessage, StdoutMessageClient};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
