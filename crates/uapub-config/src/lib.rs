// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub-config
//!
//! Configuration management for the uapub OPC UA publisher.
//!
//! Two files drive the gateway:
//!
//! - the **engine configuration** (YAML, TOML or JSON) with batching, egress,
//!   encoding and logging tunables, and
//! - the **published nodes file**, a JSON array describing which nodes to
//!   monitor on which endpoints.
//!
//! ## Quick Start
//!
//! ```no_run
//! use uapub_config::{load_config, load_published_nodes};
//!
//! let config = load_config("uapub.yaml").unwrap();
//! let engine = config.resolve();
//! println!("Batch size: {}", engine.batch_size);
//!
//! if let Some(path) = &config.published_nodes_file {
//!     let entries = load_published_nodes(path).unwrap();
//!     println!("Endpoints: {}", entries.len());
//! }
//! ```
//!
//! ## Out-of-range Values
//!
//! Tunables outside their accepted range fall back to the default with a
//! warning instead of failing startup.
//!
//! ## Environment Variables
//!
//! ```text
//! UAPUB_BATCH_SIZE=100
//! UAPUB_MESSAGE_ENCODING=binary
//! UAPUB_LOG_LEVEL=debug
//! ```
//!
//! Values in config files can reference environment variables:
//!
//! ```yaml
//! published_nodes_file: "${UAPUB_NODES:publishednodes.json}"
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

// =============================================================================
// Modules
// =============================================================================

pub mod error;
pub mod schema;
pub mod loader;
pub mod published;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{ConfigError, ConfigResult};
pub use schema::{parse_duration, EngineSection, LogFormat, LogLevel, LoggingConfig, UapubConfig};
pub use loader::{load_config, load_config_str, ConfigFormat, ConfigLoader};
pub use published::{load_published_nodes, parse_published_nodes, SUPPORTED_SCHEMES};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        assert_eq!(NAME, "uapub-config");
        assert!(!VERSION.is_empty());
    }
}
