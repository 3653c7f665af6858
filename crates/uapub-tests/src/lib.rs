// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # uapub Integration Tests
//!
//! Cross-crate tests for the uapub publisher gateway, with the shared
//! fixtures and harness they use.
//!
//! ## Module Structure
//!
//! - [`common`]: shared test utilities
//!   - `fixtures`: endpoints, published nodes entries and config files
//!   - `harness`: a [`PublisherEngine`](uapub_publisher::PublisherEngine)
//!     wired to simulated servers and a recording message client
//!   - `assertions`: helpers for decoding and checking sent messages
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p uapub-tests
//! cargo test -p uapub-tests --test integration_engine
//! cargo test -p uapub-tests --test integration_messages
//! cargo test -p uapub-tests --test integration_config
//! ```
//!
//! ## Test Categories
//!
//! ### Engine (`integration_engine.rs`)
//! - Item uniqueness and conflicts
//! - Removal cascading to subscriptions and connections
//! - Reconnect replay with degraded item isolation
//! - Health aggregation across endpoints
//! - Phased shutdown
//!
//! ### Messages (`integration_messages.rs`)
//! - Batch flush laws
//! - Samples and pub/sub payload shapes
//! - Restart announcement
//! - Bounded egress with oldest-first eviction
//!
//! ### Config (`integration_config.rs`)
//! - YAML, TOML and JSON configuration files
//! - Published nodes files driving the engine
//! - The gateway runtime end to end

#![warn(missing_docs)]

pub mod common;
