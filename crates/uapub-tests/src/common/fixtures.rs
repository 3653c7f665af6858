// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! # Test Fixtures
//!
//! Pre-built endpoints, published nodes entries and configuration files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use uapub_core::{OpcNodeModel, PublishedNodesEntry};
use uapub_opcua::NodeId;

// =============================================================================
// Endpoint Fixtures
// =============================================================================

/// Simulated server endpoints.
pub struct EndpointFixtures;

impl EndpointFixtures {
    /// The press line PLC.
    pub const PRESS: &'static str = "opc.tcp://press-plc:4840";

    /// The paint shop PLC.
    pub const PAINT: &'static str = "opc.tcp://paint-plc:4840";
}

// =============================================================================
// Node Fixtures
// =============================================================================

/// Published nodes entries and node ids.
pub struct NodeFixtures;

impl NodeFixtures {
    /// Node id string for a tag in namespace 2.
    pub fn id(tag: &str) -> String {
        format!("ns=2;s={}", tag)
    }

    /// Parsed node id for a tag in namespace 2.
    pub fn node(tag: &str) -> NodeId {
        NodeId::string(2, tag)
    }

    /// An entry publishing `tags` from `endpoint` every second.
    pub fn entry(endpoint: &str, tags: &[&str]) -> PublishedNodesEntry {
        tags.iter().fold(
            PublishedNodesEntry::new(endpoint).with_publishing_interval(Duration::from_secs(1)),
            |entry, tag| entry.with_node(OpcNodeModel::new(Self::id(tag))),
        )
    }

    /// `count` tags named `Tag000`, `Tag001`, ...
    pub fn tags(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("Tag{:03}", i)).collect()
    }

    /// The published nodes file for the press line.
    pub fn published_nodes_json() -> String {
        format!(
            r#"[
  {{
    "EndpointUrl": "{press}",
    "DataSetWriterId": "press",
    "DataSetPublishingInterval": 1000,
    "OpcNodes": [
      {{ "Id": "ns=2;s=Force", "DisplayName": "Force" }},
      {{ "Id": "ns=2;s=Stroke", "HeartbeatInterval": 5 }}
    ]
  }},
  {{
    "EndpointUrl": "{paint}",
    "OpcNodes": [
      {{ "Id": "ns=2;s=BoothTemperature" }}
    ]
  }}
]"#,
            press = EndpointFixtures::PRESS,
            paint = EndpointFixtures::PAINT,
        )
    }
}

// =============================================================================
// Config Fixtures
// =============================================================================

/// Configuration file contents.
pub struct ConfigFixtures;

impl ConfigFixtures {
    /// A YAML configuration with short timeouts.
    pub fn yaml(published_nodes: &Path) -> String {
        format!(
            r#"engine:
  batch_size: 2
  batch_trigger_interval: 200ms
  operation_timeout: 2s
  keep_alive_interval: 200ms
  shutdown_phase_timeout: 1s
  messaging_mode: samples
logging:
  level: debug
  format: json
published_nodes_file: "{}"
"#,
            published_nodes.display()
        )
    }

    /// The same settings in TOML.
    pub fn toml() -> &'static str {
        r#"published_nodes_file = "pn.json"

[engine]
batch_size = 2
batch_trigger_interval = "200ms"
operation_timeout = "2s"
messaging_mode = "pub_sub"

[logging]
level = "warn"
"#
    }

    /// The same settings in JSON.
    pub fn json() -> &'static str {
        r#"{
  "engine": { "batch_size": 2, "message_encoding": "binary" },
  "logging": { "level": "error", "format": "compact" }
}"#
    }

    /// Writes `content` to `name` under `dir`.
    pub fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).expect("Failed to write fixture file");
        path
    }
}
