// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Published nodes model.
//!
//! This is the shape of "publish nodes" / "unpublish nodes" requests coming
//! from the control surface and of the published nodes file. Field names
//! follow the established PascalCase JSON format.
//!
//! ```json
//! [{
//!   "EndpointUrl": "opc.tcp://plc:4840",
//!   "UseSecurity": false,
//!   "DataSetWriterId": "line-1",
//!   "DataSetPublishingInterval": 1000,
//!   "OpcNodes": [
//!     { "Id": "ns=2;s=Temperature", "OpcSamplingInterval": 500, "HeartbeatInterval": 60 }
//!   ]
//! }]
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::WriterId;

/// How the gateway authenticates against the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AuthenticationMode {
    /// No user identity.
    #[default]
    Anonymous,
    /// User name and password.
    UsernamePassword,
    /// Client certificate.
    Certificate,
}

/// One monitored node in a published nodes entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct OpcNodeModel {
    /// Node id in string form (`ns=2;s=Tag`, `i=2258`, ...).
    #[serde(alias = "ExpandedNodeId")]
    pub id: String,

    /// Display name used in messages; defaults to the node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Field id used in data set messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_set_field_id: Option<String>,

    /// Sampling interval in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_sampling_interval: Option<u64>,

    /// Publishing interval in milliseconds; overrides the entry default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_publishing_interval: Option<u64>,

    /// Heartbeat interval in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval: Option<u64>,

    /// Suppress the first notification after (re)subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_first: Option<bool>,

    /// Server-side queue size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<u32>,

    /// Discard the newest value when the server queue overflows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discard_new: Option<bool>,
}

impl OpcNodeModel {
    /// Creates a node with only its id set.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Sets the sampling interval.
    pub fn with_sampling_interval(mut self, interval: Duration) -> Self {
        self.opc_sampling_interval = Some(interval.as_millis() as u64);
        self
    }

    /// Sets the heartbeat interval (whole seconds).
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval.as_secs());
        self
    }

    /// Sets the skip-first flag.
    pub fn with_skip_first(mut self, skip: bool) -> Self {
        self.skip_first = Some(skip);
        self
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Returns the identifier of this node inside its subscription.
    ///
    /// Two nodes with the same id but different field ids are different
    /// monitored items.
    pub fn item_id(&self) -> String {
        match &self.data_set_field_id {
            Some(field) if !field.is_empty() => format!("{}#{}", self.id, field),
            _ => self.id.clone(),
        }
    }

    /// Returns the display name, falling back to the field id, then the node id.
    pub fn effective_display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.data_set_field_id.as_deref())
            .unwrap_or(&self.id)
    }

    /// Returns the sampling interval, if configured.
    pub fn sampling_interval(&self) -> Option<Duration> {
        self.opc_sampling_interval.map(Duration::from_millis)
    }

    /// Returns the heartbeat interval, if configured and non-zero.
    pub fn heartbeat(&self) -> Option<Duration> {
        self.heartbeat_interval
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// One entry of the published nodes file, or one publish/unpublish request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct PublishedNodesEntry {
    /// Server endpoint URL.
    pub endpoint_url: String,

    /// Select the most secure endpoint when no explicit mode is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_security: Option<bool>,

    /// Explicit security mode (`None`, `Sign`, `SignAndEncrypt`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_security_mode: Option<String>,

    /// Explicit security policy URI or short name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_security_policy: Option<String>,

    /// Authentication mode.
    #[serde(default)]
    pub opc_authentication_mode: AuthenticationMode,

    /// User name for `UsernamePassword`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_authentication_username: Option<String>,

    /// Password for `UsernamePassword`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opc_authentication_password: Option<String>,

    /// Writer id; derived from endpoint and publishing interval when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_set_writer_id: Option<String>,

    /// Writer group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_set_writer_group: Option<String>,

    /// Default publishing interval of the entry in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_set_publishing_interval: Option<u64>,

    /// Nodes to publish.
    #[serde(default)]
    pub opc_nodes: Vec<OpcNodeModel>,
}

impl PublishedNodesEntry {
    /// Creates an entry for `endpoint_url` without nodes.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            ..Default::default()
        }
    }

    /// Sets the writer id.
    pub fn with_writer_id(mut self, id: impl Into<String>) -> Self {
        self.data_set_writer_id = Some(id.into());
        self
    }

    /// Sets the publishing interval.
    pub fn with_publishing_interval(mut self, interval: Duration) -> Self {
        self.data_set_publishing_interval = Some(interval.as_millis() as u64);
        self
    }

    /// Adds a node.
    pub fn with_node(mut self, node: OpcNodeModel) -> Self {
        self.opc_nodes.push(node);
        self
    }

    /// Returns the publishing interval that applies to `node`.
    pub fn publishing_interval_for(&self, node: &OpcNodeModel, default: Duration) -> Duration {
        node.opc_publishing_interval
            .or(self.data_set_publishing_interval)
            .map(Duration::from_millis)
            .unwrap_or(default)
    }

    /// Returns the writer that `node` belongs to.
    ///
    /// Nodes of one entry sharing a publishing interval share a writer and
    /// therefore a subscription.
    pub fn writer_for(&self, node: &OpcNodeModel, default_interval: Duration) -> WriterId {
        let interval = self.publishing_interval_for(node, default_interval);
        match &self.data_set_writer_id {
            Some(id) if !id.is_empty() => {
                if node.opc_publishing_interval.is_some() {
                    WriterId::new(format!("{}_{}", id, interval.as_millis()))
                } else {
                    WriterId::new(id.clone())
                }
            }
            _ => WriterId::new(format!("{}_{}", self.endpoint_url, interval.as_millis())),
        }
    }

    /// Returns a copy without nodes.
    pub fn header(&self) -> Self {
        Self {
            opc_nodes: Vec::new(),
            ..self.clone()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_entry() {
        let json = r#"[{
            "EndpointUrl": "opc.tcp://plc:4840",
            "UseSecurity": false,
            "DataSetWriterId": "line-1",
            "DataSetPublishingInterval": 2000,
            "OpcNodes": [
                { "Id": "ns=2;s=Temperature", "OpcSamplingInterval": 500, "HeartbeatInterval": 60 },
                { "Id": "i=2258", "SkipFirst": true }
            ]
        }]"#;

        let entries: Vec<PublishedNodesEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.opc_authentication_mode, AuthenticationMode::Anonymous);
        assert_eq!(entry.opc_nodes.len(), 2);
        assert_eq!(
            entry.opc_nodes[0].sampling_interval(),
            Some(Duration::from_millis(500))
        );
        assert_eq!(entry.opc_nodes[0].heartbeat(), Some(Duration::from_secs(60)));
        assert_eq!(entry.opc_nodes[1].skip_first, Some(true));
        assert_eq!(
            entry.publishing_interval_for(&entry.opc_nodes[1], Duration::from_secs(1)),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_writer_grouping() {
        let entry = PublishedNodesEntry::new("opc.tcp://plc:4840")
            .with_publishing_interval(Duration::from_secs(1));
        let a = OpcNodeModel::new("ns=2;s=A");
        let mut b = OpcNodeModel::new("ns=2;s=B");
        let default = Duration::from_millis(500);

        assert_eq!(entry.writer_for(&a, default), entry.writer_for(&b, default));
        b.opc_publishing_interval = Some(250);
        assert_ne!(entry.writer_for(&a, default), entry.writer_for(&b, default));
        assert_eq!(entry.writer_for(&a, default).as_str(), "opc.tcp://plc:4840_1000");

        let named = entry.clone().with_writer_id("line-1");
        assert_eq!(named.writer_for(&a, default).as_str(), "line-1");
    }

    #[test]
    fn test_item_id_and_display_name() {
        let mut node = OpcNodeModel::new("ns=2;s=A");
        assert_eq!(node.item_id(), "ns=2;s=A");
        assert_eq!(node.effective_display_name(), "ns=2;s=A");

        node.data_set_field_id = Some("temp".into());
        assert_eq!(node.item_id(), "ns=2;s=A#temp");
        assert_eq!(node.effective_display_name(), "temp");

        node = node.with_display_name("Temperature");
        assert_eq!(node.effective_display_name(), "Temperature");
    }

    #[test]
    fn test_zero_heartbeat_is_disabled() {
        let mut node = OpcNodeModel::new("i=1");
        node.heartbeat_interval = Some(0);
        assert_eq!(node.heartbeat(), None);
    }
}
