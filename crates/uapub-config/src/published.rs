// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Published nodes file.
//!
//! A JSON array of [`PublishedNodesEntry`]. The file is the startup state of
//! the control surface: each entry is applied as an add-monitored-items
//! request.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

use uapub_core::nodes::{AuthenticationMode, PublishedNodesEntry};

use crate::error::{ConfigError, ConfigResult};

/// Endpoint URL schemes the gateway accepts.
pub const SUPPORTED_SCHEMES: &[&str] = &["opc.tcp://", "opc.wss://", "opc.https://"];

/// Loads and validates a published nodes file.
///
/// A missing file is an error; an empty array is valid.
pub fn load_published_nodes(path: impl AsRef<Path>) -> ConfigResult<Vec<PublishedNodesEntry>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::file_not_found(path));
    }

    let content = fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    let entries = parse_published_nodes(&content).map_err(|e| match e {
        ConfigError::Serialization { message } => ConfigError::parse(path, message),
        other => other,
    })?;

    info!(
        path = %path.display(),
        entries = entries.len(),
        nodes = entries.iter().map(|e| e.opc_nodes.len()).sum::<usize>(),
        "Published nodes loaded"
    );
    Ok(entries)
}

/// Parses and validates published nodes JSON.
pub fn parse_published_nodes(content: &str) -> ConfigResult<Vec<PublishedNodesEntry>> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<PublishedNodesEntry> =
        serde_json::from_str(content).map_err(|e| ConfigError::serialization(e.to_string()))?;

    for (index, entry) in entries.iter().enumerate() {
        validate_entry(index, entry)?;
    }
    Ok(entries)
}

/// Validates one entry.
///
/// Duplicate nodes are only warned about here; adding them reports a
/// conflict per item at runtime.
pub fn validate_entry(index: usize, entry: &PublishedNodesEntry) -> ConfigResult<()> {
    let field = |name: &str| format!("[{}].{}", index, name);

    if entry.endpoint_url.trim().is_empty() {
        return Err(ConfigError::validation(field("EndpointUrl"), "must not be empty"));
    }
    let lower = entry.endpoint_url.to_ascii_lowercase();
    if !SUPPORTED_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
        return Err(ConfigError::validation(
            field("EndpointUrl"),
            format!("unsupported scheme in '{}'", entry.endpoint_url),
        ));
    }

    if entry.opc_authentication_mode == AuthenticationMode::UsernamePassword
        && entry
            .opc_authentication_username
            .as_deref()
            .map_or(true, str::is_empty)
    {
        return Err(ConfigError::validation(
            field("OpcAuthenticationUsername"),
            "required for UsernamePassword authentication",
        ));
    }

    if entry.data_set_publishing_interval == Some(0) {
        return Err(ConfigError::validation(
            field("DataSetPublishingInterval"),
            "must be greater than zero",
        ));
    }

    let mut seen = HashSet::new();
    for (node_index, node) in entry.opc_nodes.iter().enumerate() {
        if node.id.trim().is_empty() {
            return Err(ConfigError::validation(
                format!("[{}].OpcNodes[{}].Id", index, node_index),
                "must not be empty",
            ));
        }
        if !seen.insert((node.item_id(), node.opc_publishing_interval)) {
            warn!(
                endpoint = %entry.endpoint_url,
                node = %node.id,
                "Duplicate node in published nodes entry"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"[
        {
            "EndpointUrl": "opc.tcp://plc-1:4840",
            "DataSetWriterId": "line-1",
            "DataSetPublishingInterval": 1000,
            "OpcNodes": [
                { "Id": "ns=2;s=Temperature", "OpcSamplingInterval": 500 },
                { "Id": "ns=2;s=Pressure", "HeartbeatInterval": 60, "SkipFirst": true }
            ]
        },
        {
            "EndpointUrl": "opc.tcp://plc-2:4840",
            "OpcAuthenticationMode": "UsernamePassword",
            "OpcAuthenticationUsername": "operator",
            "OpcAuthenticationPassword": "secret",
            "OpcNodes": [ { "ExpandedNodeId": "i=2258" } ]
        }
    ]"#;

    #[test]
    fn test_parse_sample() {
        let entries = parse_published_nodes(SAMPLE).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].opc_nodes.len(), 2);
        assert_eq!(entries[0].opc_nodes[1].skip_first, Some(true));
        assert_eq!(entries[1].opc_nodes[0].id, "i=2258");
        assert_eq!(
            entries[1].opc_authentication_mode,
            AuthenticationMode::UsernamePassword
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::with_suffix(".json").unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let entries = load_published_nodes(file.path()).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_missing_file() {
        let result = load_published_nodes("/nonexistent/publishednodes.json");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_empty_content_is_valid() {
        assert!(parse_published_nodes("  ").unwrap().is_empty());
        assert!(parse_published_nodes("[]").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_scheme() {
        let err = parse_published_nodes(r#"[{"EndpointUrl": "http://plc:4840"}]"#).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "[0].EndpointUrl"));
    }

    #[test]
    fn test_rejects_empty_node_id() {
        let err = parse_published_nodes(
            r#"[{"EndpointUrl": "opc.tcp://plc:4840", "OpcNodes": [{"Id": ""}]}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "[0].OpcNodes[0].Id"));
    }

    #[test]
    fn test_username_required() {
        let err = parse_published_nodes(
            r#"[{"EndpointUrl": "opc.tcp://plc:4840", "OpcAuthenticationMode": "UsernamePassword"}]"#,
        )
        .unwrap_err();
        assert_eq!(err.error_type(), "validation");
    }

    #[test]
    fn test_malformed_json() {
        let err = parse_published_nodes("[{").unwrap_err();
        assert!(matches!(err, ConfigError::Serialization { .. }));
    }
}
