// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `validate` command.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::Serialize;
use uapub_config::{load_published_nodes, UapubConfig};
use uapub_core::{EngineConfiguration, PublishedNodesEntry};

use crate::cli::{Cli, OutputFormat, ValidateArgs};
use crate::error::{BinError, BinResult};

/// What `validate` found.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationSummary {
    /// Configuration file, if one was loaded.
    pub config_path: Option<PathBuf>,
    /// Published nodes file, if one was named.
    pub published_nodes_file: Option<PathBuf>,
    /// Distinct endpoints.
    pub endpoints: usize,
    /// Published nodes entries.
    pub entries: usize,
    /// Nodes across all entries.
    pub nodes: usize,
    /// Distinct writers across all entries.
    pub writers: usize,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
    /// The resolved engine configuration.
    pub engine: EngineConfiguration,
}

impl ValidationSummary {
    /// Summarizes `entries` under `engine`.
    pub fn new(
        config_path: Option<PathBuf>,
        published_nodes_file: Option<PathBuf>,
        entries: &[PublishedNodesEntry],
        engine: EngineConfiguration,
    ) -> Self {
        let mut warnings = Vec::new();
        let mut endpoints = BTreeSet::new();
        let mut writers = BTreeSet::new();
        let mut items = BTreeSet::new();
        let mut nodes = 0;

        if published_nodes_file.is_none() {
            warnings.push("No published nodes file configured".to_string());
        }

        for entry in entries {
            endpoints.insert(entry.endpoint_url.as_str());
            if entry.opc_nodes.is_empty() {
                warnings.push(format!("Entry for {} has no nodes", entry.endpoint_url));
            }
            for node in &entry.opc_nodes {
                nodes += 1;
                let writer = entry.writer_for(node, engine.default_publishing_interval);
                let item = node.item_id();
                if !items.insert((entry.endpoint_url.clone(), writer.to_string(), item.clone())) {
                    warnings.push(format!(
                        "Duplicate node {} for writer {} on {}",
                        item, writer, entry.endpoint_url
                    ));
                }
                writers.insert((entry.endpoint_url.clone(), writer.to_string()));
            }
        }

        Self {
            config_path,
            published_nodes_file,
            endpoints: endpoints.len(),
            entries: entries.len(),
            nodes,
            writers: writers.len(),
            warnings,
            engine,
        }
    }
}

/// Executes the `validate` command.
pub fn validate(cli: &Cli, config: &UapubConfig, args: ValidateArgs) -> BinResult<()> {
    let published_nodes_file = cli
        .published_nodes
        .clone()
        .or_else(|| config.published_nodes_file.clone());
    let entries = match &published_nodes_file {
        Some(path) => load_published_nodes(path)?,
        None => Vec::new(),
    };

    let summary = ValidationSummary::new(
        cli.config_path(),
        published_nodes_file,
        &entries,
        config.resolve(),
    );

    match args.format {
        OutputFormat::Text => print_text(&summary, args.show_config)?,
        OutputFormat::Json => {
            let output = serde_json::json!({
                "valid": true,
                "summary": &summary,
            });
            let rendered = serde_json::to_string_pretty(&output)
                .map_err(|e| BinError::runtime(e.to_string()))?;
            println!("{}", rendered);
        }
    }

    if args.strict && !summary.warnings.is_empty() {
        return Err(BinError::config(format!(
            "Strict mode: {} warning(s) found",
            summary.warnings.len()
        )));
    }
    Ok(())
}

fn print_text(summary: &ValidationSummary, show_config: bool) -> BinResult<()> {
    let display = |path: &Option<PathBuf>| {
        path.as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none)".to_string())
    };

    println!("Configuration is valid: {}", display(&summary.config_path));
    println!();
    println!("Summary:");
    println!("  Published nodes: {}", display(&summary.published_nodes_file));
    println!("  Endpoints: {}", summary.endpoints);
    println!("  Entries: {}", summary.entries);
    println!("  Writers: {}", summary.writers);
    println!("  Nodes: {}", summary.nodes);
    println!("  Messaging: {:?} / {:?}", summary.engine.messaging_mode, summary.engine.message_encoding);

    if !summary.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &summary.warnings {
            println!("  - {}", warning);
        }
    }

    if show_config {
        let rendered = serde_json::to_string_pretty(&summary.engine)
            .map_err(|e| BinError::runtime(e.to_string()))?;
        println!();
        println!("Engine configuration:");
        println!("{}", rendered);
    }
    Ok(())
}
