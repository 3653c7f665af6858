// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Implementation of the `run` command.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use uapub_config::UapubConfig;

use crate::cli::{Cli, RunArgs};
use crate::error::BinResult;
use crate::runtime::RuntimeBuilder;
use crate::shutdown::ShutdownCoordinator;
use crate::stdout::StdoutMessageClient;

/// Runs the gateway, writing messages to stdout, until Ctrl+C or SIGTERM.
pub async fn run(cli: &Cli, config: UapubConfig, args: RunArgs) -> BinResult<()> {
    let shutdown = ShutdownCoordinator::new();
    let listener = shutdown.listen_for_signals();

    let mut builder = RuntimeBuilder::new()
        .config(config)
        .shutdown(shutdown.clone())
        .stats_interval(Duration::from_secs(args.stats_interval));
    if let Some(path) = &cli.published_nodes {
        builder = builder.published_nodes_file(path);
    }

    let client = Arc::new(StdoutMessageClient::new(args.pretty));
    let summary = builder.build(Arc::clone(&client))?.run().await?;

    shutdown.initiate_shutdown();
    listener.abort();
    info!(
        messages = client.written(),
        items = summary.items_added,
        clean = summary.clean_shutdown,
        "Gateway stopped"
    );
    Ok(())
}
