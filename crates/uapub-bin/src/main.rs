// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! uapub - OPC UA publisher gateway.

use uapub_bin::commands::execute;
use uapub_bin::error::report_error_and_exit;
use uapub_bin::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    if let Err(e) = execute(cli).await {
        report_error_and_exit(e);
    }
}
