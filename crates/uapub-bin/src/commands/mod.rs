// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI command implementations.
//!
//! - `run`: start the gateway
//! - `validate`: check the configuration and published nodes files

mod run;
mod validate;

pub use run::run;
pub use validate::{validate, ValidationSummary};

use tracing::debug;
use uapub_config::{load_config, UapubConfig};

use crate::cli::{Cli, Commands};
use crate::error::BinResult;
use crate::logging::{init_logging, LogOptions};

/// Loads the configuration named on the command line, or the defaults.
pub fn load_cli_config(cli: &Cli) -> BinResult<UapubConfig> {
    match cli.config_path() {
        Some(path) => Ok(load_config(&path)?),
        None => Ok(UapubConfig::default()),
    }
}

/// Builds logging options from the command line and the configuration.
pub fn log_options(cli: &Cli, config: &UapubConfig) -> LogOptions {
    LogOptions {
        level: cli
            .effective_log_level(config.logging.level.as_str())
            .to_string(),
        format: cli.effective_log_format(config.logging.format),
        with_target: config.logging.with_target,
        with_thread_ids: config.logging.with_thread_ids,
    }
}

/// Executes the appropriate command based on CLI arguments.
pub async fn execute(cli: Cli) -> BinResult<()> {
    let config = load_cli_config(&cli)?;
    init_logging(&log_options(&cli, &config))?;
    debug!(config = ?cli.config_path(), "Configuration loaded");

    match cli.effective_command() {
        Commands::Run(args) => run::run(&cli, config, args).await,
        Commands::Validate(args) => validate::validate(&cli, &config, args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn test_load_cli_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "logging:\n  level: debug\n  format: json").unwrap();

        let path = file.path().to_string_lossy().to_string();
        let cli = Cli::parse_from(["uapub", "-c", path.as_str()]);
        let config = load_cli_config(&cli).unwrap();

        let options = log_options(&cli, &config);
        assert_eq!(options.level, "debug");
        assert_eq!(options.format, crate::cli::LogFormat::Json);
    }

    #[test]
    fn test_load_cli_config_missing_file() {
        let cli = Cli::parse_from(["uapub", "-c", "/nonexistent/uapub.yaml"]);
        let err = load_cli_config(&cli).unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
