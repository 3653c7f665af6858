// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `run`: start the gateway (default)
//! - `validate`: check the configuration and published nodes files

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Default configuration file, used when it exists and `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "uapub.yaml";

// =============================================================================
// Main CLI Structure
// =============================================================================

/// uapub - OPC UA publisher gateway
///
/// Subscribes to OPC UA servers and forwards batched notifications to a
/// message client.
#[derive(Parser, Debug)]
#[command(
    name = "uapub",
    author = "Sylvex <contact@sylvex.io>",
    version = uapub_core::VERSION,
    about = "OPC UA publisher gateway",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path (YAML, TOML or JSON)
    #[arg(short, long, env = "UAPUB_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Published nodes file; overrides the one named in the configuration
    #[arg(short = 'n', long, env = "UAPUB_PUBLISHED_NODES", global = true)]
    pub published_nodes: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the configuration
    #[arg(short, long, env = "UAPUB_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format; overrides the configuration
    #[arg(long, env = "UAPUB_LOG_FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the gateway
    ///
    /// This is the default command when no subcommand is specified.
    Run(RunArgs),

    /// Validate the configuration and published nodes files
    ///
    /// Parses both files and prints the resolved engine configuration
    /// without connecting to any server.
    Validate(ValidateArgs),
}

/// Arguments for the `run` command.
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// Pretty-print messages written to stdout
    #[arg(long)]
    pub pretty: bool,

    /// Interval of the periodic statistics log line in seconds; 0 disables it
    #[arg(long, default_value = "60", env = "UAPUB_STATS_INTERVAL")]
    pub stats_interval: u64,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Default, Clone)]
pub struct ValidateArgs {
    /// Print the resolved engine configuration
    #[arg(short, long)]
    pub show_config: bool,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Treat warnings as errors
    #[arg(long)]
    pub strict: bool,
}

// =============================================================================
// Enums
// =============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for structured logging
    Json,
    /// Compact format for minimal output
    Compact,
}

impl From<uapub_config::LogFormat> for LogFormat {
    fn from(format: uapub_config::LogFormat) -> Self {
        match format {
            uapub_config::LogFormat::Text => LogFormat::Text,
            uapub_config::LogFormat::Json => LogFormat::Json,
            uapub_config::LogFormat::Compact => LogFormat::Compact,
        }
    }
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// JSON format for programmatic parsing
    Json,
}

// =============================================================================
// Helper Methods
// =============================================================================

impl Cli {
    /// Parse CLI arguments from the command line.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective command, defaulting to `Run` if none specified.
    pub fn effective_command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Run(RunArgs::default()))
    }

    /// Returns the configuration file to load, if any.
    ///
    /// Without `--config`, [`DEFAULT_CONFIG_FILE`] is used when it exists.
    pub fn config_path(&self) -> Option<PathBuf> {
        match &self.config {
            Some(path) => Some(path.clone()),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            }
        }
    }

    /// Returns the effective log level: flags, then `--log-level`, then `configured`.
    pub fn effective_log_level<'a>(&'a self, configured: &'a str) -> &'a str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            self.log_level.as_deref().unwrap_or(configured)
        }
    }

    /// Returns the effective log format.
    pub fn effective_log_format(&self, configured: uapub_config::LogFormat) -> LogFormat {
        self.log_format.unwrap_or_else(|| configured.into())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command() {
        let cli = Cli::parse_from(["uapub"]);
        assert!(cli.command.is_none());
        assert!(matches!(cli.effective_command(), Commands::Run(_)));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["uapub", "run", "--pretty", "--stats-interval", "0"]);
        let Some(Commands::Run(args)) = cli.command else {
            panic!("Expected Run command");
        };
        assert!(args.pretty);
        assert_eq!(args.stats_interval, 0);
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["uapub", "validate", "--show-config", "-f", "json"]);
        let Some(Commands::Validate(args)) = cli.command else {
            panic!("Expected Validate command");
        };
        assert!(args.show_config);
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_paths() {
        let cli = Cli::parse_from([
            "uapub",
            "-c",
            "/etc/uapub/uapub.toml",
            "--published-nodes",
            "/etc/uapub/pn.json",
        ]);
        assert_eq!(cli.config_path(), Some(PathBuf::from("/etc/uapub/uapub.toml")));
        assert_eq!(cli.published_nodes, Some(PathBuf::from("/etc/uapub/pn.json")));
    }

    #[test]
    fn test_log_level_precedence() {
        let cli = Cli::parse_from(["uapub"]);
        assert_eq!(cli.effective_log_level("error"), "error");

        let cli = Cli::parse_from(["uapub", "-l", "debug"]);
        assert_eq!(cli.effective_log_level("error"), "debug");

        let cli = Cli::parse_from(["uapub", "-l", "debug", "-q"]);
        assert_eq!(cli.effective_log_level("error"), "warn");
    }

    #[test]
    fn test_log_format_precedence() {
        let cli = Cli::parse_from(["uapub"]);
        assert_eq!(cli.effective_log_format(uapub_config::LogFormat::Json), LogFormat::Json);

        let cli = Cli::parse_from(["uapub", "--log-format", "compact"]);
        assert_eq!(cli.effective_log_format(uapub_config::LogFormat::Json), LogFormat::Compact);
    }
}
