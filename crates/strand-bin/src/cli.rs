// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! CLI argument parsing and command definitions.
//!
//! - `read`: read node values once
//! - `subscribe`: stream data changes until interrupted
//! - `browse`: list the children of a node
//! - `validate`: check a configuration file
//! - `version`: show version information

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

// =============================================================================
// Main CLI Structure
// =============================================================================

/// strand - OPC UA client
#[derive(Parser, Debug)]
#[command(
    name = "strand",
    author = "Sylvex <contact@sylvex.io>",
    version = crate::VERSION,
    about = "OPC UA client with ordered, reconnect-safe subscriptions",
    long_about = None,
    propagate_version = true
)]
pub struct Cli {
    /// Configuration file path (YAML, TOML or JSON)
    #[arg(short, long, env = "STRAND_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Server endpoint, overrides the configuration file
    #[arg(short, long, env = "STRAND_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short,
        long,
        default_value = "info",
        env = "STRAND_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json, compact)
    #[arg(long, default_value = "text", env = "STRAND_LOG_FORMAT", global = true)]
    pub log_format: LogFormat,

    /// Enable quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

// =============================================================================
// Subcommands
// =============================================================================

/// Available subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Read node values once
    Read(ReadArgs),

    /// Subscribe to data changes until interrupted
    ///
    /// Values are printed in server order. Reconnects, gaps and
    /// recreated subscriptions are reported on stderr.
    Subscribe(SubscribeArgs),

    /// List the children of a node
    Browse(BrowseArgs),

    /// Validate the configuration file
    Validate(ValidateArgs),

    /// Show version information
    Version,
}

// =============================================================================
// Command Arguments
// =============================================================================

/// Arguments for the `read` command.
#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Nodes to read (`ns=2;s=Tag`, `i=2258`)
    #[arg(required = true)]
    pub nodes: Vec<String>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `subscribe` command.
#[derive(Args, Debug, Clone)]
pub struct SubscribeArgs {
    /// Nodes to monitor
    #[arg(required = true)]
    pub nodes: Vec<String>,

    /// Publishing interval (`500ms`, `1s`)
    #[arg(short, long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub interval: Duration,

    /// Sampling interval, defaults to the publishing interval
    #[arg(short, long, value_parser = humantime::parse_duration)]
    pub sampling: Option<Duration>,

    /// Keep-alive count
    #[arg(short, long, default_value = "10")]
    pub keepalive_count: u32,

    /// Queue size per monitored item
    #[arg(long, default_value = "1")]
    pub queue_size: u32,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `browse` command.
#[derive(Args, Debug, Clone)]
pub struct BrowseArgs {
    /// Node to browse
    #[arg(default_value = "i=85")]
    pub node: String,

    /// Output format
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,
}

/// Arguments for the `validate` command.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateArgs {
    /// Show parsed configuration after validation
    #[arg(short, long)]
    pub show_config: bool,
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

/// Output format for command results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format
    #[default]
    Text,
    /// One JSON document per line
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

    /// Get the effective log level based on flags.
    pub fn effective_log_level(&self) -> &str {
        if self.quiet {
            "warn"
        } else if self.verbose {
            "debug"
        } else {
            &self.log_level
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
    fn test_read_command() {
        let cli = Cli::parse_from(["strand", "read", "i=2258", "ns=2;s=Temp"]);
        if let Commands::Read(args) = cli.command {
            assert_eq!(args.nodes, vec!["i=2258", "ns=2;s=Temp"]);
            assert_eq!(args.format, OutputFormat::Text);
        } else {
            panic!("Expected Read command");
        }
    }

    #[test]
    fn test_read_requires_nodes() {
        assert!(Cli::try_parse_from(["strand", "read"]).is_err());
    }

    #[test]
    fn test_subscribe_command() {
        let cli = Cli::parse_from([
            "strand",
            "subscribe",
            "i=2258",
            "--interval",
            "500ms",
            "-k",
            "5",
            "-f",
            "json",
        ]);
        if let Commands::Subscribe(args) = cli.command {
            assert_eq!(args.interval, Duration::from_millis(500));
            assert_eq!(args.keepalive_count, 5);
            assert_eq!(args.sampling, None);
            assert_eq!(args.format, OutputFormat::Json);
        } else {
            panic!("Expected Subscribe command");
        }
    }

    #[test]
    fn test_browse_default_node() {
        let cli = Cli::parse_from(["strand", "browse"]);
        if let Commands::Browse(args) = cli.command {
            assert_eq!(args.node, "i=85");
        } else {
            panic!("Expected Browse command");
        }
    }

    #[test]
    fn test_global_options() {
        let cli = Cli::parse_from([
            "strand",
            "read",
            "i=2258",
            "-c",
            "/etc/strand/client.json",
            "-e",
            "opc.tcp://plc:4840",
            "--log-format",
            "json",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/strand/client.json")));
        assert_eq!(cli.endpoint.as_deref(), Some("opc.tcp://plc:4840"));
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_quiet_and_verbose() {
        let cli = Cli::parse_from(["strand", "-q", "version"]);
        assert_eq!(cli.effective_log_level(), "warn");

        let cli = Cli::parse_from(["strand", "-v", "version"]);
        assert_eq!(cli.effective_log_level(), "debug");

        let cli = Cli::parse_from(["strand", "-l", "trace", "version"]);
        assert_eq!(cli.effective_log_level(), "trace");
    }
}
