//! CLI and config handling.

use crate::reference::DEFAULT_REFERENCE_URL;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default filter for the JSON log file.
pub const DEFAULT_LOG_JSON_FILTER: &str = "debug";
/// Data directory name under `$HOME` when `--data-dir` is not given.
pub const DEFAULT_DATA_DIR_NAME: &str = ".node-monitor";

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Query the node once and print connection, mode and sync progress.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Print recorded sync sessions and the completion record.
    History {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Forget all recorded sync sessions and the completion record.
    ResetHistory {
        /// Only forget the completion record, keeping the sessions.
        #[arg(long)]
        completion_only: bool,
    },
}

/// Supervisory dashboard configuration.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "node-monitor",
    about = "Dashboard for a local Bitcoin node: connection, sync progress and history"
)]
pub struct MonitorConfig {
    /// JSON-RPC endpoint. Saved as the new default when given.
    #[arg(long)]
    pub endpoint: Option<String>,
    /// Per-call RPC timeout in milliseconds. Saved as the new default when given.
    #[arg(long)]
    pub timeout_ms: Option<u64>,
    /// Directory for persisted state. Defaults to `$HOME/.node-monitor`.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Base URL of the mempool.space-compatible reference API.
    #[arg(long, default_value = DEFAULT_REFERENCE_URL)]
    pub reference_url: String,
    /// Never contact the reference API.
    #[arg(long)]
    pub no_reference: bool,
    /// Log to stdout instead of drawing the dashboard.
    #[arg(long)]
    pub no_tui: bool,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
    /// Also write JSON-lines logs to this file.
    #[arg(long)]
    pub log_json: Option<PathBuf>,
    /// Filter for the JSON log file.
    #[arg(long, default_value = DEFAULT_LOG_JSON_FILTER)]
    pub log_json_filter: String,
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl MonitorConfig {
    /// Parse configuration from CLI args.
    pub fn from_args() -> Self {
        Self::parse()
    }

    pub fn resolved_data_dir(&self) -> PathBuf {
        if let Some(dir) = self.data_dir.as_ref() {
            return dir.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(DEFAULT_DATA_DIR_NAME),
            None => PathBuf::from(DEFAULT_DATA_DIR_NAME),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let config = MonitorConfig::parse_from(["node-monitor"]);
        assert_eq!(config.command, None);
        assert_eq!(config.reference_url, DEFAULT_REFERENCE_URL);
        assert_eq!(config.endpoint, None);
        assert_eq!(config.timeout_ms, None);
        assert!(!config.no_tui);
    }

    #[test]
    fn flags_and_subcommands() {
        let config = MonitorConfig::parse_from([
            "node-monitor",
            "--endpoint",
            "http://node:8332",
            "--timeout-ms",
            "2500",
            "--data-dir",
            "/tmp/monitor",
            "-vv",
            "status",
            "--json",
        ]);
        assert_eq!(config.endpoint.as_deref(), Some("http://node:8332"));
        assert_eq!(config.timeout_ms, Some(2_500));
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.resolved_data_dir(), PathBuf::from("/tmp/monitor"));
        assert_eq!(config.command, Some(Command::Status { json: true }));

        let config = MonitorConfig::parse_from(["node-monitor", "reset-history"]);
        assert_eq!(
            config.command,
            Some(Command::ResetHistory {
                completion_only: false
            })
        );
        let config =
            MonitorConfig::parse_from(["node-monitor", "reset-history", "--completion-only"]);
        assert_eq!(
            config.command,
            Some(Command::ResetHistory {
                completion_only: true
            })
        );
    }
}
