//! Run orchestration module.
//!
//! - `context`: shared wiring (storage, supervisor, mode detection, views)
//! - `commands`: one-shot subcommands (status, history, reset-history)
//! - `dashboard`: fullscreen ratatui loop
//! - `headless`: log output with progress bars

mod commands;
mod context;
mod dashboard;
mod headless;

pub use commands::{
    handle_history, handle_reset_history, handle_status, HistoryReport, StatusReport,
};
pub use context::AppContext;
pub use dashboard::run_dashboard;
pub use headless::run_headless;

use crate::cli::{Command, MonitorConfig};
use crate::logging::TracingGuards;
use eyre::Result;

/// Dispatch a subcommand, or run the monitor until the user quits.
pub async fn run(config: &MonitorConfig, guards: &TracingGuards) -> Result<()> {
    match config.command.as_ref() {
        Some(Command::Status { json }) => return handle_status(config, *json).await,
        Some(Command::History { json }) => return handle_history(config, *json),
        Some(Command::ResetHistory { completion_only }) => {
            return handle_reset_history(config, *completion_only)
        }
        None => {}
    }

    let ctx = AppContext::build(config)?;
    match guards.tui_log_buffer.as_ref() {
        Some(logs) => run_dashboard(ctx, std::sync::Arc::clone(logs)).await,
        None => run_headless(ctx).await,
    }
}
