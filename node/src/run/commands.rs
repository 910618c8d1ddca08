//! Subcommand handlers: status, history and reset-history.

// CLI commands output directly to stdout for user feedback
#![expect(clippy::print_stdout, reason = "CLI commands require stdout output")]

use super::context::{build_reference, open_storage};
use crate::cli::MonitorConfig;
use crate::connection::{ConfigUpdate, ConnectionStatus, ConnectionSupervisor};
use crate::history::{ProgressCursor, SessionLedger, SyncCompletion, SyncSession};
use crate::mode::{mode_report, ModeReport};
use crate::rpc::{NodeApi, ObserverStats, RpcTransport};
use crate::storage::Storage;
use crate::sync::{SyncTracker, SyncView};
use crate::ui;
use eyre::{eyre, Result};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// One-shot view of the node, printed by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub endpoint: String,
    pub status: ConnectionStatus,
    pub error: Option<String>,
    pub mode: ModeReport,
    pub stats: Option<ObserverStats>,
    pub sync: Option<SyncView>,
    pub external_height: Option<u64>,
    pub external_hashrate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryReport {
    pub sessions: Vec<SyncSession>,
    pub open_session: Option<SyncSession>,
    pub completion: Option<SyncCompletion>,
    pub total_blocks_validated: u64,
    pub total_time_ms: u64,
    pub last_known_height: u64,
    pub last_progress: Option<ProgressCursor>,
}

impl HistoryReport {
    pub fn from_ledger(ledger: &SessionLedger) -> Self {
        Self {
            sessions: ledger.sessions().to_vec(),
            open_session: ledger.open_session().cloned(),
            completion: ledger.completion().cloned(),
            total_blocks_validated: ledger.total_blocks_validated(),
            total_time_ms: ledger.total_time_ms(),
            last_known_height: ledger.last_known_height(),
            last_progress: ledger.last_progress().cloned(),
        }
    }
}

/// Handle the `status` subcommand. Fails after printing when the node is
/// unreachable so scripts can test the exit code.
pub async fn handle_status(config: &MonitorConfig, json: bool) -> Result<()> {
    let storage = open_storage(&config.resolved_data_dir());
    let api: Arc<dyn NodeApi> = Arc::new(RpcTransport::new()?);
    let report = collect_status(config, storage, api).await?;
    ui::print_status(&report, json)?;
    if report.status != ConnectionStatus::Connected {
        return Err(eyre!("node at {} is unreachable", report.endpoint));
    }
    Ok(())
}

pub async fn collect_status(
    config: &MonitorConfig,
    storage: Arc<Storage>,
    api: Arc<dyn NodeApi>,
) -> Result<StatusReport> {
    let supervisor =
        ConnectionSupervisor::new(Arc::clone(&api), build_reference(config), storage);
    if config.endpoint.is_some() || config.timeout_ms.is_some() {
        supervisor.set_config(ConfigUpdate {
            endpoint: config.endpoint.clone(),
            timeout_ms: config.timeout_ms,
        })?;
    }

    let connected = supervisor.tick().await;
    supervisor.fetch_external_reference().await;
    let state = supervisor.state();

    let chain = if connected {
        match api.chain_snapshot(&state.config).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                debug!(error = %err, "chain snapshot unavailable");
                None
            }
        }
    } else {
        None
    };
    let chain_info = chain
        .as_ref()
        .and_then(|snapshot| snapshot.chain_info.as_ref())
        .or(state.chain_info.as_ref());
    let mode = mode_report(state.stats.as_ref(), chain_info);
    let sync = chain
        .as_ref()
        .filter(|_| mode.mode.is_validating())
        .map(|snapshot| SyncTracker::new().apply(snapshot, state.external_height, Instant::now()));

    Ok(StatusReport {
        endpoint: state.config.endpoint.clone(),
        status: state.status,
        error: state.last_error.clone(),
        mode,
        stats: state.stats.clone(),
        sync,
        external_height: state.external_height,
        external_hashrate: state.external_hashrate,
    })
}

/// Handle the `history` subcommand.
pub fn handle_history(config: &MonitorConfig, json: bool) -> Result<()> {
    let storage = open_storage(&config.resolved_data_dir());
    let ledger = SessionLedger::load(storage);
    ui::print_history(&HistoryReport::from_ledger(&ledger), json)
}

/// Handle the `reset-history` subcommand.
pub fn handle_reset_history(config: &MonitorConfig, completion_only: bool) -> Result<()> {
    let data_dir = config.resolved_data_dir();
    let storage = open_storage(&data_dir);
    if !storage.is_persistent() {
        return Err(eyre!("cannot open state in {}", data_dir.display()));
    }
    let mut ledger = SessionLedger::load(storage);
    if completion_only {
        let had_completion = ledger.completion().is_some();
        ledger.reset_completion();
        info!(data_dir = %data_dir.display(), had_completion, "completion record reset");
        println!("Cleared the sync completion record in {}.", data_dir.display());
        return Ok(());
    }
    let sessions = ledger.sessions().len();
    ledger.clear();
    info!(data_dir = %data_dir.display(), sessions, "history reset");
    println!("Cleared {sessions} sync session(s) from {}.", data_dir.display());
    Ok(())
}
