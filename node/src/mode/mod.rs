//! Node operating mode, derived from observer stats and chain info.

use crate::connection::ConnectionState;
use crate::rpc::{BlockchainInfo, ObserverStats, StatsMode};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum NodeMode {
    Observer,
    ValidateLite,
    ValidateArchival,
    #[default]
    Unknown,
}

impl NodeMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Observer => "observer",
            Self::ValidateLite => "validate-lite",
            Self::ValidateArchival => "validate-archival",
            Self::Unknown => "unknown",
        }
    }

    pub const fn is_validating(self) -> bool {
        matches!(self, Self::ValidateLite | Self::ValidateArchival)
    }
}

/// Whether the archival/lite split came from the node or from the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PruningState {
    Pruned,
    Archival,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ModeReport {
    pub mode: NodeMode,
    pub pruning: PruningState,
    pub is_ibd: bool,
    pub prune_height: Option<u64>,
    pub prune_target_mb: Option<u64>,
}

pub fn detect_mode(stats: Option<&ObserverStats>, info: Option<&BlockchainInfo>) -> NodeMode {
    let Some(stats) = stats else {
        return NodeMode::Unknown;
    };
    match stats.mode {
        StatsMode::Observer => NodeMode::Observer,
        StatsMode::Full => match info {
            Some(info) if info.pruned => NodeMode::ValidateLite,
            _ => NodeMode::ValidateArchival,
        },
        StatsMode::Other => NodeMode::Unknown,
    }
}

pub fn pruning_state(info: Option<&BlockchainInfo>) -> PruningState {
    match info {
        Some(info) if info.pruned => PruningState::Pruned,
        Some(_) => PruningState::Archival,
        None => PruningState::Unknown,
    }
}

pub fn is_ibd(mode: NodeMode, info: Option<&BlockchainInfo>) -> bool {
    mode != NodeMode::Observer && info.is_some_and(|info| info.initialblockdownload)
}

pub fn prune_target_mb(info: Option<&BlockchainInfo>) -> Option<u64> {
    let bytes = info?.prune_target_size?;
    Some((bytes as f64 / (1024.0 * 1024.0)).round() as u64)
}

pub fn mode_report(stats: Option<&ObserverStats>, info: Option<&BlockchainInfo>) -> ModeReport {
    let mode = detect_mode(stats, info);
    ModeReport {
        mode,
        pruning: pruning_state(info),
        is_ibd: is_ibd(mode, info),
        prune_height: info.filter(|info| info.pruned).and_then(|info| info.pruneheight),
        prune_target_mb: prune_target_mb(info),
    }
}

/// Publishes the mode report only when it changes.
pub struct ModeDetector {
    report_tx: watch::Sender<ModeReport>,
}

impl ModeDetector {
    pub fn new() -> Arc<Self> {
        let (report_tx, _) = watch::channel(ModeReport::default());
        Arc::new(Self { report_tx })
    }

    /// Re-derive from fresh inputs and return the current mode.
    pub fn detect(&self, stats: Option<&ObserverStats>, info: Option<&BlockchainInfo>) -> NodeMode {
        let report = mode_report(stats, info);
        self.report_tx.send_if_modified(|current| {
            if *current == report {
                return false;
            }
            if current.mode != report.mode {
                info!(from = current.mode.as_str(), to = report.mode.as_str(), "node mode changed");
            }
            *current = report;
            true
        });
        report.mode
    }

    pub fn report(&self) -> ModeReport {
        *self.report_tx.borrow()
    }

    pub fn mode(&self) -> NodeMode {
        self.report_tx.borrow().mode
    }

    pub fn subscribe(&self) -> watch::Receiver<ModeReport> {
        self.report_tx.subscribe()
    }
}

/// Re-derive the mode on every connection state change until the
/// supervisor goes away.
pub fn spawn_mode_follower(
    detector: Arc<ModeDetector>,
    mut state_rx: watch::Receiver<ConnectionState>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            {
                let state = state_rx.borrow_and_update();
                detector.detect(state.stats.as_ref(), state.chain_info.as_ref());
            }
            if state_rx.changed().await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcConfig;
    use crate::test_utils::{chain_info, stats};

    #[test]
    fn detection_is_pure() {
        let full = stats(StatsMode::Full, 8, 10);
        let observer = stats(StatsMode::Observer, 8, 10);
        let other = stats(StatsMode::Other, 8, 10);
        let mut pruned = chain_info(100, 100, false);
        pruned.pruned = true;
        let archival = chain_info(100, 100, false);

        assert_eq!(detect_mode(None, None), NodeMode::Unknown);
        assert_eq!(detect_mode(None, Some(&archival)), NodeMode::Unknown);
        assert_eq!(detect_mode(Some(&observer), Some(&pruned)), NodeMode::Observer);
        assert_eq!(detect_mode(Some(&full), Some(&pruned)), NodeMode::ValidateLite);
        assert_eq!(detect_mode(Some(&full), Some(&archival)), NodeMode::ValidateArchival);
        assert_eq!(detect_mode(Some(&full), None), NodeMode::ValidateArchival);
        assert_eq!(detect_mode(Some(&other), Some(&archival)), NodeMode::Unknown);
        // Same inputs, same answer.
        assert_eq!(
            detect_mode(Some(&full), Some(&pruned)),
            detect_mode(Some(&full), Some(&pruned))
        );
    }

    #[test]
    fn ibd_and_prune_target() {
        let mut info = chain_info(10, 100, true);
        assert!(is_ibd(NodeMode::ValidateArchival, Some(&info)));
        assert!(!is_ibd(NodeMode::Observer, Some(&info)));
        assert!(!is_ibd(NodeMode::ValidateArchival, None));

        assert_eq!(prune_target_mb(Some(&info)), None);
        info.prune_target_size = Some(550 * 1024 * 1024 + 400_000);
        assert_eq!(prune_target_mb(Some(&info)), Some(550));
        assert_eq!(prune_target_mb(None), None);
    }

    #[test]
    fn pruning_state_separates_default_from_reported() {
        let full = stats(StatsMode::Full, 1, 1);
        let report = mode_report(Some(&full), None);
        assert_eq!(report.mode, NodeMode::ValidateArchival);
        assert_eq!(report.pruning, PruningState::Unknown);

        let mut info = chain_info(1, 1, false);
        info.pruned = true;
        info.pruneheight = Some(700_000);
        let report = mode_report(Some(&full), Some(&info));
        assert_eq!(report.pruning, PruningState::Pruned);
        assert_eq!(report.prune_height, Some(700_000));
    }

    #[test]
    fn detector_publishes_only_changes() {
        let detector = ModeDetector::new();
        let mut rx = detector.subscribe();
        let full = stats(StatsMode::Full, 1, 1);
        let info = chain_info(5, 5, false);

        detector.detect(Some(&full), Some(&info));
        assert!(rx.has_changed().expect("sender alive"));
        rx.borrow_and_update();

        detector.detect(Some(&full), Some(&info));
        assert!(!rx.has_changed().expect("sender alive"));
        assert_eq!(detector.mode(), NodeMode::ValidateArchival);
    }

    #[tokio::test]
    async fn follower_tracks_connection_state() {
        let detector = ModeDetector::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::new(RpcConfig::default()));
        let mut mode_rx = detector.subscribe();
        let handle = spawn_mode_follower(Arc::clone(&detector), state_rx);

        state_tx.send_modify(|state| {
            state.stats = Some(stats(StatsMode::Observer, 2, 20));
        });
        mode_rx.changed().await.expect("mode published");
        assert_eq!(detector.mode(), NodeMode::Observer);

        drop(state_tx);
        handle.await.expect("follower exits");
    }
}
