//! Sync progress derived from successive chain snapshots.

pub mod milestones;
mod rate;

pub use milestones::{Milestone, MilestoneWatcher, MILESTONES};
pub use rate::RateEstimator;

use crate::rpc::ChainSnapshot;
use serde::Serialize;
use std::time::Instant;

/// A node within this many blocks of the network tip counts as synced.
pub const SYNCED_TOLERANCE_BLOCKS: u64 = 10;

pub fn is_synced(ibd: bool, validated: u64, network: u64) -> bool {
    if ibd {
        return false;
    }
    if validated == 0 && network > 0 {
        return false;
    }
    network.saturating_sub(validated) <= SYNCED_TOLERANCE_BLOCKS
}

pub fn in_headers_phase(headers: u64, validated: u64) -> bool {
    headers > 0 && validated == 0
}

/// Seconds until `remaining` blocks are validated, or `None` while the rate
/// is unknown.
pub fn eta_seconds(remaining: u64, blocks_per_second: f64) -> Option<f64> {
    if !(blocks_per_second.is_finite() && blocks_per_second > 0.0) {
        return None;
    }
    Some(remaining as f64 / blocks_per_second)
}

pub fn format_eta(eta: Option<f64>) -> String {
    let Some(eta) = eta else {
        return "calculating...".to_string();
    };
    let secs = eta.max(0.0).round() as u64;
    let (days, hours, minutes, seconds) = (
        secs / 86_400,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60,
    );
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub fn format_rate(rate: Option<f64>, unit: &str) -> String {
    match rate {
        Some(rate) if rate >= 100.0 => format!("{rate:.0} {unit}/s"),
        Some(rate) => format!("{rate:.1} {unit}/s"),
        None => format!("-- {unit}/s"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    #[default]
    Estimated,
    Reported,
}

/// Published sync progress. Heights and percentage never decrease within a
/// tracker's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SyncView {
    pub validated_height: u64,
    pub header_height: u64,
    pub network_height: u64,
    pub blocks_remaining: u64,
    pub progress_percent: f64,
    pub headers_phase: bool,
    pub blocks_phase: bool,
    pub synced: bool,
    pub ibd: bool,
    pub header_rate: Option<f64>,
    pub block_rate: Option<f64>,
    pub block_rate_source: RateSource,
    pub eta_seconds: Option<f64>,
    pub best_block_hash: String,
    pub size_on_disk: u64,
    pub sync_peers: u64,
}

#[derive(Debug, Default)]
pub struct SyncTracker {
    view: Option<SyncView>,
    header_rate: RateEstimator,
    block_rate: RateEstimator,
    reported_block_rate: Option<f64>,
}

impl SyncTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> Option<&SyncView> {
        self.view.as_ref()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fold one snapshot into the view. `external_height` is the third-party
    /// tip when one has been fetched.
    pub fn apply(
        &mut self,
        snapshot: &ChainSnapshot,
        external_height: Option<u64>,
        now: Instant,
    ) -> SyncView {
        let info = snapshot.chain_info.as_ref();
        let status = snapshot.sync_status.as_ref();

        let validated_raw = info
            .map(|info| info.blocks)
            .or(status.map(|status| status.tip_height))
            .unwrap_or(0);
        let headers_raw = info
            .map(|info| info.headers)
            .into_iter()
            .chain(status.map(|status| status.best_header_height))
            .max()
            .unwrap_or(0);
        let ibd = info.is_some_and(|info| info.initialblockdownload)
            || status.is_some_and(|status| status.initialblockdownload);

        let previous = self.view.as_ref();
        let validated = previous.map_or(validated_raw, |v| v.validated_height.max(validated_raw));
        let headers = previous.map_or(headers_raw, |v| v.header_height.max(headers_raw));
        let network = external_height.unwrap_or(0).max(headers);
        // Stats alone say nothing about the chain.
        let synced = snapshot.has_chain_data() && is_synced(ibd, validated, network);

        let header_rate = self.header_rate.observe(headers_raw, now);
        if let Some(reported) = status.and_then(|status| status.blocks_per_second) {
            self.reported_block_rate = Some(reported);
        }
        let (block_rate, block_rate_source) = match self.reported_block_rate {
            Some(reported) => (Some(reported), RateSource::Reported),
            None => (
                self.block_rate.observe(validated_raw, now),
                RateSource::Estimated,
            ),
        };

        let blocks_remaining = network.saturating_sub(validated);
        let eta = if synced {
            Some(0.0)
        } else {
            block_rate.and_then(|rate| eta_seconds(blocks_remaining, rate))
        };

        let reported_percent = status.and_then(|status| status.sync_percentage);
        let computed_percent = match (reported_percent, network) {
            (Some(percent), _) => percent,
            (None, 0) => 0.0,
            (None, network) => validated as f64 / network as f64 * 100.0,
        };
        let computed_percent = if computed_percent.is_finite() {
            computed_percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let progress_percent =
            previous.map_or(computed_percent, |v| v.progress_percent.max(computed_percent));

        let view = SyncView {
            validated_height: validated,
            header_height: headers,
            network_height: network,
            blocks_remaining,
            progress_percent,
            headers_phase: in_headers_phase(headers, validated),
            blocks_phase: validated > 0 && !synced,
            synced,
            ibd,
            header_rate,
            block_rate,
            block_rate_source,
            eta_seconds: eta,
            best_block_hash: info.map(|info| info.bestblockhash.clone()).unwrap_or_default(),
            size_on_disk: info.map_or(0, |info| info.size_on_disk),
            sync_peers: status.map_or(0, |status| status.active_sync_peers),
        };
        self.view = Some(view.clone());
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{chain_snapshot, sync_status};
    use std::time::Duration;

    #[test]
    fn synced_boundaries() {
        assert!(!is_synced(false, 0, 800_000));
        assert!(is_synced(false, 799_995, 800_000));
        assert!(!is_synced(false, 799_988, 800_000));
        assert!(is_synced(false, 799_990, 800_000));
        assert!(!is_synced(true, 800_000, 800_000));
        assert!(is_synced(false, 0, 0));
    }

    #[test]
    fn headers_phase_only_before_first_block() {
        assert!(in_headers_phase(10, 0));
        assert!(!in_headers_phase(0, 0));
        assert!(!in_headers_phase(10, 1));
    }

    #[test]
    fn eta_needs_a_positive_rate() {
        assert_eq!(eta_seconds(100, 0.0), None);
        assert_eq!(eta_seconds(100, -1.0), None);
        assert_eq!(eta_seconds(100, f64::NAN), None);
        assert_eq!(eta_seconds(100, 4.0), Some(25.0));
        assert_eq!(format_eta(None), "calculating...");
        assert_eq!(format_eta(Some(42.0)), "42s");
        assert_eq!(format_eta(Some(3_725.0)), "1h 2m");
        assert_eq!(format_eta(Some(200_000.0)), "2d 7h");
    }

    #[test]
    fn external_height_takes_precedence() {
        let mut tracker = SyncTracker::new();
        let now = Instant::now();
        let view = tracker.apply(&chain_snapshot(799_995, 799_995, false), Some(800_000), now);
        assert_eq!(view.network_height, 800_000);
        assert_eq!(view.blocks_remaining, 5);
        assert!(view.synced);
        assert_eq!(view.eta_seconds, Some(0.0));

        let mut tracker = SyncTracker::new();
        let view = tracker.apply(&chain_snapshot(799_988, 799_988, false), Some(800_000), now);
        assert!(!view.synced);
        assert!(view.blocks_phase);

        let mut tracker = SyncTracker::new();
        let view = tracker.apply(&chain_snapshot(0, 800_000, true), None, now);
        assert!(view.headers_phase);
        assert!(!view.synced);
        assert_eq!(view.network_height, 800_000);
    }

    #[test]
    fn view_is_monotonic() {
        let mut tracker = SyncTracker::new();
        let now = Instant::now();
        let first = tracker.apply(&chain_snapshot(500_000, 800_000, true), None, now);
        let second = tracker.apply(
            &chain_snapshot(499_000, 799_000, true),
            None,
            now + Duration::from_secs(2),
        );
        assert_eq!(second.validated_height, 500_000);
        assert_eq!(second.header_height, 800_000);
        assert!(second.progress_percent >= first.progress_percent);
    }

    #[test]
    fn stats_only_snapshot_is_never_synced() {
        let mut tracker = SyncTracker::new();
        let mut snapshot = chain_snapshot(0, 0, false);
        snapshot.chain_info = None;
        let view = tracker.apply(&snapshot, None, Instant::now());
        assert_eq!(view.validated_height, 0);
        assert_eq!(view.network_height, 0);
        assert!(!view.synced);
    }

    #[test]
    fn estimated_rate_drives_eta() {
        let mut tracker = SyncTracker::new();
        let now = Instant::now();
        let view = tracker.apply(&chain_snapshot(1_000, 11_000, true), None, now);
        assert_eq!(view.eta_seconds, None);
        let view = tracker.apply(
            &chain_snapshot(1_020, 11_000, true),
            None,
            now + Duration::from_secs(2),
        );
        assert_eq!(view.block_rate, Some(10.0));
        assert_eq!(view.block_rate_source, RateSource::Estimated);
        assert_eq!(view.eta_seconds, Some(998.0));
    }

    #[test]
    fn reported_rate_latches() {
        let mut tracker = SyncTracker::new();
        let now = Instant::now();
        let mut snapshot = chain_snapshot(1_000, 11_000, true);
        snapshot.sync_status = Some(sync_status(1_000, 11_000, Some(50.0)));
        let view = tracker.apply(&snapshot, None, now);
        assert_eq!(view.block_rate, Some(50.0));
        assert_eq!(view.block_rate_source, RateSource::Reported);

        // The node stops reporting; the client still does not estimate.
        let view = tracker.apply(
            &chain_snapshot(1_500, 11_000, true),
            None,
            now + Duration::from_secs(1),
        );
        assert_eq!(view.block_rate, Some(50.0));
        assert_eq!(view.block_rate_source, RateSource::Reported);
    }

    #[test]
    fn reported_percentage_is_used_and_clamped() {
        let mut tracker = SyncTracker::new();
        let mut snapshot = chain_snapshot(100, 200, true);
        let mut status = sync_status(100, 200, None);
        status.sync_percentage = Some(150.0);
        snapshot.sync_status = Some(status);
        let view = tracker.apply(&snapshot, None, Instant::now());
        assert_eq!(view.progress_percent, 100.0);
    }
}
