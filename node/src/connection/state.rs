//! Connection state shared with every view.

use crate::rpc::{BlockchainInfo, ObserverStats, RpcConfig};
use serde::Serialize;
use std::time::SystemTime;

/// Peers found within this many seconds of startup count as "still warming up".
pub const PEER_DISCOVERY_GRACE_SECS: u64 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

/// Everything known about the link to the node. Reset on disconnect.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub config: RpcConfig,
    pub last_error: Option<String>,
    pub last_check_at: Option<SystemTime>,
    pub stats: Option<ObserverStats>,
    pub chain_info: Option<BlockchainInfo>,
    pub external_height: Option<u64>,
    pub external_hashrate: Option<f64>,
    pub external_fetched_at: Option<SystemTime>,
}

impl ConnectionState {
    pub fn new(config: RpcConfig) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            config,
            last_error: None,
            last_check_at: None,
            stats: None,
            chain_info: None,
            external_height: None,
            external_hashrate: None,
            external_fetched_at: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// One-line status for headers and logs.
    pub fn status_line(&self) -> String {
        match self.status {
            ConnectionStatus::Disconnected => "Disconnected".to_string(),
            ConnectionStatus::Connecting => format!("Connecting to {}...", self.config.endpoint),
            ConnectionStatus::Error => match self.last_error.as_deref() {
                Some(err) => format!("Cannot reach node: {err}"),
                None => "Cannot reach node".to_string(),
            },
            ConnectionStatus::Connected => match self.stats.as_ref() {
                Some(stats) => observer_status_message(stats),
                None => "Connected".to_string(),
            },
        }
    }
}

/// True when the two snapshots differ in any field, uptime included.
pub fn stats_changed(previous: Option<&ObserverStats>, next: Option<&ObserverStats>) -> bool {
    previous != next
}

pub fn observer_status_message(stats: &ObserverStats) -> String {
    match stats.peer_count {
        0 if stats.uptime_seconds < PEER_DISCOVERY_GRACE_SECS => "Discovering peers...".to_string(),
        0 => "Still discovering peers, this can take a few minutes".to_string(),
        1 => "Observing the network through 1 peer".to_string(),
        n => format!("Observing the network through {n} peers"),
    }
}
