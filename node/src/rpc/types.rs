//! Wire types returned by the node's JSON-RPC surface.

use serde::{Deserialize, Serialize};

/// Observer stats method.
pub const METHOD_OBSERVER_STATS: &str = "getobserverstats";
/// Chain info method.
pub const METHOD_BLOCKCHAIN_INFO: &str = "getblockchaininfo";
/// Rich sync status method.
pub const METHOD_SYNC_STATUS: &str = "getsyncstatus";
/// Recently observed blocks.
pub const METHOD_RECENT_BLOCKS: &str = "getrecentblocks";
/// Recently observed transactions.
pub const METHOD_RECENT_TXS: &str = "getrecenttxs";

/// Operating mode tag reported by the stats method.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatsMode {
    /// Relay-only observer, no validation.
    Observer,
    /// Full validation (pruned or archival).
    Full,
    /// Any tag this client does not understand.
    #[serde(other)]
    Other,
}

/// Per-message-type receive counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MessageCounters {
    pub version: u64,
    pub verack: u64,
    pub addr: u64,
    pub inv: u64,
    pub getdata: u64,
    pub getheaders: u64,
    pub headers: u64,
    pub block: u64,
    pub tx: u64,
    pub ping: u64,
    pub pong: u64,
    pub other: u64,
}

impl MessageCounters {
    /// Sum of every counter.
    pub fn total(&self) -> u64 {
        [
            self.version,
            self.verack,
            self.addr,
            self.inv,
            self.getdata,
            self.getheaders,
            self.headers,
            self.block,
            self.tx,
            self.ping,
            self.pong,
            self.other,
        ]
        .iter()
        .fold(0u64, |acc, value| acc.saturating_add(*value))
    }
}

/// Snapshot returned by `getobserverstats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObserverStats {
    pub mode: StatsMode,
    pub uptime_seconds: u64,
    pub peer_count: u64,
    #[serde(default)]
    pub start_height: u64,
    #[serde(default)]
    pub messages_received: MessageCounters,
}

/// Snapshot returned by `getblockchaininfo`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockchainInfo {
    #[serde(default)]
    pub chain: String,
    pub blocks: u64,
    pub headers: u64,
    #[serde(default)]
    pub bestblockhash: String,
    #[serde(default)]
    pub difficulty: f64,
    #[serde(default)]
    pub mediantime: u64,
    #[serde(default)]
    pub verificationprogress: f64,
    #[serde(default)]
    pub initialblockdownload: bool,
    #[serde(default)]
    pub chainwork: String,
    #[serde(default)]
    pub size_on_disk: u64,
    #[serde(default)]
    pub pruned: bool,
    #[serde(default)]
    pub pruneheight: Option<u64>,
    #[serde(default)]
    pub prune_target_size: Option<u64>,
}

/// Snapshot returned by `getsyncstatus`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeSyncStatus {
    #[serde(default)]
    pub mode: String,
    pub tip_height: u64,
    pub best_header_height: u64,
    #[serde(default)]
    pub blocks_pending: u64,
    #[serde(default)]
    pub blocks_in_flight: u64,
    #[serde(default)]
    pub sync_percentage: Option<f64>,
    #[serde(default)]
    pub blocks_per_second: Option<f64>,
    #[serde(default)]
    pub eta_seconds: Option<f64>,
    #[serde(default)]
    pub active_sync_peers: u64,
    #[serde(default)]
    pub total_peers: u64,
    #[serde(default)]
    pub initialblockdownload: bool,
}

/// A block announcement seen by the observer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedBlock {
    pub hash: String,
    #[serde(default)]
    pub height: Option<u64>,
    /// Unix seconds.
    pub first_seen: u64,
    #[serde(default)]
    pub peer_count: u64,
}

/// A transaction announcement seen by the observer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedTransaction {
    pub txid: String,
    /// Unix seconds.
    pub first_seen: u64,
    #[serde(default)]
    pub size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_mode_tag_decodes_as_other() {
        let stats: ObserverStats = serde_json::from_value(json!({
            "mode": "light",
            "uptime_seconds": 5,
            "peer_count": 1,
        }))
        .expect("decode");
        assert_eq!(stats.mode, StatsMode::Other);
        assert_eq!(stats.messages_received, MessageCounters::default());
    }

    #[test]
    fn blockchain_info_tolerates_missing_optional_fields() {
        let info: BlockchainInfo = serde_json::from_value(json!({
            "chain": "main",
            "blocks": 10,
            "headers": 20,
            "pruned": true,
            "prune_target_size": 576_716_800u64,
        }))
        .expect("decode");
        assert!(info.pruned);
        assert_eq!(info.pruneheight, None);
        assert_eq!(info.prune_target_size, Some(576_716_800));
        assert!(!info.initialblockdownload);
    }

    #[test]
    fn counters_total_sums_every_field() {
        let counters = MessageCounters {
            inv: 3,
            tx: 4,
            other: 1,
            ..MessageCounters::default()
        };
        assert_eq!(counters.total(), 8);
    }
}
