//! Shared fixtures for unit tests.

use crate::reference::{ReferenceSnapshot, ReferenceSource};
use crate::rpc::types::{MessageCounters, NodeSyncStatus};
use crate::rpc::{
    BlockchainInfo, ChainSnapshot, HeartbeatSnapshot, NodeApi, ObserverFeedSnapshot,
    ObserverStats, RpcConfig, RpcError, StatsMode,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

pub fn temp_dir(prefix: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time moves forward")
        .as_nanos();
    let suffix = COUNTER.fetch_add(1, Ordering::SeqCst);
    let mut path = std::env::temp_dir();
    path.push(format!(
        "node-monitor-{prefix}-test-{now}-{}-{suffix}",
        std::process::id()
    ));
    path
}

pub fn stats(mode: StatsMode, peer_count: u64, uptime_seconds: u64) -> ObserverStats {
    ObserverStats {
        mode,
        uptime_seconds,
        peer_count,
        start_height: 0,
        messages_received: MessageCounters::default(),
    }
}

pub fn sample_stats_json(mode: &str, peer_count: u64, uptime_seconds: u64) -> Value {
    json!({
        "mode": mode,
        "uptime_seconds": uptime_seconds,
        "peer_count": peer_count,
        "start_height": 0,
        "messages_received": { "inv": 12, "tx": 40, "headers": 3 },
    })
}

pub fn chain_info(blocks: u64, headers: u64, ibd: bool) -> BlockchainInfo {
    BlockchainInfo {
        chain: "main".into(),
        blocks,
        headers,
        bestblockhash: format!("{blocks:064x}"),
        difficulty: 1.0,
        mediantime: 1_700_000_000,
        verificationprogress: 0.0,
        initialblockdownload: ibd,
        chainwork: String::new(),
        size_on_disk: 0,
        pruned: false,
        pruneheight: None,
        prune_target_size: None,
    }
}

pub fn sample_chain_info_json(blocks: u64, headers: u64, ibd: bool) -> Value {
    serde_json::to_value(chain_info(blocks, headers, ibd)).expect("encode chain info")
}

pub fn sync_status(tip: u64, best_header: u64, blocks_per_second: Option<f64>) -> NodeSyncStatus {
    NodeSyncStatus {
        mode: "full".into(),
        tip_height: tip,
        best_header_height: best_header,
        blocks_pending: 0,
        blocks_in_flight: 0,
        sync_percentage: None,
        blocks_per_second,
        eta_seconds: None,
        active_sync_peers: 0,
        total_peers: 0,
        initialblockdownload: tip < best_header,
    }
}

pub fn chain_snapshot(blocks: u64, headers: u64, ibd: bool) -> ChainSnapshot {
    ChainSnapshot {
        stats: stats(StatsMode::Full, 8, 3_600),
        chain_info: Some(chain_info(blocks, headers, ibd)),
        sync_status: None,
    }
}

fn next_scripted<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut queue = queue.lock();
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

/// Scripted node: each queue is consumed front to back and its last entry
/// repeats once the script runs out.
#[derive(Default)]
pub struct ScriptedNode {
    heartbeats: Mutex<VecDeque<Result<HeartbeatSnapshot, RpcError>>>,
    chains: Mutex<VecDeque<Result<ChainSnapshot, RpcError>>>,
    feeds: Mutex<VecDeque<Result<ObserverFeedSnapshot, RpcError>>>,
    gate: Option<Arc<Notify>>,
    pub heartbeat_calls: AtomicUsize,
    pub chain_calls: AtomicUsize,
    pub feed_calls: AtomicUsize,
}

impl ScriptedNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every chain snapshot call until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn push_heartbeat(&self, result: Result<HeartbeatSnapshot, RpcError>) {
        self.heartbeats.lock().push_back(result);
    }

    pub fn push_chain(&self, result: Result<ChainSnapshot, RpcError>) {
        self.chains.lock().push_back(result);
    }

    pub fn push_feed(&self, result: Result<ObserverFeedSnapshot, RpcError>) {
        self.feeds.lock().push_back(result);
    }

    pub fn heartbeat_count(&self) -> usize {
        self.heartbeat_calls.load(Ordering::SeqCst)
    }

    pub fn chain_count(&self) -> usize {
        self.chain_calls.load(Ordering::SeqCst)
    }
}

fn exhausted() -> RpcError {
    RpcError::Network("script exhausted".into())
}

#[async_trait]
impl NodeApi for ScriptedNode {
    async fn heartbeat(&self, _config: &RpcConfig) -> Result<HeartbeatSnapshot, RpcError> {
        self.heartbeat_calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.heartbeats).unwrap_or_else(|| Err(exhausted()))
    }

    async fn chain_snapshot(&self, _config: &RpcConfig) -> Result<ChainSnapshot, RpcError> {
        self.chain_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gate.as_ref() {
            gate.notified().await;
        }
        next_scripted(&self.chains).unwrap_or_else(|| Err(exhausted()))
    }

    async fn observer_feed(
        &self,
        _config: &RpcConfig,
        _limit: usize,
    ) -> Result<ObserverFeedSnapshot, RpcError> {
        self.feed_calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.feeds).unwrap_or_else(|| Err(exhausted()))
    }
}

/// Reference source that always answers with the same snapshot.
pub struct StaticReference {
    pub snapshot: ReferenceSnapshot,
    pub calls: AtomicUsize,
}

impl StaticReference {
    pub fn new(height: u64) -> Self {
        Self {
            snapshot: ReferenceSnapshot {
                height,
                hashrate: Some(6.5e20),
            },
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ReferenceSource for StaticReference {
    async fn fetch(&self) -> eyre::Result<ReferenceSnapshot> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot)
    }
}
