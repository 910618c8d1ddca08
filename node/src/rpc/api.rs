//! Typed batched fetches used by the polling loops.

use super::types::{
    BlockchainInfo, NodeSyncStatus, ObservedBlock, ObservedTransaction, ObserverStats,
    METHOD_BLOCKCHAIN_INFO, METHOD_OBSERVER_STATS, METHOD_RECENT_BLOCKS, METHOD_RECENT_TXS,
    METHOD_SYNC_STATUS,
};
use super::{decode, RpcCall, RpcConfig, RpcError, RpcTransport};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

/// Result of one heartbeat: stats are required, chain info is optional
/// (observers and nodes early in startup may not serve it).
#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatSnapshot {
    pub stats: ObserverStats,
    pub chain_info: Option<BlockchainInfo>,
}

/// Everything the sync view needs from one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSnapshot {
    pub stats: ObserverStats,
    pub chain_info: Option<BlockchainInfo>,
    pub sync_status: Option<NodeSyncStatus>,
}

impl ChainSnapshot {
    /// False when the node answered stats only, e.g. while it is still
    /// loading its block index.
    pub fn has_chain_data(&self) -> bool {
        self.chain_info.is_some() || self.sync_status.is_some()
    }
}

/// Everything the observer view needs from one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverFeedSnapshot {
    pub stats: ObserverStats,
    pub blocks: Vec<ObservedBlock>,
    pub transactions: Vec<ObservedTransaction>,
}

/// Remote node surface consumed by the supervisor and the views. Each
/// method is exactly one network round trip.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn heartbeat(&self, config: &RpcConfig) -> Result<HeartbeatSnapshot, RpcError>;

    async fn chain_snapshot(&self, config: &RpcConfig) -> Result<ChainSnapshot, RpcError>;

    async fn observer_feed(
        &self,
        config: &RpcConfig,
        limit: usize,
    ) -> Result<ObserverFeedSnapshot, RpcError>;
}

#[async_trait]
impl NodeApi for RpcTransport {
    async fn heartbeat(&self, config: &RpcConfig) -> Result<HeartbeatSnapshot, RpcError> {
        let calls = [
            RpcCall::no_params(METHOD_OBSERVER_STATS),
            RpcCall::no_params(METHOD_BLOCKCHAIN_INFO),
        ];
        let mut results = self.batch_call_settled(&calls, config).await?.into_iter();
        let stats = required(METHOD_OBSERVER_STATS, results.next())?;
        let chain_info = optional(METHOD_BLOCKCHAIN_INFO, results.next());
        Ok(HeartbeatSnapshot { stats, chain_info })
    }

    async fn chain_snapshot(&self, config: &RpcConfig) -> Result<ChainSnapshot, RpcError> {
        let calls = [
            RpcCall::no_params(METHOD_OBSERVER_STATS),
            RpcCall::no_params(METHOD_BLOCKCHAIN_INFO),
            RpcCall::no_params(METHOD_SYNC_STATUS),
        ];
        let mut results = self.batch_call_settled(&calls, config).await?.into_iter();
        let stats = required(METHOD_OBSERVER_STATS, results.next())?;
        let chain_info = optional(METHOD_BLOCKCHAIN_INFO, results.next());
        let sync_status = optional(METHOD_SYNC_STATUS, results.next());
        Ok(ChainSnapshot {
            stats,
            chain_info,
            sync_status,
        })
    }

    async fn observer_feed(
        &self,
        config: &RpcConfig,
        limit: usize,
    ) -> Result<ObserverFeedSnapshot, RpcError> {
        let calls = [
            RpcCall::no_params(METHOD_OBSERVER_STATS),
            RpcCall::new(METHOD_RECENT_BLOCKS, vec![json!(limit)]),
            RpcCall::new(METHOD_RECENT_TXS, vec![json!(limit)]),
        ];
        let mut results = self.batch_call(&calls, config).await?.into_iter();
        let stats = required(METHOD_OBSERVER_STATS, results.next().map(Ok))?;
        let mut blocks: Vec<ObservedBlock> =
            required(METHOD_RECENT_BLOCKS, results.next().map(Ok))?;
        let mut transactions: Vec<ObservedTransaction> =
            required(METHOD_RECENT_TXS, results.next().map(Ok))?;
        blocks.truncate(limit);
        transactions.truncate(limit);
        Ok(ObserverFeedSnapshot {
            stats,
            blocks,
            transactions,
        })
    }
}

fn required<T: DeserializeOwned>(
    method: &str,
    result: Option<Result<Value, RpcError>>,
) -> Result<T, RpcError> {
    match result {
        Some(result) => decode(method, result?),
        None => Err(RpcError::InvalidResponse(format!("{method}: missing from batch"))),
    }
}

fn optional<T: DeserializeOwned>(method: &str, result: Option<Result<Value, RpcError>>) -> Option<T> {
    match required(method, result) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(method, error = %err, "optional rpc result unavailable");
            None
        }
    }
}
