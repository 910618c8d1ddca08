//! Recent blocks and transactions announced to an observer node.

use super::{PollGuard, PolledView};
use crate::connection::ConnectionSupervisor;
use crate::rpc::{
    HeartbeatSnapshot, NodeApi, ObservedBlock, ObservedTransaction, ObserverFeedSnapshot,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Entries requested (and kept) per list.
pub const FEED_LIMIT: usize = 10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObserverFeedState {
    pub blocks: Vec<ObservedBlock>,
    pub transactions: Vec<ObservedTransaction>,
    pub last_error: Option<String>,
    pub updated_at: Option<SystemTime>,
}

pub struct ObserverFeed {
    api: Arc<dyn NodeApi>,
    supervisor: Arc<ConnectionSupervisor>,
    guard: PollGuard,
    state_tx: watch::Sender<ObserverFeedState>,
}

impl ObserverFeed {
    pub fn new(api: Arc<dyn NodeApi>, supervisor: Arc<ConnectionSupervisor>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ObserverFeedState::default());
        Arc::new(Self {
            api,
            supervisor,
            guard: PollGuard::default(),
            state_tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ObserverFeedState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ObserverFeedState {
        self.state_tx.borrow().clone()
    }

    pub async fn poll(&self) -> bool {
        self.guard.run(|| self.poll_once()).await
    }

    async fn poll_once(&self) -> bool {
        // The heartbeat is suspended while this view polls.
        self.supervisor.fetch_external_reference().await;
        let config = self.supervisor.config();
        match self.api.observer_feed(&config, FEED_LIMIT).await {
            Ok(feed) => {
                self.apply(feed);
                true
            }
            Err(err) => {
                warn!(error = %err, "observer feed poll failed");
                let message = err.to_string();
                self.supervisor.update_stats(Err(err));
                self.state_tx.send_modify(|state| {
                    state.last_error = Some(message);
                });
                false
            }
        }
    }

    fn apply(&self, feed: ObserverFeedSnapshot) {
        let ObserverFeedSnapshot {
            stats,
            mut blocks,
            mut transactions,
        } = feed;
        // Observers do not serve chain info.
        self.supervisor.update_stats(Ok(HeartbeatSnapshot {
            stats,
            chain_info: None,
        }));

        blocks.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        blocks.truncate(FEED_LIMIT);
        transactions.sort_by(|a, b| b.first_seen.cmp(&a.first_seen));
        transactions.truncate(FEED_LIMIT);

        let now = SystemTime::now();
        let changed = self.state_tx.send_if_modified(|state| {
            let changed = state.blocks != blocks
                || state.transactions != transactions
                || state.last_error.is_some();
            if changed {
                state.blocks = blocks;
                state.transactions = transactions;
                state.last_error = None;
            }
            state.updated_at = Some(now);
            changed
        });
        if changed {
            debug!("observer feed updated");
        }
    }
}

#[async_trait]
impl PolledView for ObserverFeed {
    fn name(&self) -> &'static str {
        "observer"
    }

    async fn refresh(&self) -> bool {
        self.poll().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionStatus;
    use crate::poll::spawn_exclusive;
    use crate::reference::ReferenceSource;
    use crate::rpc::{RpcError, StatsMode};
    use crate::storage::Storage;
    use crate::test_utils::{stats, ScriptedNode, StaticReference};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn block(n: u64) -> ObservedBlock {
        ObservedBlock {
            hash: format!("{n:064x}"),
            height: Some(n),
            first_seen: 1_700_000_000 + n,
            peer_count: 3,
        }
    }

    fn feed_with(blocks: Vec<ObservedBlock>) -> ObserverFeedSnapshot {
        ObserverFeedSnapshot {
            stats: stats(StatsMode::Observer, 6, 900),
            blocks,
            transactions: vec![ObservedTransaction {
                txid: "aa".into(),
                first_seen: 1_700_000_000,
                size: Some(250),
            }],
        }
    }

    fn observer(node: Arc<ScriptedNode>) -> (Arc<ObserverFeed>, Arc<ConnectionSupervisor>) {
        let supervisor =
            ConnectionSupervisor::new(Arc::clone(&node) as _, None, Arc::new(Storage::in_memory()));
        (ObserverFeed::new(node, Arc::clone(&supervisor)), supervisor)
    }

    #[tokio::test]
    async fn feed_is_newest_first_and_pushes_stats() {
        let node = Arc::new(ScriptedNode::new());
        node.push_feed(Ok(feed_with(vec![block(1), block(3), block(2)])));
        let (feed, supervisor) = observer(node);

        assert!(feed.poll().await);
        let heights: Vec<_> = feed.state().blocks.iter().filter_map(|b| b.height).collect();
        assert_eq!(heights, vec![3, 2, 1]);
        let state = supervisor.state();
        assert_eq!(state.status, ConnectionStatus::Connected);
        assert_eq!(state.stats.map(|s| s.peer_count), Some(6));
    }

    #[tokio::test]
    async fn unchanged_feed_is_not_republished() {
        let node = Arc::new(ScriptedNode::new());
        node.push_feed(Ok(feed_with(vec![block(1)])));
        let (feed, _supervisor) = observer(node);
        let mut rx = feed.subscribe();

        feed.poll().await;
        assert!(rx.has_changed().expect("sender alive"));
        rx.borrow_and_update();
        feed.poll().await;
        assert!(!rx.has_changed().expect("sender alive"));
    }

    #[tokio::test]
    async fn errors_keep_the_last_lists() {
        let node = Arc::new(ScriptedNode::new());
        node.push_feed(Ok(feed_with(vec![block(7)])));
        node.push_feed(Err(RpcError::Network("reset".into())));
        let (feed, supervisor) = observer(node);

        assert!(feed.poll().await);
        assert!(!feed.poll().await);
        let state = feed.state();
        assert_eq!(state.blocks.len(), 1);
        assert!(state.last_error.is_some());

        let connection = supervisor.state();
        assert_eq!(connection.status, ConnectionStatus::Error);
        assert!(connection.stats.is_none());
        assert_eq!(connection.last_error.as_deref(), Some("network error: reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn feed_polling_refreshes_the_reference() {
        let node = Arc::new(ScriptedNode::new());
        node.push_feed(Ok(feed_with(vec![block(1)])));
        let reference = Arc::new(StaticReference::new(870_000));
        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&node) as _,
            Some(Arc::clone(&reference) as Arc<dyn ReferenceSource>),
            Arc::new(Storage::in_memory()),
        );
        let feed = ObserverFeed::new(node, Arc::clone(&supervisor));

        let poller = spawn_exclusive(Arc::clone(&supervisor), feed);
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert_eq!(reference.calls.load(Ordering::SeqCst), 3);
        assert_eq!(supervisor.state().external_height, Some(870_000));
        poller.shutdown().await;
    }
}
