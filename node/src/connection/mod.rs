//! Connection supervisor: owns the connection state and the heartbeat loop.
//!
//! The heartbeat checks the node every 1.6 s (5 s after a failure). Views
//! that run their own poller suspend it while they are open and feed their
//! results back through [`ConnectionSupervisor::update_stats`], failures
//! included, so the node only ever sees one poller at a time and the status
//! stays truthful while the heartbeat is parked.

mod state;

pub use state::{stats_changed, ConnectionState, ConnectionStatus};

use crate::reference::ReferenceSource;
use crate::rpc::{BlockchainInfo, HeartbeatSnapshot, NodeApi, ObserverStats, RpcConfig, RpcError};
use crate::storage::{Storage, KEY_CONNECTION_CONFIG};
use eyre::{eyre, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1_600);
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);
pub const EXTERNAL_REFRESH_WINDOW: Duration = Duration::from_secs(30);

/// Partial connection settings; absent fields keep their current value.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub endpoint: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Default)]
struct HeartbeatLoop {
    /// `connect` was called and `disconnect` was not.
    wanted: bool,
    /// A view owns polling.
    suspended: bool,
    /// Bumped on every start/stop; results from older loops are dropped.
    generation: u64,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

pub struct ConnectionSupervisor {
    api: Arc<dyn NodeApi>,
    reference: Option<Arc<dyn ReferenceSource>>,
    storage: Arc<Storage>,
    state_tx: watch::Sender<ConnectionState>,
    heartbeat: Mutex<HeartbeatLoop>,
    ticked: AtomicBool,
    reference_attempted_at: Mutex<Option<Instant>>,
}

impl ConnectionSupervisor {
    /// Build a supervisor using the persisted connection config, if any.
    pub fn new(
        api: Arc<dyn NodeApi>,
        reference: Option<Arc<dyn ReferenceSource>>,
        storage: Arc<Storage>,
    ) -> Arc<Self> {
        let config: RpcConfig = storage.get(KEY_CONNECTION_CONFIG).unwrap_or_default();
        let (state_tx, _) = watch::channel(ConnectionState::new(config));
        Arc::new(Self {
            api,
            reference,
            storage,
            state_tx,
            heartbeat: Mutex::new(HeartbeatLoop::default()),
            ticked: AtomicBool::new(false),
            reference_attempted_at: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.state_tx.borrow().clone()
    }

    pub fn config(&self) -> RpcConfig {
        self.state_tx.borrow().config.clone()
    }

    /// Begin heartbeating unless a view currently owns polling.
    pub fn connect(self: &Arc<Self>) {
        let mut heartbeat = self.heartbeat.lock();
        heartbeat.wanted = true;
        if !heartbeat.suspended && heartbeat.handle.is_none() {
            self.start_loop(&mut heartbeat);
        }
    }

    /// Stop heartbeating and reset the state to disconnected.
    pub fn disconnect(&self) {
        let mut heartbeat = self.heartbeat.lock();
        heartbeat.wanted = false;
        Self::stop_loop(&mut heartbeat);
        self.state_tx.send_if_modified(|state| {
            let before = state.clone();
            state.status = ConnectionStatus::Disconnected;
            state.last_error = None;
            state.stats = None;
            state.chain_info = None;
            *state != before
        });
        info!("disconnected from node");
    }

    /// Validate, persist and apply new connection settings. A running
    /// heartbeat restarts against the new endpoint.
    pub fn set_config(self: &Arc<Self>, update: ConfigUpdate) -> Result<RpcConfig> {
        let mut config = self.config();
        if let Some(endpoint) = update.endpoint {
            let endpoint = endpoint.trim().to_string();
            let url = reqwest::Url::parse(&endpoint)
                .map_err(|err| eyre!("invalid endpoint {endpoint:?}: {err}"))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(eyre!("endpoint must use http or https: {endpoint}"));
            }
            config.endpoint = endpoint;
        }
        if let Some(timeout_ms) = update.timeout_ms {
            if timeout_ms == 0 {
                return Err(eyre!("timeout must be greater than zero"));
            }
            config.timeout_ms = timeout_ms;
        }
        if !self.storage.set(KEY_CONNECTION_CONFIG, &config) {
            warn!("connection config not persisted; it applies to this run only");
        }

        let mut heartbeat = self.heartbeat.lock();
        self.state_tx.send_if_modified(|state| {
            if state.config == config {
                return false;
            }
            state.config = config.clone();
            true
        });
        if heartbeat.handle.is_some() {
            Self::stop_loop(&mut heartbeat);
            self.start_loop(&mut heartbeat);
        }
        info!(endpoint = %config.endpoint, timeout_ms = config.timeout_ms, "connection config updated");
        Ok(config)
    }

    /// Hand polling to a view. Idempotent.
    pub fn suspend_heartbeat(&self) {
        let mut heartbeat = self.heartbeat.lock();
        heartbeat.suspended = true;
        Self::stop_loop(&mut heartbeat);
        debug!("heartbeat suspended");
    }

    /// Take polling back from a view. Only restarts the loop if the app is
    /// connected (or trying to be).
    pub fn resume_heartbeat(self: &Arc<Self>) {
        let mut heartbeat = self.heartbeat.lock();
        heartbeat.suspended = false;
        if heartbeat.wanted && heartbeat.handle.is_none() {
            self.start_loop(&mut heartbeat);
            debug!("heartbeat resumed");
        }
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.lock().handle.is_some()
    }

    /// Publish the outcome of a view's own poll as if a heartbeat had
    /// produced it. This is the only way state enters from outside the loop.
    pub fn update_stats(&self, outcome: Result<HeartbeatSnapshot, RpcError>) {
        let _heartbeat = self.heartbeat.lock();
        match outcome {
            Ok(snapshot) => self.publish_success(snapshot.stats, snapshot.chain_info),
            Err(err) => self.publish_failure(&err),
        }
    }

    /// Run one heartbeat outside the loop. Returns true on success.
    pub async fn tick(&self) -> bool {
        let generation = self.heartbeat.lock().generation;
        self.run_tick(generation).await
    }

    /// Refresh the third-party height and hashrate at most once per 30 s.
    /// Returns true when fresh data was stored. Failures keep the old values.
    pub async fn fetch_external_reference(&self) -> bool {
        let Some(reference) = self.reference.as_ref() else {
            return false;
        };
        {
            let mut attempted_at = self.reference_attempted_at.lock();
            let now = Instant::now();
            if let Some(at) = *attempted_at {
                if now.duration_since(at) < EXTERNAL_REFRESH_WINDOW {
                    return false;
                }
            }
            *attempted_at = Some(now);
        }
        let mut attempt = ReferenceAttempt {
            attempted_at: &self.reference_attempted_at,
            settled: false,
        };
        let result = reference.fetch().await;
        attempt.settled = true;
        match result {
            Ok(snapshot) => {
                debug!(height = snapshot.height, "reference height refreshed");
                self.state_tx.send_modify(|state| {
                    state.external_height = Some(snapshot.height);
                    state.external_hashrate = snapshot.hashrate;
                    state.external_fetched_at = Some(SystemTime::now());
                });
                true
            }
            Err(err) => {
                warn!(error = %err, "reference fetch failed; keeping previous values");
                false
            }
        }
    }

    fn start_loop(self: &Arc<Self>, heartbeat: &mut HeartbeatLoop) {
        heartbeat.generation += 1;
        let generation = heartbeat.generation;
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                let healthy = tokio::select! {
                    healthy = async {
                        let healthy = supervisor.run_tick(generation).await;
                        supervisor.fetch_external_reference().await;
                        healthy
                    } => healthy,
                    _ = stop_rx.changed() => break,
                };
                let delay = if healthy {
                    HEARTBEAT_INTERVAL
                } else {
                    RECONNECT_BACKOFF
                };
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        });
        heartbeat.stop_tx = Some(stop_tx);
        heartbeat.handle = Some(handle);
    }

    fn stop_loop(heartbeat: &mut HeartbeatLoop) {
        heartbeat.generation += 1;
        if let Some(stop_tx) = heartbeat.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = heartbeat.handle.take() {
            handle.abort();
        }
    }

    async fn run_tick(&self, generation: u64) -> bool {
        let first = !self.ticked.swap(true, Ordering::SeqCst);
        let config = {
            let heartbeat = self.heartbeat.lock();
            if heartbeat.generation != generation {
                return false;
            }
            let connected = self.state_tx.borrow().is_connected();
            if first || !connected {
                self.state_tx.send_if_modified(|state| {
                    if state.status == ConnectionStatus::Connecting {
                        return false;
                    }
                    state.status = ConnectionStatus::Connecting;
                    true
                });
            }
            self.config()
        };

        let result = self.api.heartbeat(&config).await;

        let heartbeat = self.heartbeat.lock();
        if heartbeat.generation != generation {
            debug!("discarding heartbeat result from a stopped loop");
            return false;
        }
        match result {
            Ok(snapshot) => {
                self.publish_success(snapshot.stats, snapshot.chain_info);
                true
            }
            Err(err) => {
                warn!(
                    endpoint = %config.endpoint,
                    error = %err,
                    retry_in_ms = RECONNECT_BACKOFF.as_millis() as u64,
                    "heartbeat failed"
                );
                self.publish_failure(&err);
                false
            }
        }
    }

    /// Caller holds the heartbeat lock.
    fn publish_failure(&self, err: &RpcError) {
        self.state_tx.send_if_modified(|state| {
            let before = state.clone();
            state.status = ConnectionStatus::Error;
            state.last_error = Some(err.to_string());
            state.stats = None;
            state.chain_info = None;
            *state != before
        });
    }

    /// Caller holds the heartbeat lock.
    fn publish_success(&self, stats: ObserverStats, chain_info: Option<BlockchainInfo>) {
        let now = SystemTime::now();
        self.state_tx.send_if_modified(|state| {
            let mut changed = false;
            if state.status != ConnectionStatus::Connected {
                info!(endpoint = %state.config.endpoint, "connected to node");
                state.status = ConnectionStatus::Connected;
                changed = true;
            }
            if state.last_error.take().is_some() {
                changed = true;
            }
            if stats_changed(state.stats.as_ref(), Some(&stats)) {
                state.stats = Some(stats);
                changed = true;
            }
            if state.chain_info != chain_info {
                state.chain_info = chain_info;
                changed = true;
            }
            state.last_check_at = Some(now);
            changed
        });
    }
}

/// Forgets the attempt when a reference fetch is cancelled before it
/// resolves, so a suspended heartbeat does not use up the window.
struct ReferenceAttempt<'a> {
    attempted_at: &'a Mutex<Option<Instant>>,
    settled: bool,
}

impl Drop for ReferenceAttempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            *self.attempted_at.lock() = None;
        }
    }
}
