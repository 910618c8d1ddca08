//! Sync progress view: chain snapshot polling, milestones and session
//! bookkeeping.

use super::{PollGuard, PolledView};
use crate::connection::ConnectionSupervisor;
use crate::history::{SessionLedger, SyncCompletion};
use crate::mode::{ModeDetector, NodeMode};
use crate::rpc::{ChainSnapshot, HeartbeatSnapshot, NodeApi};
use crate::sync::{Milestone, MilestoneWatcher, SyncTracker, SyncView};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct SyncPageState {
    pub view: Option<SyncView>,
    pub mode: NodeMode,
    /// Latest crossed milestone still waiting to be dismissed.
    pub milestone: Option<&'static Milestone>,
    pub last_error: Option<String>,
    /// History existed when the page was created.
    pub resumed: bool,
    pub completion: Option<SyncCompletion>,
    pub polls: u64,
}

pub struct SyncPage {
    api: Arc<dyn NodeApi>,
    supervisor: Arc<ConnectionSupervisor>,
    detector: Arc<ModeDetector>,
    ledger: Arc<Mutex<SessionLedger>>,
    tracker: Mutex<SyncTracker>,
    milestones: Mutex<MilestoneWatcher>,
    guard: PollGuard,
    state_tx: watch::Sender<SyncPageState>,
}

impl SyncPage {
    pub fn new(
        api: Arc<dyn NodeApi>,
        supervisor: Arc<ConnectionSupervisor>,
        detector: Arc<ModeDetector>,
        ledger: Arc<Mutex<SessionLedger>>,
    ) -> Arc<Self> {
        let initial = {
            let ledger = ledger.lock();
            SyncPageState {
                resumed: ledger.is_resume(),
                completion: ledger.completion().cloned(),
                mode: detector.mode(),
                ..SyncPageState::default()
            }
        };
        let (state_tx, _) = watch::channel(initial);
        Arc::new(Self {
            api,
            supervisor,
            detector,
            ledger,
            tracker: Mutex::new(SyncTracker::new()),
            milestones: Mutex::new(MilestoneWatcher::new()),
            guard: PollGuard::default(),
            state_tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncPageState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> SyncPageState {
        self.state_tx.borrow().clone()
    }

    /// One guarded poll. Overlapping calls return the previous outcome.
    pub async fn poll(&self) -> bool {
        self.guard.run(|| self.poll_once()).await
    }

    async fn poll_once(&self) -> bool {
        // The heartbeat is suspended while this view polls.
        self.supervisor.fetch_external_reference().await;
        let config = self.supervisor.config();
        match self.api.chain_snapshot(&config).await {
            Ok(snapshot) => {
                self.apply(snapshot);
                true
            }
            Err(err) => {
                warn!(error = %err, "sync poll failed");
                let message = err.to_string();
                self.supervisor.update_stats(Err(err));
                self.state_tx.send_modify(|state| {
                    state.last_error = Some(message);
                });
                false
            }
        }
    }

    fn apply(&self, snapshot: ChainSnapshot) {
        self.supervisor.update_stats(Ok(HeartbeatSnapshot {
            stats: snapshot.stats.clone(),
            chain_info: snapshot.chain_info.clone(),
        }));
        let mode = self
            .detector
            .detect(Some(&snapshot.stats), snapshot.chain_info.as_ref());
        if !snapshot.has_chain_data() {
            debug!("node served no chain data; keeping the last sync view");
            self.state_tx.send_modify(|state| {
                state.mode = mode;
                state.last_error = None;
                state.polls += 1;
            });
            return;
        }
        let external_height = self.supervisor.state().external_height;
        let view = self
            .tracker
            .lock()
            .apply(&snapshot, external_height, Instant::now());
        let milestone = self.milestones.lock().observe(view.validated_height);
        if let Some(milestone) = milestone {
            info!(height = milestone.height, title = milestone.title, "milestone reached");
        }
        let completion = if mode.is_validating() {
            self.record_session(&view)
        } else {
            self.ledger.lock().completion().cloned()
        };

        self.state_tx.send_modify(|state| {
            state.view = Some(view);
            state.mode = mode;
            if milestone.is_some() {
                state.milestone = milestone;
            }
            state.last_error = None;
            state.completion = completion;
            state.polls += 1;
        });
    }

    /// A height of zero never moves the resume cursor or completes a sync.
    fn record_session(&self, view: &SyncView) -> Option<SyncCompletion> {
        let mut ledger = self.ledger.lock();
        let validated = view.validated_height > 0;
        if validated {
            ledger.update_progress(view.validated_height, view.progress_percent);
        }
        if view.synced {
            let has_history = ledger.open_session().is_some() || !ledger.sessions().is_empty();
            if validated && has_history {
                ledger.mark_complete(view.validated_height);
            }
        } else {
            ledger.start_session(view.validated_height, view.network_height);
        }
        ledger.completion().cloned()
    }

    /// Hide the current milestone for the rest of the run.
    pub fn dismiss_milestone(&self) {
        let mut dismissed = None;
        self.state_tx.send_if_modified(|state| {
            dismissed = state.milestone.take();
            dismissed.is_some()
        });
        if let Some(milestone) = dismissed {
            self.milestones.lock().dismiss(milestone.height);
        }
    }
}

#[async_trait]
impl PolledView for SyncPage {
    fn name(&self) -> &'static str {
        "sync"
    }

    async fn refresh(&self) -> bool {
        self.poll().await
    }

    /// Close the session at the last validated height and start the next
    /// visit from a fresh baseline.
    fn teardown(&self) {
        let validated = self
            .tracker
            .lock()
            .view()
            .map(|view| view.validated_height);
        if let Some(validated) = validated {
            self.ledger.lock().end_session(validated);
        }
        self.tracker.lock().reset();
        self.milestones.lock().rebase();
    }
}
