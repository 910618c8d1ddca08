//! Headless mode: logs instead of a dashboard.
//!
//! The poller follows the detected mode: validating nodes get the sync
//! view, observers get the feed, and an unknown mode leaves the heartbeat
//! alone.

use super::context::AppContext;
use crate::connection::{ConnectionState, ConnectionStatus};
use crate::mode::NodeMode;
use crate::poll::{spawn_exclusive, PolledView, PollerHandle, SyncPageState};
use crate::ui::HeadlessProgress;
use eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};

struct HeadlessRunner {
    ctx: AppContext,
    poller: Option<PollerHandle>,
    last_status: Option<ConnectionStatus>,
    was_synced: bool,
}

impl HeadlessRunner {
    fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            poller: None,
            last_status: None,
            was_synced: false,
        }
    }

    fn on_connection(&mut self, state: &ConnectionState, progress: &HeadlessProgress) {
        progress.set_status(&state.status_line());
        if self.last_status == Some(state.status) {
            return;
        }
        self.last_status = Some(state.status);
        info!(
            status = state.status.as_str(),
            endpoint = %state.config.endpoint,
            detail = %state.status_line(),
            "connection status changed"
        );
    }

    fn poller_for(&self, mode: NodeMode) -> Option<Arc<dyn PolledView>> {
        match mode {
            NodeMode::ValidateLite | NodeMode::ValidateArchival => {
                Some(Arc::clone(&self.ctx.sync_page) as Arc<dyn PolledView>)
            }
            NodeMode::Observer => Some(Arc::clone(&self.ctx.observer_feed) as Arc<dyn PolledView>),
            NodeMode::Unknown => None,
        }
    }

    /// Hand polling to the view that fits `mode`. Returns true on a switch.
    async fn on_mode(&mut self, mode: NodeMode, progress: &mut HeadlessProgress) -> bool {
        let wanted = self.poller_for(mode);
        let current = self.poller.as_ref().map(PollerHandle::name);
        if wanted.as_ref().map(|view| view.name()) == current {
            return false;
        }
        if let Some(poller) = self.poller.take() {
            poller.shutdown().await;
            progress.clear_sync();
            self.was_synced = false;
        }
        if let Some(view) = wanted {
            info!(view = view.name(), mode = mode.as_str(), "polling with view");
            self.poller = Some(spawn_exclusive(Arc::clone(&self.ctx.supervisor), view));
        }
        true
    }

    fn on_sync(&mut self, page: &SyncPageState, progress: &mut HeadlessProgress) {
        if let Some(milestone) = page.milestone {
            info!(
                height = milestone.height,
                title = milestone.title,
                date = milestone.date,
                "milestone reached"
            );
            self.ctx.sync_page.dismiss_milestone();
        }
        let Some(view) = page.view.as_ref() else {
            return;
        };
        progress.update_sync(view);
        if view.synced && !self.was_synced {
            info!(height = view.validated_height, "node is synced");
        }
        self.was_synced = view.synced;
    }

    async fn shutdown(mut self) {
        if let Some(poller) = self.poller.take() {
            poller.shutdown().await;
        }
        self.ctx.shutdown();
    }
}

/// Run until Ctrl-C.
pub async fn run_headless(ctx: AppContext) -> Result<()> {
    let mut progress = HeadlessProgress::new();
    let mut conn_rx = ctx.supervisor.subscribe();
    let mut mode_rx = ctx.detector.subscribe();
    let mut sync_rx = ctx.sync_page.subscribe();
    let mut runner = HeadlessRunner::new(ctx);
    runner.ctx.supervisor.connect();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(err) = res {
                    warn!(error = %err, "failed to listen for ctrl-c");
                }
                warn!("shutdown signal received");
                break;
            }
            Ok(()) = conn_rx.changed() => {
                let state = conn_rx.borrow_and_update().clone();
                runner.on_connection(&state, &progress);
            }
            Ok(()) = mode_rx.changed() => {
                let mode = mode_rx.borrow_and_update().mode;
                runner.on_mode(mode, &mut progress).await;
            }
            Ok(()) = sync_rx.changed() => {
                let page = sync_rx.borrow_and_update().clone();
                runner.on_sync(&page, &mut progress);
            }
            else => break,
        }
    }

    runner.shutdown().await;
    progress.finish();
    Ok(())
}
