//! Fullscreen dashboard loop.
//!
//! Redraws every 100 ms from the latest published states. Switching to the
//! sync or observer view hands polling to that view's exclusive poller;
//! the overview leaves the supervisor's heartbeat in charge.

use super::context::AppContext;
use crate::logging::TuiLogBuffer;
use crate::poll::{spawn_exclusive, PolledView, PollerHandle};
use crate::storage::{KEY_ONBOARDING_SEEN, KEY_THEME};
use crate::ui::{ActiveView, HistorySummary, KeyAction, Theme, Transient, TuiController, TuiState};
use eyre::{eyre, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

const FRAME_INTERVAL: Duration = Duration::from_millis(100);
const TOAST_TTL: Duration = Duration::from_secs(3);
const MILESTONE_TTL: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Side effects of the dashboard, kept apart from the terminal so they
/// can be driven without one.
struct Dashboard {
    ctx: AppContext,
    poller: Option<PollerHandle>,
    shown_milestone: Option<u64>,
}

impl Dashboard {
    fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            poller: None,
            shown_milestone: None,
        }
    }

    fn initial_state(&self) -> TuiState {
        let theme: Theme = self.ctx.storage.get(KEY_THEME).unwrap_or_default();
        let onboarding_seen: bool = self.ctx.storage.get(KEY_ONBOARDING_SEEN).unwrap_or(false);
        TuiState::new(theme, !onboarding_seen, &self.ctx.data_dir.display().to_string())
    }

    async fn switch_view(&mut self, state: &mut TuiState, view: ActiveView) {
        if state.view == view {
            return;
        }
        if let Some(poller) = self.poller.take() {
            poller.shutdown().await;
        }
        let owner: Option<Arc<dyn PolledView>> = match view {
            ActiveView::Overview => None,
            ActiveView::Sync => Some(Arc::clone(&self.ctx.sync_page) as Arc<dyn PolledView>),
            ActiveView::Observer => Some(Arc::clone(&self.ctx.observer_feed) as Arc<dyn PolledView>),
        };
        self.poller = owner.map(|view| spawn_exclusive(Arc::clone(&self.ctx.supervisor), view));
        // A torn-down view must not leave its toast behind.
        state.milestone_toast = None;
        self.shown_milestone = None;
        debug!(view = view.title(), "view switched");
        state.view = view;
    }

    fn dismiss(&mut self, state: &mut TuiState) {
        if state.show_help {
            self.close_help(state);
        } else if state.milestone_toast.take().is_some() || state.sync.milestone.is_some() {
            self.ctx.sync_page.dismiss_milestone();
        } else {
            state.toast = None;
        }
    }

    fn close_help(&mut self, state: &mut TuiState) {
        state.show_help = false;
        self.ctx.storage.set(KEY_ONBOARDING_SEEN, &true);
    }

    async fn handle(&mut self, state: &mut TuiState, action: KeyAction) -> Flow {
        match action {
            KeyAction::Quit => return Flow::Quit,
            KeyAction::NextView => {
                let next = state.view.next();
                self.switch_view(state, next).await;
            }
            KeyAction::SelectView(view) => self.switch_view(state, view).await,
            KeyAction::Dismiss => self.dismiss(state),
            KeyAction::ToggleTheme => {
                state.theme = state.theme.toggled();
                self.ctx.storage.set(KEY_THEME, &state.theme);
                let name = match state.theme {
                    Theme::Dark => "dark",
                    Theme::Light => "light",
                };
                state.show_toast(format!("Theme: {name}"), TOAST_TTL);
            }
            KeyAction::Reconnect => {
                info!("reconnect requested");
                self.ctx.supervisor.disconnect();
                self.ctx.supervisor.connect();
                state.show_toast("Reconnecting...", TOAST_TTL);
            }
            KeyAction::ToggleHelp => {
                if state.show_help {
                    self.close_help(state);
                } else {
                    state.show_help = true;
                }
            }
        }
        Flow::Continue
    }

    /// Pull the latest published states into the frame state.
    fn refresh(&mut self, state: &mut TuiState, now: Instant) {
        state.connection = self.ctx.supervisor.state();
        state.mode = self.ctx.detector.report();
        state.sync = self.ctx.sync_page.state();
        state.feed = self.ctx.observer_feed.state();
        {
            let ledger = self.ctx.ledger.lock();
            state.history = HistorySummary {
                sessions: ledger.sessions().len(),
                open_session: ledger.open_session().is_some(),
                total_blocks: ledger.total_blocks_validated(),
                total_time_ms: ledger.total_time_ms(),
                last_known_height: ledger.last_known_height(),
                completion: ledger.completion().cloned(),
            };
        }

        match state.sync.milestone {
            Some(milestone) if self.shown_milestone != Some(milestone.height) => {
                self.shown_milestone = Some(milestone.height);
                let icon = milestone.icon.unwrap_or("*");
                state.milestone_toast = Some(Transient::new(
                    format!("{icon} {} \u{00b7} block {}", milestone.title, milestone.height),
                    MILESTONE_TTL,
                    now,
                ));
            }
            Some(_) => {}
            None => state.milestone_toast = None,
        }
        if state.expire_transients(now) {
            self.ctx.sync_page.dismiss_milestone();
        }
    }

    async fn shutdown(mut self) {
        if let Some(poller) = self.poller.take() {
            poller.shutdown().await;
        }
        self.ctx.shutdown();
    }
}

/// Run the dashboard until `q` or Ctrl-C.
pub async fn run_dashboard(ctx: AppContext, logs: Arc<TuiLogBuffer>) -> Result<()> {
    let mut dashboard = Dashboard::new(ctx);
    let state = dashboard.initial_state();
    let mut tui = TuiController::new(state).map_err(|e| eyre!("failed to create TUI: {e}"))?;

    let (stop_tx, mut stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });

    dashboard.ctx.supervisor.connect();
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {}
            Ok(()) = stop_rx.changed() => break Ok(()),
        }
        let mut quit = false;
        loop {
            match tui.poll_action() {
                Ok(Some(action)) => {
                    if dashboard.handle(&mut tui.state, action).await == Flow::Quit {
                        quit = true;
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "failed to read terminal input");
                    break;
                }
            }
        }
        if quit {
            break Ok(());
        }
        tui.state.drain_log_buffer(&logs);
        dashboard.refresh(&mut tui.state, Instant::now());
        if let Err(err) = tui.draw() {
            break Err(eyre!("failed to draw dashboard: {err}"));
        }
    };

    dashboard.shutdown().await;
    tui.restore()?;
    result
}
