//! Exclusive view polling.
//!
//! A view that needs more than the heartbeat fetches (sync progress, the
//! observer feed) takes polling over from the supervisor while it is open.
//! [`spawn_exclusive`] suspends the heartbeat, runs the view's refresh on a
//! timer and, when the returned handle is shut down or dropped, stops the
//! timer, lets the view tear down, and resumes the heartbeat.

pub mod observer_feed;
pub mod sync_page;

pub use observer_feed::{ObserverFeed, ObserverFeedState};
pub use sync_page::{SyncPage, SyncPageState};

use crate::connection::ConnectionSupervisor;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

pub const POLL_INTERVAL: Duration = Duration::from_millis(1_600);
pub const ERROR_BACKOFF: Duration = Duration::from_secs(10);

pub fn next_delay(healthy: bool) -> Duration {
    if healthy {
        POLL_INTERVAL
    } else {
        ERROR_BACKOFF
    }
}

#[async_trait]
pub trait PolledView: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One fetch-and-apply. Returns false when the fetch failed.
    async fn refresh(&self) -> bool;

    /// Runs once when polling is handed back.
    fn teardown(&self) {}
}

/// Keeps at most one fetch outstanding per view.
#[derive(Debug)]
pub struct PollGuard {
    in_flight: AtomicBool,
    last_ok: AtomicBool,
}

impl Default for PollGuard {
    fn default() -> Self {
        Self {
            in_flight: AtomicBool::new(false),
            last_ok: AtomicBool::new(true),
        }
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PollGuard {
    /// Run `poll` unless one is already running, in which case the last
    /// outcome is returned without starting anything.
    pub async fn run<F, Fut>(&self, poll: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return self.last_ok.load(Ordering::SeqCst);
        }
        let _in_flight = InFlight(&self.in_flight);
        let ok = poll().await;
        self.last_ok.store(ok, Ordering::SeqCst);
        ok
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// Running exclusive poller. Dropping it releases polling as well.
pub struct PollerHandle {
    name: &'static str,
    supervisor: Arc<ConnectionSupervisor>,
    view: Arc<dyn PolledView>,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    released: bool,
}

pub fn spawn_exclusive(
    supervisor: Arc<ConnectionSupervisor>,
    view: Arc<dyn PolledView>,
) -> PollerHandle {
    supervisor.suspend_heartbeat();
    let name = view.name();
    info!(view = name, "view took over polling");

    let (stop_tx, mut stop_rx) = watch::channel(false);
    let task_view = Arc::clone(&view);
    let handle = tokio::spawn(async move {
        loop {
            if *stop_rx.borrow() {
                break;
            }
            let healthy = tokio::select! {
                healthy = task_view.refresh() => healthy,
                _ = stop_rx.changed() => break,
            };
            tokio::select! {
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(next_delay(healthy)) => {}
            }
        }
    });

    PollerHandle {
        name,
        supervisor,
        view,
        stop_tx,
        handle: Some(handle),
        released: false,
    }
}

impl PollerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop polling and wait for the loop to exit.
    pub async fn shutdown(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.view.teardown();
        self.supervisor.resume_heartbeat();
        info!(view = self.name, "view released polling");
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.release();
    }
}
