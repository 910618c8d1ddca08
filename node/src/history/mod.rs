//! Persistent record of sync sessions and the one-time completion.
//!
//! Every mutating call writes through to storage before returning.

use crate::storage::{
    Storage, KEY_LAST_KNOWN_HEIGHT, KEY_LAST_PROGRESS, KEY_OPEN_SESSION, KEY_SYNC_COMPLETION,
    KEY_SYNC_SESSIONS,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Unix milliseconds.
pub type Clock = fn() -> u64;

pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    pub id: u64,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub start_blocks: u64,
    pub end_blocks: Option<u64>,
    pub network_height_at_start: u64,
}

impl SyncSession {
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time
            .map(|end| end.saturating_sub(self.start_time))
    }

    pub fn blocks_validated(&self) -> u64 {
        self.end_blocks
            .map_or(0, |end| end.saturating_sub(self.start_blocks))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCompletion {
    pub completed_at: u64,
    pub total_sessions: u64,
    pub total_blocks: u64,
    pub total_time_ms: u64,
}

/// Where a sync left off; drives the "welcome back" message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressCursor {
    pub height: u64,
    pub percent: f64,
    pub updated_at: u64,
}

pub struct SessionLedger {
    storage: Arc<Storage>,
    clock: Clock,
    sessions: Vec<SyncSession>,
    open: Option<SyncSession>,
    completion: Option<SyncCompletion>,
    last_known_height: u64,
    last_progress: Option<ProgressCursor>,
    last_id: u64,
}

impl SessionLedger {
    pub fn load(storage: Arc<Storage>) -> Self {
        Self::load_with_clock(storage, unix_millis)
    }

    pub fn load_with_clock(storage: Arc<Storage>, clock: Clock) -> Self {
        let mut sessions: Vec<SyncSession> = storage.get(KEY_SYNC_SESSIONS).unwrap_or_default();
        sessions.sort_by_key(|session| session.id);
        sessions.dedup_by_key(|session| session.id);
        let stale: Option<SyncSession> = storage.get(KEY_OPEN_SESSION);
        let last_id = sessions
            .iter()
            .chain(stale.iter())
            .map(|session| session.id)
            .max()
            .unwrap_or(0);

        let mut ledger = Self {
            completion: storage.get(KEY_SYNC_COMPLETION),
            last_known_height: storage.get(KEY_LAST_KNOWN_HEIGHT).unwrap_or(0),
            last_progress: storage.get(KEY_LAST_PROGRESS),
            storage,
            clock,
            sessions,
            open: None,
            last_id,
        };
        if let Some(stale) = stale {
            ledger.recover(stale);
        }
        ledger
    }

    /// Close a session left open by a run that never shut down cleanly, at
    /// the last progress it recorded.
    fn recover(&mut self, mut stale: SyncSession) {
        let end_time = self
            .last_progress
            .as_ref()
            .map(|cursor| cursor.updated_at)
            .filter(|at| *at >= stale.start_time)
            .unwrap_or(stale.start_time);
        stale.end_time = Some(end_time);
        stale.end_blocks = Some(self.last_known_height.max(stale.start_blocks));
        info!(
            session = stale.id,
            blocks = stale.blocks_validated(),
            "closed sync session left open by a previous run"
        );
        if !self.sessions.iter().any(|session| session.id == stale.id) {
            self.sessions.push(stale);
            self.sessions.sort_by_key(|session| session.id);
        }
        self.persist_sessions();
        self.storage.remove(KEY_OPEN_SESSION);
    }

    fn next_id(&mut self) -> u64 {
        let id = (self.clock)().max(self.last_id.saturating_add(1));
        self.last_id = id;
        id
    }

    fn persist_sessions(&self) {
        self.storage.set(KEY_SYNC_SESSIONS, &self.sessions);
    }

    /// Open a session unless one is already open. Returns true if opened.
    pub fn start_session(&mut self, current_blocks: u64, network_height: u64) -> bool {
        if self.open.is_some() {
            return false;
        }
        let id = self.next_id();
        let session = SyncSession {
            id,
            start_time: (self.clock)(),
            end_time: None,
            start_blocks: current_blocks,
            end_blocks: None,
            network_height_at_start: network_height,
        };
        info!(session = id, start_blocks = current_blocks, network_height, "sync session started");
        self.storage.set(KEY_OPEN_SESSION, &session);
        self.open = Some(session);
        true
    }

    pub fn update_progress(&mut self, current_blocks: u64, progress_percent: f64) {
        let cursor = ProgressCursor {
            height: current_blocks,
            percent: progress_percent,
            updated_at: (self.clock)(),
        };
        self.last_known_height = current_blocks;
        self.storage.set(KEY_LAST_KNOWN_HEIGHT, &current_blocks);
        self.storage.set(KEY_LAST_PROGRESS, &cursor);
        self.last_progress = Some(cursor);
    }

    /// Close the open session, if any, and return it.
    pub fn end_session(&mut self, end_blocks: u64) -> Option<SyncSession> {
        let mut session = self.open.take()?;
        session.end_time = Some((self.clock)().max(session.start_time));
        session.end_blocks = Some(end_blocks);
        info!(
            session = session.id,
            blocks = session.blocks_validated(),
            duration_ms = session.duration_ms().unwrap_or(0),
            "sync session ended"
        );
        self.sessions.push(session.clone());
        self.sessions.sort_by_key(|s| s.id);
        self.persist_sessions();
        self.storage.remove(KEY_OPEN_SESSION);
        Some(session)
    }

    /// Record the sync as complete. Returns false (leaving the existing
    /// record untouched) if completion was already recorded.
    pub fn mark_complete(&mut self, total_blocks: u64) -> bool {
        if self.completion.is_some() {
            return false;
        }
        self.end_session(total_blocks);
        let completion = SyncCompletion {
            completed_at: (self.clock)(),
            total_sessions: self.sessions.len() as u64,
            total_blocks,
            total_time_ms: self.total_time_ms(),
        };
        info!(
            total_blocks,
            sessions = completion.total_sessions,
            total_time_ms = completion.total_time_ms,
            "initial sync complete"
        );
        if !self.storage.set(KEY_SYNC_COMPLETION, &completion) {
            warn!("sync completion not persisted");
        }
        self.completion = Some(completion);
        true
    }

    pub fn is_resume(&self) -> bool {
        !self.sessions.is_empty() || self.last_known_height > 0
    }

    pub fn total_blocks_validated(&self) -> u64 {
        self.sessions
            .iter()
            .fold(0u64, |acc, session| acc.saturating_add(session.blocks_validated()))
    }

    pub fn total_time_ms(&self) -> u64 {
        self.sessions
            .iter()
            .filter_map(SyncSession::duration_ms)
            .fold(0u64, u64::saturating_add)
    }

    /// Closed sessions, ascending by id.
    pub fn sessions(&self) -> &[SyncSession] {
        &self.sessions
    }

    pub fn open_session(&self) -> Option<&SyncSession> {
        self.open.as_ref()
    }

    pub fn completion(&self) -> Option<&SyncCompletion> {
        self.completion.as_ref()
    }

    pub fn last_known_height(&self) -> u64 {
        self.last_known_height
    }

    pub fn last_progress(&self) -> Option<&ProgressCursor> {
        self.last_progress.as_ref()
    }

    pub fn reset_completion(&mut self) {
        self.completion = None;
        self.storage.remove(KEY_SYNC_COMPLETION);
    }

    /// Forget all history, including any open session.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.open = None;
        self.completion = None;
        self.last_known_height = 0;
        self.last_progress = None;
        for key in [
            KEY_SYNC_SESSIONS,
            KEY_OPEN_SESSION,
            KEY_SYNC_COMPLETION,
            KEY_LAST_KNOWN_HEIGHT,
            KEY_LAST_PROGRESS,
        ] {
            self.storage.remove(key);
        }
        info!("sync history cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::temp_dir;
    use std::cell::Cell;

    thread_local! {
        static NOW: Cell<u64> = const { Cell::new(1_700_000_000_000) };
    }

    fn fake_clock() -> u64 {
        NOW.with(Cell::get)
    }

    fn advance(ms: u64) {
        NOW.with(|now| now.set(now.get() + ms));
    }

    fn ledger() -> SessionLedger {
        SessionLedger::load_with_clock(Arc::new(Storage::in_memory()), fake_clock)
    }

    #[test]
    fn start_is_a_noop_while_open() {
        let mut ledger = ledger();
        assert!(ledger.start_session(100, 800_000));
        let id = ledger.open_session().map(|s| s.id);
        assert!(!ledger.start_session(200, 800_000));
        assert_eq!(ledger.open_session().map(|s| s.id), id);
        assert_eq!(ledger.open_session().map(|s| s.start_blocks), Some(100));
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let mut ledger = ledger();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ledger.start_session(1, 2);
            ids.push(ledger.end_session(2).map(|s| s.id).expect("closed"));
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn mark_complete_twice_records_once() {
        let mut ledger = ledger();
        ledger.start_session(10, 1_000);
        advance(5_000);
        assert!(ledger.mark_complete(1_000));
        let first = ledger.completion().cloned().expect("completion");
        advance(5_000);
        assert!(!ledger.mark_complete(1_000));
        assert_eq!(ledger.completion(), Some(&first));
        assert_eq!(ledger.sessions().len(), 1);
        assert_eq!(first.total_sessions, 1);
        assert_eq!(first.total_time_ms, 5_000);
        assert_eq!(ledger.total_blocks_validated(), 990);
    }

    #[test]
    fn end_without_open_is_noop() {
        let mut ledger = ledger();
        assert!(ledger.end_session(5).is_none());
        assert!(ledger.sessions().is_empty());
        assert!(!ledger.is_resume());
    }

    #[test]
    fn overlapping_sessions_do_not_panic() {
        let mut ledger = ledger();
        ledger.start_session(500, 1_000);
        ledger.end_session(400);
        ledger.start_session(100, 1_000);
        ledger.end_session(600);
        assert_eq!(ledger.total_blocks_validated(), 500);
    }

    #[test]
    fn history_survives_reload() {
        let dir = temp_dir("ledger");
        let storage = Arc::new(Storage::open(&dir).expect("open"));
        {
            let mut ledger = SessionLedger::load_with_clock(Arc::clone(&storage), fake_clock);
            ledger.start_session(0, 800_000);
            advance(1_000);
            ledger.update_progress(250_000, 31.2);
            ledger.end_session(250_000);
            ledger.start_session(250_000, 800_000);
            advance(1_000);
            ledger.end_session(400_000);
        }
        let reloaded = SessionLedger::load_with_clock(
            Arc::new(Storage::open(&dir).expect("reopen")),
            fake_clock,
        );
        let ids: Vec<u64> = reloaded.sessions().iter().map(|s| s.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
        assert_eq!(reloaded.sessions().len(), 2);
        assert_eq!(reloaded.last_known_height(), 250_000);
        assert!(reloaded.is_resume());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn open_session_from_crashed_run_is_closed_on_load() {
        let storage = Arc::new(Storage::in_memory());
        {
            let mut ledger = SessionLedger::load_with_clock(Arc::clone(&storage), fake_clock);
            ledger.start_session(1_000, 800_000);
            advance(3_000);
            ledger.update_progress(9_000, 1.1);
            // No end_session: the process died here.
        }
        let mut ledger = SessionLedger::load_with_clock(storage, fake_clock);
        assert!(ledger.open_session().is_none());
        let recovered = &ledger.sessions()[0];
        assert_eq!(recovered.end_blocks, Some(9_000));
        assert_eq!(recovered.duration_ms(), Some(3_000));
        // A new session never reuses the recovered id.
        let recovered_id = recovered.id;
        ledger.start_session(9_000, 800_000);
        assert!(ledger.open_session().map(|s| s.id) > Some(recovered_id));
    }

    #[test]
    fn reset_and_clear() {
        let mut ledger = ledger();
        ledger.start_session(0, 10);
        ledger.mark_complete(10);
        ledger.reset_completion();
        assert!(ledger.completion().is_none());
        assert!(ledger.mark_complete(10));
        ledger.clear();
        assert!(ledger.sessions().is_empty());
        assert!(ledger.completion().is_none());
        assert!(!ledger.is_resume());
    }
}
