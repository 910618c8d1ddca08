//! Dashboard state: what the render functions read each frame.

use crate::connection::ConnectionState;
use crate::history::SyncCompletion;
use crate::logging::TuiLogBuffer;
use crate::mode::ModeReport;
use crate::poll::{ObserverFeedState, SyncPageState};
use crate::rpc::RpcConfig;
use ratatui::style::Color;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const MAX_LOG_LINES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

/// Colors used by every panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: Color,
    pub text: Color,
    pub muted: Color,
    pub accent: Color,
    pub good: Color,
    pub warn: Color,
    pub bad: Color,
}

impl Theme {
    pub const fn toggled(self) -> Self {
        match self {
            Self::Dark => Self::Light,
            Self::Light => Self::Dark,
        }
    }

    pub const fn palette(self) -> Palette {
        match self {
            Self::Dark => Palette {
                background: Color::Rgb(20, 20, 28),
                text: Color::White,
                muted: Color::DarkGray,
                accent: Color::Rgb(247, 147, 26),
                good: Color::LightGreen,
                warn: Color::Yellow,
                bad: Color::Red,
            },
            Self::Light => Palette {
                background: Color::Rgb(246, 244, 238),
                text: Color::Black,
                muted: Color::Gray,
                accent: Color::Rgb(200, 100, 0),
                good: Color::Green,
                warn: Color::Rgb(180, 120, 0),
                bad: Color::Red,
            },
        }
    }
}

/// A message shown until `expires_at` or until dismissed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transient {
    pub text: String,
    expires_at: Instant,
}

impl Transient {
    pub fn new(text: impl Into<String>, ttl: Duration, now: Instant) -> Self {
        Self {
            text: text.into(),
            expires_at: now + ttl,
        }
    }

    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveView {
    #[default]
    Overview,
    Sync,
    Observer,
}

impl ActiveView {
    pub const ALL: [Self; 3] = [Self::Overview, Self::Sync, Self::Observer];

    pub const fn next(self) -> Self {
        match self {
            Self::Overview => Self::Sync,
            Self::Sync => Self::Observer,
            Self::Observer => Self::Overview,
        }
    }

    pub const fn title(self) -> &'static str {
        match self {
            Self::Overview => "OVERVIEW",
            Self::Sync => "SYNC",
            Self::Observer => "OBSERVER",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub message: String,
    pub level: LogLevel,
    /// Unix milliseconds.
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct HistorySummary {
    pub sessions: usize,
    pub open_session: bool,
    pub total_blocks: u64,
    pub total_time_ms: u64,
    pub last_known_height: u64,
    pub completion: Option<SyncCompletion>,
}

pub struct TuiState {
    pub view: ActiveView,
    pub theme: Theme,
    pub show_help: bool,
    pub connection: ConnectionState,
    pub mode: ModeReport,
    pub sync: SyncPageState,
    pub feed: ObserverFeedState,
    pub history: HistorySummary,
    pub toast: Option<Transient>,
    pub milestone_toast: Option<Transient>,
    pub logs: VecDeque<LogEntry>,
    pub data_dir: String,
    pub animation_frame: u64,
}

impl TuiState {
    pub fn new(theme: Theme, show_help: bool, data_dir: &str) -> Self {
        Self {
            view: ActiveView::default(),
            theme,
            show_help,
            connection: ConnectionState::new(RpcConfig::default()),
            mode: ModeReport::default(),
            sync: SyncPageState::default(),
            feed: ObserverFeedState::default(),
            history: HistorySummary::default(),
            toast: None,
            milestone_toast: None,
            logs: VecDeque::new(),
            data_dir: data_dir.to_string(),
            animation_frame: 0,
        }
    }

    pub fn palette(&self) -> Palette {
        self.theme.palette()
    }

    pub fn drain_log_buffer(&mut self, buffer: &TuiLogBuffer) {
        for entry in buffer.drain() {
            self.add_log(entry.level, entry.message, entry.timestamp_ms);
        }
    }

    pub fn add_log(&mut self, level: tracing::Level, message: String, timestamp_ms: u64) {
        let level = match level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::DEBUG | tracing::Level::TRACE => LogLevel::Debug,
        };
        if self.logs.len() >= MAX_LOG_LINES {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry {
            message,
            level,
            timestamp_ms,
        });
    }

    pub fn show_toast(&mut self, text: impl Into<String>, ttl: Duration) {
        self.toast = Some(Transient::new(text, ttl, Instant::now()));
    }

    /// Drop expired transients. Returns true if the milestone toast expired.
    pub fn expire_transients(&mut self, now: Instant) -> bool {
        if self.toast.as_ref().is_some_and(|toast| !toast.is_live(now)) {
            self.toast = None;
        }
        if self
            .milestone_toast
            .as_ref()
            .is_some_and(|toast| !toast.is_live(now))
        {
            self.milestone_toast = None;
            return true;
        }
        false
    }
}
