//! In-memory log capture for the dashboard's logs panel.

use super::json::JsonLogVisitor;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{Event, Level};
use tracing_subscriber::Layer;

const TUI_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedLog {
    pub level: Level,
    /// Message, then `│ key=value ...` when the event carried fields.
    pub message: String,
    /// Unix milliseconds.
    pub timestamp_ms: u64,
}

/// Bounded queue between the tracing layer and the render loop. The oldest
/// entries are dropped when the dashboard does not keep up.
#[derive(Debug, Default)]
pub struct TuiLogBuffer {
    entries: Mutex<VecDeque<CapturedLog>>,
}

impl TuiLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: CapturedLog) {
        let mut entries = self.entries.lock();
        if entries.len() >= TUI_LOG_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn drain(&self) -> Vec<CapturedLog> {
        self.entries.lock().drain(..).collect()
    }
}

pub struct TuiLogLayer {
    buffer: Arc<TuiLogBuffer>,
    min_level: Level,
}

impl TuiLogLayer {
    pub fn new(buffer: Arc<TuiLogBuffer>, min_level: Level) -> Self {
        Self { buffer, min_level }
    }
}

fn render_field(value: &JsonValue) -> String {
    match value {
        JsonValue::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl<S> Layer<S> for TuiLogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > self.min_level {
            return;
        }
        let mut visitor = JsonLogVisitor::default();
        event.record(&mut visitor);
        let mut message = visitor.take_message().unwrap_or_default();
        if !visitor.fields.is_empty() {
            let fields: Vec<String> = visitor
                .fields
                .iter()
                .map(|(key, value)| format!("{key}={}", render_field(value)))
                .collect();
            message.push_str(" \u{2502} ");
            message.push_str(&fields.join(" "));
        }
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.buffer.push(CapturedLog {
            level: *meta.level(),
            message,
            timestamp_ms,
        });
    }
}
