//! JSON-lines log file written from a background thread.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::{
    io::{BufWriter, Write},
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::{self, SyncSender},
        Arc,
    },
    thread::JoinHandle,
    time::Instant,
};
use tracing::Event;
use tracing_subscriber::Layer;

/// Buffer size for JSON log channel.
pub const LOG_BUFFER: usize = 10_000;

const FLUSH_EVERY: usize = 256;

#[derive(Debug, Serialize)]
pub struct LogRecord {
    /// Milliseconds since the writer was created.
    pub t_ms: u64,
    pub level: String,
    pub target: String,
    pub message: Option<String>,
    pub fields: JsonMap<String, JsonValue>,
}

/// Collects event fields into a JSON map.
#[derive(Default)]
pub struct JsonLogVisitor {
    pub fields: JsonMap<String, JsonValue>,
}

impl JsonLogVisitor {
    fn insert(&mut self, field: &tracing::field::Field, value: JsonValue) {
        self.fields.insert(field.name().to_string(), value);
    }

    /// Remove and return the `message` field as text.
    pub fn take_message(&mut self) -> Option<String> {
        self.fields.remove("message").map(|value| match value {
            JsonValue::String(text) => text,
            other => other.to_string(),
        })
    }
}

impl tracing::field::Visit for JsonLogVisitor {
    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        // NaN and infinities have no JSON number form.
        let value = serde_json::Number::from_f64(value)
            .map_or_else(|| JsonValue::String(value.to_string()), JsonValue::Number);
        self.insert(field, value);
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.insert(field, value.into());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.insert(field, JsonValue::String(format!("{value:?}")));
    }
}

/// Counts reported once the writer has been closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonLogSummary {
    pub written: u64,
    pub dropped: u64,
}

/// Records are queued on a bounded channel and dropped (and counted) when
/// the writer thread falls behind.
#[derive(Debug)]
pub struct JsonLogWriter {
    started_at: Instant,
    sender: Mutex<Option<SyncSender<LogRecord>>>,
    handle: Mutex<Option<JoinHandle<eyre::Result<()>>>>,
    queued: AtomicU64,
    dropped: AtomicU64,
}

impl JsonLogWriter {
    pub fn new(path: &Path, capacity: usize) -> eyre::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = BufWriter::new(std::fs::File::create(path)?);
        let (tx, rx) = mpsc::sync_channel::<LogRecord>(capacity);
        let handle = std::thread::spawn(move || -> eyre::Result<()> {
            for (index, record) in rx.into_iter().enumerate() {
                serde_json::to_writer(&mut out, &record)?;
                out.write_all(b"\n")?;
                if (index + 1) % FLUSH_EVERY == 0 {
                    out.flush()?;
                }
            }
            out.flush()?;
            Ok(())
        });

        Ok(Self {
            started_at: Instant::now(),
            sender: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            queued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        })
    }

    fn since_start_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn record(&self, record: LogRecord) {
        let sent = match self.sender.lock().as_ref() {
            Some(sender) => sender.try_send(record).is_ok(),
            None => false,
        };
        let counter = if sent { &self.queued } else { &self.dropped };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    /// Close the channel and wait for every queued record to hit the disk.
    pub fn finish(&self) -> eyre::Result<JsonLogSummary> {
        drop(self.sender.lock().take());
        if let Some(handle) = self.handle.lock().take() {
            handle
                .join()
                .map_err(|_| eyre::eyre!("json log writer thread panicked"))??;
        }
        Ok(JsonLogSummary {
            written: self.queued.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
        })
    }
}

#[derive(Clone)]
pub struct JsonLogLayer {
    writer: Arc<JsonLogWriter>,
}

impl JsonLogLayer {
    pub fn new(writer: Arc<JsonLogWriter>) -> Self {
        Self { writer }
    }
}

impl<S> Layer<S> for JsonLogLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = JsonLogVisitor::default();
        event.record(&mut visitor);
        let message = visitor.take_message();
        let record = LogRecord {
            t_ms: self.writer.since_start_ms(),
            level: meta.level().as_str().to_string(),
            target: meta.target().to_string(),
            message,
            fields: visitor.fields,
        };
        self.writer.record(record);
    }
}
