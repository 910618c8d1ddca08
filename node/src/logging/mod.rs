//! Tracing setup.
//!
//! Headless runs log to stdout. Dashboard runs capture events into a
//! [`TuiLogBuffer`] for the logs panel instead, so nothing writes over the
//! alternate screen. `--log-json` adds a JSON-lines file in both modes.

mod buffer;
mod json;

pub use buffer::{TuiLogBuffer, TuiLogLayer};
pub use json::{JsonLogLayer, JsonLogWriter, LOG_BUFFER};

use crate::cli::{MonitorConfig, DEFAULT_LOG_JSON_FILTER};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

/// Keep alive for the lifetime of the process; call [`TracingGuards::finish`]
/// before exit to flush the JSON log.
pub struct TracingGuards {
    pub log_writer: Option<Arc<JsonLogWriter>>,
    /// Present only in dashboard mode.
    pub tui_log_buffer: Option<Arc<TuiLogBuffer>>,
}

impl TracingGuards {
    pub fn finish(&self) {
        if let Some(writer) = self.log_writer.as_ref() {
            match writer.finish() {
                Ok(summary) if summary.dropped > 0 => eprintln!(
                    "json log dropped {} of {} events",
                    summary.dropped,
                    summary.written + summary.dropped
                ),
                Ok(_) => {}
                Err(err) => eprintln!("failed to flush json log: {err}"),
            }
        }
    }
}

/// `(global, node_monitor)` levels for a `-v` count.
pub fn verbosity_levels(verbosity: u8) -> (&'static str, &'static str) {
    match verbosity {
        0 => ("warn", "info"),
        1 => ("warn", "debug"),
        2 => ("info", "trace"),
        _ => ("debug", "trace"),
    }
}

fn tui_min_level(verbosity: u8) -> tracing::Level {
    match verbosity {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

pub fn init_tracing(config: &MonitorConfig, tui_mode: bool) -> TracingGuards {
    // RUST_LOG wins over -v.
    let log_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let (global, local) = verbosity_levels(config.verbosity);
            EnvFilter::new(format!("{global},node_monitor={local}"))
        })
    };

    let (fmt_layer, tui_log_buffer) = if tui_mode {
        (None, Some(Arc::new(TuiLogBuffer::new())))
    } else {
        // Subcommands own stdout for their report.
        let writer = if config.command.is_some() {
            BoxMakeWriter::new(std::io::stderr)
        } else {
            BoxMakeWriter::new(std::io::stdout)
        };
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_filter(log_filter()),
            ),
            None,
        )
    };
    let tui_layer = tui_log_buffer.as_ref().map(|buffer| {
        TuiLogLayer::new(Arc::clone(buffer), tui_min_level(config.verbosity))
            .with_filter(log_filter())
    });

    let mut writer_error = None;
    let log_writer = config.log_json.as_ref().and_then(|path| {
        match JsonLogWriter::new(path, LOG_BUFFER) {
            Ok(writer) => Some(Arc::new(writer)),
            Err(err) => {
                writer_error = Some(err);
                None
            }
        }
    });
    let json_filter = EnvFilter::try_new(&config.log_json_filter)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_JSON_FILTER));
    let json_layer = log_writer
        .as_ref()
        .map(|writer| JsonLogLayer::new(Arc::clone(writer)).with_filter(json_filter));

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(tui_layer)
        .with(json_layer)
        .init();

    if let Some(err) = writer_error {
        warn!(error = %err, "failed to initialize json log writer");
    }

    TracingGuards {
        log_writer,
        tui_log_buffer,
    }
}
