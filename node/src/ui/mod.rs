//! Terminal output: the fullscreen dashboard, headless progress bars and
//! the one-shot command printers.

// UI output requires direct stdout/stderr for terminal control
#![expect(clippy::print_stdout, clippy::print_stderr, reason = "UI output")]

mod bars;
mod state;
mod tui;

pub use bars::HeadlessProgress;
pub use state::{ActiveView, HistorySummary, Palette, Theme, Transient, TuiState};
pub use tui::{KeyAction, TuiController};

use crate::history::unix_millis;
use crate::run::{HistoryReport, StatusReport};
use crate::sync::{format_eta, format_rate};
use std::time::SystemTime;

// ============================================================================
// Formatting helpers
// ============================================================================

/// Format a byte count as a human-readable string (e.g., "1.23 GiB").
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut idx = 0;
    while value >= 1024.0 && idx < UNITS.len() - 1 {
        value /= 1024.0;
        idx += 1;
    }
    format!("{value:.2} {}", UNITS[idx])
}

/// Thousands separators: `840000` -> `840,000`.
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Hashes per second in the largest unit that keeps the value above one.
pub fn format_hashrate(hashes_per_second: f64) -> String {
    const UNITS: [&str; 7] = ["H/s", "kH/s", "MH/s", "GH/s", "TH/s", "PH/s", "EH/s"];
    let mut value = hashes_per_second.max(0.0);
    let mut idx = 0;
    while value >= 1000.0 && idx < UNITS.len() - 1 {
        value /= 1000.0;
        idx += 1;
    }
    format!("{value:.1} {}", UNITS[idx])
}

pub fn format_duration_ms(ms: u64) -> String {
    format_eta(Some(ms as f64 / 1000.0))
}

/// `"3s ago"` style age of a past instant.
pub fn format_age(at: Option<SystemTime>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    match at.elapsed() {
        Ok(elapsed) if elapsed.as_secs() == 0 => "just now".to_string(),
        Ok(elapsed) => format!("{} ago", format_eta(Some(elapsed.as_secs_f64()))),
        Err(_) => "just now".to_string(),
    }
}

/// First and last `keep` characters of a hash joined by an ellipsis.
pub fn short_hash(hash: &str, keep: usize) -> String {
    let count = hash.chars().count();
    if count <= keep * 2 + 1 {
        return hash.to_string();
    }
    let head: String = hash.chars().take(keep).collect();
    let tail: String = hash.chars().skip(count - keep).collect();
    format!("{head}\u{2026}{tail}")
}

/// Format a Unix timestamp in milliseconds to "2026-Jan-27 10:46:36.123" format (UTC).
pub fn format_unix_timestamp_ms(timestamp_ms: u64) -> String {
    let secs = timestamp_ms / 1000;
    let millis = timestamp_ms % 1000;
    let (hours, minutes, seconds) = time_of_day(secs);
    let (year, month, day) = days_to_ymd(secs / 86_400);
    let month_names = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];
    let month_str = month_names.get(month as usize).unwrap_or(&"???");
    format!("{year}-{month_str}-{day:02} {hours:02}:{minutes:02}:{seconds:02}.{millis:03}")
}

/// `HH:MM:SS` (UTC) for Unix seconds.
pub fn format_clock(unix_secs: u64) -> String {
    let (hours, minutes, seconds) = time_of_day(unix_secs);
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

const fn time_of_day(unix_secs: u64) -> (u64, u64, u64) {
    let time_of_day = unix_secs % 86_400;
    (time_of_day / 3600, (time_of_day % 3600) / 60, time_of_day % 60)
}

/// Convert days since Unix epoch to (year, zero-based month, day).
fn days_to_ymd(days: u64) -> (u64, u64, u64) {
    let mut remaining_days = days as i64;
    let mut year = 1970i64;

    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if remaining_days < days_in_year {
            break;
        }
        remaining_days -= days_in_year;
        year += 1;
    }

    let days_in_months: [i64; 12] = if is_leap_year(year) {
        [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    } else {
        [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
    };

    let mut month = 0i64;
    for (i, &days_in_month) in days_in_months.iter().enumerate() {
        if remaining_days < days_in_month {
            month = i as i64;
            break;
        }
        remaining_days -= days_in_month;
    }

    (year as u64, month as u64, (remaining_days + 1) as u64)
}

const fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

// ============================================================================
// Command output
// ============================================================================

/// Print the one-shot status report to stdout.
pub fn print_status(report: &StatusReport, json: bool) -> eyre::Result<()> {
    if json {
        let payload = serde_json::to_string_pretty(report)?;
        println!("{payload}");
        return Ok(());
    }

    println!("Node at {}", report.endpoint);
    println!("{}", "-".repeat(46));
    print_field("status", report.status.as_str());
    if let Some(err) = report.error.as_deref() {
        print_field("error", err);
    }
    print_field("mode", report.mode.mode.as_str());
    if let Some(stats) = report.stats.as_ref() {
        print_field("peers", &stats.peer_count.to_string());
        print_field("uptime", &format_duration_ms(stats.uptime_seconds * 1000));
        print_field(
            "messages",
            &format_number(stats.messages_received.total()),
        );
    }
    if let Some(target) = report.mode.prune_target_mb {
        print_field("prune target", &format!("{} MiB", format_number(target)));
    }
    if let Some(sync) = report.sync.as_ref() {
        println!();
        print_field("validated", &format_number(sync.validated_height));
        print_field("headers", &format_number(sync.header_height));
        print_field("network", &format_number(sync.network_height));
        print_field("progress", &format!("{:.2}%", sync.progress_percent));
        print_field("synced", if sync.synced { "yes" } else { "no" });
        if !sync.synced {
            print_field("block rate", &format_rate(sync.block_rate, "blk"));
            print_field("eta", &format_eta(sync.eta_seconds));
        }
        if sync.size_on_disk > 0 {
            print_field("size on disk", &human_bytes(sync.size_on_disk));
        }
    }
    if let Some(hashrate) = report.external_hashrate {
        print_field("network hashrate", &format_hashrate(hashrate));
    }
    Ok(())
}

/// Print recorded sync sessions and the completion record to stdout.
pub fn print_history(report: &HistoryReport, json: bool) -> eyre::Result<()> {
    if json {
        let payload = serde_json::to_string_pretty(report)?;
        println!("{payload}");
        return Ok(());
    }

    if report.sessions.is_empty() && report.open_session.is_none() {
        println!("No sync sessions recorded.");
        return Ok(());
    }

    println!(
        "{:<26} {:>12} {:>12} {:>12} {:>10}",
        "Started", "From", "To", "Blocks", "Duration"
    );
    println!("{}", "-".repeat(76));
    for session in &report.sessions {
        println!(
            "{:<26} {:>12} {:>12} {:>12} {:>10}",
            format_unix_timestamp_ms(session.start_time),
            format_number(session.start_blocks),
            session.end_blocks.map_or_else(|| "-".to_string(), format_number),
            format_number(session.blocks_validated()),
            session
                .duration_ms()
                .map_or_else(|| "-".to_string(), format_duration_ms),
        );
    }
    if let Some(open) = report.open_session.as_ref() {
        println!(
            "{:<26} {:>12} {:>12} {:>12} {:>10}",
            format_unix_timestamp_ms(open.start_time),
            format_number(open.start_blocks),
            "(open)",
            "-",
            format_duration_ms(unix_millis().saturating_sub(open.start_time)),
        );
    }

    println!();
    print_field("blocks validated", &format_number(report.total_blocks_validated));
    print_field("time syncing", &format_duration_ms(report.total_time_ms));
    match report.completion.as_ref() {
        Some(done) => print_field(
            "completed",
            &format!(
                "{} after {} session(s)",
                format_unix_timestamp_ms(done.completed_at),
                done.total_sessions
            ),
        ),
        None => print_field("completed", "not yet"),
    }
    if let Some(cursor) = report.last_progress.as_ref() {
        print_field(
            "last seen",
            &format!(
                "block {} ({:.2}%) at {}",
                format_number(cursor.height),
                cursor.percent,
                format_unix_timestamp_ms(cursor.updated_at)
            ),
        );
    }
    Ok(())
}

fn print_field(label: &str, value: &str) {
    println!("{label:<18} {value}");
}

/// Print a warning line to stderr before the dashboard takes the screen.
pub fn print_warning(message: &str) {
    eprintln!("warning: {message}");
}
