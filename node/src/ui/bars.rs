//! Progress bars for headless runs.

use crate::sync::{format_eta, format_rate, SyncView};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::IsTerminal;
use std::time::Duration;

/// Color definitions for bar segments (RGB values).
pub mod colors {
    /// Black text on yellow while connecting.
    pub const YELLOW: (u8, u8, u8) = (255, 200, 0);
    /// White text on green once synced.
    pub const GREEN: (u8, u8, u8) = (0, 128, 0);
}

/// Bar width constant used across all bars.
pub const BAR_WIDTH: usize = 40;

fn connect_spinner(multi: &MultiProgress) -> ProgressBar {
    let bar = multi.add(ProgressBar::new_spinner());
    let style = ProgressStyle::with_template("{spinner:.yellow} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
    bar.set_style(style);
    bar
}

fn sync_bar(multi: &MultiProgress, total: u64) -> ProgressBar {
    let bar = multi.add(ProgressBar::new(total));
    let style = ProgressStyle::with_template(
        "{bar:40.cyan/blue} {percent:>3}% {pos}/{len} | {elapsed_precise} | {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("█▉░");
    bar.set_style(style);
    bar
}

/// Format a colored status segment using ANSI escape codes.
pub fn format_colored_segment(content: &str, fg: (u8, u8, u8), bg: (u8, u8, u8)) -> String {
    let padding = BAR_WIDTH.saturating_sub(content.chars().count());
    let left_pad = padding / 2;
    let right_pad = padding - left_pad;
    format!(
        "\x1b[38;2;{};{};{};48;2;{};{};{}m{:>left_pad$}{content}{:<right_pad$}\x1b[0m",
        fg.0, fg.1, fg.2, bg.0, bg.1, bg.2, "", "",
    )
}

/// Green segment with the tip height.
pub fn format_synced_segment(height: u64) -> String {
    format_colored_segment(&format!("[ {height} ]"), (255, 255, 255), colors::GREEN)
}

/// Yellow segment for connection status.
pub fn format_connecting_segment(message: &str) -> String {
    format_colored_segment(message, (0, 0, 0), colors::YELLOW)
}

/// Status spinner plus a sync bar created on the first sync snapshot.
/// Bars inherit the multi's target, hidden when stderr is not a terminal.
pub struct HeadlessProgress {
    multi: MultiProgress,
    status: ProgressBar,
    sync: Option<ProgressBar>,
}

impl HeadlessProgress {
    pub fn new() -> Self {
        if std::io::stderr().is_terminal() {
            Self::with_target(ProgressDrawTarget::stderr_with_hz(10))
        } else {
            Self::hidden()
        }
    }

    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden())
    }

    fn with_target(target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let status = connect_spinner(&multi);
        status.enable_steady_tick(Duration::from_millis(100));
        Self {
            multi,
            status,
            sync: None,
        }
    }

    pub fn set_status(&self, message: &str) {
        self.status.set_message(format_connecting_segment(message));
    }

    pub fn update_sync(&mut self, view: &SyncView) {
        if self.sync.is_none() {
            self.sync = Some(sync_bar(&self.multi, view.network_height));
        }
        let Some(bar) = self.sync.as_ref() else {
            return;
        };
        bar.set_length(view.network_height.max(view.validated_height));
        bar.set_position(view.validated_height);
        if view.synced {
            bar.set_message(format_synced_segment(view.validated_height));
        } else {
            bar.set_message(format!(
                "{} | ETA {}",
                format_rate(view.block_rate, "blk"),
                format_eta(view.eta_seconds)
            ));
        }
    }

    /// Drop the sync bar, e.g. when the sync view is torn down.
    pub fn clear_sync(&mut self) {
        if let Some(bar) = self.sync.take() {
            bar.finish_and_clear();
            self.multi.remove(&bar);
        }
    }

    pub fn sync_position(&self) -> Option<(u64, Option<u64>)> {
        self.sync.as_ref().map(|bar| (bar.position(), bar.length()))
    }

    pub fn finish(&mut self) {
        self.clear_sync();
        self.status.finish_and_clear();
    }
}

impl Default for HeadlessProgress {
    fn default() -> Self {
        Self::new()
    }
}
