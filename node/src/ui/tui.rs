//! Ratatui-based fullscreen dashboard.
//!
//! Three views share one frame: an overview of the connection and node,
//! sync progress, and the observer's block and transaction feed. The
//! render functions only read [`TuiState`]; the dashboard loop in `run`
//! owns every side effect.

use super::state::{ActiveView, LogLevel, Palette, TuiState};
use super::{
    format_age, format_clock, format_duration_ms, format_hashrate, format_number,
    format_unix_timestamp_ms, human_bytes, short_hash,
};
use crate::connection::ConnectionStatus;
use crate::mode::{NodeMode, PruningState};
use crate::sync::milestones::next_milestone;
use crate::sync::{format_eta, format_rate, RateSource, SyncView};
use crossterm::{
    cursor::Show,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    backend::CrosstermBackend,
    buffer::Buffer,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Style, Stylize},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, Clear, Paragraph, Widget, Wrap},
    Frame, Terminal,
};
use std::io::{self, Stdout};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const MIN_WIDTH: u16 = 80;
const MIN_HEIGHT: u16 = 30;

const FOOTER_HELP: &str = " Tab views \u{00b7} d dismiss \u{00b7} t theme \u{00b7} r reconnect \u{00b7} ? help \u{00b7} q quit ";

/// What a key press asks the dashboard loop to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Quit,
    NextView,
    SelectView(ActiveView),
    Dismiss,
    ToggleTheme,
    Reconnect,
    ToggleHelp,
}

pub fn map_key(key: KeyEvent) -> Option<KeyAction> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyAction::Quit)
        }
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
        KeyCode::Tab => Some(KeyAction::NextView),
        KeyCode::Char('1') => Some(KeyAction::SelectView(ActiveView::Overview)),
        KeyCode::Char('2') => Some(KeyAction::SelectView(ActiveView::Sync)),
        KeyCode::Char('3') => Some(KeyAction::SelectView(ActiveView::Observer)),
        KeyCode::Char('d') => Some(KeyAction::Dismiss),
        KeyCode::Char('t') => Some(KeyAction::ToggleTheme),
        KeyCode::Char('r') => Some(KeyAction::Reconnect),
        KeyCode::Char('?') | KeyCode::Char('h') => Some(KeyAction::ToggleHelp),
        _ => None,
    }
}

/// Owns the terminal while the dashboard is up.
pub struct TuiController {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    pub state: TuiState,
}

impl TuiController {
    /// Enter raw mode and the alternate screen.
    pub fn new(state: TuiState) -> io::Result<Self> {
        enable_raw_mode()?;
        io::stdout().execute(EnterAlternateScreen)?;
        let terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
        Ok(Self { terminal, state })
    }

    /// Non-blocking; at most one action per call.
    pub fn poll_action(&mut self) -> io::Result<Option<KeyAction>> {
        if event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                return Ok(map_key(key));
            }
        }
        Ok(None)
    }

    pub fn draw(&mut self) -> io::Result<()> {
        self.state.animation_frame = self.state.animation_frame.wrapping_add(1);
        self.terminal.draw(|frame| render_ui(frame, &self.state))?;
        Ok(())
    }

    pub fn restore(&self) -> io::Result<()> {
        disable_raw_mode()?;
        io::stdout().execute(LeaveAlternateScreen)?;
        io::stdout().execute(Show)?;
        Ok(())
    }
}

impl Drop for TuiController {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

// ============================================================================
// Frame layout
// ============================================================================

const SPINNER: [&str; 4] = ["\u{25D0}", "\u{25D3}", "\u{25D1}", "\u{25D2}"];

fn status_color(status: ConnectionStatus, palette: &Palette) -> Color {
    match status {
        ConnectionStatus::Connected => palette.good,
        ConnectionStatus::Connecting => palette.warn,
        ConnectionStatus::Error => palette.bad,
        ConnectionStatus::Disconnected => palette.muted,
    }
}

pub(crate) fn render_ui(frame: &mut Frame, data: &TuiState) {
    let area = frame.area();
    let palette = data.palette();
    frame.render_widget(Clear, area);
    if area.width < MIN_WIDTH || area.height < MIN_HEIGHT {
        frame.render_widget(
            Paragraph::new(format!("Terminal too small, need {MIN_WIDTH}x{MIN_HEIGHT}"))
                .wrap(Wrap { trim: true })
                .style(Style::default().fg(palette.warn).bg(palette.background)),
            area,
        );
        return;
    }

    let main_block = Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Thick)
        .border_style(Style::default().fg(status_color(data.connection.status, &palette)))
        .style(Style::default().bg(palette.background).fg(palette.text));
    let inner = main_block.inner(area);
    frame.render_widget(main_block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Length(1), // View tabs
            Constraint::Length(1), // Connection status
            Constraint::Length(1), // Separator
            Constraint::Min(10),   // Active view
            Constraint::Length(1), // Separator
            Constraint::Length(8), // Logs
        ])
        .split(inner);

    let buf = frame.buffer_mut();
    render_header(chunks[0], buf, &palette);
    render_tabs(chunks[1], buf, data);
    render_status_line(chunks[2], buf, data);
    render_separator(chunks[3], buf, &palette);
    match data.view {
        ActiveView::Overview => render_overview(chunks[4], buf, data),
        ActiveView::Sync => render_sync(chunks[4], buf, data),
        ActiveView::Observer => render_observer(chunks[4], buf, data),
    }
    render_separator(chunks[5], buf, &palette);
    render_logs_panel(chunks[6], buf, data);

    if area.height > 0 {
        buf.set_string(
            area.x + 2,
            area.y + area.height - 1,
            FOOTER_HELP,
            Style::default().fg(palette.muted),
        );
    }

    if let Some(toast) = data.milestone_toast.as_ref() {
        render_milestone_toast(frame, area, data, &toast.text);
    }
    if let Some(toast) = data.toast.as_ref() {
        render_toast(frame, area, &toast.text, &palette);
    }
    if data.show_help {
        render_help_overlay(frame, area, &palette);
    }
}

fn render_separator(area: Rect, buf: &mut Buffer, palette: &Palette) {
    let sep = "\u{2501}".repeat(area.width as usize);
    buf.set_string(area.x, area.y, &sep, Style::default().fg(palette.muted));
}

fn render_header(area: Rect, buf: &mut Buffer, palette: &Palette) {
    let now = chrono_time();
    buf.set_string(
        area.x + 2,
        area.y,
        "NODE MONITOR",
        Style::default().fg(palette.accent).bold(),
    );
    buf.set_string(
        (area.x + area.width).saturating_sub(now.len() as u16 + 2),
        area.y,
        &now,
        Style::default().fg(palette.muted),
    );
}

fn render_tabs(area: Rect, buf: &mut Buffer, data: &TuiState) {
    let palette = data.palette();
    let mut x = area.x + 2;
    for (idx, view) in ActiveView::ALL.iter().enumerate() {
        let active = *view == data.view;
        let (symbol, style) = if active {
            ("\u{25A0}", Style::default().fg(palette.accent).bold())
        } else {
            ("\u{25A1}", Style::default().fg(palette.muted))
        };
        let label = format!("[{symbol} {} {}]", idx + 1, view.title());
        buf.set_string(x, area.y, &label, style);
        x += label.chars().count() as u16 + 2;
    }

    let mode = format!("mode: {}", data.mode.mode.as_str());
    let mode_color = match data.mode.mode {
        NodeMode::Unknown => palette.muted,
        _ => palette.text,
    };
    buf.set_string(
        (area.x + area.width).saturating_sub(mode.len() as u16 + 2),
        area.y,
        &mode,
        Style::default().fg(mode_color),
    );
}

fn render_status_line(area: Rect, buf: &mut Buffer, data: &TuiState) {
    let palette = data.palette();
    let color = status_color(data.connection.status, &palette);
    let badge = match data.connection.status {
        ConnectionStatus::Connecting => {
            SPINNER[(data.animation_frame / 2) as usize % SPINNER.len()]
        }
        _ => "\u{25CF}",
    };
    buf.set_string(area.x + 2, area.y, badge, Style::default().fg(color));
    buf.set_stringn(
        area.x + 4,
        area.y,
        data.connection.status_line(),
        area.width.saturating_sub(6) as usize,
        Style::default().fg(color),
    );
}

// ============================================================================
// Overview
// ============================================================================

/// One `label  value` row of a panel.
struct Row {
    label: &'static str,
    value: String,
    color: Color,
}

impl Row {
    fn new(label: &'static str, value: impl Into<String>, color: Color) -> Self {
        Self {
            label,
            value: value.into(),
            color,
        }
    }
}

fn render_panel(area: Rect, buf: &mut Buffer, title: &str, rows: &[Row], palette: &Palette) {
    let block = Block::default()
        .title(format!(" {title} "))
        .title_style(Style::default().fg(palette.text).bold())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.muted));
    let inner = block.inner(area);
    block.render(area, buf);

    let value_col = inner.x + 14;
    let value_width = inner.width.saturating_sub(15) as usize;
    for (i, row) in rows.iter().take(inner.height as usize).enumerate() {
        let y = inner.y + i as u16;
        buf.set_string(inner.x + 1, y, row.label, Style::default().fg(palette.muted));
        buf.set_stringn(value_col, y, &row.value, value_width, Style::default().fg(row.color));
    }
}

fn render_overview(area: Rect, buf: &mut Buffer, data: &TuiState) {
    let palette = data.palette();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
        .split(area);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
        .split(rows[0]);
    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
        .split(rows[1]);

    let conn = &data.connection;
    let mut connection = vec![
        Row::new(
            "Status",
            conn.status.as_str(),
            status_color(conn.status, &palette),
        ),
        Row::new("Endpoint", conn.config.endpoint.clone(), palette.text),
        Row::new("Timeout", format!("{} ms", conn.config.timeout_ms), palette.text),
        Row::new("Last check", format_age(conn.last_check_at), palette.text),
    ];
    if let Some(err) = conn.last_error.as_deref() {
        connection.push(Row::new("Error", err, palette.bad));
    }
    render_panel(top[0], buf, "CONNECTION", &connection, &palette);

    let report = &data.mode;
    let mut node = vec![
        Row::new("Mode", report.mode.as_str(), palette.accent),
        Row::new(
            "Storage",
            match report.pruning {
                PruningState::Pruned => "pruned",
                PruningState::Archival => "archival",
                PruningState::Unknown => "unknown",
            },
            palette.text,
        ),
        Row::new(
            "IBD",
            if report.is_ibd { "yes" } else { "no" },
            if report.is_ibd { palette.warn } else { palette.good },
        ),
    ];
    if let Some(target) = report.prune_target_mb {
        node.push(Row::new(
            "Prune target",
            format!("{} MiB", format_number(target)),
            palette.text,
        ));
    }
    if let Some(height) = report.prune_height {
        node.push(Row::new("Pruned below", format_number(height), palette.text));
    }
    if let Some(stats) = conn.stats.as_ref() {
        node.push(Row::new(
            "Uptime",
            format_duration_ms(stats.uptime_seconds.saturating_mul(1000)),
            palette.text,
        ));
        node.push(Row::new("Peers", peers_visual(stats.peer_count), palette.good));
    }
    render_panel(top[1], buf, "NODE", &node, &palette);

    let mut network = Vec::new();
    if let Some(info) = conn.chain_info.as_ref() {
        if !info.chain.is_empty() {
            network.push(Row::new("Chain", info.chain.clone(), palette.text));
        }
        network.push(Row::new("Blocks", format_number(info.blocks), palette.text));
        network.push(Row::new("Headers", format_number(info.headers), palette.text));
        if info.size_on_disk > 0 {
            network.push(Row::new("On disk", human_bytes(info.size_on_disk), palette.text));
        }
    }
    network.push(Row::new(
        "Network tip",
        conn.external_height
            .map_or_else(|| "--".to_string(), format_number),
        palette.text,
    ));
    network.push(Row::new(
        "Hashrate",
        conn.external_hashrate
            .map_or_else(|| "--".to_string(), format_hashrate),
        palette.text,
    ));
    if let Some(stats) = conn.stats.as_ref() {
        network.push(Row::new(
            "Messages",
            format_number(stats.messages_received.total()),
            palette.text,
        ));
    }
    render_panel(bottom[0], buf, "NETWORK", &network, &palette);

    let history = &data.history;
    let mut rows = vec![
        Row::new("Sessions", history.sessions.to_string(), palette.text),
        Row::new(
            "Validated",
            format!("{} blocks", format_number(history.total_blocks)),
            palette.text,
        ),
        Row::new(
            "Time syncing",
            format_duration_ms(history.total_time_ms),
            palette.text,
        ),
        Row::new(
            "Last height",
            format_number(history.last_known_height),
            palette.text,
        ),
    ];
    match history.completion.as_ref() {
        Some(done) => rows.push(Row::new(
            "Completed",
            format_unix_timestamp_ms(done.completed_at),
            palette.good,
        )),
        None if history.open_session => {
            rows.push(Row::new("Completed", "syncing...", palette.warn));
        }
        None => rows.push(Row::new("Completed", "--", palette.muted)),
    }
    rows.push(Row::new("Data dir", data.data_dir.clone(), palette.muted));
    render_panel(bottom[1], buf, "HISTORY", &rows, &palette);
}

/// One dot per peer, capped with an ellipsis.
fn peers_visual(peers: u64) -> String {
    const MAX_DOTS: u64 = 24;
    if peers == 0 {
        return "\u{2014}".to_string();
    }
    let dots: String = (0..peers.min(MAX_DOTS)).map(|_| '\u{25CF}').collect();
    if peers > MAX_DOTS {
        format!("{dots}\u{2026} {peers}")
    } else {
        format!("{dots} {peers}")
    }
}

// ============================================================================
// Sync
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPhase {
    Headers,
    Blocks,
    Synced,
}

fn sync_phase(view: &SyncView) -> SyncPhase {
    if view.synced {
        SyncPhase::Synced
    } else if view.headers_phase {
        SyncPhase::Headers
    } else {
        SyncPhase::Blocks
    }
}

fn render_sync(area: Rect, buf: &mut Buffer, data: &TuiState) {
    let palette = data.palette();
    let Some(view) = data.sync.view.as_ref() else {
        let message = match (&data.sync.last_error, data.sync.mode) {
            (Some(err), _) => format!("Sync status unavailable: {err}"),
            (None, NodeMode::Observer) => {
                "Observer nodes relay without validating; see the observer view".to_string()
            }
            (None, _) => "Waiting for the first sync snapshot...".to_string(),
        };
        buf.set_stringn(
            area.x + 2,
            area.y + 1,
            message,
            area.width.saturating_sub(4) as usize,
            Style::default().fg(palette.muted),
        );
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Phase indicator
            Constraint::Length(1), // Spacing
            Constraint::Length(2), // Progress bar + block count
            Constraint::Length(1), // Spacing
            Constraint::Min(7),    // Stats + big number
            Constraint::Length(4), // Milestones
        ])
        .split(area);

    render_phase_indicator(chunks[0], buf, sync_phase(view), &palette);
    if data.sync.resumed && !view.synced {
        let banner = format!(
            "Welcome back! Resumed from block {}",
            format_number(data.history.last_known_height)
        );
        buf.set_string(
            (chunks[0].x + chunks[0].width).saturating_sub(banner.len() as u16 + 2),
            chunks[0].y,
            &banner,
            Style::default().fg(palette.accent),
        );
    }
    render_progress_section(chunks[2], buf, view, &palette);

    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
        .split(chunks[4]);
    let mut stats = vec![
        Row::new("Validated", format_number(view.validated_height), palette.text),
        Row::new("Headers", format_number(view.header_height), palette.text),
        Row::new("Network", format_number(view.network_height), palette.text),
        Row::new("Remaining", format_number(view.blocks_remaining), palette.text),
        Row::new(
            "Block rate",
            match view.block_rate_source {
                RateSource::Reported => format_rate(view.block_rate, "blk"),
                RateSource::Estimated => format!("{} (est.)", format_rate(view.block_rate, "blk")),
            },
            palette.text,
        ),
        Row::new("ETA", format_eta(view.eta_seconds), palette.text),
    ];
    if view.headers_phase {
        stats.push(Row::new("Header rate", format_rate(view.header_rate, "hdr"), palette.text));
    }
    if view.sync_peers > 0 {
        stats.push(Row::new("Sync peers", view.sync_peers.to_string(), palette.text));
    }
    if view.size_on_disk > 0 {
        stats.push(Row::new("On disk", human_bytes(view.size_on_disk), palette.text));
    }
    render_panel(halves[0], buf, "PROGRESS", &stats, &palette);

    let number_color = if view.synced { palette.good } else { palette.warn };
    render_big_number(halves[1], buf, view.validated_height, number_color);
    if !view.best_block_hash.is_empty() && halves[1].height > 7 {
        let hash = short_hash(&view.best_block_hash, 10);
        buf.set_string(
            (halves[1].x + halves[1].width).saturating_sub(hash.chars().count() as u16 + 2),
            halves[1].y + 7,
            &hash,
            Style::default().fg(palette.muted),
        );
    }

    render_milestones(chunks[5], buf, data, view, &palette);
}

fn render_phase_indicator(area: Rect, buf: &mut Buffer, current: SyncPhase, palette: &Palette) {
    let phases = [
        ("HEADERS", SyncPhase::Headers),
        ("BLOCKS", SyncPhase::Blocks),
        ("SYNCED", SyncPhase::Synced),
    ];

    let mut x = area.x + 2;
    let text = "Phase:  ";
    buf.set_string(x, area.y, text, Style::default().fg(palette.text));
    x += text.len() as u16;

    for (name, phase) in phases {
        let (symbol, style) = if phase == current {
            ("\u{25A0}", Style::default().fg(palette.accent).bold())
        } else if (phase as u8) < (current as u8) {
            ("\u{2713}", Style::default().fg(palette.muted))
        } else {
            ("\u{25A1}", Style::default().fg(palette.muted))
        };
        let label = format!("[{symbol} {name}]");
        buf.set_string(x, area.y, &label, style);
        x += label.chars().count() as u16 + 2;
    }
}

fn render_progress_section(area: Rect, buf: &mut Buffer, view: &SyncView, palette: &Palette) {
    let label_width: u16 = 12;
    let right_margin: u16 = 8;
    let (status_text, color) = match sync_phase(view) {
        SyncPhase::Headers => ("HEADERS", palette.warn),
        SyncPhase::Blocks => ("VALIDATING", palette.accent),
        SyncPhase::Synced => ("SYNCED", palette.good),
    };
    let fraction = (view.progress_percent / 100.0).clamp(0.0, 1.0);

    buf.set_string(area.x + 2, area.y, status_text, Style::default().fg(color).bold());
    buf.set_string(
        (area.x + area.width).saturating_sub(right_margin),
        area.y,
        format!("{:>6.2}%", view.progress_percent),
        Style::default().fg(palette.text).bold(),
    );

    let bar_start = area.x + 2 + label_width;
    let bar_end = (area.x + area.width).saturating_sub(right_margin + 1);
    let bar_width = bar_end.saturating_sub(bar_start) as usize;
    if bar_width > 4 {
        let filled = (bar_width as f64 * fraction) as usize;
        let empty = bar_width - filled;
        buf.set_string(
            bar_start,
            area.y,
            "\u{2588}".repeat(filled),
            Style::default().fg(color),
        );
        buf.set_string(
            bar_start + filled as u16,
            area.y,
            "\u{2591}".repeat(empty),
            Style::default().fg(palette.muted),
        );
    }

    let blocks_text = format!(
        "validated {} of {} blocks",
        format_number(view.validated_height),
        format_number(view.network_height)
    );
    let blocks_x = area.x + area.width.saturating_sub(blocks_text.len() as u16) / 2;
    buf.set_string(blocks_x, area.y + 1, &blocks_text, Style::default().fg(palette.text));
}

fn render_milestones(
    area: Rect,
    buf: &mut Buffer,
    data: &TuiState,
    view: &SyncView,
    palette: &Palette,
) {
    let block = Block::default()
        .title(" MILESTONES ")
        .title_style(Style::default().fg(palette.text).bold())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.muted));
    let inner = block.inner(area);
    block.render(area, buf);
    let width = inner.width.saturating_sub(2) as usize;

    if let Some(milestone) = data.sync.milestone {
        let headline = format!(
            "{} {} \u{00b7} block {} \u{00b7} {}",
            milestone.icon.unwrap_or("*"),
            milestone.title,
            format_number(milestone.height),
            milestone.date
        );
        buf.set_stringn(inner.x + 1, inner.y, headline, width, Style::default().fg(palette.accent).bold());
    }
    match next_milestone(view.validated_height) {
        Some(next) => {
            let line = format!(
                "Next: {} at block {} ({} to go)",
                next.title,
                format_number(next.height),
                format_number(next.height.saturating_sub(view.validated_height))
            );
            buf.set_stringn(inner.x + 1, inner.y + 1, line, width, Style::default().fg(palette.muted));
        }
        None => {
            buf.set_stringn(
                inner.x + 1,
                inner.y + 1,
                "Every milestone passed",
                width,
                Style::default().fg(palette.muted),
            );
        }
    }
}

/// Block-letter digits (3 chars wide, 5 rows tall).
const DIGITS: [[&str; 5]; 10] = [
    ["\u{2588}\u{2580}\u{2588}", "\u{2588} \u{2588}", "\u{2588} \u{2588}", "\u{2588} \u{2588}", "\u{2580}\u{2580}\u{2580}"],
    [" \u{2580}\u{2588}", "  \u{2588}", "  \u{2588}", "  \u{2588}", "  \u{2580}"],
    ["\u{2580}\u{2580}\u{2588}", "  \u{2588}", "\u{2588}\u{2580}\u{2580}", "\u{2588}  ", "\u{2580}\u{2580}\u{2580}"],
    ["\u{2580}\u{2580}\u{2588}", "  \u{2588}", "\u{2580}\u{2580}\u{2588}", "  \u{2588}", "\u{2580}\u{2580}\u{2580}"],
    ["\u{2588} \u{2588}", "\u{2588} \u{2588}", "\u{2580}\u{2580}\u{2588}", "  \u{2588}", "  \u{2580}"],
    ["\u{2588}\u{2580}\u{2580}", "\u{2588}  ", "\u{2580}\u{2580}\u{2588}", "  \u{2588}", "\u{2580}\u{2580}\u{2580}"],
    ["\u{2588}\u{2580}\u{2580}", "\u{2588}  ", "\u{2588}\u{2580}\u{2588}", "\u{2588} \u{2588}", "\u{2580}\u{2580}\u{2580}"],
    ["\u{2580}\u{2580}\u{2588}", "  \u{2588}", "  \u{2588}", "  \u{2588}", "  \u{2580}"],
    ["\u{2588}\u{2580}\u{2588}", "\u{2588} \u{2588}", "\u{2588}\u{2580}\u{2588}", "\u{2588} \u{2588}", "\u{2580}\u{2580}\u{2580}"],
    ["\u{2588}\u{2580}\u{2588}", "\u{2588} \u{2588}", "\u{2580}\u{2580}\u{2588}", "  \u{2588}", "\u{2580}\u{2580}\u{2580}"],
];

const COMMA: [&str; 5] = ["   ", "   ", "   ", " \u{2584} ", " \u{2580} "];

fn render_big_number(area: Rect, buf: &mut Buffer, number: u64, color: Color) {
    let formatted = format_number(number);
    let total_width = formatted.chars().count() as u16 * 4;
    if total_width + 2 > area.width {
        return;
    }
    let start_x = area.x + area.width - (total_width + 2);
    let start_y = area.y + 1;
    let style = Style::default().fg(color);

    for (char_idx, ch) in formatted.chars().enumerate() {
        let x = start_x + char_idx as u16 * 4;
        let pattern: &[&str; 5] = match ch.to_digit(10) {
            Some(digit) => &DIGITS[digit as usize],
            None if ch == ',' => &COMMA,
            None => continue,
        };
        for (row, line) in pattern.iter().enumerate() {
            let y = start_y + row as u16;
            if y < area.y + area.height {
                buf.set_string(x, y, *line, style);
            }
        }
    }
}

// ============================================================================
// Observer
// ============================================================================

fn render_observer(area: Rect, buf: &mut Buffer, data: &TuiState) {
    let palette = data.palette();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(6), Constraint::Length(1)])
        .split(area);
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
        .split(chunks[0]);

    let feed = &data.feed;
    let blocks: Vec<Line> = feed
        .blocks
        .iter()
        .map(|block| {
            Line::from(vec![
                Span::styled(
                    format!(
                        "{:>9} ",
                        block.height.map_or_else(|| "?".to_string(), format_number)
                    ),
                    Style::default().fg(palette.accent),
                ),
                Span::styled(
                    format!("{} ", short_hash(&block.hash, 6)),
                    Style::default().fg(palette.text),
                ),
                Span::styled(
                    format!("{} via {}", format_clock(block.first_seen), block.peer_count),
                    Style::default().fg(palette.muted),
                ),
            ])
        })
        .collect();
    render_list(halves[0], buf, "RECENT BLOCKS", blocks, &palette);

    let transactions: Vec<Line> = feed
        .transactions
        .iter()
        .map(|tx| {
            Line::from(vec![
                Span::styled(
                    format!("{} ", short_hash(&tx.txid, 8)),
                    Style::default().fg(palette.text),
                ),
                Span::styled(
                    format!(
                        "{:>8} ",
                        tx.size.map_or_else(|| "--".to_string(), |s| format!("{s} B"))
                    ),
                    Style::default().fg(palette.accent),
                ),
                Span::styled(format_clock(tx.first_seen), Style::default().fg(palette.muted)),
            ])
        })
        .collect();
    render_list(halves[1], buf, "RECENT TRANSACTIONS", transactions, &palette);

    let footer = match (&feed.last_error, data.mode.mode) {
        (Some(err), _) => format!("Feed unavailable: {err}"),
        (None, NodeMode::Observer | NodeMode::Unknown) => match data.connection.stats.as_ref() {
            Some(stats) => {
                let m = &stats.messages_received;
                format!(
                    "inv {}  tx {}  block {}  headers {}  addr {}  ping {}",
                    format_number(m.inv),
                    format_number(m.tx),
                    format_number(m.block),
                    format_number(m.headers),
                    format_number(m.addr),
                    format_number(m.ping)
                )
            }
            None => "Waiting for observer stats...".to_string(),
        },
        (None, _) => "This node validates; the feed only fills on observer nodes".to_string(),
    };
    buf.set_stringn(
        chunks[1].x + 2,
        chunks[1].y,
        footer,
        chunks[1].width.saturating_sub(4) as usize,
        Style::default().fg(palette.muted),
    );
}

fn render_list(area: Rect, buf: &mut Buffer, title: &str, lines: Vec<Line>, palette: &Palette) {
    let block = Block::default()
        .title(format!(" {title} "))
        .title_style(Style::default().fg(palette.text).bold())
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.muted));
    if lines.is_empty() {
        Paragraph::new(Line::styled("(nothing seen yet)", Style::default().fg(palette.muted)))
            .block(block)
            .render(area, buf);
        return;
    }
    Paragraph::new(lines).block(block).render(area, buf);
}

// ============================================================================
// Logs and overlays
// ============================================================================

fn render_logs_panel(area: Rect, buf: &mut Buffer, data: &TuiState) {
    let palette = data.palette();
    let block = Block::default()
        .title(" Logs ")
        .title_style(Style::default().fg(palette.text))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.muted));
    let inner = block.inner(area);
    block.render(area, buf);

    if data.logs.is_empty() {
        buf.set_string(
            inner.x + 1,
            inner.y,
            "(no logs captured)",
            Style::default().fg(palette.muted),
        );
        return;
    }

    // Newest first.
    for (i, log) in data.logs.iter().rev().take(inner.height as usize).enumerate() {
        let (level_str, level_style) = match log.level {
            LogLevel::Error => ("ERROR", Style::default().fg(Color::Red)),
            LogLevel::Warn => ("WARN ", Style::default().fg(Color::Yellow)),
            LogLevel::Info => ("INFO ", Style::default().fg(Color::Cyan)),
            LogLevel::Debug => ("DEBUG", Style::default().fg(palette.muted)),
        };
        let timestamp = format_unix_timestamp_ms(log.timestamp_ms);
        let prefix_len = timestamp.len() + 1 + 5 + 1;
        let max_msg_len = (inner.width as usize).saturating_sub(prefix_len + 1);
        let truncated: String = log.message.chars().take(max_msg_len).collect();

        let x = inner.x + 1;
        let y = inner.y + i as u16;
        buf.set_string(x, y, &timestamp, Style::default().fg(palette.muted));
        let level_x = x + timestamp.len() as u16 + 1;
        buf.set_string(level_x, y, level_str, level_style);

        // Structured fields after the bar are dimmed.
        let msg_x = level_x + 6;
        if let Some(sep_pos) = truncated.find('\u{2502}') {
            let base = &truncated[..sep_pos];
            buf.set_string(msg_x, y, base, Style::default().fg(palette.text));
            let fields_x = msg_x + base.chars().count() as u16;
            buf.set_string(fields_x, y, &truncated[sep_pos..], Style::default().fg(palette.muted));
        } else {
            buf.set_string(msg_x, y, &truncated, Style::default().fg(palette.text));
        }
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + area.width.saturating_sub(width) / 2,
        y: area.y + area.height.saturating_sub(height) / 2,
        width,
        height,
    }
}

fn render_help_overlay(frame: &mut Frame, area: Rect, palette: &Palette) {
    let bindings = [
        ("Tab / 1-3", "switch view"),
        ("d", "dismiss milestone or message"),
        ("t", "toggle light and dark theme"),
        ("r", "reconnect to the node"),
        ("?", "show or hide this help"),
        ("q / Esc", "quit"),
    ];
    let mut lines = vec![
        Line::styled(
            "Watches a local node over JSON-RPC. Sync progress and sessions are kept between runs.",
            Style::default().fg(palette.text),
        ),
        Line::raw(""),
    ];
    for (key, what) in bindings {
        lines.push(Line::from(vec![
            Span::styled(format!("{key:>10}  "), Style::default().fg(palette.accent).bold()),
            Span::styled(what, Style::default().fg(palette.text)),
        ]));
    }

    let overlay = centered(area, 60, lines.len() as u16 + 4);
    frame.render_widget(Clear, overlay);
    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .style(Style::default().bg(palette.background))
            .block(
                Block::default()
                    .title(" HELP ")
                    .borders(Borders::ALL)
                    .border_type(BorderType::Thick)
                    .border_style(Style::default().fg(palette.accent)),
            ),
        overlay,
    );
}

fn render_milestone_toast(frame: &mut Frame, area: Rect, data: &TuiState, text: &str) {
    let palette = data.palette();
    let mut lines = vec![Line::styled(
        text.to_string(),
        Style::default().fg(palette.accent).bold(),
    )];
    if let Some(milestone) = data.sync.milestone {
        lines.push(Line::styled(
            format!("{} \u{00b7} {}", milestone.category.label(), milestone.date),
            Style::default().fg(palette.muted),
        ));
        lines.push(Line::styled(milestone.description, Style::default().fg(palette.text)));
        if let Some(url) = milestone.url {
            lines.push(Line::styled(url, Style::default().fg(palette.muted).underlined()));
        }
    }
    lines.push(Line::styled("press d to dismiss", Style::default().fg(palette.muted)));
    let width = 64.min(area.width.saturating_sub(4));
    let overlay = Rect {
        x: area.x + area.width.saturating_sub(width) / 2,
        y: area.y + 3,
        width,
        height: (lines.len() as u16 + 4).min(area.height.saturating_sub(3)),
    };
    frame.render_widget(Clear, overlay);
    frame.render_widget(
        Paragraph::new(lines)
            .wrap(Wrap { trim: true })
            .style(Style::default().bg(palette.background))
            .block(
                Block::default()
                    .title(" MILESTONE ")
                    .borders(Borders::ALL)
                    .border_type(BorderType::Thick)
                    .border_style(Style::default().fg(palette.accent)),
            ),
        overlay,
    );
}

fn render_toast(frame: &mut Frame, area: Rect, text: &str, palette: &Palette) {
    let width = (text.chars().count() as u16 + 4).min(area.width);
    let overlay = Rect {
        x: (area.x + area.width).saturating_sub(width + 1),
        y: (area.y + area.height).saturating_sub(4),
        width,
        height: 3.min(area.height),
    };
    frame.render_widget(Clear, overlay);
    frame.render_widget(
        Paragraph::new(Line::styled(text.to_string(), Style::default().fg(palette.text)))
            .style(Style::default().bg(palette.background))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(palette.warn)),
            ),
        overlay,
    );
}

fn chrono_time() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format_clock(secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionStatus;
    use crate::sync::MILESTONES;
    use crate::test_utils::{chain_info, stats};
    use crate::rpc::{ObservedBlock, StatsMode};
    use crate::ui::state::{Theme, Transient};
    use ratatui::backend::TestBackend;
    use std::time::Instant;

    fn render_to_text(state: &TuiState) -> String {
        let mut terminal = Terminal::new(TestBackend::new(120, 40)).expect("terminal");
        terminal
            .draw(|frame| render_ui(frame, state))
            .expect("draw");
        let buffer = terminal.backend().buffer();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer[(x, y)].symbol());
            }
            text.push('\n');
        }
        text
    }

    fn connected_state() -> TuiState {
        let mut state = TuiState::new(Theme::Dark, false, "/tmp/monitor");
        state.connection.status = ConnectionStatus::Connected;
        state.connection.stats = Some(stats(StatsMode::Full, 8, 3_600));
        state.connection.chain_info = Some(chain_info(500_000, 840_000, true));
        state
    }

    #[test]
    fn keys_map_to_actions() {
        let press = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert_eq!(map_key(press(KeyCode::Char('q'))), Some(KeyAction::Quit));
        assert_eq!(map_key(press(KeyCode::Tab)), Some(KeyAction::NextView));
        assert_eq!(
            map_key(press(KeyCode::Char('2'))),
            Some(KeyAction::SelectView(ActiveView::Sync))
        );
        assert_eq!(map_key(press(KeyCode::Char('d'))), Some(KeyAction::Dismiss));
        assert_eq!(map_key(press(KeyCode::Char('t'))), Some(KeyAction::ToggleTheme));
        assert_eq!(map_key(press(KeyCode::Char('r'))), Some(KeyAction::Reconnect));
        assert_eq!(map_key(press(KeyCode::Char('?'))), Some(KeyAction::ToggleHelp));
        assert_eq!(map_key(press(KeyCode::Char('x'))), None);
        assert_eq!(
            map_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)),
            Some(KeyAction::Quit)
        );
    }

    #[test]
    fn overview_shows_connection_and_node() {
        let text = render_to_text(&connected_state());
        assert!(text.contains("NODE MONITOR"));
        assert!(text.contains("CONNECTION"));
        assert!(text.contains("Observing the network through 8 peers"));
        assert!(text.contains("http://127.0.0.1:8332"));
        assert!(text.contains("(no logs captured)"));
    }

    #[test]
    fn sync_view_shows_progress_and_next_milestone() {
        let mut state = connected_state();
        state.view = ActiveView::Sync;
        state.sync.view = Some(SyncView {
            validated_height: 500_000,
            header_height: 840_000,
            network_height: 840_000,
            blocks_remaining: 340_000,
            progress_percent: 59.52,
            blocks_phase: true,
            ibd: true,
            block_rate: Some(25.0),
            eta_seconds: Some(13_600.0),
            ..SyncView::default()
        });
        let text = render_to_text(&state);
        assert!(text.contains("VALIDATING"));
        assert!(text.contains("validated 500,000 of 840,000 blocks"));
        assert!(text.contains("Next: Third Halving at block 630,000 (130,000 to go)"));
        assert!(text.contains("3h 46m"));
    }

    #[test]
    fn sync_view_waits_without_snapshot() {
        let mut state = connected_state();
        state.view = ActiveView::Sync;
        let text = render_to_text(&state);
        assert!(text.contains("Waiting for the first sync snapshot..."));
    }

    #[test]
    fn observer_view_lists_blocks() {
        let mut state = connected_state();
        state.view = ActiveView::Observer;
        state.feed.blocks = vec![ObservedBlock {
            hash: "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054".into(),
            height: Some(840_000),
            first_seen: 3_661,
            peer_count: 5,
        }];
        let text = render_to_text(&state);
        assert!(text.contains("RECENT BLOCKS"));
        assert!(text.contains("840,000"));
        assert!(text.contains("01:01:01 via 5"));
        assert!(text.contains("(nothing seen yet)"));
    }

    #[test]
    fn overlays_render_on_top() {
        let mut state = connected_state();
        state.show_help = true;
        state.sync.milestone = MILESTONES.iter().find(|m| m.height == 210_000);
        state.milestone_toast = Some(Transient::new(
            "First Halving",
            Duration::from_secs(20),
            Instant::now(),
        ));
        state.toast = Some(Transient::new("theme: light", Duration::from_secs(2), Instant::now()));
        let text = render_to_text(&state);
        assert!(text.contains("HELP"));
        assert!(text.contains("MILESTONE"));
        assert!(text.contains("Halving \u{00b7} 2012-11-28"));
        assert!(text.contains("theme: light"));
    }

    #[test]
    fn small_terminals_get_a_notice() {
        let mut terminal = Terminal::new(TestBackend::new(40, 6)).expect("terminal");
        let state = connected_state();
        terminal
            .draw(|frame| render_ui(frame, &state))
            .expect("draw");
        let first_row: String = (0..40)
            .map(|x| terminal.backend().buffer()[(x, 0)].symbol().to_string())
            .collect();
        assert!(first_row.starts_with("Terminal too small"));
    }

    #[test]
    fn minimum_size_renders_every_view() {
        let mut terminal =
            Terminal::new(TestBackend::new(MIN_WIDTH, MIN_HEIGHT)).expect("terminal");
        let mut state = connected_state();
        state.sync.view = Some(SyncView {
            validated_height: 840_000,
            network_height: 840_000,
            synced: true,
            best_block_hash: "00".repeat(32),
            ..SyncView::default()
        });
        for view in ActiveView::ALL {
            state.view = view;
            terminal
                .draw(|frame| render_ui(frame, &state))
                .expect("draw");
        }
    }

    #[test]
    fn peers_are_drawn_as_dots() {
        assert_eq!(peers_visual(0), "\u{2014}");
        assert_eq!(peers_visual(3), "\u{25CF}\u{25CF}\u{25CF} 3");
        assert!(peers_visual(40).ends_with("\u{2026} 40"));
    }
}
