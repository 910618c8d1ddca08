mod cli;
mod connection;
mod history;
mod logging;
mod mode;
mod poll;
mod reference;
mod rpc;
mod run;
mod storage;
mod sync;
#[cfg(test)]
mod test_utils;
mod ui;

use cli::MonitorConfig;
use eyre::Result;
use std::io::IsTerminal;

#[tokio::main]
async fn main() -> Result<()> {
    let config = MonitorConfig::from_args();

    let wants_dashboard = config.command.is_none() && !config.no_tui;
    let tui_mode = wants_dashboard && std::io::stdout().is_terminal();
    if wants_dashboard && !tui_mode {
        ui::print_warning("stdout is not a terminal, running headless");
    }

    let guards = logging::init_tracing(&config, tui_mode);
    let result = run::run(&config, &guards).await;
    guards.finish();
    result
}
