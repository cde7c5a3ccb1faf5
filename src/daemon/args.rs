use std::path::PathBuf;

use clap::Parser;
use tracing::level_filters::LevelFilter;

#[derive(Parser, Debug, Default)]
pub struct DaemonArgs {
    /// Run in the foreground instead of detaching.
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// This option is for debugging purposes only.
    #[arg(long = "log-console")]
    pub log_console: bool,
    #[arg(long = "log-filter")]
    pub log: Option<LevelFilter>,
    /// Overrides `tick_period_ms` from config.toml.
    #[arg(long = "tick-period-ms")]
    pub tick_period_ms: Option<u64>,
    /// Overrides `port` from config.toml. 0 picks a free port.
    #[arg(long)]
    pub port: Option<u16>,
}
