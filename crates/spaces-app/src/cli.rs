use std::path::PathBuf;

use clap::Parser;

/// Spaces voice session runner: joins a channel over the in-process
/// transport and prints the session state as it changes.
#[derive(Parser, Debug)]
#[command(name = "spaces-rtc", version, about)]
pub struct Args {
    /// Config file path override.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Channel (space id) to join.
    #[arg(short = 'c', long, default_value = "space42")]
    pub channel: String,

    /// Application id override; falls back to `[rtc] app_id`.
    #[arg(long)]
    pub app_id: Option<String>,

    /// Uid to request from the transport.
    #[arg(short = 'u', long)]
    pub uid: Option<u32>,

    /// Reload the config file while running and apply space policy changes.
    #[arg(long)]
    pub watch_config: bool,

    /// Print the effective config as JSON and exit.
    #[arg(long)]
    pub print_config: bool,
}

pub fn parse() -> Args {
    Args::parse()
}
