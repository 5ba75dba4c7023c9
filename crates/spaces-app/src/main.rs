mod cli;
mod demo;

use std::path::PathBuf;

use spaces_common::ConfigError;
use spaces_config::schema::SpacesConfig;
use tokio::sync::watch;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Fallback when neither the config nor the command line names one.
const DEMO_APP_ID: &str = "demoApp";

fn config_path(args: &cli::Args) -> Option<PathBuf> {
    args.config
        .clone()
        .or_else(|| spaces_config::toml_loader::default_config_path().ok())
}

fn load_config(args: &cli::Args) -> Result<SpacesConfig, ConfigError> {
    match &args.config {
        Some(path) => spaces_config::load_config_from(path),
        None => spaces_config::load_config(),
    }
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let args = cli::parse();

    // Load config before logging so its level can apply; report the
    // failure once the subscriber is up.
    let loaded = load_config(&args);
    let file_config = loaded.as_ref().cloned().unwrap_or_default();

    // Initialize logging
    let log_directive = args
        .log_level
        .clone()
        .unwrap_or_else(|| format!("spaces={}", file_config.logging.level.as_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                log_directive
                    .parse()
                    .unwrap_or_else(|_| LevelFilter::INFO.into()),
            ),
        )
        .init();

    tracing::info!("Spaces RTC v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Err(e) = &loaded {
        tracing::warn!("Config load failed, using defaults: {e}");
    }

    // Keep the sender alive for the static case so the policy sees an open channel.
    let (mut config, config_rx, _config_tx) = match (args.watch_config, config_path(&args)) {
        (true, Some(path)) => {
            tracing::info!("Watching config at {}", path.display());
            let (initial, rx) = spaces_config::ReloadManager::start(path).await;
            (initial, rx, None)
        }
        _ => {
            let (tx, rx) = watch::channel(file_config.clone());
            (file_config, rx, Some(tx))
        }
    };

    if let Some(app_id) = &args.app_id {
        config.rtc.app_id = app_id.clone();
    }
    if config.rtc.app_id.is_empty() {
        tracing::info!("No app id configured, using {DEMO_APP_ID}");
        config.rtc.app_id = DEMO_APP_ID.to_string();
    }

    if args.print_config {
        println!("{}", spaces_config::config_to_json(&config));
        return;
    }

    let scenario = demo::Scenario {
        channel: args.channel.clone(),
        uid: args.uid,
    };
    demo::run(&config, config_rx, scenario).await;
    tracing::info!("Shutdown complete");
}
