//! Reload loop: file change signal in, validated config out.

use crate::schema::SpacesConfig;
use crate::toml_loader;
use crate::validation;
use crate::watcher::ConfigWatcher;
use spaces_common::ConfigError;
use std::path::PathBuf;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

/// Publishes the current config on a [`tokio::sync::watch`] channel and
/// replaces it whenever the file changes and still validates.
pub struct ReloadManager {
    config_path: PathBuf,
}

impl ReloadManager {
    /// Load the initial config and spawn the watch loop.
    ///
    /// A missing, unreadable, or invalid file yields the defaults; the loop
    /// keeps watching so a later fix is picked up. A reload that fails to
    /// parse or validate is logged and the previous config stays current.
    pub async fn start(config_path: PathBuf) -> (SpacesConfig, watch::Receiver<SpacesConfig>) {
        let manager = ReloadManager { config_path };
        let initial = match manager.reload() {
            Ok(config) => config,
            Err(e) => {
                warn!("failed to load config: {e}, using defaults");
                SpacesConfig::default()
            }
        };

        let (config_tx, config_rx) = watch::channel(initial.clone());
        tokio::spawn(async move {
            manager.run(config_tx).await;
        });

        (initial, config_rx)
    }

    async fn run(&self, config_tx: watch::Sender<SpacesConfig>) {
        let watcher = match ConfigWatcher::new(self.config_path.clone()) {
            Ok(w) => w,
            Err(e) => {
                error!("failed to create config watcher: {e}");
                return;
            }
        };

        let (change_tx, mut change_rx) = broadcast::channel::<()>(16);
        tokio::spawn(async move {
            if let Err(e) = watcher.watch(change_tx).await {
                error!("config watcher error: {e}");
            }
        });

        loop {
            match change_rx.recv().await {
                Ok(()) => match self.reload() {
                    Ok(config) => {
                        info!(
                            spaces = config.spaces.len(),
                            "reloaded config from {}",
                            self.config_path.display()
                        );
                        if config_tx.send(config).is_err() {
                            info!("all config receivers dropped, stopping reload manager");
                            break;
                        }
                    }
                    Err(e) => warn!("config reload rejected: {e}"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("config watcher lagged by {n} signals");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("config watcher stopped");
                    break;
                }
            }
        }
    }

    fn reload(&self) -> Result<SpacesConfig, ConfigError> {
        let config = toml_loader::load_from_path(&self.config_path)?;
        validation::validate(&config)?;
        Ok(config)
    }
}
