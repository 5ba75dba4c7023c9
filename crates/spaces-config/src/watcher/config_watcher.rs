//! Debounced watcher for a single config file.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use spaces_common::ConfigError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

/// Quiet period that must elapse before a change is reported.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches one config file and reports changes after a quiet period.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
}

impl ConfigWatcher {
    /// Create a watcher for the given file. The file may not exist yet;
    /// its creation counts as a change.
    pub fn new(path: PathBuf) -> Result<Self, ConfigError> {
        if path.file_name().is_none() {
            return Err(ConfigError::WatchError(format!(
                "{} does not name a file",
                path.display()
            )));
        }
        if !path.exists() {
            warn!("config file {} does not exist yet, watching for creation", path.display());
        }
        Ok(Self {
            path,
            debounce: DEFAULT_DEBOUNCE,
        })
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run until every receiver of `tx` is gone or the OS watcher stops,
    /// sending `()` once per settled burst of modifications.
    pub async fn watch(&self, tx: broadcast::Sender<()>) -> Result<(), ConfigError> {
        let file_name: OsString = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        // notify reports renames on the directory, so watch the parent.
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (raw_tx, mut raw_rx) = mpsc::channel::<()>(16);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    if event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == Some(file_name.as_os_str()))
                    {
                        let _ = raw_tx.try_send(());
                    }
                }
                Err(e) => error!("config watcher error: {e}"),
            },
            notify::Config::default(),
        )
        .map_err(|e| ConfigError::WatchError(format!("failed to create watcher: {e}")))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ConfigError::WatchError(format!("failed to watch {}: {e}", dir.display()))
            })?;

        info!("watching {} for changes", self.path.display());

        while raw_rx.recv().await.is_some() {
            if !self.settle(&mut raw_rx).await {
                break;
            }
            debug!("config file settled after change");
            if tx.send(()).is_err() {
                info!("no config change listeners left, stopping watcher");
                break;
            }
        }

        drop(watcher);
        Ok(())
    }

    /// Swallow events until `debounce` passes without one. Returns `false`
    /// when the event source closed.
    async fn settle(&self, raw_rx: &mut mpsc::Receiver<()>) -> bool {
        loop {
            match tokio::time::timeout(self.debounce, raw_rx.recv()).await {
                Err(_quiet) => return true,
                Ok(Some(())) => continue,
                Ok(None) => return false,
            }
        }
    }
}
