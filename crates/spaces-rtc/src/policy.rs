//! Per-space voice policy.
//!
//! A space owner can switch voice chat off. Joins into such a space are
//! refused up front, and a session already inside it is torn down when
//! the flag flips.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use spaces_config::SpacesConfig;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// A space's voice flag changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyChange {
    pub space_id: String,
    pub voice_disabled: bool,
}

pub trait VoicePolicy: Send + Sync {
    fn voice_disabled(&self, space_id: &str) -> bool;

    /// Stream of flag changes. Consumers that lag re-read the flag on
    /// their next periodic check.
    fn subscribe(&self) -> broadcast::Receiver<PolicyChange>;
}

// ---------------------------------------------------------------------------
// Static policy
// ---------------------------------------------------------------------------

/// Policy held in memory and changed programmatically.
pub struct StaticVoicePolicy {
    flags: Mutex<HashMap<String, bool>>,
    changes: broadcast::Sender<PolicyChange>,
}

impl StaticVoicePolicy {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(32);
        Self {
            flags: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn flags(&self) -> MutexGuard<'_, HashMap<String, bool>> {
        self.flags.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the flag for `space_id`, notifying subscribers if it changed.
    pub fn set_voice_disabled(&self, space_id: &str, disabled: bool) {
        let previous = self.flags().insert(space_id.to_string(), disabled);
        if previous.unwrap_or(false) != disabled {
            info!(space_id, disabled, "voice policy changed");
            let _ = self.changes.send(PolicyChange {
                space_id: space_id.to_string(),
                voice_disabled: disabled,
            });
        }
    }
}

impl Default for StaticVoicePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl VoicePolicy for StaticVoicePolicy {
    fn voice_disabled(&self, space_id: &str) -> bool {
        self.flags().get(space_id).copied().unwrap_or(false)
    }

    fn subscribe(&self) -> broadcast::Receiver<PolicyChange> {
        self.changes.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Config-backed policy
// ---------------------------------------------------------------------------

/// Policy read from the `[spaces]` table of the live configuration.
///
/// Follows config reloads: every new config is diffed against the last
/// one and a [`PolicyChange`] is emitted per space whose flag moved.
pub struct ConfigVoicePolicy {
    config: watch::Receiver<SpacesConfig>,
    changes: broadcast::Sender<PolicyChange>,
    task: JoinHandle<()>,
}

impl ConfigVoicePolicy {
    /// Must be called inside a tokio runtime.
    pub fn new(config: watch::Receiver<SpacesConfig>) -> Self {
        let (changes, _) = broadcast::channel(32);
        let last = config.borrow().clone();
        let task = tokio::spawn(Self::follow(config.clone(), last, changes.clone()));
        Self {
            config,
            changes,
            task,
        }
    }

    async fn follow(
        mut config: watch::Receiver<SpacesConfig>,
        mut last: SpacesConfig,
        changes: broadcast::Sender<PolicyChange>,
    ) {
        while config.changed().await.is_ok() {
            let next = config.borrow_and_update().clone();
            for change in diff_policies(&last, &next) {
                info!(
                    space_id = %change.space_id,
                    disabled = change.voice_disabled,
                    "voice policy changed by config reload"
                );
                let _ = changes.send(change);
            }
            last = next;
        }
        debug!("config channel closed, policy follower exiting");
    }
}

impl Drop for ConfigVoicePolicy {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl VoicePolicy for ConfigVoicePolicy {
    fn voice_disabled(&self, space_id: &str) -> bool {
        self.config.borrow().space_policy(space_id).voice_disabled
    }

    fn subscribe(&self) -> broadcast::Receiver<PolicyChange> {
        self.changes.subscribe()
    }
}

/// Spaces whose effective voice flag differs between two configs.
fn diff_policies(old: &SpacesConfig, new: &SpacesConfig) -> Vec<PolicyChange> {
    let mut ids: Vec<&String> = old.spaces.keys().chain(new.spaces.keys()).collect();
    ids.sort();
    ids.dedup();
    ids.into_iter()
        .filter_map(|id| {
            let before = old.space_policy(id).voice_disabled;
            let after = new.space_policy(id).voice_disabled;
            (before != after).then(|| PolicyChange {
                space_id: id.clone(),
                voice_disabled: after,
            })
        })
        .collect()
}
