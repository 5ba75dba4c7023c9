//! Per-space policy configuration.

use serde::{Deserialize, Serialize};

/// Policy for one space, keyed by space id under `[spaces.<id>]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpacePolicyConfig {
    /// Space owners can switch voice off entirely.
    pub voice_disabled: bool,
}
