//! Configuration schema types for Spaces.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod rtc;
mod space;
mod system;

pub use rtc::*;
pub use space::*;
pub use system::*;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct SpacesConfig {
    pub rtc: RtcConfig,
    /// Space policies keyed by space id. Spaces not listed use defaults.
    pub spaces: BTreeMap<String, SpacePolicyConfig>,
    pub logging: LoggingConfig,
}

impl SpacesConfig {
    /// Policy for a space, falling back to the default policy.
    pub fn space_policy(&self, space_id: &str) -> SpacePolicyConfig {
        self.spaces.get(space_id).cloned().unwrap_or_default()
    }
}
