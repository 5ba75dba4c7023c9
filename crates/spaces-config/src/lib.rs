//! Spaces configuration system.
//!
//! Provides TOML-based configuration for the real-time session manager,
//! per-space voice policy, and logging, with live reload and validation.
//! All config sections use defaults so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use spaces_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! let json = config_to_json(&config);
//! println!("{json}");
//! ```

pub mod reload;
pub mod schema;
pub mod toml_loader;
pub mod validation;
pub mod watcher;

pub use reload::ReloadManager;
pub use schema::{SpacesConfig, CONFIG_SCHEMA_VERSION};
pub use watcher::ConfigWatcher;

use spaces_common::ConfigError;
use std::path::Path;

/// Load config from the platform default path and validate it.
///
/// Creates a commented default file if none exists.
pub fn load_config() -> Result<SpacesConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Load and validate config from an explicit path.
pub fn load_config_from(path: &Path) -> Result<SpacesConfig, ConfigError> {
    let config = toml_loader::load_from_path(path)?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &SpacesConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_to_json_contains_all_sections() {
        let json = config_to_json(&SpacesConfig::default());
        assert!(json.contains("\"rtc\""));
        assert!(json.contains("\"screen_share\""));
        assert!(json.contains("\"reconnect\""));
        assert!(json.contains("\"spaces\""));
        assert!(json.contains("\"logging\""));
    }

    #[test]
    fn config_schema_version_is_1() {
        assert_eq!(CONFIG_SCHEMA_VERSION, 1);
    }

    #[test]
    fn load_config_from_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[rtc]\njoin_timeout_ms = 1\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let json = config_to_json(&SpacesConfig::default());
        let parsed: SpacesConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.rtc.join_timeout_ms, 10_000);
        assert_eq!(parsed.rtc.screen_share.quality, schema::ShareQuality::Medium);
    }
}
