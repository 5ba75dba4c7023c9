//! Full configuration validation.
//!
//! Validates numeric ranges and cross-field constraints. Each domain has
//! its own submodule; this orchestrator calls them all and collects errors
//! into a single `ConfigError`.

mod helpers;
mod rtc;

#[cfg(test)]
mod tests;

use crate::schema::SpacesConfig;
use spaces_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &SpacesConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    rtc::validate_timeouts(&mut errors, config);
    rtc::validate_reconnect(&mut errors, config);
    rtc::validate_microphone(&mut errors, config);
    rtc::validate_spaces(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
