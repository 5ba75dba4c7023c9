//! Tests for the full validation pipeline.

use super::*;
use crate::schema::*;

#[test]
fn default_config_validates() {
    let config = SpacesConfig::default();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_join_timeout_too_small() {
    let mut config = SpacesConfig::default();
    config.rtc.join_timeout_ms = 10;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("rtc.join_timeout_ms"));
}

#[test]
fn catches_reconcile_interval_too_large() {
    let mut config = SpacesConfig::default();
    config.rtc.reconcile_interval_ms = 60_000;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("rtc.reconcile_interval_ms"));
}

#[test]
fn catches_inverted_backoff_bounds() {
    let mut config = SpacesConfig::default();
    config.rtc.reconnect.base_delay_ms = 5_000;
    config.rtc.reconnect.max_delay_ms = 1_000;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("below base_delay_ms"));
}

#[test]
fn catches_zero_reconnect_attempts() {
    let mut config = SpacesConfig::default();
    config.rtc.reconnect.max_attempts = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("rtc.reconnect.max_attempts"));
}

#[test]
fn catches_blank_device_id() {
    let mut config = SpacesConfig::default();
    config.rtc.microphone.device_id = Some("  ".into());
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("rtc.microphone.device_id"));
}

#[test]
fn catches_blank_space_id() {
    let mut config = SpacesConfig::default();
    config.spaces.insert(" ".into(), SpacePolicyConfig::default());
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("space id"));
}

#[test]
fn collects_all_errors() {
    let mut config = SpacesConfig::default();
    config.rtc.join_timeout_ms = 0;
    config.rtc.stale_loading_ms = 0;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("rtc.join_timeout_ms"));
    assert!(err.contains("rtc.stale_loading_ms"));
    assert!(err.contains("; "));
}
