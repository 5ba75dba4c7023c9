//! Session manager and space policy validation.

use crate::schema::SpacesConfig;

use super::helpers::validate_range;

pub(super) fn validate_timeouts(errors: &mut Vec<String>, config: &SpacesConfig) {
    let rtc = &config.rtc;
    validate_range(errors, "rtc.join_timeout_ms", rtc.join_timeout_ms, 1_000, 60_000);
    validate_range(errors, "rtc.stale_loading_ms", rtc.stale_loading_ms, 1_000, 60_000);
    validate_range(
        errors,
        "rtc.reconcile_interval_ms",
        rtc.reconcile_interval_ms,
        100,
        10_000,
    );
}

pub(super) fn validate_reconnect(errors: &mut Vec<String>, config: &SpacesConfig) {
    let reconnect = &config.rtc.reconnect;
    validate_range(
        errors,
        "rtc.reconnect.base_delay_ms",
        reconnect.base_delay_ms,
        100,
        60_000,
    );
    validate_range(
        errors,
        "rtc.reconnect.max_delay_ms",
        reconnect.max_delay_ms,
        100,
        300_000,
    );
    validate_range(
        errors,
        "rtc.reconnect.max_attempts",
        reconnect.max_attempts,
        1,
        100,
    );
    if reconnect.max_delay_ms < reconnect.base_delay_ms {
        errors.push(format!(
            "rtc.reconnect.max_delay_ms = {} is below base_delay_ms = {}",
            reconnect.max_delay_ms, reconnect.base_delay_ms
        ));
    }
}

pub(super) fn validate_microphone(errors: &mut Vec<String>, config: &SpacesConfig) {
    if let Some(device) = &config.rtc.microphone.device_id {
        if device.trim().is_empty() {
            errors.push("rtc.microphone.device_id must not be blank when set".into());
        }
    }
}

pub(super) fn validate_spaces(errors: &mut Vec<String>, config: &SpacesConfig) {
    for space_id in config.spaces.keys() {
        if space_id.trim().is_empty() {
            errors.push("spaces: space id must not be blank".into());
        }
    }
}
