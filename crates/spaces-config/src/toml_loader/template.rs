//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> &'static str {
    r##"# Spaces Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[rtc]
# app_id = ""                  # transport application id; joins fail while empty
# join_timeout_ms = 10000      # 1000-60000
# stale_loading_ms = 5000      # 1000-60000
# reconcile_interval_ms = 1000 # 100-10000
# start_muted = true

[rtc.microphone]
# device_id = "default"

[rtc.screen_share]
# quality = "medium"           # low, medium, high, ultra
# with_audio = false

[rtc.reconnect]
# enabled = false
# base_delay_ms = 1000         # 100-60000
# max_delay_ms = 30000         # 100-300000
# max_attempts = 5             # 1-100
# jitter = true

# Per-space policy, keyed by space id:
# [spaces.space42]
# voice_disabled = true

[logging]
# level = "info"               # trace, debug, info, warn, error
"##
}
