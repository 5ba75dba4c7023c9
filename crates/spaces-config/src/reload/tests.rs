//! Tests for the reload manager.

use super::*;
use std::path::PathBuf;

#[tokio::test]
async fn start_with_nonexistent_path_uses_defaults() {
    let path = PathBuf::from("/tmp/nonexistent_spaces_reload_test.toml");
    let (config, rx) = ReloadManager::start(path).await;
    assert!(config.rtc.app_id.is_empty());
    assert_eq!(rx.borrow().rtc.join_timeout_ms, 10_000);
}

#[tokio::test]
async fn start_with_valid_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[rtc]
app_id = "demoApp"

[spaces.space42]
voice_disabled = true
"#,
    )
    .unwrap();

    let (config, rx) = ReloadManager::start(path).await;
    assert_eq!(config.rtc.app_id, "demoApp");
    assert!(config.space_policy("space42").voice_disabled);
    assert!(rx.borrow().space_policy("space42").voice_disabled);
}

#[tokio::test]
async fn start_with_invalid_config_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
[rtc]
app_id = "demoApp"
reconcile_interval_ms = 0
join_timeout_ms = 0
"#,
    )
    .unwrap();

    let (config, rx) = ReloadManager::start(path).await;
    assert!(config.rtc.app_id.is_empty());
    assert_eq!(config.rtc.reconcile_interval_ms, 1_000);
    assert_eq!(rx.borrow().rtc.join_timeout_ms, 10_000);
}
