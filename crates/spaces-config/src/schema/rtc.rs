//! Real-time session configuration: timeouts, microphone, screen share,
//! and reconnection policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtcConfig {
    /// Transport application identifier. Joins are refused while empty.
    pub app_id: String,
    /// How long a caller waits for an in-flight join (valid range: 1000-60000).
    pub join_timeout_ms: u32,
    /// After this long a loading indicator is cleared even if the
    /// operation never reported back (valid range: 1000-60000).
    pub stale_loading_ms: u32,
    /// Drift-correction interval (valid range: 100-10000).
    pub reconcile_interval_ms: u32,
    /// Whether a freshly created microphone track starts muted.
    pub start_muted: bool,
    pub microphone: MicrophoneConfig,
    pub screen_share: ScreenShareConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            join_timeout_ms: 10_000,
            stale_loading_ms: 5_000,
            reconcile_interval_ms: 1_000,
            start_muted: true,
            microphone: MicrophoneConfig::default(),
            screen_share: ScreenShareConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl RtcConfig {
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.join_timeout_ms))
    }

    pub fn stale_loading(&self) -> Duration {
        Duration::from_millis(u64::from(self.stale_loading_ms))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.reconcile_interval_ms))
    }
}

/// Microphone capture settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MicrophoneConfig {
    /// Preferred input device. `None` uses the platform default.
    pub device_id: Option<String>,
}

/// Quality preset for screen sharing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareQuality {
    /// 720p, 10fps, low bandwidth.
    Low,
    /// 1080p, 15fps.
    #[default]
    Medium,
    /// 1080p, 30fps.
    High,
    /// Native resolution, 30fps.
    Ultra,
}

impl ShareQuality {
    pub fn max_width(&self) -> u32 {
        match self {
            Self::Low => 1280,
            Self::Medium | Self::High => 1920,
            Self::Ultra => 3840,
        }
    }

    pub fn max_height(&self) -> u32 {
        match self {
            Self::Low => 720,
            Self::Medium | Self::High => 1080,
            Self::Ultra => 2160,
        }
    }

    pub fn max_fps(&self) -> u32 {
        match self {
            Self::Low => 10,
            Self::Medium => 15,
            Self::High | Self::Ultra => 30,
        }
    }
}

/// Screen capture settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenShareConfig {
    pub quality: ShareQuality,
    /// Capture system audio alongside the video track.
    pub with_audio: bool,
}

impl Default for ScreenShareConfig {
    fn default() -> Self {
        Self {
            quality: ShareQuality::Medium,
            with_audio: false,
        }
    }
}

/// What to do after the transport drops a connected session on its own.
///
/// Disabled by default: the session state is mirrored as disconnected and
/// the user rejoins explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// First retry delay (valid range: 100-60000).
    pub base_delay_ms: u32,
    /// Backoff cap (valid range: 100-300000, not below `base_delay_ms`).
    pub max_delay_ms: u32,
    /// Give up after this many failed rejoins (valid range: 1-100).
    pub max_attempts: u32,
    /// Randomize each delay by up to 25%.
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            jitter: true,
        }
    }
}

impl ReconnectConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.base_delay_ms))
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.max_delay_ms))
    }
}
