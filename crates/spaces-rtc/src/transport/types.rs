//! Value types exchanged with the transport.

use serde::{Deserialize, Serialize};
use spaces_config::schema::{ScreenShareConfig, ShareQuality};

/// Participant id inside a channel, assigned by the transport when the
/// joiner does not ask for one.
pub type Uid = u32;

/// Connection lifecycle of the shared transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// What a local capture track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Microphone,
    ScreenVideo,
    ScreenAudio,
}

impl TrackKind {
    pub fn media(&self) -> MediaKind {
        match self {
            Self::Microphone | Self::ScreenAudio => MediaKind::Audio,
            Self::ScreenVideo => MediaKind::Video,
        }
    }
}

/// Parameters for a screen capture request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenCaptureOptions {
    pub quality: ShareQuality,
    /// Also capture system audio, producing a paired audio track.
    pub with_audio: bool,
}

impl From<&ScreenShareConfig> for ScreenCaptureOptions {
    fn from(config: &ScreenShareConfig) -> Self {
        Self {
            quality: config.quality,
            with_audio: config.with_audio,
        }
    }
}

/// Events emitted by the transport, whoever caused them.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ConnectionStateChanged {
        previous: ConnectionState,
        current: ConnectionState,
        reason: Option<String>,
    },
    UserJoined {
        uid: Uid,
    },
    UserLeft {
        uid: Uid,
    },
    UserPublished {
        uid: Uid,
        media: MediaKind,
    },
    UserUnpublished {
        uid: Uid,
        media: MediaKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("join failed: {0}")]
    Join(String),

    #[error("leave failed: {0}")]
    Leave(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("unpublish failed: {0}")]
    Unpublish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("track is closed")]
    TrackClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_kind_media() {
        assert_eq!(TrackKind::Microphone.media(), MediaKind::Audio);
        assert_eq!(TrackKind::ScreenAudio.media(), MediaKind::Audio);
        assert_eq!(TrackKind::ScreenVideo.media(), MediaKind::Video);
    }

    #[test]
    fn capture_options_follow_config() {
        let config = ScreenShareConfig {
            quality: ShareQuality::High,
            with_audio: true,
        };
        let options = ScreenCaptureOptions::from(&config);
        assert_eq!(options.quality, ShareQuality::High);
        assert!(options.with_audio);
    }

    #[test]
    fn connection_state_serializes_upper_case() {
        let json = serde_json::to_string(&ConnectionState::Reconnecting).unwrap();
        assert_eq!(json, "\"RECONNECTING\"");
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }
}
