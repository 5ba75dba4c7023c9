//! The transport and track capability traits.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use super::types::{
    ConnectionState, MediaKind, ScreenCaptureOptions, TrackKind, TransportError, TransportEvent,
    Uid,
};

/// A local capture handle (microphone or screen).
#[async_trait]
pub trait LocalTrack: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    fn kind(&self) -> TrackKind;

    /// Input device the track is bound to, if the platform reports one.
    fn device_id(&self) -> Option<String>;

    /// Whether the track is currently not sending audio or video.
    fn is_muted(&self) -> bool;

    fn is_closed(&self) -> bool;

    async fn set_muted(&self, muted: bool) -> Result<(), TransportError>;

    /// Lower-level switch than [`set_muted`](Self::set_muted): stops or
    /// restarts capture entirely.
    async fn set_enabled(&self, enabled: bool) -> Result<(), TransportError>;

    /// Release the capture device. Idempotent.
    fn close(&self);

    /// Instantaneous input level in `[0.0, 1.0]`.
    fn volume_level(&self) -> f32;

    /// Flips to `true` when capture ends outside our control, e.g. the
    /// operating system's "stop sharing" button.
    fn ended(&self) -> watch::Receiver<bool>;
}

pub type TrackHandle = Arc<dyn LocalTrack>;

/// The shared connection to the real-time transport.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Join `channel`. Returns the uid the transport assigned.
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        token: Option<&str>,
        uid: Option<Uid>,
    ) -> Result<Uid, TransportError>;

    async fn leave(&self) -> Result<(), TransportError>;

    async fn publish(&self, tracks: &[TrackHandle]) -> Result<(), TransportError>;

    async fn unpublish(&self, tracks: &[TrackHandle]) -> Result<(), TransportError>;

    /// Creating a microphone track is what triggers the platform's
    /// permission prompt.
    async fn create_microphone_track(
        &self,
        device_id: Option<&str>,
    ) -> Result<TrackHandle, TransportError>;

    /// Returns the video track first, followed by the audio track when
    /// `options.with_audio` is set and the platform provided one.
    async fn create_screen_tracks(
        &self,
        options: &ScreenCaptureOptions,
    ) -> Result<Vec<TrackHandle>, TransportError>;

    /// Start receiving a remote participant's media.
    async fn subscribe_remote(&self, uid: Uid, media: MediaKind) -> Result<(), TransportError>;

    fn connection_state(&self) -> ConnectionState;

    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}
