//! Microphone track controller: lazy creation, publish, verified mute,
//! device switching.

use std::sync::Arc;

use spaces_config::schema::RtcConfig;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::{RtcError, RtcResult};
use crate::session::Teardown;
use crate::state::SharedStateBroadcaster;
use crate::transport::{TrackHandle, TransportClient};

#[derive(Default)]
struct MicSlot {
    track: Option<TrackHandle>,
    published: bool,
    /// Whether the user wants to be heard. Only changes after the track
    /// confirmed the new state.
    enabled: bool,
    device_id: Option<String>,
}

impl MicSlot {
    fn open_track(&self) -> Option<TrackHandle> {
        self.track.clone().filter(|t| !t.is_closed())
    }
}

struct Inner {
    transport: Arc<dyn TransportClient>,
    broadcaster: SharedStateBroadcaster,
    gate: watch::Receiver<bool>,
    start_muted: bool,
    slot: Mutex<MicSlot>,
}

#[derive(Clone)]
pub struct MicrophoneTrackController {
    inner: Arc<Inner>,
}

impl MicrophoneTrackController {
    pub fn new(
        transport: Arc<dyn TransportClient>,
        broadcaster: SharedStateBroadcaster,
        gate: watch::Receiver<bool>,
        config: &RtcConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                broadcaster,
                gate,
                start_muted: config.start_muted,
                slot: Mutex::new(MicSlot {
                    device_id: config.microphone.device_id.clone(),
                    ..Default::default()
                }),
            }),
        }
    }

    fn session_open(&self) -> bool {
        *self.inner.gate.borrow()
    }

    /// Start sending audio. Creates the track on first use, which is when
    /// the platform asks for microphone permission.
    ///
    /// Returns the voice state after the call.
    pub async fn enable(&self) -> RtcResult<bool> {
        let mut slot = self.inner.slot.lock().await;
        self.enable_locked(&mut slot).await
    }

    /// Stop sending audio. The track stays published.
    ///
    /// Returns the voice state after the call.
    pub async fn disable(&self) -> RtcResult<bool> {
        let mut slot = self.inner.slot.lock().await;
        self.disable_locked(&mut slot).await
    }

    /// Flip the voice state and return the new one.
    pub async fn toggle(&self) -> RtcResult<bool> {
        let mut slot = self.inner.slot.lock().await;
        if slot.enabled {
            self.disable_locked(&mut slot).await
        } else {
            self.enable_locked(&mut slot).await
        }
    }

    async fn enable_locked(&self, slot: &mut MicSlot) -> RtcResult<bool> {
        let track = match slot.open_track() {
            Some(track) => track,
            None => {
                let track = self.create_track(slot.device_id.as_deref()).await?;
                slot.track = Some(track.clone());
                slot.published = false;
                track
            }
        };

        if self.session_open() && !slot.published {
            self.inner.transport.publish(&[track.clone()]).await?;
            slot.published = true;
            debug!(track = track.id(), "microphone published");
        }

        apply_muted(&track, false).await?;
        slot.enabled = true;
        self.inner.broadcaster.update(|s| s.is_voice_enabled = true);
        info!(track = track.id(), "microphone enabled");
        Ok(true)
    }

    async fn disable_locked(&self, slot: &mut MicSlot) -> RtcResult<bool> {
        if let Some(track) = slot.open_track() {
            apply_muted(&track, true).await?;
            info!(track = track.id(), "microphone disabled");
        }
        slot.enabled = false;
        self.inner.broadcaster.update(|s| s.is_voice_enabled = false);
        Ok(false)
    }

    async fn create_track(&self, device_id: Option<&str>) -> RtcResult<TrackHandle> {
        let track = self
            .inner
            .transport
            .create_microphone_track(device_id)
            .await
            .map_err(|err| {
                warn!(?device_id, %err, "could not create microphone track");
                RtcError::from_capture(err)
            })?;
        info!(track = track.id(), device = ?track.device_id(), "microphone track created");

        if self.inner.start_muted {
            if let Err(err) = apply_muted(&track, true).await {
                track.close();
                return Err(err);
            }
        }
        Ok(track)
    }

    /// Switch to another input device, keeping the voice state.
    ///
    /// The new track is created before the old one is touched, so a failure
    /// leaves the current track in place. Without a track the id is only
    /// remembered for the next creation.
    pub async fn set_device(&self, device_id: &str) -> RtcResult<()> {
        let mut slot = self.inner.slot.lock().await;
        let Some(old) = slot.open_track() else {
            info!(device = device_id, "microphone device selected");
            slot.device_id = Some(device_id.to_string());
            return Ok(());
        };
        if old.device_id().as_deref() == Some(device_id) {
            debug!(device = device_id, "microphone already on device");
            return Ok(());
        }

        let new = self.create_track(Some(device_id)).await?;

        if slot.published {
            if let Err(err) = self.inner.transport.unpublish(&[old.clone()]).await {
                warn!(track = old.id(), %err, "could not unpublish old microphone track");
            }
        }
        old.close();
        slot.track = Some(new.clone());
        slot.published = false;
        slot.device_id = Some(device_id.to_string());
        info!(from = old.id(), to = new.id(), device = device_id, "microphone device switched");

        apply_muted(&new, !slot.enabled).await?;
        if slot.enabled && self.session_open() {
            self.inner.transport.publish(&[new.clone()]).await?;
            slot.published = true;
        }
        Ok(())
    }

    /// Publish a track the user enabled before the session came up.
    pub(crate) async fn on_session_up(&self) -> RtcResult<()> {
        let mut slot = self.inner.slot.lock().await;
        if !slot.enabled || slot.published || !self.session_open() {
            return Ok(());
        }
        let Some(track) = slot.open_track() else {
            return Ok(());
        };
        self.inner.transport.publish(&[track.clone()]).await?;
        slot.published = true;
        info!(track = track.id(), "microphone published after join");
        Ok(())
    }

    /// Drop the track. Graceful teardown unpublishes it first.
    pub(crate) async fn release(&self, mode: Teardown) {
        let mut slot = self.inner.slot.lock().await;
        if let Some(track) = slot.track.take() {
            if slot.published && mode == Teardown::Graceful {
                if let Err(err) = self.inner.transport.unpublish(&[track.clone()]).await {
                    warn!(track = track.id(), %err, "could not unpublish microphone");
                }
            }
            track.close();
            debug!(track = track.id(), ?mode, "microphone released");
        }
        slot.published = false;
        slot.enabled = false;
        self.inner.broadcaster.update(|s| s.is_voice_enabled = false);
    }

    /// Voice state as the track reports it, after unpublishing and dropping
    /// a track that was closed from outside. `None` while another operation
    /// holds the controller.
    pub async fn reconcile(&self) -> Option<bool> {
        let mut slot = self.inner.slot.try_lock().ok()?;
        if let Some(track) = slot.track.clone() {
            if track.is_closed() {
                info!(track = track.id(), "microphone track closed externally");
                if slot.published {
                    if let Err(err) = self.inner.transport.unpublish(&[track.clone()]).await {
                        warn!(track = track.id(), %err, "could not unpublish closed microphone");
                    }
                }
                slot.track = None;
                slot.published = false;
                slot.enabled = false;
            } else {
                let actual = !track.is_muted();
                if actual != slot.enabled {
                    debug!(track = track.id(), actual, "microphone state drifted");
                    slot.enabled = actual;
                }
            }
        }
        Some(slot.enabled)
    }

    /// Current input level, `0.0` without an enabled track.
    pub async fn volume_level(&self) -> f32 {
        let slot = self.inner.slot.lock().await;
        match slot.open_track() {
            Some(track) if slot.enabled => track.volume_level(),
            _ => 0.0,
        }
    }

    pub async fn is_enabled(&self) -> bool {
        self.inner.slot.lock().await.enabled
    }

    pub async fn is_published(&self) -> bool {
        self.inner.slot.lock().await.published
    }

    pub async fn device_id(&self) -> Option<String> {
        self.inner.slot.lock().await.device_id.clone()
    }
}

/// Mute or unmute and confirm the track followed. A track that ignores
/// the soft mute is switched off or on entirely.
async fn apply_muted(track: &TrackHandle, muted: bool) -> RtcResult<()> {
    track.set_muted(muted).await?;
    if track.is_muted() == muted {
        return Ok(());
    }

    debug!(track = track.id(), muted, "soft mute not applied, escalating");
    track.set_enabled(!muted).await?;
    if track.is_muted() == muted {
        return Ok(());
    }

    Err(RtcError::TrackState(format!(
        "track {} is still {} after escalation",
        track.id(),
        if muted { "live" } else { "muted" }
    )))
}
