//! Screen share controller: start, stop, and capture ended from outside.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use spaces_config::schema::RtcConfig;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RtcError, RtcResult};
use crate::session::Teardown;
use crate::state::SharedStateBroadcaster;
use crate::transport::{ScreenCaptureOptions, TrackHandle, TrackKind, TransportClient};

#[derive(Default)]
struct ShareSlot {
    /// Video first, then the optional audio track. Empty when idle.
    tracks: Vec<TrackHandle>,
    generation: u64,
    listener: Option<JoinHandle<()>>,
}

struct Inner {
    transport: Arc<dyn TransportClient>,
    broadcaster: SharedStateBroadcaster,
    gate: watch::Receiver<bool>,
    options: ScreenCaptureOptions,
    generation: AtomicU64,
    slot: Mutex<ShareSlot>,
}

#[derive(Clone)]
pub struct ScreenShareController {
    inner: Arc<Inner>,
}

impl ScreenShareController {
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
                options: ScreenCaptureOptions::from(&config.screen_share),
                generation: AtomicU64::new(0),
                slot: Mutex::new(ShareSlot::default()),
            }),
        }
    }

    /// Start sharing. Returns `Ok(true)` once the capture is published.
    ///
    /// Calling this while already sharing stops the current share and
    /// returns `Ok(false)`.
    pub async fn start(&self) -> RtcResult<bool> {
        let mut slot = self.inner.slot.lock().await;
        if !slot.tracks.is_empty() {
            self.teardown_locked(&mut slot, Teardown::Graceful, true)
                .await;
            return Ok(false);
        }
        if !*self.inner.gate.borrow() {
            return Err(RtcError::NotJoined);
        }

        let options = self.inner.options;
        let tracks = self
            .inner
            .transport
            .create_screen_tracks(&options)
            .await
            .map_err(|err| {
                warn!(%err, "could not start screen capture");
                RtcError::from_capture(err)
            })?;

        if let Err(err) = self.inner.transport.publish(&tracks).await {
            warn!(%err, "could not publish screen capture");
            for track in &tracks {
                track.close();
            }
            return Err(err.into());
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let ended = tracks
            .iter()
            .find(|t| t.kind() == TrackKind::ScreenVideo)
            .or_else(|| tracks.first())
            .map(|t| t.ended());
        slot.listener = ended.map(|ended| {
            tokio::spawn(watch_ended(
                Arc::downgrade(&self.inner),
                ended,
                generation,
            ))
        });
        slot.generation = generation;
        slot.tracks = tracks;

        self.inner.broadcaster.update(|s| s.is_screen_sharing = true);
        info!(
            generation,
            tracks = slot.tracks.len(),
            quality = ?options.quality,
            max_width = options.quality.max_width(),
            max_height = options.quality.max_height(),
            max_fps = options.quality.max_fps(),
            "screen share started"
        );
        Ok(true)
    }

    /// Stop sharing. Returns whether a share was running.
    pub async fn stop(&self) -> RtcResult<bool> {
        let mut slot = self.inner.slot.lock().await;
        if slot.tracks.is_empty() {
            return Ok(false);
        }
        self.teardown_locked(&mut slot, Teardown::Graceful, true)
            .await;
        Ok(true)
    }

    pub async fn is_sharing(&self) -> bool {
        !self.inner.slot.lock().await.tracks.is_empty()
    }

    pub(crate) async fn release(&self, mode: Teardown) {
        let mut slot = self.inner.slot.lock().await;
        if !slot.tracks.is_empty() {
            self.teardown_locked(&mut slot, mode, true).await;
        }
    }

    /// Whether a share is live, after cleaning up a capture that was
    /// closed from outside. `None` while another operation holds the
    /// controller.
    pub async fn reconcile(&self) -> Option<bool> {
        let mut slot = self.inner.slot.try_lock().ok()?;
        if slot.tracks.iter().any(|t| t.is_closed()) {
            info!(generation = slot.generation, "screen capture closed externally");
            self.teardown_locked(&mut slot, Teardown::Graceful, true)
                .await;
        }
        Some(!slot.tracks.is_empty())
    }

    /// Cleanup for a capture that ended on its own. Ignored when a newer
    /// share has replaced the one that ended.
    async fn finish(&self, generation: u64) {
        let mut slot = self.inner.slot.lock().await;
        if slot.generation != generation || slot.tracks.is_empty() {
            debug!(generation, current = slot.generation, "ignoring stale end of capture");
            return;
        }
        info!(generation, "screen capture ended by the system");
        self.teardown_locked(&mut slot, Teardown::Graceful, false)
            .await;
    }

    /// Unpublish all capture tracks together, close them, and clear the
    /// mirrored flag. The ended listener is aborted unless it is the
    /// caller.
    async fn teardown_locked(&self, slot: &mut ShareSlot, mode: Teardown, abort_listener: bool) {
        let tracks = std::mem::take(&mut slot.tracks);
        if let Some(listener) = slot.listener.take() {
            if abort_listener {
                listener.abort();
            }
        }

        if mode == Teardown::Graceful && !tracks.is_empty() {
            if let Err(err) = self.inner.transport.unpublish(&tracks).await {
                warn!(%err, "could not unpublish screen capture");
            }
        }
        for track in &tracks {
            track.close();
        }

        self.inner.broadcaster.update(|s| s.is_screen_sharing = false);
        info!(generation = slot.generation, ?mode, "screen share stopped");
    }
}

async fn watch_ended(inner: Weak<Inner>, mut ended: watch::Receiver<bool>, generation: u64) {
    let sender_gone = ended.wait_for(|ended| *ended).await.is_err();
    if sender_gone {
        return;
    }
    let Some(inner) = inner.upgrade() else {
        return;
    };
    ScreenShareController { inner }.finish(generation).await;
}
