//! A local track backed by atomics.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::trace;

use crate::transport::{LocalTrack, TrackKind, TransportError};

#[derive(Debug)]
pub struct LoopbackTrack {
    id: String,
    kind: TrackKind,
    device_id: Option<String>,
    muted: AtomicBool,
    enabled: AtomicBool,
    closed: AtomicBool,
    /// When set, `set_muted` reports success without changing anything.
    unresponsive: AtomicBool,
    /// Level stored as `f32` bits.
    level: AtomicU32,
    ended: watch::Sender<bool>,
    close_count: Mutex<u32>,
}

impl LoopbackTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind, device_id: Option<String>) -> Self {
        let (ended, _) = watch::channel(false);
        Self {
            id: id.into(),
            kind,
            device_id,
            muted: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            unresponsive: AtomicBool::new(false),
            level: AtomicU32::new(0f32.to_bits()),
            ended,
            close_count: Mutex::new(0),
        }
    }

    /// Make `set_muted` a silent no-op, like a track whose driver ignores
    /// soft mute.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    /// Change the muted flag behind the controller's back.
    pub fn force_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    pub fn set_level(&self, level: f32) {
        self.level
            .store(level.clamp(0.0, 1.0).to_bits(), Ordering::SeqCst);
    }

    /// Simulate capture ending outside the application.
    pub fn end(&self) {
        self.ended.send_replace(true);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.close_count.lock().map(|c| *c).unwrap_or_default()
    }
}

#[async_trait]
impl LocalTrack for LoopbackTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn device_id(&self) -> Option<String> {
        self.device_id.clone()
    }

    fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst) || !self.enabled.load(Ordering::SeqCst)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn set_muted(&self, muted: bool) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::TrackClosed);
        }
        if self.unresponsive.load(Ordering::SeqCst) {
            trace!(track = %self.id, muted, "ignoring mute request");
            return Ok(());
        }
        self.muted.store(muted, Ordering::SeqCst);
        Ok(())
    }

    async fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::TrackClosed);
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        if enabled {
            self.muted.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(mut count) = self.close_count.lock() {
            *count += 1;
        }
    }

    fn volume_level(&self) -> f32 {
        if self.is_muted() || self.is_closed() {
            return 0.0;
        }
        f32::from_bits(self.level.load(Ordering::SeqCst))
    }

    fn ended(&self) -> watch::Receiver<bool> {
        self.ended.subscribe()
    }
}
