//! Scriptable transport with a call log.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use crate::transport::{
    ConnectionState, LocalTrack, MediaKind, ScreenCaptureOptions, TrackHandle, TrackKind,
    TransportClient, TransportError, TransportEvent, Uid,
};

use super::track::LoopbackTrack;

/// First uid handed out when the joiner does not request one.
const FIRST_ASSIGNED_UID: Uid = 1000;

/// Which transport operation a call or an injected failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportOp {
    Join,
    Leave,
    Publish,
    Unpublish,
    CreateMicrophone,
    CreateScreen,
    Subscribe,
}

/// One recorded call, in invocation order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Join {
        app_id: String,
        channel: String,
        uid: Option<Uid>,
    },
    /// `open_tracks` counts created tracks that were still open when the
    /// leave arrived.
    Leave {
        open_tracks: usize,
    },
    Publish(Vec<String>),
    Unpublish(Vec<String>),
    CreateMicrophone {
        device_id: Option<String>,
    },
    CreateScreen {
        with_audio: bool,
    },
    Subscribe {
        uid: Uid,
        media: MediaKind,
    },
}

impl TransportCall {
    pub fn op(&self) -> TransportOp {
        match self {
            Self::Join { .. } => TransportOp::Join,
            Self::Leave { .. } => TransportOp::Leave,
            Self::Publish(_) => TransportOp::Publish,
            Self::Unpublish(_) => TransportOp::Unpublish,
            Self::CreateMicrophone { .. } => TransportOp::CreateMicrophone,
            Self::CreateScreen { .. } => TransportOp::CreateScreen,
            Self::Subscribe { .. } => TransportOp::Subscribe,
        }
    }
}

#[derive(Debug)]
struct State {
    connection: ConnectionState,
    channel: Option<String>,
    local_uid: Option<Uid>,
    published: Vec<String>,
    calls: Vec<TransportCall>,
    /// One-shot failures, consumed by the next matching call.
    failures: HashSet<TransportOp>,
    /// Track creations refused as a permission denial until allowed again.
    denied: HashSet<TransportOp>,
    next_uid: Uid,
    next_track: u32,
    tracks: Vec<Arc<LoopbackTrack>>,
    join_delay: Duration,
}

impl State {
    fn take_failure(&mut self, op: TransportOp) -> bool {
        self.failures.remove(&op)
    }

    fn next_track_id(&mut self, prefix: &str) -> String {
        self.next_track += 1;
        format!("{prefix}-{}", self.next_track)
    }
}

pub struct LoopbackTransport {
    state: Mutex<State>,
    events: broadcast::Sender<TransportEvent>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            state: Mutex::new(State {
                connection: ConnectionState::Disconnected,
                channel: None,
                local_uid: None,
                published: Vec::new(),
                calls: Vec::new(),
                failures: HashSet::new(),
                denied: HashSet::new(),
                next_uid: FIRST_ASSIGNED_UID,
                next_track: 0,
                tracks: Vec::new(),
                join_delay: Duration::ZERO,
            }),
            events,
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `current`, emitting a state change if it differs.
    fn set_connection(&self, current: ConnectionState, reason: Option<&str>) {
        let previous = {
            let mut state = self.state();
            std::mem::replace(&mut state.connection, current)
        };
        if previous != current {
            debug!(?previous, ?current, ?reason, "loopback connection state");
            let _ = self.events.send(TransportEvent::ConnectionStateChanged {
                previous,
                current,
                reason: reason.map(str::to_string),
            });
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    // -- Inspection ---------------------------------------------------------

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, op: TransportOp) -> usize {
        self.state().calls.iter().filter(|c| c.op() == op).count()
    }

    /// Position of the first call of `op` in the log.
    pub fn first_call(&self, op: TransportOp) -> Option<usize> {
        self.state().calls.iter().position(|c| c.op() == op)
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn channel(&self) -> Option<String> {
        self.state().channel.clone()
    }

    pub fn is_published(&self, track_id: &str) -> bool {
        self.state().published.iter().any(|id| id == track_id)
    }

    pub fn published_count(&self) -> usize {
        self.state().published.len()
    }

    /// Most recently created track of `kind`.
    pub fn last_track(&self, kind: TrackKind) -> Option<Arc<LoopbackTrack>> {
        self.state()
            .tracks
            .iter()
            .rev()
            .find(|t| t.kind() == kind)
            .cloned()
    }

    pub fn tracks(&self) -> Vec<Arc<LoopbackTrack>> {
        self.state().tracks.clone()
    }

    // -- Fault injection ----------------------------------------------------

    /// Fail the next call of `op` with a transport error.
    pub fn fail_next(&self, op: TransportOp) {
        self.state().failures.insert(op);
    }

    /// Refuse track creation for `op` as if the user denied the prompt.
    pub fn deny(&self, op: TransportOp) {
        self.state().denied.insert(op);
    }

    pub fn allow(&self, op: TransportOp) {
        self.state().denied.remove(&op);
    }

    pub fn set_join_delay(&self, delay: Duration) {
        self.state().join_delay = delay;
    }

    // -- Remote activity ----------------------------------------------------

    /// Drop the connection as the network would, without a leave call.
    pub fn simulate_disconnect(&self, reason: &str) {
        {
            let mut state = self.state();
            state.channel = None;
            state.local_uid = None;
            state.published.clear();
        }
        self.set_connection(ConnectionState::Disconnected, Some(reason));
    }

    pub fn simulate_reconnecting(&self) {
        self.set_connection(ConnectionState::Reconnecting, Some("NETWORK_INTERRUPTED"));
    }

    pub fn simulate_reconnected(&self) {
        self.set_connection(ConnectionState::Connected, Some("NETWORK_RECOVERED"));
    }

    pub fn simulate_user_joined(&self, uid: Uid) {
        self.emit(TransportEvent::UserJoined { uid });
    }

    pub fn simulate_user_published(&self, uid: Uid, media: MediaKind) {
        self.emit(TransportEvent::UserPublished { uid, media });
    }

    pub fn simulate_user_unpublished(&self, uid: Uid, media: MediaKind) {
        self.emit(TransportEvent::UserUnpublished { uid, media });
    }

    pub fn simulate_user_left(&self, uid: Uid) {
        self.emit(TransportEvent::UserLeft { uid });
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportClient for LoopbackTransport {
    async fn join(
        &self,
        app_id: &str,
        channel: &str,
        _token: Option<&str>,
        uid: Option<Uid>,
    ) -> Result<Uid, TransportError> {
        let delay = {
            let mut state = self.state();
            state.calls.push(TransportCall::Join {
                app_id: app_id.to_string(),
                channel: channel.to_string(),
                uid,
            });
            if state.take_failure(TransportOp::Join) {
                return Err(TransportError::Join("injected failure".into()));
            }
            if state.channel.is_some() {
                return Err(TransportError::Join("already in a channel".into()));
            }
            state.join_delay
        };

        self.set_connection(ConnectionState::Connecting, None);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let assigned = {
            let mut state = self.state();
            let assigned = uid.unwrap_or_else(|| {
                let next = state.next_uid;
                state.next_uid += 1;
                next
            });
            state.channel = Some(channel.to_string());
            state.local_uid = Some(assigned);
            assigned
        };
        self.set_connection(ConnectionState::Connected, None);
        Ok(assigned)
    }

    async fn leave(&self) -> Result<(), TransportError> {
        {
            let mut state = self.state();
            let open_tracks = state.tracks.iter().filter(|t| !t.is_closed()).count();
            state.calls.push(TransportCall::Leave { open_tracks });
            if state.take_failure(TransportOp::Leave) {
                return Err(TransportError::Leave("injected failure".into()));
            }
            state.channel = None;
            state.local_uid = None;
            state.published.clear();
        }
        self.set_connection(ConnectionState::Disconnected, Some("LEAVE"));
        Ok(())
    }

    async fn publish(&self, tracks: &[TrackHandle]) -> Result<(), TransportError> {
        let mut state = self.state();
        let ids: Vec<String> = tracks.iter().map(|t| t.id().to_string()).collect();
        state.calls.push(TransportCall::Publish(ids.clone()));
        if state.take_failure(TransportOp::Publish) {
            return Err(TransportError::Publish("injected failure".into()));
        }
        if state.connection != ConnectionState::Connected {
            return Err(TransportError::Publish("not connected".into()));
        }
        if let Some(closed) = tracks.iter().find(|t| t.is_closed()) {
            return Err(TransportError::Publish(format!("track {} is closed", closed.id())));
        }
        for id in ids {
            if !state.published.contains(&id) {
                state.published.push(id);
            }
        }
        Ok(())
    }

    async fn unpublish(&self, tracks: &[TrackHandle]) -> Result<(), TransportError> {
        let mut state = self.state();
        let ids: Vec<String> = tracks.iter().map(|t| t.id().to_string()).collect();
        state.calls.push(TransportCall::Unpublish(ids.clone()));
        if state.take_failure(TransportOp::Unpublish) {
            return Err(TransportError::Unpublish("injected failure".into()));
        }
        state.published.retain(|id| !ids.contains(id));
        Ok(())
    }

    async fn create_microphone_track(
        &self,
        device_id: Option<&str>,
    ) -> Result<TrackHandle, TransportError> {
        let mut state = self.state();
        state.calls.push(TransportCall::CreateMicrophone {
            device_id: device_id.map(str::to_string),
        });
        if state.denied.contains(&TransportOp::CreateMicrophone) {
            return Err(TransportError::PermissionDenied(
                "microphone access denied".into(),
            ));
        }
        if state.take_failure(TransportOp::CreateMicrophone) {
            return Err(TransportError::Device("injected failure".into()));
        }
        let id = state.next_track_id("mic");
        let device = Some(device_id.unwrap_or("default").to_string());
        let track = Arc::new(LoopbackTrack::new(id, TrackKind::Microphone, device));
        state.tracks.push(track.clone());
        Ok(track)
    }

    async fn create_screen_tracks(
        &self,
        options: &ScreenCaptureOptions,
    ) -> Result<Vec<TrackHandle>, TransportError> {
        let mut state = self.state();
        state.calls.push(TransportCall::CreateScreen {
            with_audio: options.with_audio,
        });
        if state.denied.contains(&TransportOp::CreateScreen) {
            return Err(TransportError::PermissionDenied(
                "screen capture was not allowed".into(),
            ));
        }
        if state.take_failure(TransportOp::CreateScreen) {
            return Err(TransportError::Device("injected failure".into()));
        }

        let mut handles: Vec<TrackHandle> = Vec::new();
        let id = state.next_track_id("screen");
        let video = Arc::new(LoopbackTrack::new(id, TrackKind::ScreenVideo, None));
        state.tracks.push(video.clone());
        handles.push(video);
        if options.with_audio {
            let id = state.next_track_id("screen-audio");
            let audio = Arc::new(LoopbackTrack::new(id, TrackKind::ScreenAudio, None));
            state.tracks.push(audio.clone());
            handles.push(audio);
        }
        Ok(handles)
    }

    async fn subscribe_remote(&self, uid: Uid, media: MediaKind) -> Result<(), TransportError> {
        let mut state = self.state();
        state.calls.push(TransportCall::Subscribe { uid, media });
        if state.take_failure(TransportOp::Subscribe) {
            return Err(TransportError::Subscribe("injected failure".into()));
        }
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        self.state().connection
    }

    fn events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
