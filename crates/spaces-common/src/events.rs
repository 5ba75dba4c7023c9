use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Process-wide signals for UI fragments that cannot hold a reference to
/// the session manager (embedded engine callbacks, overlays, status bars).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Event {
    VoiceToggled { enabled: bool },
    ScreenShareToggled { enabled: bool },
    SessionJoined { channel_id: String, uid: u32 },
    SessionLeft { channel_id: String },
    ParticipantJoined { uid: u32 },
    ParticipantLeft { uid: u32 },
    VoicePolicyChanged { space_id: String, voice_disabled: bool },
    Notification(String),
    Shutdown,
    #[serde(other)]
    Unknown,
}

pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: Event) -> usize {
        trace!(?event, "publishing event");
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
