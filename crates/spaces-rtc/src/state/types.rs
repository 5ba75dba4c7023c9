use serde::Serialize;

use crate::transport::{ConnectionState, Uid};

/// Someone else in the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteParticipant {
    pub uid: Uid,
    pub has_audio: bool,
    pub has_video: bool,
    pub is_speaking: bool,
}

impl RemoteParticipant {
    pub fn new(uid: Uid) -> Self {
        Self {
            uid,
            has_audio: false,
            has_video: false,
            is_speaking: false,
        }
    }
}

/// Snapshot of the session as the UI sees it.
///
/// Derived from the controllers and eventually consistent with the
/// transport. `is_joined` always equals `connection_state == Connected`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub connection_state: ConnectionState,
    pub is_joined: bool,
    pub is_voice_enabled: bool,
    pub is_screen_sharing: bool,
    pub is_loading: bool,
    pub channel_id: Option<String>,
    pub local_uid: Option<Uid>,
    /// Sorted by uid.
    pub participants: Vec<RemoteParticipant>,
    /// Last user-facing failure, cleared by the next successful join.
    pub error: Option<String>,
}

impl SessionState {
    pub fn participant(&self, uid: Uid) -> Option<&RemoteParticipant> {
        self.participants.iter().find(|p| p.uid == uid)
    }

    /// Insert or fetch the participant entry for `uid`.
    pub fn participant_mut(&mut self, uid: Uid) -> &mut RemoteParticipant {
        let idx = match self.participants.binary_search_by_key(&uid, |p| p.uid) {
            Ok(idx) => idx,
            Err(idx) => {
                self.participants.insert(idx, RemoteParticipant::new(uid));
                idx
            }
        };
        &mut self.participants[idx]
    }

    pub fn remove_participant(&mut self, uid: Uid) -> bool {
        let before = self.participants.len();
        self.participants.retain(|p| p.uid != uid);
        self.participants.len() != before
    }
}

/// What the controllers actually hold, fed to reconciliation. `None`
/// means "unknown right now" and leaves the mirrored value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservedState {
    pub connection_state: Option<ConnectionState>,
    pub voice_enabled: Option<bool>,
    pub screen_sharing: Option<bool>,
}
