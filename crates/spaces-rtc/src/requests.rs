//! Request channel for UI fragments that only hold a sender.
//!
//! Embedded views and overlays ask the session manager to join the active
//! space's voice chat or to toggle screen sharing. Requests are served one
//! at a time by the facade's worker, and each carries a one-shot reply.

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{RtcError, RtcResult};

pub type Reply = oneshot::Sender<RtcResult<bool>>;

#[derive(Debug)]
pub enum SessionRequest {
    JoinVoiceChat { reply: Reply },
    ToggleScreenShare { reply: Reply },
}

#[derive(Clone)]
pub struct SessionRequests {
    sender: mpsc::Sender<SessionRequest>,
}

impl SessionRequests {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SessionRequest>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Join the voice chat of the active space.
    pub async fn join_voice_chat(&self) -> RtcResult<bool> {
        self.send(|reply| SessionRequest::JoinVoiceChat { reply })
            .await
    }

    /// Toggle screen sharing. Resolves to the new sharing state.
    pub async fn toggle_screen_share(&self) -> RtcResult<bool> {
        self.send(|reply| SessionRequest::ToggleScreenShare { reply })
            .await
    }

    /// Callback form of [`join_voice_chat`](Self::join_voice_chat).
    pub fn request_join_voice_chat<F>(&self, callback: F)
    where
        F: FnOnce(RtcResult<bool>) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move { callback(this.join_voice_chat().await) });
    }

    /// Callback form of [`toggle_screen_share`](Self::toggle_screen_share).
    pub fn request_toggle_screen_share<F>(&self, callback: F)
    where
        F: FnOnce(RtcResult<bool>) + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move { callback(this.toggle_screen_share().await) });
    }

    async fn send(&self, make: impl FnOnce(Reply) -> SessionRequest) -> RtcResult<bool> {
        let (reply, response) = oneshot::channel();
        let request = make(reply);
        debug!(?request, "queueing session request");
        self.sender
            .send(request)
            .await
            .map_err(|_| RtcError::Internal("session manager is not running".into()))?;
        response
            .await
            .map_err(|_| RtcError::Internal("session request was dropped".into()))?
    }
}
