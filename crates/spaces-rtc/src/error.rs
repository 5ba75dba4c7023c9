//! Error taxonomy for session operations.

use std::time::Duration;

use spaces_common::SpacesError;

use crate::transport::TransportError;

/// A join was refused before contacting the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreconditionError {
    #[error("application id is missing")]
    MissingAppId,

    #[error("channel id is missing")]
    MissingChannel,

    #[error("voice chat is disabled for space {0}")]
    VoiceDisabled(String),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RtcError {
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("not in a voice channel")]
    NotJoined,

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("track state mismatch: {0}")]
    TrackState(String),

    #[error("no active space to join")]
    NoActiveSpace,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RtcError {
    /// Classify a failure from track creation: a refused prompt is a
    /// permission error, anything else a transport error.
    pub(crate) fn from_capture(err: TransportError) -> Self {
        match err {
            TransportError::PermissionDenied(msg) => Self::Permission(msg),
            other => Self::Transport(other),
        }
    }

    /// Whether the failure left the session untouched.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::Precondition(_) | Self::Permission(_) | Self::TrackState(_) | Self::NotJoined
        )
    }
}

impl From<RtcError> for SpacesError {
    fn from(err: RtcError) -> Self {
        match err {
            RtcError::Transport(e) => SpacesError::Transport(e.to_string()),
            other => SpacesError::Session(other.to_string()),
        }
    }
}

pub type RtcResult<T> = Result<T, RtcError>;
