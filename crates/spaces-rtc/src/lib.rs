//! Real-time voice and screen-share session manager for Spaces.
//!
//! One [`SessionFacade`] per process owns the membership in a voice
//! channel, the local microphone and screen capture tracks, and the
//! [`SessionState`] mirror the UI reads. The transport SDK is reached only
//! through [`TransportClient`]; [`LoopbackTransport`] runs everything
//! in-process.

pub mod error;
pub mod facade;
pub mod loopback;
pub mod microphone;
pub mod policy;
pub mod requests;
pub mod screen_share;
pub mod session;
pub mod state;
pub mod transport;

pub use error::{PreconditionError, RtcError, RtcResult};
pub use facade::SessionFacade;
pub use loopback::{LoopbackTrack, LoopbackTransport, TransportCall, TransportOp};
pub use microphone::MicrophoneTrackController;
pub use policy::{ConfigVoicePolicy, PolicyChange, StaticVoicePolicy, VoicePolicy};
pub use requests::{SessionRequest, SessionRequests};
pub use screen_share::ScreenShareController;
pub use session::{ConnectionSessionController, JoinRequest, Session, Teardown};
pub use state::{
    ObservedState, RemoteParticipant, SessionState, SharedStateBroadcaster, Subscription,
};
pub use transport::{
    ConnectionState, LocalTrack, MediaKind, ScreenCaptureOptions, TrackHandle, TrackKind,
    TransportClient, TransportError, TransportEvent, Uid,
};
