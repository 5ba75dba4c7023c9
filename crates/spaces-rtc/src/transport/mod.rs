//! Capability interface of the real-time transport SDK.
//!
//! The session manager never moves media itself. It drives a long-lived
//! transport connection through [`TransportClient`] and the local capture
//! handles it hands out ([`LocalTrack`]), and listens to its events.

mod client;
mod types;

pub use client::{LocalTrack, TrackHandle, TransportClient};
pub use types::{
    ConnectionState, MediaKind, ScreenCaptureOptions, TrackKind, TransportError, TransportEvent,
    Uid,
};
