//! The observable session state and its broadcaster.

mod broadcaster;
mod types;

#[cfg(test)]
mod tests;

pub use broadcaster::{SharedStateBroadcaster, Subscription};
pub use types::{ObservedState, RemoteParticipant, SessionState};
