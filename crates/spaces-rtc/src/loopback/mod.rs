//! In-process transport that never touches the network.
//!
//! Joins succeed immediately (or after a configured delay), tracks are
//! plain flags, and every call is recorded so callers can assert on the
//! order of operations. Failures, permission denials, and remote
//! participants are injected by hand.

mod track;
mod transport;

pub use track::LoopbackTrack;
pub use transport::{LoopbackTransport, TransportCall, TransportOp};
