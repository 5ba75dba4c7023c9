//! Channel membership: join, leave, and the connection state machine.

mod controller;
mod reconnect;
mod types;


pub use controller::ConnectionSessionController;
pub use types::{JoinRequest, Session, Teardown};
