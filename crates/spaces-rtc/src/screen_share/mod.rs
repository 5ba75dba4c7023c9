//! Screen capture publishing.

mod controller;


pub use controller::ScreenShareController;
