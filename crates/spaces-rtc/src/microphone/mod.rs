//! Local microphone track lifecycle.

mod controller;


pub use controller::MicrophoneTrackController;
