//! File watcher for live config reload.
//!
//! Uses the `notify` crate to watch the config file, coalescing bursts of
//! filesystem events (editors write then rename) into one change signal.

mod config_watcher;


pub use config_watcher::{ConfigWatcher, DEFAULT_DEBOUNCE};
