//! Live config reload manager.
//!
//! Combines the file watcher with config loading so space policies and
//! session settings follow edits to the config file.

mod manager;

#[cfg(test)]
mod tests;

pub use manager::ReloadManager;
