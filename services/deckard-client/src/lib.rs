//! Console client for the Deckard realtime engine.
//!
//! The binary in `bin/deckard.rs` is a thin wrapper: configuration, stdin
//! command parsing and image loading live here so they can be tested.

#[cfg(feature = "native-audio")]
pub mod audio;
pub mod commands;
pub mod config;
pub mod image;
