//! discord-tunes-rs library crate
//!
//! This module exposes internal types for integration testing.
//! The main binary is in main.rs.

#[macro_use]
extern crate log;

pub mod buffer;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod fetcher;
pub mod playback;
pub mod resolver;
pub mod scheduler;
pub mod session;
pub mod sources;
pub mod transport;
pub mod voice_queue;

#[cfg(feature = "discord")]
pub mod discord;

#[cfg(test)]
mod transport_tests;
