//! Core domain + application logic for the Telegram console bridge.
//!
//! This crate is intentionally framework-agnostic. The Telegram Bot API and the
//! server process live behind ports (traits) implemented in adapter crates.

pub mod capture;
pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod poller;
pub mod pool;
pub mod ports;
pub mod promise;
pub mod report;
pub mod runtime;
pub mod state;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
