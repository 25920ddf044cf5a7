//! Core domain + application logic for the otpcast relay.
//!
//! This crate is intentionally transport-agnostic. The campaign API and the
//! Telegram Bot API live behind ports (traits) implemented in adapter crates.

pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod poller;
pub mod ports;
pub mod registry;
pub mod session;
pub mod settings;
pub mod store;

pub use errors::{Error, Result};
