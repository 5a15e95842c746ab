//! Core of the Notion task bot: per-user sessions, pacing, caching and access control.
//!
//! This crate is framework-agnostic. Telegram and Notion live behind ports (traits)
//! implemented in adapter crates.

pub mod access;
pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod gateway;
pub mod logging;
pub mod pacer;
pub mod reclaimer;
pub mod reply;
pub mod session;
pub mod tasks;

pub use errors::{Error, Result};
