#![forbid(unsafe_code)]

//! Session lifecycle and termination coordination for timed, one-shot
//! interview sessions.

pub mod beacon;
pub mod config;
pub mod errors;
pub mod http;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod sequencer;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
