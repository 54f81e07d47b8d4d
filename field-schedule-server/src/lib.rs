//! The streaming scheduling service.
//!
//! A framed bidirectional stream over TCP (TLS optional): the client
//! authenticates with a bearer token, sends `ScheduledInput` frames and
//! receives `ScheduledOutput` frames in input order, plus status frames
//! for per-input errors and diagnostics. Health checks ride the same
//! transport.

pub mod auth;
pub mod config;
pub mod service;
pub mod usage;

pub use config::{ConfigError, ServerConfig};
pub use service::SchedulerService;
