//! `hostwatch_agent` library crate.
//!
//! The sampling, evaluation and notification pipeline, plus the thin
//! HTTP/WebSocket boundary the binary serves. The binary entrypoint lives
//! in `main.rs`.

pub mod alert_log;
pub mod config;
pub mod containers;
pub mod evaluate;
pub mod gpu;
pub mod hub;
pub mod normalize;
pub mod notify;
pub mod scheduler;
pub mod source;
pub mod state;
pub mod throttle;
pub mod tls;
pub mod types;
pub mod ws;
