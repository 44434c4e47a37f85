//! Library crate for portwatch-rs: TCP burst testing and per-session reachability monitors.
pub mod burst;
pub mod commands;
pub mod config;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod scan;
pub mod server;
pub mod types;
