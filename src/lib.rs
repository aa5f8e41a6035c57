//! steam-watch: live odds feed client with steam detection
//!
//! This library provides the core components for:
//! - Frame decoding with compression sniffing
//! - XML tick parsing
//! - Short-lived token acquisition
//! - WebSocket connection management with session lifecycle tracking
//! - Per-market steam detection over sliding windows
//! - Cooldown-aware alert dispatch
//! - Logging and Prometheus metrics

pub mod alert;
pub mod auth;
pub mod cli;
pub mod config;
pub mod decode;
pub mod feed;
pub mod pipeline;
pub mod queue;
pub mod session;
pub mod steam;
pub mod telemetry;
pub mod ws;
