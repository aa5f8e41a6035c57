//! Feed connection
//!
//! Owns the WebSocket lifecycle for the odds feed: token acquisition,
//! handshake, heartbeats, in-place and reconnect-based renewal, and
//! reconnection with backoff. Frames are decoded on a worker pool and
//! surfaced as an ordered stream of [`FeedEvent`]s.

mod backoff;
mod client;
mod pool;
mod types;

pub use backoff::{ReconnectConfig, ReconnectPolicy};
pub use client::ConnectionManager;
pub use pool::{DecodePool, FrameOutcome, PoolConfig, RawFrame};
pub use types::{ConnectionConfig, ConnectionError, FeedEvent, FeedHandle};
