//! Connection session lifecycle
//!
//! Tracks each connection through INIT, AUTH, ACTIVE, RENEW and EVICT with a
//! continuously recomputed tension score that forecasts eviction, and
//! persists snapshots to an external key-value store.

mod lifecycle;
mod store;
mod types;

pub use lifecycle::{RenewalMode, SessionLifecycle};
pub use store::{MemorySessionStore, SessionStore, StoreError};
pub use types::{EvictReason, Phase, SessionConfig, SessionState, TransitionError};
