//! Session types

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Connection session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Connect attempt in progress
    Init,
    /// Upgrade accepted, waiting for the first heartbeat/ack
    Auth,
    /// Streaming
    Active,
    /// Renewing credentials
    Renew,
    /// Terminal
    Evict,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::Auth => "AUTH",
            Phase::Active => "ACTIVE",
            Phase::Renew => "RENEW",
            Phase::Evict => "EVICT",
        }
    }

    /// Whether `self -> to` is a legal in-session transition
    pub fn can_transition_to(&self, to: Phase) -> bool {
        matches!(
            (self, to),
            (Phase::Init, Phase::Auth)
                | (Phase::Auth, Phase::Active)
                | (Phase::Active, Phase::Renew)
                | (Phase::Renew, Phase::Active)
                | (Phase::Init, Phase::Evict)
                | (Phase::Auth, Phase::Evict)
                | (Phase::Active, Phase::Evict)
                | (Phase::Renew, Phase::Evict)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Illegal phase transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal session transition {from} -> {to}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictReason {
    /// Remote closed the socket
    RemoteClose,
    /// No inbound traffic within the liveness timeout
    LivenessTimeout,
    /// Read or send failure
    Transport(String),
    /// Token acquisition or handshake rejected
    AuthFailure(String),
    /// Unexpected message or illegal transition
    ProtocolViolation(String),
    /// Replaced by a fresh connection during renewal
    Renewal,
    /// Local shutdown
    Shutdown,
}

impl fmt::Display for EvictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictReason::RemoteClose => f.write_str("remote close"),
            EvictReason::LivenessTimeout => f.write_str("liveness timeout"),
            EvictReason::Transport(e) => write!(f, "transport: {e}"),
            EvictReason::AuthFailure(e) => write!(f, "auth failure: {e}"),
            EvictReason::ProtocolViolation(e) => write!(f, "protocol violation: {e}"),
            EvictReason::Renewal => f.write_str("renewal"),
            EvictReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Snapshot of one connection's session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Uuid,
    pub phase: Phase,
    /// Expiry of the installed token, if any
    pub auth_expiry: Option<DateTime<Utc>>,
    /// Lifetime of the installed token in milliseconds
    pub token_ttl_ms: i64,
    pub last_activity_at: DateTime<Utc>,
    /// Eviction forecast in [0, 1]
    pub tension_score: f64,
    pub evict_reason: Option<EvictReason>,
    pub created_at: DateTime<Utc>,
}

impl SessionState {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            phase: Phase::Init,
            auth_expiry: None,
            token_ttl_ms: 0,
            last_activity_at: now,
            tension_score: 0.0,
            evict_reason: None,
            created_at: now,
        }
    }

    pub fn token_ttl(&self) -> ChronoDuration {
        ChronoDuration::milliseconds(self.token_ttl_ms)
    }

    pub fn is_evicted(&self) -> bool {
        self.phase == Phase::Evict
    }
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inbound silence after which activity pressure reaches 1.0
    pub liveness_timeout: Duration,
    /// Tension at which ACTIVE moves to RENEW
    pub high_water_mark: f64,
    /// TTL of persisted session records
    pub store_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            liveness_timeout: Duration::from_secs(30),
            high_water_mark: 0.7,
            store_ttl: Duration::from_secs(300),
        }
    }
}
