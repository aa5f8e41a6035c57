//! Connection types and configuration

use super::backoff::ReconnectConfig;
use super::pool::PoolConfig;
use crate::auth::AuthError;
use crate::feed::Tick;
use crate::session::{EvictReason, SessionConfig, SessionState, TransitionError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Feed connection configuration
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket endpoint, e.g. `wss://odds.example.com/ws`
    pub url: String,
    /// Query parameter carrying the token
    pub token_param: String,
    /// Subprotocols offered during the handshake
    pub subprotocols: Vec<String>,
    /// Interval for sending ping frames
    pub ping_interval: Duration,
    /// Inbound silence that forces a reconnect
    pub liveness_timeout: Duration,
    /// Interval for tension recomputation
    pub tension_interval: Duration,
    /// Backoff for transport failures
    pub backoff: ReconnectConfig,
    /// Backoff while the token pool is exhausted
    pub cooloff: ReconnectConfig,
    /// Consecutive exhausted failures before the feed is reported degraded
    pub degraded_after: u32,
    /// Decode worker pool sizing
    pub pool: PoolConfig,
    /// Capacity of the outbound event channel
    pub event_buffer: usize,
    /// Session tuning
    pub session: SessionConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token_param: "token".to_string(),
            subprotocols: Vec::new(),
            ping_interval: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(30),
            tension_interval: Duration::from_secs(1),
            backoff: ReconnectConfig::default(),
            cooloff: ReconnectConfig::cooloff(),
            degraded_after: 3,
            pool: PoolConfig::default(),
            event_buffer: 4096,
            session: SessionConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new config with the given URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Offer subprotocols during the handshake
    pub fn subprotocols<I, S>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    /// Set ping interval
    pub fn ping_interval(mut self, d: Duration) -> Self {
        self.ping_interval = d;
        self
    }

    /// Set liveness timeout (also used for session activity pressure)
    pub fn liveness_timeout(mut self, d: Duration) -> Self {
        self.liveness_timeout = d;
        self.session.liveness_timeout = d;
        self
    }

    /// Set transport backoff
    pub fn backoff(mut self, backoff: ReconnectConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set exhausted-pool cool-off
    pub fn cooloff(mut self, cooloff: ReconnectConfig) -> Self {
        self.cooloff = cooloff;
        self
    }

    /// Set decode worker count
    pub fn workers(mut self, n: usize) -> Self {
        self.pool.workers = n;
        self
    }
}

/// Everything the connection task reports downstream
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// Parsed market tick, in arrival order
    Tick(Tick),
    /// Session established
    Connected {
        session_id: Uuid,
        subprotocol: Option<String>,
    },
    /// Session ended
    Disconnected { reason: EvictReason },
    /// Waiting before the next connect attempt
    Reconnecting { attempt: u32, delay: Duration },
    /// Token pool exhausted repeatedly; still cooling off and retrying
    Degraded {
        consecutive_exhausted: u32,
        cooloff: Duration,
    },
    /// First session after a degraded period
    Recovered,
}

/// Handle to a running connection task
pub struct FeedHandle {
    /// Ticks and lifecycle events
    pub events: mpsc::Receiver<FeedEvent>,
    /// Latest session snapshot
    pub session: watch::Receiver<SessionState>,
    /// The connection task
    pub task: JoinHandle<()>,
}

/// Connection failures; each one ends the current session
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("connection closed by remote")]
    Closed,

    #[error("no inbound traffic for {0:?}")]
    LivenessTimeout(Duration),

    #[error(transparent)]
    Session(#[from] TransitionError),
}

impl ConnectionError {
    /// Eviction reason recorded on the session
    pub fn evict_reason(&self) -> EvictReason {
        match self {
            ConnectionError::Auth(e) => EvictReason::AuthFailure(e.to_string()),
            ConnectionError::InvalidEndpoint { .. } | ConnectionError::Handshake(_) => {
                EvictReason::AuthFailure(self.to_string())
            }
            ConnectionError::Read(e) | ConnectionError::Send(e) => {
                EvictReason::Transport(e.clone())
            }
            ConnectionError::Closed => EvictReason::RemoteClose,
            ConnectionError::LivenessTimeout(_) => EvictReason::LivenessTimeout,
            ConnectionError::Session(e) => EvictReason::ProtocolViolation(e.to_string()),
        }
    }

    /// Whether the token used for this connection should be discarded
    pub fn invalidates_token(&self) -> bool {
        matches!(
            self,
            ConnectionError::Auth(_)
                | ConnectionError::InvalidEndpoint { .. }
                | ConnectionError::Handshake(_)
                | ConnectionError::Session(_)
        )
    }

    /// Label for metrics
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionError::Auth(e) => e.kind().as_str(),
            ConnectionError::InvalidEndpoint { .. } => "invalid_endpoint",
            ConnectionError::Handshake(_) => "handshake",
            ConnectionError::Read(_) => "read",
            ConnectionError::Send(_) => "send",
            ConnectionError::Closed => "closed",
            ConnectionError::LivenessTimeout(_) => "liveness",
            ConnectionError::Session(_) => "protocol",
        }
    }
}
