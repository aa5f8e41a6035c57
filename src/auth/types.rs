//! Auth types

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;

/// Short-lived feed token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Opaque token value
    pub value: String,
    /// When we received it
    pub issued_at: DateTime<Utc>,
    /// When it stops being accepted
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Token lifetime
    pub fn ttl(&self) -> ChronoDuration {
        self.expires_at - self.issued_at
    }

    /// Time left before expiry (negative once expired)
    pub fn remaining(&self, now: DateTime<Utc>) -> ChronoDuration {
        self.expires_at - now
    }

    /// True once `now` is within `margin` (fraction of TTL) of expiry
    pub fn refresh_due(&self, now: DateTime<Utc>, margin: f64) -> bool {
        let ttl_ms = self.ttl().num_milliseconds().max(0) as f64;
        let margin_ms = (ttl_ms * margin.clamp(0.0, 1.0)) as i64;
        self.remaining(now) <= ChronoDuration::milliseconds(margin_ms)
    }
}

/// Token acquisition failures
#[derive(Debug, Error)]
pub enum AuthError {
    /// Upstream token pool is empty; back off for longer than usual
    #[error("token pool exhausted")]
    Exhausted,

    #[error("token request failed: {0}")]
    Network(String),

    #[error("token endpoint returned HTTP {0}")]
    Status(u16),

    #[error("token endpoint returned an empty body")]
    EmptyBody,

    /// Body isn't a bare token (HTML error page, multi-word text, ...)
    #[error("token endpoint returned a malformed body: {0}")]
    Malformed(String),
}

/// Coarse classification of an [`AuthError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    Exhausted,
    Network,
    Rejected,
    Malformed,
}

/// Which backoff schedule applies after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffClass {
    /// Normal reconnect backoff
    Standard,
    /// Longer cool-off used while the token pool is exhausted
    CoolOff,
}

impl AuthError {
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            AuthError::Exhausted => AuthErrorKind::Exhausted,
            AuthError::Network(_) => AuthErrorKind::Network,
            AuthError::Status(_) => AuthErrorKind::Rejected,
            AuthError::EmptyBody | AuthError::Malformed(_) => AuthErrorKind::Malformed,
        }
    }
}

impl AuthErrorKind {
    pub fn backoff_class(&self) -> BackoffClass {
        match self {
            AuthErrorKind::Exhausted => BackoffClass::CoolOff,
            _ => BackoffClass::Standard,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthErrorKind::Exhausted => "exhausted",
            AuthErrorKind::Network => "network",
            AuthErrorKind::Rejected => "rejected",
            AuthErrorKind::Malformed => "malformed",
        }
    }
}
