//! Feed token acquisition
//!
//! The upstream hands out short-lived plain-text tokens from an HTTP endpoint.
//! When its pool runs dry it answers 200 with a placeholder made of dashes
//! instead of a token; that is reported as [`AuthError::Exhausted`].

use super::types::{AuthError, Token};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use std::time::Duration;

/// Configuration for the token endpoint
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// Scheme + host, e.g. `https://odds.example.com`
    pub base_url: String,
    /// Path of the token endpoint, without leading slash
    pub path: String,
    /// HTTP request timeout
    pub timeout: Duration,
    /// Assumed token lifetime (upstream doesn't publish it)
    pub ttl: Duration,
    /// Fraction of the TTL before expiry at which a token is refreshed
    pub refresh_margin: f64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            path: "token".to_string(),
            timeout: Duration::from_secs(10),
            ttl: Duration::from_secs(60),
            refresh_margin: 0.2,
        }
    }
}

impl TokenConfig {
    /// Full endpoint URL without the anti-cache parameter
    pub fn endpoint(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.path.trim_start_matches('/')
        )
    }
}

/// Source of feed tokens
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a fresh token
    async fn acquire(&self) -> Result<Token, AuthError>;

    /// Fraction of the TTL before expiry at which tokens are refreshed
    fn refresh_margin(&self) -> f64 {
        0.2
    }

    /// Return `current` unless it is within the refresh margin of expiry, in
    /// which case a new token is acquired
    async fn refresh_if_needed(
        &self,
        current: &Token,
        now: DateTime<Utc>,
    ) -> Result<Token, AuthError> {
        if current.refresh_due(now, self.refresh_margin()) {
            tracing::debug!(expires_at = %current.expires_at, "Token within refresh margin");
            self.acquire().await
        } else {
            Ok(current.clone())
        }
    }
}

/// HTTP token acquirer
pub struct TokenAcquirer {
    config: TokenConfig,
    client: Client,
}

impl TokenAcquirer {
    /// Create an acquirer for the given endpoint
    pub fn new(config: TokenConfig) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AuthError::Network(e.to_string()))?;

        Ok(Self { config, client })
    }

    /// Endpoint configuration
    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    fn token_from_body(&self, body: &str) -> Result<Token, AuthError> {
        let value = body.trim();
        if value.is_empty() {
            return Err(AuthError::EmptyBody);
        }
        if is_exhausted_placeholder(value) {
            return Err(AuthError::Exhausted);
        }
        if value.contains(|c: char| c.is_whitespace() || c == '<') {
            let preview: String = value.chars().take(32).collect();
            return Err(AuthError::Malformed(preview));
        }

        let issued_at = Utc::now();
        let ttl = ChronoDuration::from_std(self.config.ttl)
            .unwrap_or_else(|_| ChronoDuration::seconds(60));

        Ok(Token {
            value: value.to_string(),
            issued_at,
            expires_at: issued_at + ttl,
        })
    }
}

#[async_trait]
impl TokenSource for TokenAcquirer {
    async fn acquire(&self) -> Result<Token, AuthError> {
        let url = self.config.endpoint();
        let rnum: u64 = rand::random();

        tracing::debug!(url = %url, rnum, "Requesting feed token");

        let response = self
            .client
            .get(&url)
            .query(&[("rnum", rnum)])
            .send()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AuthError::Network(e.to_string()))?;

        let token = self.token_from_body(&body)?;
        tracing::info!(expires_at = %token.expires_at, "Acquired feed token");
        Ok(token)
    }

    fn refresh_margin(&self) -> f64 {
        self.config.refresh_margin
    }
}

/// The exhaustion placeholder is a run of dashes in place of a token
fn is_exhausted_placeholder(body: &str) -> bool {
    !body.is_empty() && body.chars().all(|c| c == '-')
}
