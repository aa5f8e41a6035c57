//! Configuration types for steam-watch
//!
//! One TOML file, one section per component. Every section except `[feed]`
//! can be omitted; missing keys take the component defaults.

use crate::alert::AlertConfig;
use crate::auth::TokenConfig;
use crate::decode::DEFAULT_MAX_PAYLOAD_BYTES;
use crate::pipeline::PipelineConfig;
use crate::session::SessionConfig;
use crate::steam::{SteamConfig, SteamThresholds, ThresholdTable, ANY_MARKET};
use crate::ws::{ConnectionConfig, PoolConfig, ReconnectConfig};
use anyhow::Context;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::Uri;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub feed: FeedSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub steam: SteamSection,
    #[serde(default)]
    pub alert: AlertSection,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Upstream feed endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct FeedSection {
    /// WebSocket URL
    pub url: String,
    /// Query parameter carrying the token
    #[serde(default = "default_token_param")]
    pub token_param: String,
    /// Subprotocols offered during the handshake
    #[serde(default)]
    pub subprotocols: Vec<String>,
    /// League used when a record carries none
    #[serde(default)]
    pub default_league: Option<String>,
    /// Decompressed payload ceiling
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

fn default_token_param() -> String {
    "token".to_string()
}
fn default_max_payload_bytes() -> usize {
    DEFAULT_MAX_PAYLOAD_BYTES
}

/// Token endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// Scheme + host of the token endpoint; empty derives it from the feed URL
    pub base_url: String,
    pub path: String,
    pub timeout_ms: u64,
    /// Assumed token lifetime
    pub ttl_secs: u64,
    /// Fraction of the TTL left when a token is refreshed
    pub refresh_margin: f64,
}

impl Default for AuthSection {
    fn default() -> Self {
        let token = TokenConfig::default();
        Self {
            base_url: String::new(),
            path: token.path,
            timeout_ms: token.timeout.as_millis() as u64,
            ttl_secs: token.ttl.as_secs(),
            refresh_margin: token.refresh_margin,
        }
    }
}

impl From<&AuthSection> for TokenConfig {
    fn from(section: &AuthSection) -> Self {
        Self {
            base_url: section.base_url.clone(),
            path: section.path.clone(),
            timeout: Duration::from_millis(section.timeout_ms),
            ttl: Duration::from_secs(section.ttl_secs),
            refresh_margin: section.refresh_margin,
        }
    }
}

/// Connection tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectionSection {
    pub ping_interval_ms: u64,
    /// Inbound silence that forces a reconnect
    pub liveness_timeout_ms: u64,
    pub tension_interval_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub backoff_multiplier: f64,
    pub backoff_jitter: f64,
    /// Backoff while the token pool is exhausted
    pub cooloff_initial_ms: u64,
    pub cooloff_max_ms: u64,
    /// Consecutive exhausted failures before the feed is reported degraded
    pub degraded_after: u32,
    pub decode_workers: usize,
    pub decode_queue_capacity: usize,
    pub event_buffer: usize,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        let conn = ConnectionConfig::default();
        Self {
            ping_interval_ms: conn.ping_interval.as_millis() as u64,
            liveness_timeout_ms: conn.liveness_timeout.as_millis() as u64,
            tension_interval_ms: conn.tension_interval.as_millis() as u64,
            backoff_initial_ms: conn.backoff.initial_delay.as_millis() as u64,
            backoff_max_ms: conn.backoff.max_delay.as_millis() as u64,
            backoff_multiplier: conn.backoff.multiplier,
            backoff_jitter: conn.backoff.jitter_factor,
            cooloff_initial_ms: conn.cooloff.initial_delay.as_millis() as u64,
            cooloff_max_ms: conn.cooloff.max_delay.as_millis() as u64,
            degraded_after: conn.degraded_after,
            decode_workers: conn.pool.workers,
            decode_queue_capacity: conn.pool.queue_capacity,
            event_buffer: conn.event_buffer,
        }
    }
}

/// Session tuning
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Tension at which an active session renews
    pub high_water_mark: f64,
    /// TTL of persisted session records
    pub store_ttl_secs: u64,
    /// Persist session snapshots to the in-process store
    pub persist: bool,
}

impl Default for SessionSection {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            high_water_mark: session.high_water_mark,
            store_ttl_secs: session.store_ttl.as_secs(),
            persist: true,
        }
    }
}

impl From<&SessionSection> for SessionConfig {
    fn from(section: &SessionSection) -> Self {
        Self {
            high_water_mark: section.high_water_mark,
            store_ttl: Duration::from_secs(section.store_ttl_secs),
            ..Default::default()
        }
    }
}

/// Steam detection: default thresholds plus per-league overrides
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SteamSection {
    pub large_move_threshold: Decimal,
    pub rapid_change_threshold: Decimal,
    pub min_rapid_changes: usize,
    pub lookback_ms: u64,
    pub volume_weight: Decimal,
    pub volume_cap: Decimal,
    pub min_steam_index: Decimal,
    /// Windows idle this long are dropped
    pub idle_retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub overrides: Vec<ThresholdOverride>,
}

impl Default for SteamSection {
    fn default() -> Self {
        let t = SteamThresholds::default();
        Self {
            large_move_threshold: t.large_move_threshold,
            rapid_change_threshold: t.rapid_change_threshold,
            min_rapid_changes: t.min_rapid_changes,
            lookback_ms: t.lookback.as_millis() as u64,
            volume_weight: t.volume_weight,
            volume_cap: t.volume_cap,
            min_steam_index: t.min_steam_index,
            idle_retention_secs: SteamConfig::default().idle_retention.as_secs(),
            sweep_interval_secs: PipelineConfig::default().sweep_interval.as_secs(),
            overrides: Vec::new(),
        }
    }
}

impl SteamSection {
    fn base_thresholds(&self) -> SteamThresholds {
        SteamThresholds {
            large_move_threshold: self.large_move_threshold,
            rapid_change_threshold: self.rapid_change_threshold,
            min_rapid_changes: self.min_rapid_changes,
            lookback: Duration::from_millis(self.lookback_ms),
            volume_weight: self.volume_weight,
            volume_cap: self.volume_cap,
            min_steam_index: self.min_steam_index,
        }
    }
}

impl From<&SteamSection> for SteamConfig {
    fn from(section: &SteamSection) -> Self {
        let base = section.base_thresholds();
        let mut thresholds = ThresholdTable::new(base.clone());
        for o in &section.overrides {
            thresholds.insert(&o.league, &o.market, o.apply(&base));
        }
        Self {
            thresholds,
            idle_retention: Duration::from_secs(section.idle_retention_secs),
        }
    }
}

/// `[[steam.overrides]]` entry; unset keys inherit the `[steam]` values
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdOverride {
    pub league: String,
    /// Market class (`moneyline`, `spread`, `total`, ...) or `*`
    #[serde(default = "default_override_market")]
    pub market: String,
    pub large_move_threshold: Option<Decimal>,
    pub rapid_change_threshold: Option<Decimal>,
    pub min_rapid_changes: Option<usize>,
    pub lookback_ms: Option<u64>,
    pub volume_weight: Option<Decimal>,
    pub volume_cap: Option<Decimal>,
    pub min_steam_index: Option<Decimal>,
}

fn default_override_market() -> String {
    ANY_MARKET.to_string()
}

impl ThresholdOverride {
    fn apply(&self, base: &SteamThresholds) -> SteamThresholds {
        SteamThresholds {
            large_move_threshold: self.large_move_threshold.unwrap_or(base.large_move_threshold),
            rapid_change_threshold: self
                .rapid_change_threshold
                .unwrap_or(base.rapid_change_threshold),
            min_rapid_changes: self.min_rapid_changes.unwrap_or(base.min_rapid_changes),
            lookback: self
                .lookback_ms
                .map(Duration::from_millis)
                .unwrap_or(base.lookback),
            volume_weight: self.volume_weight.unwrap_or(base.volume_weight),
            volume_cap: self.volume_cap.unwrap_or(base.volume_cap),
            min_steam_index: self.min_steam_index.unwrap_or(base.min_steam_index),
        }
    }
}

/// Alert policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertSection {
    pub steam_cooldown_ms: u64,
    pub performance_cooldown_ms: u64,
    pub security_cooldown_ms: u64,
    pub critical_steam_index: Decimal,
    pub critical_line_move: Decimal,
    pub queue_capacity: usize,
    pub max_attempts: u32,
    /// Reconnect attempt from which retries are reported
    pub reconnect_alert_threshold: u32,
}

impl Default for AlertSection {
    fn default() -> Self {
        let alert = AlertConfig::default();
        Self {
            steam_cooldown_ms: alert.steam_cooldown.as_millis() as u64,
            performance_cooldown_ms: alert.performance_cooldown.as_millis() as u64,
            security_cooldown_ms: alert.security_cooldown.as_millis() as u64,
            critical_steam_index: alert.critical_steam_index,
            critical_line_move: alert.critical_line_move,
            queue_capacity: alert.queue_capacity,
            max_attempts: alert.max_attempts,
            reconnect_alert_threshold: PipelineConfig::default().reconnect_alert_threshold,
        }
    }
}

impl From<&AlertSection> for AlertConfig {
    fn from(section: &AlertSection) -> Self {
        Self {
            steam_cooldown: Duration::from_millis(section.steam_cooldown_ms),
            performance_cooldown: Duration::from_millis(section.performance_cooldown_ms),
            security_cooldown: Duration::from_millis(section.security_cooldown_ms),
            critical_steam_index: section.critical_steam_index,
            critical_line_move: section.critical_line_move,
            queue_capacity: section.queue_capacity,
            max_attempts: section.max_attempts,
            ..Default::default()
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Prometheus listener port; 0 disables the exporter
    pub metrics_port: u16,
    pub log_level: String,
    /// `pretty` or `json`
    pub log_format: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: 0,
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.feed.url.trim().is_empty() {
            anyhow::bail!("feed.url must be set");
        }
        if !(0.0..1.0).contains(&self.auth.refresh_margin) {
            anyhow::bail!("auth.refresh_margin must be in [0, 1)");
        }
        if !(self.session.high_water_mark > 0.0 && self.session.high_water_mark <= 1.0) {
            anyhow::bail!("session.high_water_mark must be in (0, 1]");
        }
        for (name, ms) in [
            ("connection.ping_interval_ms", self.connection.ping_interval_ms),
            ("connection.tension_interval_ms", self.connection.tension_interval_ms),
            ("connection.liveness_timeout_ms", self.connection.liveness_timeout_ms),
        ] {
            if ms == 0 {
                anyhow::bail!("{name} must be greater than 0");
            }
        }
        if self.steam.sweep_interval_secs == 0 {
            anyhow::bail!("steam.sweep_interval_secs must be greater than 0");
        }

        check_thresholds("steam", &self.steam.base_thresholds())?;
        let base = self.steam.base_thresholds();
        for o in &self.steam.overrides {
            let label = format!("steam.overrides[{}/{}]", o.league, o.market);
            check_thresholds(&label, &o.apply(&base))?;
        }
        Ok(())
    }

    /// Token endpoint settings, deriving the host from the feed URL when unset
    pub fn token_config(&self) -> anyhow::Result<TokenConfig> {
        let mut token = TokenConfig::from(&self.auth);
        if token.base_url.is_empty() {
            token.base_url = http_origin(&self.feed.url)?;
        }
        Ok(token)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        let c = &self.connection;
        let mut session = SessionConfig::from(&self.session);
        session.liveness_timeout = Duration::from_millis(c.liveness_timeout_ms);

        ConnectionConfig {
            url: self.feed.url.clone(),
            token_param: self.feed.token_param.clone(),
            subprotocols: self.feed.subprotocols.clone(),
            ping_interval: Duration::from_millis(c.ping_interval_ms),
            liveness_timeout: Duration::from_millis(c.liveness_timeout_ms),
            tension_interval: Duration::from_millis(c.tension_interval_ms),
            backoff: ReconnectConfig {
                initial_delay: Duration::from_millis(c.backoff_initial_ms),
                max_delay: Duration::from_millis(c.backoff_max_ms),
                multiplier: c.backoff_multiplier,
                jitter_factor: c.backoff_jitter,
            },
            cooloff: ReconnectConfig {
                initial_delay: Duration::from_millis(c.cooloff_initial_ms),
                max_delay: Duration::from_millis(c.cooloff_max_ms),
                ..ReconnectConfig::cooloff()
            },
            degraded_after: c.degraded_after,
            pool: PoolConfig {
                workers: c.decode_workers,
                queue_capacity: c.decode_queue_capacity,
            },
            event_buffer: c.event_buffer,
            session,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            sweep_interval: Duration::from_secs(self.steam.sweep_interval_secs.max(1)),
            reconnect_alert_threshold: self.alert.reconnect_alert_threshold,
        }
    }
}

fn check_thresholds(label: &str, t: &SteamThresholds) -> anyhow::Result<()> {
    for (name, value) in [
        ("large_move_threshold", t.large_move_threshold),
        ("rapid_change_threshold", t.rapid_change_threshold),
        ("volume_weight", t.volume_weight),
        ("min_steam_index", t.min_steam_index),
    ] {
        if value.is_sign_negative() {
            anyhow::bail!("{label}.{name} must not be negative");
        }
    }
    if t.volume_cap <= Decimal::ZERO {
        anyhow::bail!("{label}.volume_cap must be positive");
    }
    if t.min_rapid_changes == 0 {
        anyhow::bail!("{label}.min_rapid_changes must be at least 1");
    }
    Ok(())
}

/// `wss://host:port/path` -> `https://host:port`
fn http_origin(ws_url: &str) -> anyhow::Result<String> {
    let uri: Uri = ws_url
        .parse()
        .with_context(|| format!("invalid feed url {ws_url}"))?;
    let scheme = match uri.scheme_str() {
        Some("wss") | Some("https") => "https",
        Some("ws") | Some("http") => "http",
        other => anyhow::bail!("unsupported feed url scheme {:?}", other),
    };
    let authority = uri
        .authority()
        .with_context(|| format!("feed url {ws_url} has no host"))?;
    Ok(format!("{scheme}://{authority}"))
}
