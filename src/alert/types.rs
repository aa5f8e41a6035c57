//! Alert types and configuration

use crate::steam::SteamEvent;
use crate::ws::ReconnectConfig;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Alert category; cooldowns apply per category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCategory {
    /// Detected steam
    Steam,
    /// Feed performance (reconnect storms, drops)
    Performance,
    /// Feed access (token pool exhausted)
    Security,
}

impl AlertCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCategory::Steam => "STEAM",
            AlertCategory::Performance => "PERFORMANCE",
            AlertCategory::Security => "SECURITY",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the notifier receives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub category: AlertCategory,
    pub severity: Severity,
    /// Cooldown key: match id for steam, subsystem otherwise
    pub key: String,
    pub text: String,
    /// Pin the message in the notification channel
    pub pin: bool,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        category: AlertCategory,
        severity: Severity,
        key: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            severity,
            key: key.into(),
            text: text.into(),
            pin: severity == Severity::Critical,
            created_at: Utc::now(),
        }
    }

    /// Feed performance report
    pub fn performance(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(AlertCategory::Performance, Severity::Warning, key, text)
    }

    /// Feed access report
    pub fn security(key: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(AlertCategory::Security, Severity::Critical, key, text)
    }

    /// Steam alert, critical when the move is strong enough
    pub fn from_steam(event: &SteamEvent, config: &AlertConfig) -> Self {
        let severity = if config.is_critical(event) {
            Severity::Critical
        } else {
            Severity::Warning
        };

        let text = format!(
            "{} {} {} {}/{}: {} -> {} (index {})",
            event.kind,
            event.league,
            event.match_id,
            event.market,
            event.selection,
            event.from_value,
            event.to_value,
            event.steam_index.round_dp(2),
        );

        Self::new(AlertCategory::Steam, severity, event.match_id.clone(), text)
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub steam_cooldown: Duration,
    pub performance_cooldown: Duration,
    pub security_cooldown: Duration,
    /// Steam index above which a steam alert is critical
    pub critical_steam_index: Decimal,
    /// Line move (spread/total points) at which a steam alert is critical
    pub critical_line_move: Decimal,
    /// Pending alert capacity
    pub queue_capacity: usize,
    /// Delivery attempts per alert
    pub max_attempts: u32,
    /// Backoff between delivery attempts
    pub retry: ReconnectConfig,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            steam_cooldown: Duration::from_millis(1000),
            performance_cooldown: Duration::from_millis(60_000),
            security_cooldown: Duration::ZERO,
            critical_steam_index: dec!(2.0),
            critical_line_move: dec!(1),
            queue_capacity: 256,
            max_attempts: 3,
            retry: ReconnectConfig {
                initial_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(5),
                multiplier: 2.0,
                jitter_factor: 0.1,
            },
        }
    }
}

impl AlertConfig {
    pub fn cooldown(&self, category: AlertCategory) -> Duration {
        match category {
            AlertCategory::Steam => self.steam_cooldown,
            AlertCategory::Performance => self.performance_cooldown,
            AlertCategory::Security => self.security_cooldown,
        }
    }

    pub fn is_critical(&self, event: &SteamEvent) -> bool {
        event.steam_index > self.critical_steam_index
            || (event.market.is_line() && event.value_change() >= self.critical_line_move)
    }
}

/// Why an alert was not accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("dispatcher is shut down")]
    Closed,

    #[error("alert queue is full of critical alerts")]
    QueueFull,
}

/// Result of handing an alert to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Queued for delivery
    Accepted,
    /// Within the cooldown of an earlier alert with the same key
    Suppressed,
    Rejected(DispatchError),
}

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub accepted: u64,
    pub suppressed: u64,
    /// Evicted from a full queue
    pub dropped: u64,
    pub delivered: u64,
    /// Gave up after retries
    pub failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MarketKind;
    use crate::steam::SteamKind;

    fn event(market: MarketKind, from: Decimal, to: Decimal, index: Decimal) -> SteamEvent {
        let now = Utc::now();
        SteamEvent {
            id: Uuid::new_v4(),
            match_id: "881".to_string(),
            league: "NBA".to_string(),
            market,
            selection: "home".to_string(),
            kind: SteamKind::MultiRapid,
            steam_index: index,
            velocity: dec!(0.03),
            from_value: from,
            to_value: to,
            window_start: now,
            window_end: now,
            detected_at: now,
        }
    }

    #[test]
    fn test_steam_alert_not_critical() {
        let config = AlertConfig::default();
        let alert = Alert::from_steam(
            &event(MarketKind::Moneyline, dec!(2.0), dec!(2.1), dec!(1.8)),
            &config,
        );
        assert_eq!(alert.category, AlertCategory::Steam);
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.key, "881");
        assert!(!alert.pin);
        assert!(alert.text.contains("MULTI_RAPID"));
    }

    #[test]
    fn test_high_index_is_critical_and_pinned() {
        let config = AlertConfig::default();
        let alert = Alert::from_steam(
            &event(MarketKind::Moneyline, dec!(2.0), dec!(2.1), dec!(2.01)),
            &config,
        );
        assert!(alert.is_critical());
        assert!(alert.pin);

        // exactly 2.0 is not above the threshold
        let alert = Alert::from_steam(
            &event(MarketKind::Moneyline, dec!(2.0), dec!(2.1), dec!(2.0)),
            &config,
        );
        assert!(!alert.is_critical());
    }

    #[test]
    fn test_full_point_line_move_is_critical() {
        let config = AlertConfig::default();
        let spread = event(MarketKind::Spread, dec!(-3.5), dec!(-4.5), dec!(1.0));
        assert!(config.is_critical(&spread));

        let half_point = event(MarketKind::Total, dec!(221.5), dec!(222.0), dec!(1.0));
        assert!(!config.is_critical(&half_point));

        // price markets don't count points
        let price = event(MarketKind::Moneyline, dec!(3.0), dec!(4.0), dec!(1.0));
        assert!(!config.is_critical(&price));
    }

    #[test]
    fn test_default_cooldowns() {
        let config = AlertConfig::default();
        assert_eq!(config.cooldown(AlertCategory::Steam), Duration::from_millis(1000));
        assert_eq!(config.cooldown(AlertCategory::Performance), Duration::from_secs(60));
        assert_eq!(config.cooldown(AlertCategory::Security), Duration::ZERO);
    }

    #[test]
    fn test_security_alerts_pin() {
        let alert = Alert::security("feed", "token pool exhausted");
        assert_eq!(alert.severity, Severity::Critical);
        assert!(alert.pin);
        assert!(!Alert::performance("feed", "reconnecting").pin);
    }
}
