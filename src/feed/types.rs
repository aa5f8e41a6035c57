//! Feed types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Market type a tick belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketKind {
    /// Straight win odds
    Moneyline,
    /// Handicap line
    Spread,
    /// Over/under line
    Total,
    /// Anything the feed labels differently
    Other(String),
}

impl MarketKind {
    /// Parse the feed's market label (case-insensitive, common aliases accepted)
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "ml" | "1x2" | "moneyline" | "money_line" | "h2h" => MarketKind::Moneyline,
            "spread" | "handicap" | "ah" | "hdp" => MarketKind::Spread,
            "total" | "totals" | "ou" | "over_under" => MarketKind::Total,
            other => MarketKind::Other(other.to_string()),
        }
    }

    /// Class name used for threshold lookups
    pub fn class(&self) -> &str {
        match self {
            MarketKind::Moneyline => "moneyline",
            MarketKind::Spread => "spread",
            MarketKind::Total => "total",
            MarketKind::Other(label) => label,
        }
    }

    /// Whether values in this market are points lines rather than prices
    pub fn is_line(&self) -> bool {
        matches!(self, MarketKind::Spread | MarketKind::Total)
    }
}

impl fmt::Display for MarketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.class())
    }
}

/// A single odds/line observation from the feed
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    /// Upstream match identifier
    pub match_id: String,
    /// League or competition code (e.g. "NBA")
    pub league: String,
    /// Market type
    pub market: MarketKind,
    /// Selection within the market (e.g. "home", "over")
    pub selection: String,
    /// Decimal odds or line value
    pub value: Decimal,
    /// Traded/matched volume, when the feed reports it
    pub volume: Option<Decimal>,
    /// Wall-clock observation time (from the payload when present)
    pub observed_at: DateTime<Utc>,
    /// Local monotonic receive time
    pub received_at: Instant,
}

impl Tick {
    /// Key identifying the odds series this tick belongs to
    pub fn key(&self) -> TickKey {
        TickKey {
            match_id: self.match_id.clone(),
            market: self.market.clone(),
            selection: self.selection.clone(),
        }
    }
}

/// (match, market, selection) identity of an odds series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TickKey {
    pub match_id: String,
    pub market: MarketKind,
    pub selection: String,
}

impl fmt::Display for TickKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.match_id, self.market, self.selection)
    }
}

/// Upstream control signal carried in a feed document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Upstream heartbeat
    Heartbeat,
    /// Auth/subscription acknowledgement
    Ack,
    /// In-place session renewal accepted
    Renewed,
}

/// Result of parsing one payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedPayload {
    /// Market observations, in document order
    pub ticks: Vec<Tick>,
    /// Control signals, in document order
    pub control: Vec<ControlMessage>,
    /// Records present in the document but rejected as malformed
    pub rejected: usize,
}

impl ParsedPayload {
    /// True when the document carried nothing we act on
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty() && self.control.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_kind_aliases() {
        assert_eq!(MarketKind::parse("ML"), MarketKind::Moneyline);
        assert_eq!(MarketKind::parse("handicap"), MarketKind::Spread);
        assert_eq!(MarketKind::parse(" OU "), MarketKind::Total);
        assert_eq!(
            MarketKind::parse("corners"),
            MarketKind::Other("corners".to_string())
        );
    }

    #[test]
    fn test_market_kind_is_line() {
        assert!(MarketKind::Spread.is_line());
        assert!(MarketKind::Total.is_line());
        assert!(!MarketKind::Moneyline.is_line());
    }

    #[test]
    fn test_tick_key_display() {
        let tick = Tick {
            match_id: "4411".to_string(),
            league: "NBA".to_string(),
            market: MarketKind::Spread,
            selection: "home".to_string(),
            value: dec!(-3.5),
            volume: None,
            observed_at: Utc::now(),
            received_at: Instant::now(),
        };
        assert_eq!(tick.key().to_string(), "4411/spread/home");
    }
}
