//! Per-sport detection thresholds
//!
//! Looked up by (league, market class): an exact match first, then the
//! league's `*` entry, then the table default.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::Duration;

/// Wildcard market class
pub const ANY_MARKET: &str = "*";

/// Detection thresholds for one (league, market class)
#[derive(Debug, Clone, PartialEq)]
pub struct SteamThresholds {
    /// Single-move fraction that fires LARGE_SINGLE (default: 10%)
    pub large_move_threshold: Decimal,
    /// Per-pair fraction that counts as a rapid change (default: 3%)
    pub rapid_change_threshold: Decimal,
    /// Rapid changes needed for MULTI_RAPID (default: 2)
    pub min_rapid_changes: usize,
    /// Window length (default: 1.5s)
    pub lookback: Duration,
    /// Weight of volume in the steam index
    pub volume_weight: Decimal,
    /// Volume at which the volume term saturates
    pub volume_cap: Decimal,
    /// Minimum steam index for MULTI_RAPID (default: 1.5)
    pub min_steam_index: Decimal,
}

impl Default for SteamThresholds {
    fn default() -> Self {
        Self {
            large_move_threshold: dec!(0.10),
            rapid_change_threshold: dec!(0.03),
            min_rapid_changes: 2,
            lookback: Duration::from_millis(1500),
            volume_weight: dec!(1.0),
            volume_cap: dec!(10000),
            min_steam_index: dec!(1.5),
        }
    }
}

/// Threshold lookup table with a required default
#[derive(Debug, Clone, Default)]
pub struct ThresholdTable {
    default: SteamThresholds,
    overrides: HashMap<(String, String), SteamThresholds>,
}

impl ThresholdTable {
    pub fn new(default: SteamThresholds) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Add thresholds for `league` and `market_class` (`*` for every class)
    pub fn with_override(
        mut self,
        league: &str,
        market_class: &str,
        thresholds: SteamThresholds,
    ) -> Self {
        self.insert(league, market_class, thresholds);
        self
    }

    pub fn insert(&mut self, league: &str, market_class: &str, thresholds: SteamThresholds) {
        self.overrides
            .insert(table_key(league, market_class), thresholds);
    }

    pub fn default_thresholds(&self) -> &SteamThresholds {
        &self.default
    }

    pub fn lookup(&self, league: &str, market_class: &str) -> &SteamThresholds {
        self.overrides
            .get(&table_key(league, market_class))
            .or_else(|| self.overrides.get(&table_key(league, ANY_MARKET)))
            .unwrap_or(&self.default)
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

fn table_key(league: &str, market_class: &str) -> (String, String) {
    (
        league.trim().to_ascii_uppercase(),
        market_class.trim().to_ascii_lowercase(),
    )
}
