//! Steam detection types

use crate::feed::MarketKind;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of abnormal movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SteamKind {
    /// One move past the large-move threshold
    LargeSingle,
    /// A run of rapid same-window changes
    MultiRapid,
}

impl SteamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SteamKind::LargeSingle => "LARGE_SINGLE",
            SteamKind::MultiRapid => "MULTI_RAPID",
        }
    }
}

impl fmt::Display for SteamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected steam move
///
/// Immutable once created; handed to the alert dispatcher exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SteamEvent {
    pub id: Uuid,
    pub match_id: String,
    pub league: String,
    pub market: MarketKind,
    pub selection: String,
    pub kind: SteamKind,
    /// Composite strength score
    pub steam_index: Decimal,
    /// Mean absolute fractional change across the qualifying moves
    pub velocity: Decimal,
    /// Value before the move
    pub from_value: Decimal,
    /// Value after the move
    pub to_value: Decimal,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
}

impl SteamEvent {
    /// Absolute change from `from_value` to `to_value`
    pub fn value_change(&self) -> Decimal {
        (self.to_value - self.from_value).abs()
    }

    /// Fractional change relative to `from_value` (zero if it was zero)
    pub fn move_pct(&self) -> Decimal {
        if self.from_value.is_zero() {
            Decimal::ZERO
        } else {
            self.value_change() / self.from_value.abs()
        }
    }
}
