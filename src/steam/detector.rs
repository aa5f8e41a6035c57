//! Steam detector
//!
//! Keeps a short sliding window per (match, market, selection) and flags two
//! patterns: a single move past the large-move threshold, and a trailing run
//! of rapid changes strong enough by steam index. Each window remembers the
//! last sequence it reported so a run fires once, not on every later tick.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::Instant;
use uuid::Uuid;

use super::thresholds::{SteamThresholds, ThresholdTable};
use super::types::{SteamEvent, SteamKind};
use super::window::{OddsWindow, Rejection, WindowEntry};
use crate::feed::{Tick, TickKey};

/// Configuration for steam detection
#[derive(Debug, Clone)]
pub struct SteamConfig {
    /// Per-sport thresholds
    pub thresholds: ThresholdTable,
    /// Windows with no tick for this long are dropped (default: 10 minutes)
    pub idle_retention: std::time::Duration,
}

impl Default for SteamConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdTable::default(),
            idle_retention: std::time::Duration::from_secs(600),
        }
    }
}

/// Counters for dropped input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectorStats {
    pub accepted: u64,
    pub out_of_order: u64,
    pub duplicates: u64,
    pub events: u64,
}

/// Qualifying move between two consecutive window entries
struct Move<'a> {
    older: &'a WindowEntry,
    newer: &'a WindowEntry,
    pct: Decimal,
}

/// Stateful per-series steam detector
///
/// Owned by a single pipeline task; no internal locking.
pub struct SteamDetector {
    config: SteamConfig,
    windows: HashMap<TickKey, OddsWindow>,
    stats: DetectorStats,
}

impl SteamDetector {
    pub fn new(config: SteamConfig) -> Self {
        Self {
            config,
            windows: HashMap::new(),
            stats: DetectorStats::default(),
        }
    }

    /// Create a detector with default configuration
    pub fn with_defaults() -> Self {
        Self::new(SteamConfig::default())
    }

    /// Feed one tick; returns the events it triggers
    pub fn on_tick(&mut self, tick: &Tick) -> Vec<SteamEvent> {
        let thresholds = self
            .config
            .thresholds
            .lookup(&tick.league, tick.market.class())
            .clone();
        let lookback = Duration::from_std(thresholds.lookback)
            .unwrap_or_else(|_| Duration::milliseconds(1500));

        let window = self.windows.entry(tick.key()).or_default();
        window.touch(tick.received_at);
        let seq = match window.accept(tick, lookback) {
            Ok(seq) => seq,
            Err(Rejection::OutOfOrder) => {
                self.stats.out_of_order += 1;
                metrics::counter!("steamwatch_ticks_rejected_total", "reason" => "out_of_order")
                    .increment(1);
                tracing::debug!(key = %tick.key(), observed_at = %tick.observed_at, "Dropped out-of-order tick");
                return Vec::new();
            }
            Err(Rejection::Duplicate) => {
                self.stats.duplicates += 1;
                metrics::counter!("steamwatch_ticks_rejected_total", "reason" => "duplicate")
                    .increment(1);
                return Vec::new();
            }
        };
        self.stats.accepted += 1;

        let mut events = Vec::new();

        if let Some(event) = large_single(window, tick, &thresholds) {
            events.push(event);
        }
        if let Some(event) = multi_rapid(window, tick, &thresholds) {
            events.push(event);
        }

        if !events.is_empty() {
            window.mark_reported(seq);
            self.stats.events += events.len() as u64;
            for event in &events {
                metrics::counter!("steamwatch_steam_events_total", "kind" => event.kind.as_str())
                    .increment(1);
                tracing::info!(
                    match_id = %event.match_id,
                    market = %event.market,
                    selection = %event.selection,
                    kind = %event.kind,
                    steam_index = %event.steam_index,
                    from = %event.from_value,
                    to = %event.to_value,
                    "Steam detected"
                );
            }
        }

        events
    }

    /// Drop windows that have received nothing for the idle retention
    ///
    /// Idleness is measured on the local receive clock, so upstream clock
    /// skew in `observed_at` can't age out a live series. Returns the
    /// number of windows removed.
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let retention = self.config.idle_retention;

        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window
                .last_seen()
                .is_some_and(|seen| now.saturating_duration_since(seen) <= retention)
        });
        let evicted = before - self.windows.len();

        metrics::gauge!("steamwatch_open_windows").set(self.windows.len() as f64);
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.windows.len(), "Evicted idle windows");
        }
        evicted
    }

    /// Number of live windows
    pub fn window_count(&self) -> usize {
        self.windows.len()
    }

    pub fn window(&self, key: &TickKey) -> Option<&OddsWindow> {
        self.windows.get(key)
    }

    pub fn stats(&self) -> DetectorStats {
        self.stats
    }
}

/// Fractional change between two values; None when the base is zero
fn pct_change(older: Decimal, newer: Decimal) -> Option<Decimal> {
    if older.is_zero() {
        return None;
    }
    Some(((newer - older) / older).abs())
}

/// `avg_velocity*100*0.7 + normalized_volume*volume_weight*10*0.3`
fn steam_index(avg_velocity: Decimal, volume: Option<Decimal>, thresholds: &SteamThresholds) -> Decimal {
    let normalized_volume = match volume {
        Some(volume) if thresholds.volume_cap > Decimal::ZERO => {
            volume.max(Decimal::ZERO).min(thresholds.volume_cap) / thresholds.volume_cap
        }
        _ => Decimal::ZERO,
    };

    avg_velocity * dec!(100) * dec!(0.7)
        + normalized_volume * thresholds.volume_weight * dec!(10) * dec!(0.3)
}

fn large_single(window: &OddsWindow, tick: &Tick, thresholds: &SteamThresholds) -> Option<SteamEvent> {
    let previous = window.previous()?;
    let latest = window.latest()?;
    let pct = pct_change(previous.value, latest.value)?;

    if pct < thresholds.large_move_threshold {
        return None;
    }

    Some(build_event(
        tick,
        SteamKind::LargeSingle,
        steam_index(pct, latest.volume, thresholds),
        pct,
        previous,
        latest,
    ))
}

fn multi_rapid(window: &OddsWindow, tick: &Tick, thresholds: &SteamThresholds) -> Option<SteamEvent> {
    let entries = window.entries();
    let reported = window.last_reported_seq();

    // trailing run of unreported rapid pairs, newest first
    let mut run: Vec<Move<'_>> = Vec::new();
    for i in (1..entries.len()).rev() {
        let (older, newer) = (&entries[i - 1], &entries[i]);
        if newer.seq <= reported {
            break;
        }
        match pct_change(older.value, newer.value) {
            Some(pct) if pct > thresholds.rapid_change_threshold => {
                run.push(Move { older, newer, pct });
            }
            _ => break,
        }
    }

    if run.is_empty() || run.len() < thresholds.min_rapid_changes {
        return None;
    }

    let total: Decimal = run.iter().map(|m| m.pct).sum();
    let avg_velocity = total / Decimal::from(run.len());
    let newest = run.first()?.newer;
    let oldest = run.last()?.older;
    let index = steam_index(avg_velocity, newest.volume, thresholds);

    if index < thresholds.min_steam_index {
        return None;
    }

    Some(build_event(tick, SteamKind::MultiRapid, index, avg_velocity, oldest, newest))
}

fn build_event(
    tick: &Tick,
    kind: SteamKind,
    steam_index: Decimal,
    velocity: Decimal,
    from: &WindowEntry,
    to: &WindowEntry,
) -> SteamEvent {
    SteamEvent {
        id: Uuid::new_v4(),
        match_id: tick.match_id.clone(),
        league: tick.league.clone(),
        market: tick.market.clone(),
        selection: tick.selection.clone(),
        kind,
        steam_index,
        velocity,
        from_value: from.value,
        to_value: to.value,
        window_start: from.observed_at,
        window_end: to.observed_at,
        detected_at: Utc::now(),
    }
}
