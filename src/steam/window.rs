//! Per-series sliding window

use crate::feed::Tick;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::time::Instant;

/// One accepted observation
#[derive(Debug, Clone, PartialEq)]
pub struct WindowEntry {
    /// Per-series sequence number, starting at 1
    pub seq: u64,
    pub value: Decimal,
    pub volume: Option<Decimal>,
    pub observed_at: DateTime<Utc>,
}

/// Why a tick was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Older than the last accepted tick
    OutOfOrder,
    /// Same time and value as the last accepted tick
    Duplicate,
}

/// Bounded, time-ordered history of one (match, market, selection) series
#[derive(Debug, Clone, Default)]
pub struct OddsWindow {
    entries: VecDeque<WindowEntry>,
    next_seq: u64,
    last_reported_seq: u64,
    /// Local receive time of the newest tick seen, accepted or not
    last_seen: Option<Instant>,
}

impl OddsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a tick and trim entries older than `lookback` relative to it
    pub fn accept(&mut self, tick: &Tick, lookback: ChronoDuration) -> Result<u64, Rejection> {
        if let Some(last) = self.entries.back() {
            if tick.observed_at < last.observed_at {
                return Err(Rejection::OutOfOrder);
            }
            if tick.observed_at == last.observed_at && tick.value == last.value {
                return Err(Rejection::Duplicate);
            }
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.push_back(WindowEntry {
            seq,
            value: tick.value,
            volume: tick.volume,
            observed_at: tick.observed_at,
        });

        let cutoff = tick.observed_at - lookback;
        while let Some(front) = self.entries.front() {
            if front.observed_at < cutoff {
                self.entries.pop_front();
            } else {
                break;
            }
        }

        Ok(seq)
    }

    /// Entries oldest first
    pub fn entries(&self) -> &VecDeque<WindowEntry> {
        &self.entries
    }

    pub fn latest(&self) -> Option<&WindowEntry> {
        self.entries.back()
    }

    /// Entry before the latest, if still in the window
    pub fn previous(&self) -> Option<&WindowEntry> {
        self.entries.len().checked_sub(2).and_then(|i| self.entries.get(i))
    }

    /// Record local activity on this series
    pub fn touch(&mut self, received_at: Instant) {
        self.last_seen = Some(self.last_seen.map_or(received_at, |seen| seen.max(received_at)));
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.last_seen
    }

    /// Observation time of the last accepted tick
    pub fn last_observed_at(&self) -> Option<DateTime<Utc>> {
        self.latest().map(|e| e.observed_at)
    }

    pub fn last_reported_seq(&self) -> u64 {
        self.last_reported_seq
    }

    pub fn mark_reported(&mut self, seq: u64) {
        self.last_reported_seq = self.last_reported_seq.max(seq);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
