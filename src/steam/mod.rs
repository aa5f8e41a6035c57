//! Steam detection module
//!
//! Detects abnormal, synchronized odds movement ("steam") over short
//! per-series sliding windows, with thresholds tuned per league and market.

mod detector;
mod thresholds;
mod types;
mod window;

pub use detector::{DetectorStats, SteamConfig, SteamDetector};
pub use thresholds::{SteamThresholds, ThresholdTable, ANY_MARKET};
pub use types::{SteamEvent, SteamKind};
pub use window::{OddsWindow, Rejection, WindowEntry};
