//! Detection pipeline
//!
//! Single task that reads the connection's event stream, runs the steam
//! detector over ticks, hands events to the alert dispatcher, and turns
//! feed health events into PERFORMANCE/SECURITY alerts.

use crate::alert::{Alert, AlertCategory, AlertDispatcher, DispatchOutcome, Severity};
use crate::steam::SteamDetector;
use crate::telemetry::{record_latency, LatencyMetric};
use crate::ws::FeedEvent;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Alert key for feed health reports
const FEED_KEY: &str = "feed";

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// How often idle detector windows are swept
    pub sweep_interval: Duration,
    /// Reconnect attempt from which each retry is reported
    pub reconnect_alert_threshold: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            reconnect_alert_threshold: 5,
        }
    }
}

/// Pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub ticks: u64,
    pub steam_events: u64,
    pub alerts_accepted: u64,
    pub alerts_suppressed: u64,
    pub alerts_rejected: u64,
}

/// Detector + dispatcher driver
pub struct Pipeline {
    detector: SteamDetector,
    dispatcher: Arc<AlertDispatcher>,
    config: PipelineConfig,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(
        detector: SteamDetector,
        dispatcher: Arc<AlertDispatcher>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            detector,
            dispatcher,
            config,
            stats: PipelineStats::default(),
        }
    }

    /// Process one feed event
    pub fn handle(&mut self, event: FeedEvent) {
        match event {
            FeedEvent::Tick(tick) => {
                self.stats.ticks += 1;
                let events = self.detector.on_tick(&tick);
                record_latency(LatencyMetric::Detection, tick.received_at.elapsed());
                for steam in events {
                    self.stats.steam_events += 1;
                    let outcome = self.dispatcher.dispatch(&steam);
                    self.record(outcome);
                }
            }
            FeedEvent::Connected {
                session_id,
                subprotocol,
            } => {
                tracing::info!(
                    session_id = %session_id,
                    subprotocol = subprotocol.as_deref().unwrap_or("none"),
                    "Feed session up"
                );
            }
            FeedEvent::Disconnected { reason } => {
                tracing::info!(reason = %reason, "Feed session down");
            }
            FeedEvent::Reconnecting { attempt, delay } => {
                if attempt >= self.config.reconnect_alert_threshold {
                    let alert = Alert::performance(
                        FEED_KEY,
                        format!("feed reconnect attempt {attempt}, next try in {delay:?}"),
                    );
                    let outcome = self.dispatcher.dispatch_alert(alert);
                    self.record(outcome);
                }
            }
            FeedEvent::Degraded {
                consecutive_exhausted,
                cooloff,
            } => {
                let alert = Alert::security(
                    FEED_KEY,
                    format!(
                        "feed degraded: token pool exhausted {consecutive_exhausted} times in a row, cooling off {cooloff:?}"
                    ),
                );
                let outcome = self.dispatcher.dispatch_alert(alert);
                self.record(outcome);
            }
            FeedEvent::Recovered => {
                let alert = Alert::new(
                    AlertCategory::Security,
                    Severity::Info,
                    FEED_KEY,
                    "feed recovered",
                );
                let outcome = self.dispatcher.dispatch_alert(alert);
                self.record(outcome);
            }
        }
    }

    fn record(&mut self, outcome: DispatchOutcome) {
        match outcome {
            DispatchOutcome::Accepted => self.stats.alerts_accepted += 1,
            DispatchOutcome::Suppressed => self.stats.alerts_suppressed += 1,
            DispatchOutcome::Rejected(e) => {
                self.stats.alerts_rejected += 1;
                tracing::warn!(error = %e, "Alert rejected");
            }
        }
    }

    /// Sweep idle detector windows
    pub fn sweep(&mut self) -> usize {
        self.detector.evict_idle(Instant::now())
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn detector(&self) -> &SteamDetector {
        &self.detector
    }

    /// Run until cancelled or the event stream ends
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<FeedEvent>,
        cancel: CancellationToken,
    ) -> PipelineStats {
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Pipeline cancelled");
                    break;
                }

                event = events.recv() => {
                    match event {
                        Some(event) => self.handle(event),
                        None => {
                            tracing::info!("Feed event stream ended");
                            break;
                        }
                    }
                }

                _ = sweep.tick() => {
                    self.sweep();
                }
            }
        }

        tracing::info!(
            ticks = self.stats.ticks,
            steam_events = self.stats.steam_events,
            alerts = self.stats.alerts_accepted,
            "Pipeline stopped"
        );
        self.stats
    }

    /// Spawn [`run`](Self::run) on its own task
    pub fn spawn(
        self,
        events: mpsc::Receiver<FeedEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<PipelineStats> {
        tokio::spawn(self.run(events, cancel))
    }
}
