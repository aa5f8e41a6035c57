//! Alert dispatcher
//!
//! Applies per-category cooldowns, queues accepted alerts, and delivers them
//! on a background task. Dispatching never waits on delivery: the queue drops
//! its oldest non-critical alert when full, and the sender gives up on an
//! alert after a bounded number of attempts.

use super::notifier::Notifier;
use super::types::{Alert, AlertCategory, AlertConfig, DispatchError, DispatchOutcome, DispatchStats};
use crate::queue::{DropOldestQueue, Push};
use crate::steam::SteamEvent;
use crate::telemetry::{record_latency, LatencyMetric};
use crate::ws::ReconnectPolicy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    suppressed: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(counter: &AtomicU64, outcome: &'static str) {
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("steamwatch_alerts_total", "outcome" => outcome).increment(1);
    }
}

/// Cooldown-aware alert dispatcher with a background sender
pub struct AlertDispatcher {
    config: AlertConfig,
    last_accepted: Mutex<HashMap<(AlertCategory, String), Instant>>,
    queue: Arc<DropOldestQueue<Alert>>,
    counters: Arc<Counters>,
    sender: Mutex<Option<JoinHandle<()>>>,
}

impl AlertDispatcher {
    /// Create the dispatcher and spawn its sender task
    pub fn new(config: AlertConfig, notifier: Arc<dyn Notifier>) -> Self {
        let queue = Arc::new(DropOldestQueue::new(config.queue_capacity));
        let counters = Arc::new(Counters::default());

        let sender = tokio::spawn(deliver(
            queue.clone(),
            notifier,
            config.clone(),
            counters.clone(),
        ));

        Self {
            config,
            last_accepted: Mutex::new(HashMap::new()),
            queue,
            counters,
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Dispatch a steam event
    pub fn dispatch(&self, event: &SteamEvent) -> DispatchOutcome {
        self.dispatch_alert(Alert::from_steam(event, &self.config))
    }

    /// Dispatch a prepared alert
    pub fn dispatch_alert(&self, alert: Alert) -> DispatchOutcome {
        let cooldown = self.config.cooldown(alert.category);
        let now = Instant::now();
        let key = (alert.category, alert.key.clone());

        // cooldown check and record happen under one lock
        let mut last_accepted = self.last_accepted.lock();
        if let Some(last) = last_accepted.get(&key) {
            if now.duration_since(*last) < cooldown {
                Counters::record(&self.counters.suppressed, "suppressed");
                tracing::debug!(
                    category = %alert.category,
                    key = %alert.key,
                    "Alert suppressed by cooldown"
                );
                return DispatchOutcome::Suppressed;
            }
        }

        match self.queue.push_evicting(alert, |queued| !queued.is_critical()) {
            Push::Queued => {}
            Push::Evicted(evicted) => {
                Counters::record(&self.counters.dropped, "dropped");
                tracing::warn!(
                    category = %evicted.category,
                    key = %evicted.key,
                    severity = %evicted.severity,
                    "Alert queue full, dropped pending alert"
                );
            }
            Push::Refused(refused) => {
                Counters::record(&self.counters.dropped, "dropped");
                tracing::warn!(
                    category = %refused.category,
                    key = %refused.key,
                    "Alert queue full of critical alerts, dropped new alert"
                );
                return DispatchOutcome::Rejected(DispatchError::QueueFull);
            }
            Push::Closed(_) => return DispatchOutcome::Rejected(DispatchError::Closed),
        }

        last_accepted.insert(key, now);
        Counters::record(&self.counters.accepted, "accepted");
        DispatchOutcome::Accepted
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Alerts waiting for delivery
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Stop accepting alerts and deliver what's queued
    pub async fn shutdown(&self) {
        self.queue.close();
        let sender = self.sender.lock().take();
        if let Some(sender) = sender {
            if let Err(e) = sender.await {
                tracing::error!(error = %e, "Alert sender task failed");
            }
        }
    }
}

/// Sender task: deliver queued alerts with bounded retries
async fn deliver(
    queue: Arc<DropOldestQueue<Alert>>,
    notifier: Arc<dyn Notifier>,
    config: AlertConfig,
    counters: Arc<Counters>,
) {
    let max_attempts = config.max_attempts.max(1);

    while let Some(alert) = queue.pop().await {
        let mut backoff = ReconnectPolicy::new(config.retry.clone());
        let mut attempt = 0;

        loop {
            attempt += 1;
            let started = std::time::Instant::now();
            let result = notifier.send(&alert).await;
            record_latency(LatencyMetric::AlertDelivery, started.elapsed());
            match result {
                Ok(()) => {
                    Counters::record(&counters.delivered, "delivered");
                    break;
                }
                Err(e) if attempt < max_attempts => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        error = %e,
                        attempt,
                        retry_in = ?delay,
                        key = %alert.key,
                        "Alert delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    Counters::record(&counters.failed, "failed");
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        category = %alert.category,
                        key = %alert.key,
                        "Alert delivery failed, dropping"
                    );
                    break;
                }
            }
        }
    }

    tracing::debug!("Alert sender stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{NotifyError, Severity};
    use crate::feed::MarketKind;
    use crate::steam::SteamKind;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Alert>>,
        calls: AtomicU32,
        fail_first: u32,
    }

    impl RecordingNotifier {
        fn failing(fail_first: u32) -> Self {
            Self {
                fail_first,
                ..Default::default()
            }
        }

        fn keys(&self) -> Vec<String> {
            self.sent.lock().iter().map(|a| a.key.clone()).collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(NotifyError::Transport("connection reset".into()));
            }
            self.sent.lock().push(alert.clone());
            Ok(())
        }
    }

    fn steam(match_id: &str, index: Decimal) -> SteamEvent {
        let now = Utc::now();
        SteamEvent {
            id: Uuid::new_v4(),
            match_id: match_id.to_string(),
            league: "NBA".to_string(),
            market: MarketKind::Moneyline,
            selection: "home".to_string(),
            kind: SteamKind::LargeSingle,
            steam_index: index,
            velocity: dec!(0.12),
            from_value: dec!(2.0),
            to_value: dec!(2.24),
            window_start: now,
            window_end: now,
            detected_at: now,
        }
    }

    fn dispatcher(notifier: Arc<RecordingNotifier>, config: AlertConfig) -> AlertDispatcher {
        AlertDispatcher::new(config, notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn test_steam_cooldown_per_match() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), AlertConfig::default());

        assert_eq!(dispatcher.dispatch(&steam("881", dec!(1.6))), DispatchOutcome::Accepted);
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(dispatcher.dispatch(&steam("881", dec!(1.7))), DispatchOutcome::Suppressed);
        // other matches have their own cooldown
        assert_eq!(dispatcher.dispatch(&steam("882", dec!(1.6))), DispatchOutcome::Accepted);

        tokio::time::advance(Duration::from_millis(700)).await;
        assert_eq!(dispatcher.dispatch(&steam("881", dec!(1.8))), DispatchOutcome::Accepted);

        dispatcher.shutdown().await;
        assert_eq!(notifier.keys(), vec!["881", "882", "881"]);

        let stats = dispatcher.stats();
        assert_eq!(stats.accepted, 3);
        assert_eq!(stats.suppressed, 1);
        assert_eq!(stats.delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_events_in_cooldown_deliver_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), AlertConfig::default());

        dispatcher.dispatch(&steam("881", dec!(1.6)));
        dispatcher.dispatch(&steam("881", dec!(1.6)));
        dispatcher.shutdown().await;

        assert_eq!(notifier.sent.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_security_alerts_never_suppressed() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier.clone(), AlertConfig::default());

        for _ in 0..3 {
            let outcome = dispatcher.dispatch_alert(Alert::security("feed", "token pool exhausted"));
            assert_eq!(outcome, DispatchOutcome::Accepted);
        }
        // performance alerts share a 60s cooldown
        assert_eq!(
            dispatcher.dispatch_alert(Alert::performance("feed", "reconnect storm")),
            DispatchOutcome::Accepted
        );
        assert_eq!(
            dispatcher.dispatch_alert(Alert::performance("feed", "reconnect storm")),
            DispatchOutcome::Suppressed
        );

        dispatcher.shutdown().await;
        assert_eq!(dispatcher.stats().delivered, 4);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_full_queue_drops_oldest_non_critical() {
        let notifier = Arc::new(RecordingNotifier::default());
        let config = AlertConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        let dispatcher = dispatcher(notifier.clone(), config);

        // sender can't run until we yield, so these all queue up
        dispatcher.dispatch(&steam("a", dec!(1.6)));
        dispatcher.dispatch(&steam("b", dec!(2.5)));
        dispatcher.dispatch(&steam("c", dec!(1.6)));
        assert_eq!(dispatcher.pending(), 2);
        assert_eq!(dispatcher.stats().dropped, 1);

        dispatcher.shutdown().await;
        assert_eq!(notifier.keys(), vec!["b", "c"]);
        let sent = notifier.sent.lock();
        assert_eq!(sent[0].severity, Severity::Critical);
        assert!(sent[0].pin);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_full_critical_queue_refuses_warning() {
        let notifier = Arc::new(RecordingNotifier::default());
        let config = AlertConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        let dispatcher = dispatcher(notifier.clone(), config);

        dispatcher.dispatch_alert(Alert::security("a", "token pool exhausted"));
        dispatcher.dispatch_alert(Alert::security("b", "token pool exhausted"));
        assert_eq!(
            dispatcher.dispatch_alert(Alert::performance("c", "reconnect storm")),
            DispatchOutcome::Rejected(DispatchError::QueueFull)
        );
        assert_eq!(dispatcher.stats().dropped, 1);

        // refused alerts don't start a cooldown
        assert_eq!(dispatcher.pending(), 2);
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(
            dispatcher.dispatch_alert(Alert::performance("c", "reconnect storm")),
            DispatchOutcome::Accepted
        );

        dispatcher.shutdown().await;
        assert_eq!(notifier.keys(), vec!["a", "b", "c"]);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_critical_displaces_oldest_critical() {
        let notifier = Arc::new(RecordingNotifier::default());
        let config = AlertConfig {
            queue_capacity: 2,
            ..Default::default()
        };
        let dispatcher = dispatcher(notifier.clone(), config);

        dispatcher.dispatch_alert(Alert::security("a", "token pool exhausted"));
        dispatcher.dispatch_alert(Alert::security("b", "token pool exhausted"));
        assert_eq!(
            dispatcher.dispatch_alert(Alert::security("c", "token pool exhausted")),
            DispatchOutcome::Accepted
        );

        dispatcher.shutdown().await;
        assert_eq!(notifier.keys(), vec!["b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_retries_then_succeeds() {
        let notifier = Arc::new(RecordingNotifier::failing(2));
        let dispatcher = dispatcher(notifier.clone(), AlertConfig::default());

        dispatcher.dispatch(&steam("881", dec!(1.6)));
        dispatcher.shutdown().await;

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivery_gives_up_after_max_attempts() {
        let notifier = Arc::new(RecordingNotifier::failing(u32::MAX));
        let dispatcher = dispatcher(notifier.clone(), AlertConfig::default());

        dispatcher.dispatch(&steam("881", dec!(1.6)));
        dispatcher.shutdown().await;

        assert_eq!(notifier.calls.load(Ordering::SeqCst), 3);
        let stats = dispatcher.stats();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_rejected() {
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher(notifier, AlertConfig::default());
        dispatcher.shutdown().await;

        // a rejected alert must not start a cooldown for its key
        for _ in 0..2 {
            assert_eq!(
                dispatcher.dispatch(&steam("881", dec!(1.6))),
                DispatchOutcome::Rejected(DispatchError::Closed)
            );
        }
        let stats = dispatcher.stats();
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.suppressed, 0);
    }
}
