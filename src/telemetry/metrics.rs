//! Prometheus metrics
//!
//! Metric calls throughout the crate are no-ops until a recorder is
//! installed; [`init_metrics`] installs the Prometheus exporter.

use anyhow::Context;
use metrics::{describe_counter, describe_gauge, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Latency metric types
#[derive(Debug, Clone, Copy)]
pub enum LatencyMetric {
    /// Frame receipt to detector verdict
    Detection,
    /// Notifier round trip for one alert
    AlertDelivery,
}

impl LatencyMetric {
    fn name(self) -> &'static str {
        match self {
            LatencyMetric::Detection => "steamwatch_detection_latency_seconds",
            LatencyMetric::AlertDelivery => "steamwatch_alert_delivery_seconds",
        }
    }
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    histogram!(metric.name()).record(duration.as_secs_f64());
}

/// Install the Prometheus exporter on `port` and describe every metric
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("installing Prometheus exporter")?;

    describe_metrics();
    tracing::info!(%addr, "Metrics exporter listening");
    Ok(())
}

fn describe_metrics() {
    describe_counter!("steamwatch_frames_total", "Frames decoded, by format");
    describe_counter!("steamwatch_decode_failures_total", "Frames that failed to decode");
    describe_counter!("steamwatch_parse_failures_total", "Payloads that failed to parse");
    describe_counter!(
        "steamwatch_frames_dropped_total",
        "Frames dropped from a full decode queue"
    );
    describe_counter!(
        "steamwatch_ticks_dropped_total",
        "Ticks dropped because the consumer fell behind"
    );
    describe_counter!(
        "steamwatch_ticks_rejected_total",
        "Out-of-order or duplicate ticks, by reason"
    );
    describe_counter!("steamwatch_reconnects_total", "Reconnect attempts");
    describe_counter!("steamwatch_disconnects_total", "Sessions ended, by reason");
    describe_counter!(
        "steamwatch_feed_degraded_total",
        "Times the token pool was reported exhausted"
    );
    describe_counter!("steamwatch_steam_events_total", "Steam events, by kind");
    describe_counter!("steamwatch_alerts_total", "Alerts, by dispatch outcome");

    describe_gauge!("steamwatch_session_tension", "Current session tension score");
    describe_gauge!("steamwatch_open_windows", "Odds windows held by the detector");

    describe_histogram!(
        LatencyMetric::Detection.name(),
        Unit::Seconds,
        "Frame receipt to detector verdict"
    );
    describe_histogram!(
        LatencyMetric::AlertDelivery.name(),
        Unit::Seconds,
        "Notifier round trip per alert"
    );
}
