//! End-to-end: local feed -> connection -> detector -> alerts

mod common;

use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use steam_watch::alert::{Alert, AlertCategory, AlertConfig, AlertDispatcher, Notifier, NotifyError};
use steam_watch::pipeline::{Pipeline, PipelineConfig};
use steam_watch::steam::SteamDetector;
use steam_watch::ws::ConnectionManager;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct Collect(Mutex<Vec<Alert>>);

#[async_trait]
impl Notifier for Collect {
    async fn send(&self, alert: &Alert) -> Result<(), NotifyError> {
        self.0.lock().push(alert.clone());
        Ok(())
    }
}

#[tokio::test]
async fn test_steam_on_the_wire_becomes_an_alert() {
    let burst = format!(
        "<feed>{}{}{}</feed>",
        tick_xml("881", "2.00", 0),
        tick_xml("881", "2.00", 300),
        tick_xml("881", "2.30", 600),
    );
    let quiet = format!("<feed>{}</feed>", tick_xml("904", "1.80", 0));
    let server = spawn_server(ServerScript {
        greeting: vec![
            Message::Text("<ack/>".to_string()),
            Message::Text(quiet),
            gzip_frame(&burst),
        ],
        ..Default::default()
    })
    .await;

    let tokens = Arc::new(ScriptedTokens::new(Duration::from_secs(60)));
    let manager = ConnectionManager::new(fast_config(server.url()), tokens);

    let notifier = Arc::new(Collect::default());
    let dispatcher = Arc::new(AlertDispatcher::new(AlertConfig::default(), notifier.clone()));
    let pipeline = Pipeline::new(
        SteamDetector::with_defaults(),
        dispatcher.clone(),
        PipelineConfig::default(),
    );

    let cancel = CancellationToken::new();
    let feed = manager.run(cancel.clone());
    let pipeline_task = pipeline.spawn(feed.events, cancel.clone());

    tokio::time::timeout(Duration::from_secs(5), async {
        while dispatcher.stats().delivered == 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("no alert delivered");

    cancel.cancel();
    feed.task.await.unwrap();
    let stats = pipeline_task.await.unwrap();
    dispatcher.shutdown().await;

    assert_eq!(stats.ticks, 4);
    assert_eq!(stats.steam_events, 1);

    let alerts = notifier.0.lock();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].category, AlertCategory::Steam);
    assert_eq!(alerts[0].key, "881");
    assert!(alerts[0].text.contains("LARGE_SINGLE"));
}
