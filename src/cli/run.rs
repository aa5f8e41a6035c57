//! Run command implementation

use crate::alert::{AlertConfig, AlertDispatcher, LogNotifier};
use crate::auth::TokenAcquirer;
use crate::config::Config;
use crate::decode::FrameDecoder;
use crate::feed::TickParser;
use crate::pipeline::Pipeline;
use crate::session::MemorySessionStore;
use crate::steam::{SteamConfig, SteamDetector};
use crate::ws::{ConnectionManager, FeedHandle};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Override the feed WebSocket URL
    #[arg(long)]
    pub url: Option<String>,

    /// Stop after this many seconds
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

impl RunArgs {
    pub async fn execute(&self, mut config: Config) -> anyhow::Result<()> {
        if let Some(url) = &self.url {
            config.feed.url = url.clone();
        }

        let tokens = Arc::new(TokenAcquirer::new(config.token_config()?)?);
        let parser = match &config.feed.default_league {
            Some(league) => TickParser::with_default_league(league.clone()),
            None => TickParser::new(),
        };

        let mut manager = ConnectionManager::new(config.connection_config(), tokens)
            .with_decoder(FrameDecoder::new(config.feed.max_payload_bytes))
            .with_parser(parser);
        if config.session.persist {
            manager = manager.with_store(Arc::new(MemorySessionStore::new()));
        }

        let dispatcher = Arc::new(AlertDispatcher::new(
            AlertConfig::from(&config.alert),
            Arc::new(LogNotifier),
        ));
        let pipeline = Pipeline::new(
            SteamDetector::new(SteamConfig::from(&config.steam)),
            dispatcher.clone(),
            config.pipeline_config(),
        );

        tracing::info!(url = %config.feed.url, "Starting feed");

        let cancel = CancellationToken::new();
        let FeedHandle {
            events,
            session: _,
            task: mut feed_task,
        } = manager.run(cancel.clone());
        let pipeline_task = pipeline.spawn(events, cancel.clone());

        let deadline = async {
            match self.duration_secs {
                Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };

        let feed_done = tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                tracing::info!("Interrupt received, shutting down");
                false
            }
            _ = deadline => {
                tracing::info!("Run duration elapsed, shutting down");
                false
            }
            result = &mut feed_task => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Feed task failed");
                }
                true
            }
        };

        cancel.cancel();
        if !feed_done {
            if let Err(e) = feed_task.await {
                tracing::error!(error = %e, "Feed task failed");
            }
        }
        let stats = pipeline_task.await?;
        dispatcher.shutdown().await;

        let alerts = dispatcher.stats();
        tracing::info!(
            ticks = stats.ticks,
            steam_events = stats.steam_events,
            alerts_delivered = alerts.delivered,
            alerts_failed = alerts.failed,
            "Stopped"
        );
        Ok(())
    }
}
