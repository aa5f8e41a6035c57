//! Feed connection manager with session tracking and automatic reconnection

use super::backoff::ReconnectPolicy;
use super::pool::{DecodePool, FrameOutcome, RawFrame};
use super::types::{ConnectionConfig, ConnectionError, FeedEvent, FeedHandle};
use crate::auth::{AuthError, BackoffClass, Token, TokenSource};
use crate::decode::FrameDecoder;
use crate::feed::{renew_request, ControlMessage, ParsedPayload, TickParser};
use crate::session::{EvictReason, SessionLifecycle, SessionState, SessionStore};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How a single connection ended without error
enum StreamEnd {
    /// Cancellation requested
    Cancelled,
    /// Renewal continues on a fresh socket
    Renewal,
    /// Nobody is listening for events any more
    ReceiverGone,
}

/// Owns the feed connection: token, handshake, heartbeats, decoding,
/// session lifecycle and reconnects
pub struct ConnectionManager<S> {
    config: ConnectionConfig,
    tokens: Arc<S>,
    decoder: Arc<FrameDecoder>,
    parser: Arc<TickParser>,
    store: Option<Arc<dyn SessionStore>>,
}

impl<S: TokenSource + 'static> ConnectionManager<S> {
    pub fn new(config: ConnectionConfig, tokens: Arc<S>) -> Self {
        Self {
            config,
            tokens,
            decoder: Arc::new(FrameDecoder::default()),
            parser: Arc::new(TickParser::new()),
            store: None,
        }
    }

    /// Use a custom tick parser (e.g. with a default league)
    pub fn with_parser(mut self, parser: TickParser) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    /// Use a custom frame decoder
    pub fn with_decoder(mut self, decoder: FrameDecoder) -> Self {
        self.decoder = Arc::new(decoder);
        self
    }

    /// Persist session snapshots
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shared decoder, for its counters
    pub fn decoder(&self) -> Arc<FrameDecoder> {
        self.decoder.clone()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Spawn the connection task
    ///
    /// The task runs until `cancel` fires or the event receiver is dropped.
    pub fn run(self, cancel: CancellationToken) -> FeedHandle {
        let (events_tx, events_rx) = mpsc::channel(self.config.event_buffer.max(1));
        let session = SessionLifecycle::new(self.config.session.clone(), Utc::now());
        let (session_tx, session_rx) = watch::channel(session.state().clone());

        if let Some(store) = self.store.clone() {
            let snapshots = session_rx.clone();
            let ttl = self.config.session.store_ttl;
            tokio::spawn(persist_sessions(store, snapshots, ttl));
        }

        let driver = Driver {
            backoff: ReconnectPolicy::new(self.config.backoff.clone()),
            cooloff: ReconnectPolicy::new(self.config.cooloff.clone()),
            config: self.config,
            tokens: self.tokens,
            decoder: self.decoder,
            parser: self.parser,
            events: events_tx,
            session_tx,
            session,
            token: None,
            attempt: 0,
            consecutive_exhausted: 0,
            degraded: false,
        };

        let task = tokio::spawn(driver.run_loop(cancel));

        FeedHandle {
            events: events_rx,
            session: session_rx,
            task,
        }
    }
}

/// State of the connection task
struct Driver<S> {
    config: ConnectionConfig,
    tokens: Arc<S>,
    decoder: Arc<FrameDecoder>,
    parser: Arc<TickParser>,
    events: mpsc::Sender<FeedEvent>,
    session_tx: watch::Sender<SessionState>,
    session: SessionLifecycle,
    /// Token of the last connection, reused while fresh
    token: Option<Token>,
    backoff: ReconnectPolicy,
    cooloff: ReconnectPolicy,
    attempt: u32,
    consecutive_exhausted: u32,
    degraded: bool,
}

impl<S: TokenSource + 'static> Driver<S> {
    /// Run the connection loop with automatic reconnection
    async fn run_loop(mut self, cancel: CancellationToken) {
        loop {
            let err = match self.connect_and_stream(&cancel).await {
                Ok(StreamEnd::Renewal) => {
                    self.token = None;
                    tracing::info!(
                        session_id = %self.session.state().session_id,
                        "Renewing session on a new connection"
                    );
                    continue;
                }
                Ok(StreamEnd::Cancelled) => {
                    self.evict(EvictReason::Shutdown);
                    let _ = self.events.try_send(FeedEvent::Disconnected {
                        reason: EvictReason::Shutdown,
                    });
                    tracing::info!("Feed connection cancelled");
                    break;
                }
                Ok(StreamEnd::ReceiverGone) => {
                    self.evict(EvictReason::Shutdown);
                    tracing::info!("Event receiver dropped, stopping feed connection");
                    break;
                }
                Err(e) => e,
            };

            if err.invalidates_token() {
                self.token = None;
            }
            let reason = err.evict_reason();
            self.evict(reason.clone());
            metrics::counter!("steamwatch_disconnects_total", "reason" => err.as_label())
                .increment(1);

            if self
                .events
                .send(FeedEvent::Disconnected { reason })
                .await
                .is_err()
            {
                break;
            }

            let delay = match &err {
                ConnectionError::Auth(e) if e.kind().backoff_class() == BackoffClass::CoolOff => {
                    self.consecutive_exhausted += 1;
                    let delay = self.cooloff.next_delay();
                    tracing::warn!(
                        consecutive = self.consecutive_exhausted,
                        cooloff = ?delay,
                        "Token pool exhausted, cooling off"
                    );

                    if !self.degraded && self.consecutive_exhausted >= self.config.degraded_after
                    {
                        self.degraded = true;
                        metrics::counter!("steamwatch_feed_degraded_total").increment(1);
                        tracing::error!(
                            consecutive = self.consecutive_exhausted,
                            "Feed degraded: token pool exhausted repeatedly"
                        );
                        let degraded = FeedEvent::Degraded {
                            consecutive_exhausted: self.consecutive_exhausted,
                            cooloff: delay,
                        };
                        if self.events.send(degraded).await.is_err() {
                            break;
                        }
                    }
                    delay
                }
                _ => {
                    self.consecutive_exhausted = 0;
                    tracing::warn!(error = %err, "Feed connection error, reconnecting...");
                    self.backoff.next_delay()
                }
            };

            self.attempt += 1;
            metrics::counter!("steamwatch_reconnects_total").increment(1);
            let reconnecting = FeedEvent::Reconnecting {
                attempt: self.attempt,
                delay,
            };
            if self.events.send(reconnecting).await.is_err() {
                break;
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Feed connection cancelled during backoff");
                    break;
                }
                _ = sleep(delay) => {}
            }

            match self.session.clone().reconnect(Utc::now()) {
                Ok(fresh) => {
                    self.session = fresh;
                    self.publish();
                }
                Err(e) => {
                    // evict above always leaves the session in EVICT
                    tracing::error!(error = %e, "Session could not be restarted");
                    break;
                }
            }
        }
    }

    /// Acquire a token, connect, and stream until the connection ends
    async fn connect_and_stream(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<StreamEnd, ConnectionError> {
        let tokens = self.tokens.clone();
        let current = self.token.take();
        let acquire = async move {
            match current {
                Some(current) => tokens.refresh_if_needed(&current, Utc::now()).await,
                None => tokens.acquire().await,
            }
        };
        let token = tokio::select! {
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            token = acquire => token?,
        };
        self.consecutive_exhausted = 0;
        self.session.authorize(&token);
        self.token = Some(token.clone());

        let url = endpoint_url(&self.config.url, &self.config.token_param, &token.value)?;
        tracing::info!(url = %self.config.url, "Connecting to feed");

        let (ws_stream, subprotocol) = tokio::select! {
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            opened = open(&url, &self.config.subprotocols) => opened?,
        };

        self.session.on_upgrade(Utc::now())?;
        self.publish();

        let session_id = self.session.state().session_id;
        tracing::info!(
            session_id = %session_id,
            subprotocol = subprotocol.as_deref().unwrap_or("none"),
            "Feed connected"
        );
        let connected = FeedEvent::Connected {
            session_id,
            subprotocol: subprotocol.clone(),
        };
        if self.events.send(connected).await.is_err() {
            return Ok(StreamEnd::ReceiverGone);
        }

        let (mut write, mut read) = ws_stream.split();
        let mut pool = DecodePool::new(&self.config.pool, self.decoder.clone(), self.parser.clone());

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tension_interval = tokio::time::interval(self.config.tension_interval);
        tension_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let liveness = self.config.liveness_timeout;
        let mut last_inbound = Instant::now();

        // in-place renewal state
        let mut renewal: Option<JoinHandle<Result<Token, AuthError>>> = None;
        let mut pending_token: Option<Token> = None;
        let mut renew_deadline: Option<Instant> = None;

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    break Ok(StreamEnd::Cancelled);
                }

                // Handle incoming messages
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            last_inbound = Instant::now();
                            self.session.on_activity(Utc::now());
                            pool.submit(RawFrame::Text(text));
                        }
                        Some(Ok(Message::Binary(data))) => {
                            last_inbound = Instant::now();
                            self.session.on_activity(Utc::now());
                            pool.submit(RawFrame::Binary(data));
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_inbound = Instant::now();
                            self.session.on_activity(Utc::now());
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                break Err(ConnectionError::Send(e.to_string()));
                            }
                        }
                        Some(Ok(Message::Pong(_))) => {
                            last_inbound = Instant::now();
                            if let Err(e) = self.acknowledge().await {
                                break Err(e);
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(frame = ?frame, "Received close frame");
                            break Err(ConnectionError::Closed);
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => break Err(ConnectionError::Read(e.to_string())),
                        None => break Err(ConnectionError::Closed),
                    }
                }

                // Decoded frames, in arrival order
                (seq, outcome) = pool.next() => {
                    match outcome {
                        FrameOutcome::Parsed(payload) => {
                            match self.handle_payload(payload, &mut pending_token).await {
                                Ok(true) => {}
                                Ok(false) => break Ok(StreamEnd::ReceiverGone),
                                Err(e) => break Err(e),
                            }
                            if pending_token.is_none() {
                                renew_deadline = None;
                            }
                        }
                        FrameOutcome::DecodeFailed(e) => {
                            metrics::counter!("steamwatch_decode_failures_total",
                                "format" => e.format().as_str()).increment(1);
                            tracing::warn!(
                                seq,
                                format = %e.format(),
                                leading_bytes = %e.hex_preview(),
                                error = %e,
                                "Dropped undecodable frame"
                            );
                        }
                        FrameOutcome::ParseFailed(e) => {
                            metrics::counter!("steamwatch_parse_failures_total",
                                "scope" => "document").increment(1);
                            tracing::warn!(seq, error = %e, "Dropped unparsable payload");
                        }
                        FrameOutcome::Dropped => {}
                    }
                }

                // Send periodic pings
                _ = ping_interval.tick() => {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        break Err(ConnectionError::Send(e.to_string()));
                    }
                }

                // Liveness, tension and renewal
                _ = tension_interval.tick() => {
                    if last_inbound.elapsed() > liveness {
                        break Err(ConnectionError::LivenessTimeout(liveness));
                    }

                    let tension = self.session.recompute(Utc::now());
                    metrics::gauge!("steamwatch_session_tension").set(tension);

                    if renew_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        tracing::warn!("In-place renewal not acknowledged, reconnecting");
                        if let Err(e) = self.session.renew_by_reconnect() {
                            break Err(e.into());
                        }
                        self.publish();
                        let _ = write.send(Message::Close(None)).await;
                        break Ok(StreamEnd::Renewal);
                    }

                    if self.session.needs_renewal() {
                        tracing::info!(tension, "Session tension over high-water mark, renewing");
                        if let Err(e) = self.session.begin_renewal() {
                            break Err(e.into());
                        }
                        if subprotocol.is_some() {
                            let tokens = self.tokens.clone();
                            renewal = Some(tokio::spawn(async move { tokens.acquire().await }));
                        } else {
                            if let Err(e) = self.session.renew_by_reconnect() {
                                break Err(e.into());
                            }
                            self.publish();
                            let _ = write.send(Message::Close(None)).await;
                            break Ok(StreamEnd::Renewal);
                        }
                    }
                    self.publish();
                }

                // Token for in-place renewal
                acquired = async {
                    match &mut renewal {
                        Some(handle) => handle.await,
                        None => std::future::pending().await,
                    }
                } => {
                    renewal = None;
                    match acquired {
                        Ok(Ok(token)) => {
                            let request = renew_request(&token.value);
                            if let Err(e) = write.send(Message::Text(request)).await {
                                break Err(ConnectionError::Send(e.to_string()));
                            }
                            tracing::debug!(expires_at = %token.expires_at, "Sent in-place renewal");
                            pending_token = Some(token);
                            renew_deadline = Some(Instant::now() + liveness);
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(error = %e, "Renewal token unavailable, reconnecting");
                            if let Err(e) = self.session.renew_by_reconnect() {
                                break Err(e.into());
                            }
                            self.publish();
                            let _ = write.send(Message::Close(None)).await;
                            break Ok(StreamEnd::Renewal);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Renewal task failed");
                            if let Err(e) = self.session.renew_by_reconnect() {
                                break Err(e.into());
                            }
                            self.publish();
                            let _ = write.send(Message::Close(None)).await;
                            break Ok(StreamEnd::Renewal);
                        }
                    }
                }
            }
        };

        if let Some(handle) = renewal {
            handle.abort();
        }
        pool.shutdown().await;
        result
    }

    /// Forward one parsed payload; returns false once the receiver is gone
    async fn handle_payload(
        &mut self,
        payload: ParsedPayload,
        pending_token: &mut Option<Token>,
    ) -> Result<bool, ConnectionError> {
        for control in &payload.control {
            match control {
                ControlMessage::Heartbeat | ControlMessage::Ack => self.acknowledge().await?,
                ControlMessage::Renewed => match pending_token.take() {
                    Some(token) => {
                        self.session.renewed(&token, Utc::now())?;
                        self.token = Some(token.clone());
                        self.publish();
                        tracing::info!(
                            session_id = %self.session.state().session_id,
                            expires_at = %token.expires_at,
                            "Session renewed in place"
                        );
                    }
                    None => tracing::debug!("Ignoring unsolicited renewal confirmation"),
                },
            }
        }

        if payload.rejected > 0 {
            metrics::counter!("steamwatch_parse_failures_total", "scope" => "record")
                .increment(payload.rejected as u64);
        }

        for tick in payload.ticks {
            match self.events.try_send(FeedEvent::Tick(tick)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    metrics::counter!("steamwatch_ticks_dropped_total").increment(1);
                    tracing::warn!("Event channel full, dropped tick");
                }
                Err(TrySendError::Closed(_)) => return Ok(false),
            }
        }

        Ok(true)
    }

    /// Heartbeat, ack or pong
    async fn acknowledge(&mut self) -> Result<(), ConnectionError> {
        let became_active = self.session.on_ack(Utc::now())?;
        if became_active {
            self.attempt = 0;
            self.backoff.reset();
            self.cooloff.reset();
            tracing::info!(session_id = %self.session.state().session_id, "Session active");

            if self.degraded {
                self.degraded = false;
                tracing::info!("Feed recovered");
                let _ = self.events.send(FeedEvent::Recovered).await;
            }
        }
        self.publish();
        Ok(())
    }

    fn evict(&mut self, reason: EvictReason) {
        if let Err(e) = self.session.evict(reason) {
            tracing::debug!(error = %e, "Session already evicted");
        }
        self.publish();
    }

    fn publish(&self) {
        self.session_tx.send_replace(self.session.state().clone());
    }
}

/// Endpoint URL with the token query parameter appended
pub(crate) fn endpoint_url(
    base: &str,
    token_param: &str,
    token: &str,
) -> Result<String, ConnectionError> {
    let mut url = reqwest::Url::parse(base).map_err(|e| ConnectionError::InvalidEndpoint {
        url: base.to_string(),
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConnectionError::InvalidEndpoint {
            url: base.to_string(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }

    url.query_pairs_mut().append_pair(token_param, token);
    Ok(url.into())
}

/// Open the socket, retrying once without subprotocols if the server
/// refuses the offer
async fn open(
    url: &str,
    subprotocols: &[String],
) -> Result<(WsStream, Option<String>), ConnectionError> {
    match handshake(url, subprotocols).await {
        Err(e) if !subprotocols.is_empty() && rejects_subprotocols(&e) => {
            tracing::warn!(error = %e, "Server refused subprotocols, retrying without");
            handshake(url, &[])
                .await
                .map_err(|e| ConnectionError::Handshake(e.to_string()))
        }
        result => result.map_err(|e| ConnectionError::Handshake(e.to_string())),
    }
}

async fn handshake(
    url: &str,
    subprotocols: &[String],
) -> Result<(WsStream, Option<String>), tungstenite::Error> {
    let mut request = url.into_client_request()?;
    if !subprotocols.is_empty() {
        let offer = HeaderValue::from_str(&subprotocols.join(", "))
            .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, offer);
    }

    let (stream, response) = connect_async(request).await?;
    let negotiated = response
        .headers()
        .get(SEC_WEBSOCKET_PROTOCOL)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    Ok((stream, negotiated))
}

fn rejects_subprotocols(error: &tungstenite::Error) -> bool {
    match error {
        tungstenite::Error::Protocol(ProtocolError::SecWebSocketSubProtocolError(_)) => true,
        tungstenite::Error::Http(response) => response.status().is_client_error(),
        _ => false,
    }
}

/// Mirror session snapshots into the store until the connection task ends
async fn persist_sessions(
    store: Arc<dyn SessionStore>,
    mut snapshots: watch::Receiver<SessionState>,
    ttl: Duration,
) {
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        let result = if snapshot.is_evicted() {
            store.expire(snapshot.session_id).await
        } else {
            store.put(&snapshot, ttl).await
        };
        if let Err(e) = result {
            tracing::warn!(session_id = %snapshot.session_id, error = %e, "Failed to persist session");
        }

        if snapshots.changed().await.is_err() {
            break;
        }
    }
}
