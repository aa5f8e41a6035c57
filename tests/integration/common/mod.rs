//! Shared fixtures: scripted token source and a local feed server

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use steam_watch::auth::{AuthError, Token, TokenSource};
use steam_watch::ws::{ConnectionConfig, FeedEvent, ReconnectConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Token source that replays scripted results, then issues fresh tokens
pub struct ScriptedTokens {
    script: Mutex<VecDeque<Result<(), AuthError>>>,
    ttl: Duration,
    issued: AtomicUsize,
}

impl ScriptedTokens {
    pub fn new(ttl: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            ttl,
            issued: AtomicUsize::new(0),
        }
    }

    /// Fail the next acquisitions with `error`, `times` times
    pub fn failing(self, error: fn() -> AuthError, times: usize) -> Self {
        {
            let mut script = self.script.lock();
            for _ in 0..times {
                script.push_back(Err(error()));
            }
        }
        self
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for ScriptedTokens {
    async fn acquire(&self) -> Result<Token, AuthError> {
        if let Some(Err(e)) = self.script.lock().pop_front() {
            return Err(e);
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();
        Ok(Token {
            value: format!("tok-{n}"),
            issued_at: now,
            expires_at: now + ChronoDuration::from_std(self.ttl).unwrap(),
        })
    }
}

/// What the server saw during one handshake
#[derive(Debug, Clone)]
pub struct Handshake {
    pub uri: String,
    pub offered: Option<String>,
}

/// Local WebSocket feed
pub struct FeedServer {
    pub addr: SocketAddr,
    /// One entry per accepted handshake
    pub handshakes: mpsc::UnboundedReceiver<Handshake>,
    /// Text frames the client sent
    pub inbound: mpsc::UnboundedReceiver<String>,
    pub connections: Arc<AtomicUsize>,
}

impl FeedServer {
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

/// How the server treats each connection
#[derive(Clone)]
pub struct ServerScript {
    /// Subprotocol to accept when offered
    pub accept_protocol: Option<String>,
    /// Frames sent right after the handshake
    pub greeting: Vec<Message>,
    /// Reply `<renewed/>` to `<renew .../>` requests
    pub confirm_renewals: bool,
    /// Stop reading after the greeting (no pongs, no replies)
    pub go_silent: bool,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            accept_protocol: None,
            greeting: vec![Message::Text("<ack/>".to_string())],
            confirm_renewals: true,
            go_silent: false,
        }
    }
}

pub async fn spawn_server(script: ServerScript) -> FeedServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (handshake_tx, handshakes) = mpsc::unbounded_channel();
    let (inbound_tx, inbound) = mpsc::unbounded_channel();
    let connections = Arc::new(AtomicUsize::new(0));

    let counter = connections.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let script = script.clone();
            let handshake_tx = handshake_tx.clone();
            let inbound_tx = inbound_tx.clone();
            tokio::spawn(async move {
                if let Some(ws) = accept(stream, &script, handshake_tx).await {
                    serve(ws, script, inbound_tx).await;
                }
            });
        }
    });

    FeedServer {
        addr,
        handshakes,
        inbound,
        connections,
    }
}

async fn accept(
    stream: TcpStream,
    script: &ServerScript,
    handshakes: mpsc::UnboundedSender<Handshake>,
) -> Option<WebSocketStream<TcpStream>> {
    let accept_protocol = script.accept_protocol.clone();
    let callback = move |request: &Request, mut response: Response| {
        let offered = request
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let (Some(wanted), Some(offer)) = (&accept_protocol, &offered) {
            if offer.split(',').any(|p| p.trim() == wanted) {
                response.headers_mut().insert(
                    "sec-websocket-protocol",
                    HeaderValue::from_str(wanted).unwrap(),
                );
            }
        }

        let _ = handshakes.send(Handshake {
            uri: request.uri().to_string(),
            offered,
        });
        Ok::<Response, ErrorResponse>(response)
    };

    tokio_tungstenite::accept_hdr_async(stream, callback).await.ok()
}

async fn serve(
    mut ws: WebSocketStream<TcpStream>,
    script: ServerScript,
    inbound: mpsc::UnboundedSender<String>,
) {
    for frame in script.greeting.clone() {
        if ws.send(frame).await.is_err() {
            return;
        }
    }

    if script.go_silent {
        tokio::time::sleep(Duration::from_secs(30)).await;
        return;
    }

    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => {
                let is_renewal = text.starts_with("<renew");
                let _ = inbound.send(text);
                if is_renewal && script.confirm_renewals {
                    if ws.send(Message::Text("<renewed/>".to_string())).await.is_err() {
                        return;
                    }
                }
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}

/// Gzip-compressed binary frame
pub fn gzip_frame(xml: &str) -> Message {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(xml.as_bytes()).unwrap();
    Message::Binary(enc.finish().unwrap())
}

/// `<m>` record observed `offset_ms` after now
pub fn tick_xml(match_id: &str, value: &str, offset_ms: i64) -> String {
    let ts = (Utc::now() + ChronoDuration::milliseconds(offset_ms)).timestamp_millis();
    format!(r#"<m id="{match_id}" lg="NBA" mk="ml" sel="home" v="{value}" ts="{ts}"/>"#)
}

/// Connection config tuned for fast local tests
pub fn fast_config(url: String) -> ConnectionConfig {
    let fast = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
        jitter_factor: 0.0,
    };
    let mut config = ConnectionConfig::new(url)
        .ping_interval(Duration::from_millis(200))
        .liveness_timeout(Duration::from_secs(5))
        .backoff(fast.clone())
        .cooloff(fast);
    config.tension_interval = Duration::from_millis(50);
    config
}

/// Next event, failing the test after `within`
pub async fn next_event(events: &mut mpsc::Receiver<FeedEvent>, within: Duration) -> FeedEvent {
    tokio::time::timeout(within, events.recv())
        .await
        .expect("timed out waiting for feed event")
        .expect("feed event channel closed")
}

/// Skip events until `pred` matches
pub async fn wait_for_event<F>(
    events: &mut mpsc::Receiver<FeedEvent>,
    within: Duration,
    mut pred: F,
) -> FeedEvent
where
    F: FnMut(&FeedEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = next_event(events, remaining).await;
        if pred(&event) {
            return event;
        }
    }
}
