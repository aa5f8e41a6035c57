//! Integration tests for the feed connection against a local WebSocket server

mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use steam_watch::auth::AuthError;
use steam_watch::session::{EvictReason, MemorySessionStore, Phase, SessionStore};
use steam_watch::ws::{ConnectionManager, FeedEvent};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_connects_streams_ticks_and_activates() {
    let greeting = vec![
        Message::Text("<ack/>".to_string()),
        gzip_frame(&format!("<feed>{}</feed>", tick_xml("881", "1.95", 0))),
        Message::Text(format!("<feed>{}</feed>", tick_xml("881", "2.05", 100))),
    ];
    let mut server = spawn_server(ServerScript {
        greeting,
        ..Default::default()
    })
    .await;

    let tokens = Arc::new(ScriptedTokens::new(Duration::from_secs(60)));
    let store = Arc::new(MemorySessionStore::new());
    let manager = ConnectionManager::new(fast_config(server.url()), tokens.clone())
        .with_store(store.clone());

    let cancel = CancellationToken::new();
    let mut handle = manager.run(cancel.clone());

    let connected = next_event(&mut handle.events, WAIT).await;
    let session_id = match connected {
        FeedEvent::Connected {
            session_id,
            subprotocol,
        } => {
            assert!(subprotocol.is_none());
            session_id
        }
        other => panic!("expected Connected, got {other:?}"),
    };

    let handshake = server.handshakes.recv().await.unwrap();
    assert!(handshake.uri.contains("token=tok-1"), "{}", handshake.uri);
    assert!(handshake.offered.is_none());

    // ticks arrive in frame order, gzip first
    let mut values = Vec::new();
    while values.len() < 2 {
        if let FeedEvent::Tick(tick) = next_event(&mut handle.events, WAIT).await {
            assert_eq!(tick.match_id, "881");
            values.push(tick.value.to_string());
        }
    }
    assert_eq!(values, vec!["1.95", "2.05"]);

    let state = tokio::time::timeout(
        WAIT,
        handle.session.wait_for(|s| s.phase == Phase::Active),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();
    assert_eq!(state.session_id, session_id);
    assert!(state.auth_expiry.is_some());

    // snapshot persisted
    let stored = tokio::time::timeout(WAIT, async {
        loop {
            if let Ok(Some(s)) = store.get(session_id).await {
                if s.phase == Phase::Active {
                    return s;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(stored.session_id, session_id);

    cancel.cancel();
    let last = wait_for_event(&mut handle.events, WAIT, |e| {
        matches!(e, FeedEvent::Disconnected { .. })
    })
    .await;
    assert!(matches!(
        last,
        FeedEvent::Disconnected {
            reason: EvictReason::Shutdown
        }
    ));
    handle.task.await.unwrap();
    assert_eq!(handle.session.borrow().phase, Phase::Evict);
    assert_eq!(tokens.issued(), 1);
}

#[tokio::test]
async fn test_in_place_renewal_over_subprotocol() {
    let mut server = spawn_server(ServerScript {
        accept_protocol: Some("odds.v2".to_string()),
        ..Default::default()
    })
    .await;

    // short tokens push tension past the high-water mark quickly
    let tokens = Arc::new(ScriptedTokens::new(Duration::from_millis(800)));
    let config = fast_config(server.url()).subprotocols(["odds.v2"]);
    let manager = ConnectionManager::new(config, tokens.clone());

    let cancel = CancellationToken::new();
    let mut handle = manager.run(cancel.clone());

    match next_event(&mut handle.events, WAIT).await {
        FeedEvent::Connected { subprotocol, .. } => {
            assert_eq!(subprotocol.as_deref(), Some("odds.v2"));
        }
        other => panic!("expected Connected, got {other:?}"),
    }
    let handshake = server.handshakes.recv().await.unwrap();
    assert_eq!(handshake.offered.as_deref(), Some("odds.v2"));

    let renewal = tokio::time::timeout(WAIT, async {
        loop {
            let text = server.inbound.recv().await.unwrap();
            if text.starts_with("<renew") {
                return text;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(renewal, r#"<renew token="tok-2"/>"#);

    // the session is in RENEW once the request is out; confirmation
    // brings it back to ACTIVE on the same socket
    tokio::time::timeout(
        WAIT,
        handle
            .session
            .wait_for(|s| s.phase == Phase::Active),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(server.connections.load(std::sync::atomic::Ordering::SeqCst), 1);

    cancel.cancel();
    handle.task.await.unwrap();
}

#[tokio::test]
async fn test_refused_subprotocol_falls_back_and_renews_by_reconnect() {
    let mut server = spawn_server(ServerScript::default()).await;

    let tokens = Arc::new(ScriptedTokens::new(Duration::from_millis(800)));
    let config = fast_config(server.url()).subprotocols(["odds.v2"]);
    let manager = ConnectionManager::new(config, tokens.clone());

    let cancel = CancellationToken::new();
    let mut handle = manager.run(cancel.clone());

    let first_session = match next_event(&mut handle.events, WAIT).await {
        FeedEvent::Connected {
            session_id,
            subprotocol,
        } => {
            assert!(subprotocol.is_none());
            session_id
        }
        other => panic!("expected Connected, got {other:?}"),
    };

    // the offer was refused, the retry carried none
    let offered = server.handshakes.recv().await.unwrap();
    assert_eq!(offered.offered.as_deref(), Some("odds.v2"));
    let retry = server.handshakes.recv().await.unwrap();
    assert!(retry.offered.is_none());

    // without a subprotocol, renewal reconnects and keeps the session
    let reconnected = wait_for_event(&mut handle.events, WAIT, |e| {
        matches!(e, FeedEvent::Connected { .. })
    })
    .await;
    match reconnected {
        FeedEvent::Connected { session_id, .. } => assert_eq!(session_id, first_session),
        other => panic!("expected Connected, got {other:?}"),
    }
    assert!(tokens.issued() >= 2);

    cancel.cancel();
    handle.task.await.unwrap();
}

#[tokio::test]
async fn test_exhausted_token_pool_degrades_then_recovers() {
    let server = spawn_server(ServerScript::default()).await;

    let tokens = Arc::new(
        ScriptedTokens::new(Duration::from_secs(60)).failing(|| AuthError::Exhausted, 3),
    );
    let manager = ConnectionManager::new(fast_config(server.url()), tokens.clone());

    let cancel = CancellationToken::new();
    let mut handle = manager.run(cancel.clone());

    let first = next_event(&mut handle.events, WAIT).await;
    assert!(matches!(
        first,
        FeedEvent::Disconnected {
            reason: EvictReason::AuthFailure(_)
        }
    ));

    let degraded = wait_for_event(&mut handle.events, WAIT, |e| {
        matches!(e, FeedEvent::Degraded { .. })
    })
    .await;
    match degraded {
        FeedEvent::Degraded {
            consecutive_exhausted,
            ..
        } => assert_eq!(consecutive_exhausted, 3),
        other => panic!("expected Degraded, got {other:?}"),
    }

    wait_for_event(&mut handle.events, WAIT, |e| {
        matches!(e, FeedEvent::Connected { .. })
    })
    .await;
    wait_for_event(&mut handle.events, WAIT, |e| matches!(e, FeedEvent::Recovered)).await;
    assert_eq!(tokens.issued(), 1);

    cancel.cancel();
    handle.task.await.unwrap();
}

#[tokio::test]
async fn test_silent_server_trips_liveness_and_reconnects() {
    // never acks, never answers pings
    let server = spawn_server(ServerScript {
        greeting: Vec::new(),
        go_silent: true,
        ..Default::default()
    })
    .await;

    let tokens = Arc::new(ScriptedTokens::new(Duration::from_secs(60)));
    let config = fast_config(server.url()).liveness_timeout(Duration::from_millis(400));
    let manager = ConnectionManager::new(config, tokens.clone());

    let cancel = CancellationToken::new();
    let mut handle = manager.run(cancel.clone());

    let down = wait_for_event(&mut handle.events, WAIT, |e| {
        matches!(e, FeedEvent::Disconnected { .. })
    })
    .await;
    assert!(matches!(
        down,
        FeedEvent::Disconnected {
            reason: EvictReason::LivenessTimeout
        }
    ));

    match next_event(&mut handle.events, WAIT).await {
        FeedEvent::Reconnecting { attempt, .. } => assert_eq!(attempt, 1),
        other => panic!("expected Reconnecting, got {other:?}"),
    }

    cancel.cancel();
    handle.task.await.unwrap();
}
