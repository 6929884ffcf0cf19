//! dxLink Session Integration Tests
//!
//! Runs the session against a scripted WebSocket server on localhost:
//! handshake, token rejection, server errors, keepalives, subscription
//! frames and event decoding.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use std::time::Duration;

use serde_json::json;
use tokio::net::TcpListener;

use gex_stream::application::ports::FeedPort;
use gex_stream::domain::feed::{ChannelEvent, FeedMessage};
use gex_stream::infrastructure::dxlink::{DxLinkSession, KeepaliveConfig};
use gex_stream::{ConnectionState, EventKind, FeedError, FeedEvent, StaticTokenProvider, SubscriptionEntry};

use common::{ServerConn, TOKEN, config, serve};

fn tokens() -> StaticTokenProvider {
    StaticTokenProvider::new(TOKEN).unwrap()
}

#[tokio::test]
async fn handshake_reaches_streaming() {
    let (url, server) = serve(1, |_, mut conn: ServerConn| async move {
        conn.handshake().await;
        conn.drain().await;
    })
    .await;

    let mut session = DxLinkSession::connect(&config(&url), &tokens()).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Streaming);

    session.close().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);
    session.close().await;

    server.await.unwrap();
}

#[tokio::test]
async fn subscription_and_feed_data() {
    let (url, server) = serve(1, |_, mut conn: ServerConn| async move {
        conn.handshake().await;

        let subscription = conn.expect("FEED_SUBSCRIPTION").await;
        assert_eq!(subscription["channel"], 1);
        assert_eq!(
            subscription["add"],
            json!([
                {"symbol": ".SPXW251214C6000", "type": "Greeks"},
                {"symbol": "SPX", "type": "Quote"}
            ])
        );

        conn.send(json!({"type": "KEEPALIVE", "channel": 0})).await;
        conn.feed_data(json!([
            {"eventType": "Greeks", "eventSymbol": ".SPXW251214C6000", "gamma": "0.0125", "delta": "NaN", "volatility": 0.18},
            {"eventType": "Summary", "eventSymbol": ".SPXW251214C6000", "openInterest": 1500},
            {"eventType": "Quote", "eventSymbol": "SPX", "bidPrice": 6001.0, "askPrice": "Infinity"},
            {"eventType": "Candle", "eventSymbol": "SPX"}
        ]))
        .await;

        conn.expect("KEEPALIVE").await;
        conn.drain().await;
    })
    .await;

    let mut session = DxLinkSession::connect(&config(&url), &tokens()).await.unwrap();
    session
        .subscribe(&[
            SubscriptionEntry::new(".SPXW251214C6000", EventKind::Greeks),
            SubscriptionEntry::new("SPX", EventKind::Quote),
        ])
        .await
        .unwrap();

    let FeedMessage::Data(events) = session.receive().await.unwrap() else {
        panic!("expected feed data");
    };
    assert_eq!(
        events,
        vec![
            FeedEvent::Greeks {
                symbol: ".SPXW251214C6000".to_string(),
                gamma: Some(0.0125),
                delta: None,
                volatility: Some(0.18),
            },
            FeedEvent::Summary {
                symbol: ".SPXW251214C6000".to_string(),
                open_interest: Some(1500.0),
            },
            FeedEvent::Quote {
                symbol: "SPX".to_string(),
                bid_price: Some(6001.0),
                ask_price: None,
            },
        ]
    );

    session.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let (url, server) = serve(1, |_, mut conn: ServerConn| async move {
        conn.expect("SETUP").await;
        conn.send(json!({"type": "AUTH_STATE", "channel": 0, "state": "UNAUTHORIZED"}))
            .await;
        conn.expect("AUTH").await;
        conn.send(json!({"type": "AUTH_STATE", "channel": 0, "state": "UNAUTHORIZED"}))
            .await;
        conn.drain().await;
    })
    .await;

    let err = DxLinkSession::connect(&config(&url), &tokens()).await.unwrap_err();
    assert!(matches!(err, FeedError::Unauthorized), "got {err:?}");
    server.await.unwrap();
}

#[tokio::test]
async fn error_frame_during_handshake_is_protocol_violation() {
    let (url, server) = serve(1, |_, mut conn: ServerConn| async move {
        conn.expect("SETUP").await;
        conn.send(json!({
            "type": "ERROR", "channel": 0,
            "error": "INVALID_MESSAGE", "message": "unsupported version"
        }))
        .await;
        conn.drain().await;
    })
    .await;

    let err = DxLinkSession::connect(&config(&url), &tokens()).await.unwrap_err();
    assert!(matches!(err, FeedError::ProtocolViolation(_)), "got {err:?}");
    assert!(err.is_retryable());
    server.await.unwrap();
}

#[tokio::test]
async fn silent_server_times_out_handshake() {
    let (url, server) = serve(1, |_, mut conn: ServerConn| async move {
        conn.drain().await;
    })
    .await;

    let mut config = config(&url);
    config.handshake_timeout = Duration::from_millis(200);

    let err = DxLinkSession::connect(&config, &tokens()).await.unwrap_err();
    assert!(
        matches!(err, FeedError::Timeout { stage: "authorization" }),
        "got {err:?}"
    );
    server.await.unwrap();
}

#[tokio::test]
async fn idle_session_sends_keepalive_then_times_out() {
    let (url, server) = serve(1, |_, mut conn: ServerConn| async move {
        conn.handshake().await;
        let keepalive = conn.expect("KEEPALIVE").await;
        assert_eq!(keepalive["channel"], 0);
        conn.drain().await;
    })
    .await;

    let mut config = config(&url);
    config.keepalive = KeepaliveConfig {
        interval: Duration::from_millis(100),
        timeout: Duration::from_millis(400),
    };

    let mut session = DxLinkSession::connect(&config, &tokens()).await.unwrap();
    let err = session.receive().await.unwrap_err();
    assert!(
        matches!(err, FeedError::Timeout { stage: "keepalive" }),
        "got {err:?}"
    );

    session.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn channel_closed_is_surfaced() {
    let (url, server) = serve(1, |_, mut conn: ServerConn| async move {
        conn.handshake().await;
        conn.send(json!({"type": "CHANNEL_CLOSED", "channel": 1})).await;
        conn.close().await;
    })
    .await;

    let mut session = DxLinkSession::connect(&config(&url), &tokens()).await.unwrap();
    let message = session.receive().await.unwrap();
    assert_eq!(
        message,
        FeedMessage::Channel(ChannelEvent::Closed { channel: 1 })
    );

    let err = session.receive().await.unwrap_err();
    assert!(matches!(err, FeedError::ChannelClosed), "got {err:?}");
    server.await.unwrap();
}

#[tokio::test]
async fn refused_connection_is_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = DxLinkSession::connect(&config(&format!("ws://{addr}")), &tokens())
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::Connect(_)), "got {err:?}");
}
