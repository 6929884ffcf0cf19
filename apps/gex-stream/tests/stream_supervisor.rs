//! Stream Supervisor Integration Tests
//!
//! Runs the supervisor with the dxLink connector against a scripted local
//! server: center resolution, ladder subscription, exposure updates,
//! reconnect after a server drop, stop semantics and the retry ceiling.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

mod common;

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use rust_decimal::Decimal;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use gex_stream::application::ports::{FeedConnector, FeedPort, TokenProvider};
use gex_stream::domain::feed::FeedMessage;
use gex_stream::{
    ConnectionState, DxLinkConnector, ExposureAggregator, ExposureConfig, FeedError, FeedEvent,
    LadderSpec, ReconnectConfig, StaticTokenProvider, StreamSupervisor, SubscriptionEntry,
    SupervisorConfig, SupervisorError, SupervisorEvent,
};

use common::{ServerConn, TOKEN, config, greeks_and_summary, serve};

fn supervisor_config(max_attempts: u32) -> SupervisorConfig {
    SupervisorConfig {
        underlying: "SPX".to_string(),
        ladder: LadderSpec {
            prefix: "SPXW".to_string(),
            expiration: "251214".to_string(),
            strikes_up: 1,
            strikes_down: 1,
            increment: Decimal::from(5),
        },
        fallback_price: Decimal::from(6000),
        price_timeout: Duration::from_millis(200),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        },
        event_channel_capacity: 16,
        join_timeout: Duration::from_secs(2),
    }
}

fn parts(url: &str) -> (Arc<dyn FeedConnector>, Arc<dyn TokenProvider>) {
    (
        Arc::new(DxLinkConnector::new(config(url))),
        Arc::new(StaticTokenProvider::new(TOKEN).unwrap()),
    )
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn streams_exposure_and_reconnects_after_drop() {
    let (url, server) = serve(2, |index, mut conn: ServerConn| async move {
        conn.handshake().await;

        let center = conn.expect("FEED_SUBSCRIPTION").await;
        assert_eq!(center["add"], json!([{"symbol": "SPX", "type": "Quote"}]));

        if index == 0 {
            conn.feed_data(json!([
                {"eventType": "Quote", "eventSymbol": "SPX", "bidPrice": 6001.0, "askPrice": 6003.0}
            ]))
            .await;
        }

        let ladder = conn.expect("FEED_SUBSCRIPTION").await;
        let add = ladder["add"].as_array().unwrap();
        // Three strikes, two rights, four event kinds, plus the underlying quote.
        assert_eq!(add.len(), 25);
        assert_eq!(add[0], json!({"symbol": ".SPXW251214C5995", "type": "Quote"}));
        assert_eq!(add[24], json!({"symbol": "SPX", "type": "Quote"}));

        if index == 0 {
            conn.feed_data(greeks_and_summary(".SPXW251214C6000", 0.01, 1000.0))
                .await;
            conn.close().await;
        } else {
            conn.feed_data(greeks_and_summary(".SPXW251214P5995", 0.02, 500.0))
                .await;
            conn.drain().await;
        }
    })
    .await;

    let aggregator = Arc::new(ExposureAggregator::new(6000.0, ExposureConfig::default()));
    let (status_tx, mut status_rx) = mpsc::channel(256);
    let (connector, tokens) = parts(&url);

    let supervisor = StreamSupervisor::start(
        supervisor_config(0),
        connector,
        tokens,
        Arc::clone(&aggregator),
        Some(status_tx),
    )
    .unwrap();

    let stats = supervisor.stats();
    let counters = Arc::clone(&stats);
    wait_for(move || counters.exposure_updates() == 2).await;

    assert!(stats.reconnects() >= 1);
    assert_eq!(aggregator.summary_metrics().tracked_option_count, 2);
    assert_eq!(aggregator.spot_price(), 6002.0);

    let rows = aggregator.exposure_by_strike();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].strike, Decimal::from(5995));
    assert!(rows[0].put_gex > 0.0);
    assert!(rows[1].call_gex > 0.0);

    let pending = supervisor.pending();
    assert_eq!(pending.lock().len(), 2);

    assert!(!supervisor.finished().is_cancelled());
    supervisor.stop().await.unwrap();
    server.await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = status_rx.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&SupervisorEvent::StateChanged(ConnectionState::Streaming)));
    assert!(events.iter().any(|e| matches!(e, SupervisorEvent::Reconnecting { attempt: 1, .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        SupervisorEvent::CenterResolved(center) if center.price == Decimal::from(6000) && !center.is_fallback()
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        SupervisorEvent::CenterResolved(center) if center.is_fallback()
    )));
    assert!(events.contains(&SupervisorEvent::Subscribed { symbols: 6 }));
    assert_eq!(
        events.last(),
        Some(&SupervisorEvent::StateChanged(ConnectionState::Disconnected))
    );
}

#[tokio::test]
async fn stop_while_waiting_for_handshake() {
    let (url, server) = serve(1, |_, mut conn: ServerConn| async move {
        conn.drain().await;
    })
    .await;

    let aggregator = Arc::new(ExposureAggregator::new(6000.0, ExposureConfig::default()));
    let (connector, tokens) = parts(&url);
    let supervisor =
        StreamSupervisor::start(supervisor_config(0), connector, tokens, aggregator, None).unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    supervisor.stop().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let aggregator = Arc::new(ExposureAggregator::new(6000.0, ExposureConfig::default()));
    let (connector, tokens) = parts(&format!("ws://{addr}"));
    let supervisor =
        StreamSupervisor::start(supervisor_config(2), connector, tokens, aggregator, None).unwrap();

    tokio::time::timeout(Duration::from_secs(5), supervisor.finished().cancelled())
        .await
        .expect("supervisor did not give up");

    assert_eq!(supervisor.stats().reconnects(), 2);
    let err = supervisor.stop().await.unwrap_err();
    assert!(
        matches!(err, SupervisorError::RetriesExhausted { attempts: 2 }),
        "got {err:?}"
    );
}

#[tokio::test]
async fn invalid_config_spawns_nothing() {
    let mut config = supervisor_config(0);
    config.ladder.expiration = "2512".to_string();

    let aggregator = Arc::new(ExposureAggregator::new(6000.0, ExposureConfig::default()));
    let (connector, tokens) = parts("ws://127.0.0.1:1");
    let result = StreamSupervisor::start(config, connector, tokens, aggregator, None);
    assert!(matches!(result, Err(SupervisorError::InvalidConfig(_))));
}

/// Session that replays a fixed list of receive results, then idles.
struct ScriptedSession {
    inbound: VecDeque<Result<FeedMessage, FeedError>>,
}

#[async_trait]
impl FeedPort for ScriptedSession {
    fn state(&self) -> ConnectionState {
        ConnectionState::Streaming
    }

    async fn subscribe(&mut self, _entries: &[SubscriptionEntry]) -> Result<(), FeedError> {
        Ok(())
    }

    async fn receive(&mut self) -> Result<FeedMessage, FeedError> {
        match self.inbound.pop_front() {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {}
}

/// Fails three opens, streams once then drops, fails three more, then idles.
#[derive(Default)]
struct FlakyConnector {
    opens: AtomicUsize,
}

#[async_trait]
impl FeedConnector for FlakyConnector {
    async fn open(&self, _tokens: &dyn TokenProvider) -> Result<Box<dyn FeedPort>, FeedError> {
        let quote = || {
            Ok(FeedMessage::Data(vec![FeedEvent::Quote {
                symbol: "SPX".to_string(),
                bid_price: Some(6000.0),
                ask_price: Some(6002.0),
            }]))
        };
        match self.opens.fetch_add(1, Ordering::SeqCst) {
            0..=2 | 4..=6 => Err(FeedError::Connect("connection refused".to_string())),
            3 => Ok(Box::new(ScriptedSession {
                inbound: VecDeque::from([
                    quote(),
                    Err(FeedError::Transport("connection reset".to_string())),
                ]),
            })),
            _ => Ok(Box::new(ScriptedSession {
                inbound: VecDeque::from([quote()]),
            })),
        }
    }
}

#[tokio::test]
async fn backoff_resets_after_streaming() {
    let mut config = supervisor_config(0);
    config.reconnect = ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(1),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts: 0,
    };

    let connector = Arc::new(FlakyConnector::default());
    let aggregator = Arc::new(ExposureAggregator::new(6000.0, ExposureConfig::default()));
    let (status_tx, mut status_rx) = mpsc::channel(256);

    let supervisor = StreamSupervisor::start(
        config,
        Arc::clone(&connector) as Arc<dyn FeedConnector>,
        Arc::new(StaticTokenProvider::new(TOKEN).unwrap()),
        aggregator,
        Some(status_tx),
    )
    .unwrap();

    let counter = Arc::clone(&connector);
    wait_for(move || counter.opens.load(Ordering::SeqCst) >= 8).await;
    supervisor.stop().await.unwrap();

    let mut reconnects = Vec::new();
    while let Ok(event) = status_rx.try_recv() {
        if let SupervisorEvent::Reconnecting { attempt, delay } = event {
            reconnects.push((attempt, delay.as_millis()));
        }
    }
    assert_eq!(
        reconnects,
        vec![(1, 10), (2, 20), (3, 40), (1, 10), (2, 20), (3, 40), (4, 80)]
    );
}
