//! Local dxLink server for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use gex_stream::DxLinkConfig;

/// Token the scripted server accepts.
pub const TOKEN: &str = "test-token";

/// Limit on any single server-side wait.
const SERVER_WAIT: Duration = Duration::from_secs(5);

/// Server side of one accepted connection.
pub struct ServerConn {
    ws: WebSocketStream<TcpStream>,
}

impl ServerConn {
    /// Next JSON frame from the client, or `None` once it disconnects.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            let frame = tokio::time::timeout(SERVER_WAIT, self.ws.next())
                .await
                .expect("client frame timed out")?;
            match frame.ok()? {
                Message::Text(text) => return Some(serde_json::from_str(text.as_str()).unwrap()),
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Next frame, which must have the given type.
    pub async fn expect(&mut self, frame_type: &str) -> Value {
        let frame = self.recv().await.expect("client disconnected");
        assert_eq!(frame["type"], frame_type, "unexpected frame {frame}");
        frame
    }

    /// Send a JSON frame.
    pub async fn send(&mut self, frame: Value) {
        self.ws.send(Message::text(frame.to_string())).await.unwrap();
    }

    /// Drive the server half of a successful handshake.
    pub async fn handshake(&mut self) {
        self.expect("SETUP").await;
        self.send(json!({
            "type": "SETUP", "channel": 0, "version": "test-server",
            "keepaliveTimeout": 60, "acceptKeepaliveTimeout": 60
        }))
        .await;
        self.send(json!({"type": "AUTH_STATE", "channel": 0, "state": "UNAUTHORIZED"}))
            .await;

        let auth = self.expect("AUTH").await;
        assert_eq!(auth["token"], TOKEN);
        self.send(json!({"type": "AUTH_STATE", "channel": 0, "state": "AUTHORIZED"}))
            .await;

        let request = self.expect("CHANNEL_REQUEST").await;
        assert_eq!(request["channel"], 1);
        assert_eq!(request["service"], "FEED");
        self.send(json!({
            "type": "CHANNEL_OPENED", "channel": 1, "service": "FEED",
            "parameters": {"contract": "AUTO"}
        }))
        .await;

        let setup = self.expect("FEED_SETUP").await;
        assert_eq!(setup["acceptDataFormat"], "FULL");
    }

    /// Send one `FEED_DATA` frame.
    pub async fn feed_data(&mut self, events: Value) {
        self.send(json!({"type": "FEED_DATA", "channel": 1, "data": events}))
            .await;
    }

    /// Read frames until the client disconnects.
    pub async fn drain(&mut self) {
        while self.recv().await.is_some() {}
    }

    /// Close the connection from the server side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Serve `connections` sequential connections with `handler`.
///
/// Returns the URL and the server task, which fails if a handler panicked.
pub async fn serve<F, Fut>(connections: usize, handler: F) -> (String, JoinHandle<()>)
where
    F: Fn(usize, ServerConn) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let task = tokio::spawn(async move {
        for index in 0..connections {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            handler(index, ServerConn { ws }).await;
        }
    });

    (format!("ws://{addr}"), task)
}

/// Client settings with short timeouts.
pub fn config(url: &str) -> DxLinkConfig {
    let mut config = DxLinkConfig::new(url);
    config.connect_timeout = Duration::from_secs(2);
    config.handshake_timeout = Duration::from_secs(2);
    config
}

/// Greeks and Summary events for one contract.
pub fn greeks_and_summary(symbol: &str, gamma: f64, open_interest: f64) -> Value {
    json!([
        {"eventType": "Greeks", "eventSymbol": symbol, "gamma": gamma, "delta": 0.5, "volatility": 0.2},
        {"eventType": "Summary", "eventSymbol": symbol, "openInterest": open_interest}
    ])
}
