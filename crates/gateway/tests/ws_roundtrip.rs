//! WebSocket transport round-trip against a local feed server.
//!
//! Starts a real listener, speaks the JSON envelope dialect over it, and
//! checks the transport surfaces decoded events, pings, and closes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal_macros::dec;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message};

use bookflow_core::{ExchangeId, FeedMessage, MarketId, Side};
use bookflow_gateway::{FeedTransport, JsonFeedCodec, WsTransport};

// ============================================================================
// Test Fixtures
// ============================================================================

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// What the server does once the subscription arrives
#[derive(Clone, Copy)]
enum ServerScript {
    StayOpen,
    CloseAfterFrames,
}

/// Accepts connections, replies to the subscribe frame with the given
/// envelopes, and reports everything it sees to the test
async fn start_feed_server(
    frames: Vec<String>,
    script: ServerScript,
) -> (SocketAddr, mpsc::Receiver<String>) {
    let (seen_tx, seen_rx) = mpsc::channel(32);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let seen = seen_tx.clone();
            let frames = frames.clone();
            tokio::spawn(serve_connection(stream, seen, frames, script));
        }
    });

    (addr, seen_rx)
}

async fn serve_connection(
    stream: TcpStream,
    seen: mpsc::Sender<String>,
    frames: Vec<String>,
    script: ServerScript,
) {
    let mut ws = accept_async(stream).await.expect("handshake");
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                seen.send(format!("text:{}", text)).await.ok();
                for frame in &frames {
                    ws.send(Message::Text(frame.clone().into()))
                        .await
                        .expect("server send");
                }
                if matches!(script, ServerScript::CloseAfterFrames) {
                    ws.send(Message::Close(None)).await.ok();
                    break;
                }
            }
            Ok(Message::Ping(_)) => {
                seen.send("ping".to_string()).await.ok();
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(_) => break,
        }
    }
}

fn envelope_frame() -> String {
    r#"{
        "market": "BTC-EUR",
        "sequence": 7,
        "events": [
            {"type": "add", "side": "buy", "level": {"rate": "100", "amount": "1"}}
        ]
    }"#
    .to_string()
}

fn transport_for(addr: SocketAddr) -> WsTransport {
    let codec = Arc::new(JsonFeedCodec::new(ExchangeId::new("bitvavo")));
    WsTransport::new(
        format!("ws://{}", addr),
        Arc::clone(&codec) as _,
        codec as _,
    )
}

// ============================================================================
// Round-trip Tests
// ============================================================================

#[tokio::test]
async fn test_subscribe_and_receive_decoded_events() {
    init_logging();
    let (addr, mut seen) = start_feed_server(vec![envelope_frame()], ServerScript::StayOpen).await;
    let transport = transport_for(addr);

    let mut connection = transport
        .connect(&[MarketId::new("BTC-EUR"), MarketId::new("ETH-EUR")])
        .await
        .expect("connect");

    // The server saw exactly one subscribe frame listing both markets
    let subscribe = timeout(Duration::from_secs(2), seen.recv())
        .await
        .expect("timed out waiting for subscribe")
        .expect("server gone");
    let payload: Value =
        serde_json::from_str(subscribe.strip_prefix("text:").expect("text frame")).expect("json");
    assert_eq!(payload["action"], "subscribe");
    assert_eq!(payload["markets"][0], "BTC-EUR");
    assert_eq!(payload["markets"][1], "ETH-EUR");

    // And the reply comes back decoded and exchange-qualified
    let message = timeout(Duration::from_secs(2), connection.messages.recv())
        .await
        .expect("timed out waiting for events")
        .expect("feed closed");
    let (market, sequence, events) = match message {
        FeedMessage::Events {
            market,
            sequence,
            events,
        } => (market, sequence, events),
        other => panic!("expected decoded events, got {:?}", other),
    };
    assert_eq!(market.exchange, ExchangeId::new("bitvavo"));
    assert_eq!(market.market, MarketId::new("BTC-EUR"));
    assert_eq!(sequence, 7);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        bookflow_core::FeedEvent::Add { side: Side::Buy, level } if level.rate == dec!(100)
    ));

    connection.control.close().await;
}

#[tokio::test]
async fn test_ping_reaches_the_server() {
    init_logging();
    let (addr, mut seen) = start_feed_server(Vec::new(), ServerScript::StayOpen).await;
    let transport = transport_for(addr);

    let connection = transport
        .connect(&[MarketId::new("BTC-EUR")])
        .await
        .expect("connect");

    // Skip the subscribe frame, then ping
    let _ = timeout(Duration::from_secs(2), seen.recv()).await.expect("subscribe");
    connection.control.ping().await.expect("ping");

    let observed = timeout(Duration::from_secs(2), seen.recv())
        .await
        .expect("timed out waiting for ping")
        .expect("server gone");
    assert_eq!(observed, "ping");

    connection.control.close().await;
}

#[tokio::test]
async fn test_server_close_surfaces_disconnected() {
    init_logging();
    let (addr, _seen) =
        start_feed_server(vec![envelope_frame()], ServerScript::CloseAfterFrames).await;
    let transport = transport_for(addr);

    let mut connection = transport
        .connect(&[MarketId::new("BTC-EUR")])
        .await
        .expect("connect");

    // The scripted frame arrives first, then the close
    let first = timeout(Duration::from_secs(2), connection.messages.recv())
        .await
        .expect("timed out waiting for events")
        .expect("feed closed early");
    assert!(matches!(first, FeedMessage::Events { .. }));

    let second = timeout(Duration::from_secs(2), connection.messages.recv())
        .await
        .expect("timed out waiting for disconnect")
        .expect("feed closed early");
    assert!(matches!(second, FeedMessage::Disconnected));
}

#[tokio::test]
async fn test_connect_refused_is_an_error() {
    init_logging();
    // Nothing is listening on this socket once the listener drops
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let transport = transport_for(addr);
    let result = transport.connect(&[MarketId::new("BTC-EUR")]).await;
    assert!(result.is_err());
}
