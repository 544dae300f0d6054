use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use bookflow_core::{FeedMessage, MarketId};

use crate::domain::{FeedConnection, FeedControl, FeedDecoder, FeedTransport, TransportError};

#[derive(Error, Debug)]
pub enum WsError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Channel closed")]
    ChannelClosed,
}

impl From<WsError> for TransportError {
    fn from(e: WsError) -> Self {
        match e {
            WsError::Connection(inner) => TransportError::Connect(inner.to_string()),
            WsError::ChannelClosed => TransportError::Closed,
        }
    }
}

/// Builds the exchange-specific frames sent on an open socket.
/// Paired with a [`FeedDecoder`] this forms a full wire adapter.
pub trait FrameEncoder: Send + Sync {
    /// Subscription frames for the given markets, sent right after
    /// the socket opens and again on explicit re-subscribes
    fn subscribe_frames(&self, markets: &[MarketId]) -> Vec<String>;
}

enum WsCommand {
    Frame(String),
    Ping,
    Close,
}

/// WebSocket feed transport, generic over the wire format.
/// Infrastructure component - handles socket communication only; the
/// injected encoder/decoder pair speaks the exchange's dialect.
pub struct WsTransport {
    url: String,
    encoder: Arc<dyn FrameEncoder>,
    decoder: Arc<dyn FeedDecoder>,
}

impl WsTransport {
    pub fn new(
        url: impl Into<String>,
        encoder: Arc<dyn FrameEncoder>,
        decoder: Arc<dyn FeedDecoder>,
    ) -> Self {
        WsTransport {
            url: url.into(),
            encoder,
            decoder,
        }
    }

    async fn open(&self, markets: &[MarketId]) -> Result<FeedConnection, WsError> {
        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();

        // Subscribe before handing the socket to the writer task so the
        // feed starts in a known state
        for frame in self.encoder.subscribe_frames(markets) {
            write.send(Message::Text(frame.into())).await?;
        }

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);
        let (msg_tx, msg_rx) = mpsc::channel::<FeedMessage>(1024);

        // Outgoing side: drains the command channel onto the socket
        let msg_tx_write = msg_tx.clone();
        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                let result = match cmd {
                    WsCommand::Frame(text) => write.send(Message::Text(text.into())).await,
                    WsCommand::Ping => write.send(Message::Ping(Vec::new().into())).await,
                    WsCommand::Close => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    let _ = msg_tx_write.send(FeedMessage::Error(e.to_string())).await;
                    break;
                }
            }
        });

        // Incoming side: decodes frames into normalized feed messages
        let decoder = Arc::clone(&self.decoder);
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => match decoder.decode(&text) {
                        Some(message) => {
                            if msg_tx.send(message).await.is_err() {
                                break;
                            }
                        }
                        None => tracing::trace!("frame consumed by decoder: {}", text),
                    },
                    Ok(Message::Close(_)) => {
                        let _ = msg_tx.send(FeedMessage::Disconnected).await;
                        break;
                    }
                    Ok(Message::Ping(data)) => {
                        // tungstenite queues the pong; our next write flushes it
                        tracing::trace!("received ping: {:?}", data);
                    }
                    Ok(Message::Pong(_)) => {
                        tracing::trace!("received pong");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = msg_tx.send(FeedMessage::Error(e.to_string())).await;
                        let _ = msg_tx.send(FeedMessage::Disconnected).await;
                        break;
                    }
                }
            }
        });

        Ok(FeedConnection {
            control: Box::new(WsControl {
                commands: cmd_tx,
                encoder: Arc::clone(&self.encoder),
            }),
            messages: msg_rx,
        })
    }
}

#[async_trait]
impl FeedTransport for WsTransport {
    async fn connect(&self, markets: &[MarketId]) -> Result<FeedConnection, TransportError> {
        self.open(markets).await.map_err(TransportError::from)
    }
}

struct WsControl {
    commands: mpsc::Sender<WsCommand>,
    encoder: Arc<dyn FrameEncoder>,
}

#[async_trait]
impl FeedControl for WsControl {
    async fn ping(&self) -> Result<(), TransportError> {
        self.commands
            .send(WsCommand::Ping)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn subscribe(&self, markets: &[MarketId]) -> Result<(), TransportError> {
        for frame in self.encoder.subscribe_frames(markets) {
            self.commands
                .send(WsCommand::Frame(frame))
                .await
                .map_err(|_| TransportError::Closed)?;
        }
        Ok(())
    }

    async fn close(&self) {
        let _ = self.commands.send(WsCommand::Close).await;
    }
}
