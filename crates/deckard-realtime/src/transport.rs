//! The duplex text-frame channel to the peer.
//!
//! A [`Connector`] opens a [`Transport`]: a pair of channels plus a pump task
//! that owns the socket. Dropping the transport's sender closes the socket
//! gracefully; the pump reports how the connection ended exactly once via
//! [`TransportEvent::Closed`].
//!
//! Inbound events are unbounded so the pump never waits on the runtime. The
//! runtime may be parked on a full outbound queue while an upload streams,
//! and only the pump can drain it.

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        protocol::{Message as WsMessage, frame::coding::CloseCode},
    },
};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open WebSocket: {0}")]
    Connect(#[from] tungstenite::Error),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Frame(String),
    /// The connection ended. `clean` is true only for a normal closure.
    Closed { clean: bool, reason: Option<String> },
}

pub struct Transport {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

impl Transport {
    pub fn new(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::UnboundedReceiver<TransportEvent>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            task,
        }
    }

    /// Closes the outbound side and lets the pump finish the close handshake
    /// in the background.
    pub fn close(self) {
        drop(self.outbound);
        drop(self.task);
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError>;
}

/// Connects over WebSocket using `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    outbound_capacity: usize,
}

impl WsConnector {
    pub fn new(outbound_capacity: usize) -> Self {
        Self {
            outbound_capacity: outbound_capacity.max(1),
        }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
        let (ws_stream, _) = connect_async(url).await?;
        info!(url, "WebSocket open");

        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump(ws_stream, outbound_rx, inbound_tx));
        Ok(Transport::new(outbound_tx, inbound_rx, Some(task)))
    }
}

async fn pump<S>(
    ws_stream: S,
    mut outbound_rx: mpsc::Receiver<String>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
) where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>>
        + Sink<WsMessage, Error = tungstenite::Error>
        + Unpin,
{
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let closed = loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                        break TransportEvent::Closed { clean: false, reason: Some(e.to_string()) };
                    }
                }
                None => {
                    debug!("Outbound channel closed; closing WebSocket.");
                    let _ = ws_tx.close().await;
                    break TransportEvent::Closed { clean: true, reason: Some("closed locally".to_string()) };
                }
            },
            incoming = ws_rx.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if inbound_tx.send(TransportEvent::Frame(text.as_str().to_owned())).is_err() {
                        let _ = ws_tx.close().await;
                        return;
                    }
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    // Flushes the close reply queued on receipt.
                    let _ = ws_tx.close().await;
                    let clean = frame.as_ref().is_none_or(|f| f.code == CloseCode::Normal);
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty());
                    break TransportEvent::Closed { clean, reason };
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    warn!(len = data.len(), "Ignoring binary frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    break TransportEvent::Closed { clean: false, reason: Some(e.to_string()) };
                }
                None => {
                    break TransportEvent::Closed { clean: false, reason: Some("connection dropped".to_string()) };
                }
            },
        }
    };
    let _ = inbound_tx.send(closed);
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory connector for engine tests.

    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// The peer side of a fake connection.
    pub struct PeerEnd {
        pub url: String,
        /// Frames the engine sent.
        pub sent: mpsc::Receiver<String>,
        /// Push frames or a closure to the engine.
        pub events: mpsc::UnboundedSender<TransportEvent>,
    }

    impl PeerEnd {
        pub async fn frame(&self, text: &str) {
            self.events
                .send(TransportEvent::Frame(text.to_string()))
                .unwrap();
        }

        pub async fn close(&self, clean: bool) {
            self.events
                .send(TransportEvent::Closed {
                    clean,
                    reason: None,
                })
                .unwrap();
        }

        pub async fn next_sent(&mut self) -> serde_json::Value {
            let text = tokio::time::timeout(std::time::Duration::from_secs(5), self.sent.recv())
                .await
                .expect("timed out waiting for an outbound frame")
                .expect("engine closed the transport");
            serde_json::from_str(&text).unwrap()
        }

        /// Next outbound frame whose `type` is not `audio`.
        pub async fn next_control(&mut self) -> serde_json::Value {
            loop {
                let frame = self.next_sent().await;
                if frame["type"] != "audio" {
                    return frame;
                }
            }
        }
    }

    /// Accepts connections while `fail` is unset, handing each peer end to
    /// the test through `peers`. With `stall` set, dials never resolve.
    pub struct FakeConnector {
        pub peers: mpsc::UnboundedSender<PeerEnd>,
        pub fail: Mutex<Option<String>>,
        pub stall: bool,
        pub capacity: usize,
        pub dials: AtomicUsize,
    }

    impl FakeConnector {
        pub fn new() -> (Self, mpsc::UnboundedReceiver<PeerEnd>) {
            Self::with_capacity(1024)
        }

        pub fn with_capacity(capacity: usize) -> (Self, mpsc::UnboundedReceiver<PeerEnd>) {
            let (peers, rx) = mpsc::unbounded_channel();
            (
                Self {
                    peers,
                    fail: Mutex::new(None),
                    stall: false,
                    capacity,
                    dials: AtomicUsize::new(0),
                },
                rx,
            )
        }

        pub fn failing(reason: &str) -> (Self, mpsc::UnboundedReceiver<PeerEnd>) {
            let (connector, rx) = Self::new();
            *connector.fail.lock().unwrap() = Some(reason.to_string());
            (connector, rx)
        }

        pub fn stalled() -> (Self, mpsc::UnboundedReceiver<PeerEnd>) {
            let (mut connector, rx) = Self::new();
            connector.stall = true;
            (connector, rx)
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, url: &str) -> Result<Transport, TransportError> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            if self.stall {
                std::future::pending::<()>().await;
            }
            if let Some(reason) = self.fail.lock().unwrap().clone() {
                return Err(TransportError::Other(reason));
            }
            let (outbound_tx, outbound_rx) = mpsc::channel(self.capacity);
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let _ = self.peers.send(PeerEnd {
                url: url.to_string(),
                sent: outbound_rx,
                events: inbound_tx,
            });
            Ok(Transport::new(outbound_tx, inbound_rx, None))
        }
    }
}
