//! The WebSocket connection underneath a session.
//!
//! The transport hands every inbound message to its owner verbatim and in
//! arrival order; it does not interpret frames. Outbound frames go through an
//! unbounded queue drained by a writer task, so `send` never blocks.

use crate::codec::RawFrame;
use crate::error::{RealtimeError, Result, StateError};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, error, info};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the transport reports back to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(RawFrame),
    /// The peer closed the connection or the stream ended.
    Close(Option<String>),
    Error(String),
}

struct Inner {
    state: TransportState,
    outbound: Option<mpsc::UnboundedSender<WsMessage>>,
    /// Bumped by every connect attempt and every close, so a stale attempt or
    /// the tasks of an old connection cannot change the state of a newer one.
    generation: u64,
    /// Dropped by `close` to abandon the handshake of a pending attempt.
    cancel: Option<oneshot::Sender<()>>,
}

/// An open connection: its id and the channel of its transport events.
#[derive(Debug)]
pub struct Connection {
    pub id: u64,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// A single persistent connection. Reusable: after it disconnects it may be
/// connected again.
pub struct Transport {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: TransportState::Disconnected,
                outbound: None,
                generation: 0,
                cancel: None,
            })),
        }
    }

    pub fn state(&self) -> TransportState {
        self.inner.lock().state
    }

    /// Opens the connection.
    ///
    /// The first event on the returned channel is always
    /// [`TransportEvent::Open`]. A `close` issued while the handshake is in
    /// flight abandons the attempt, which then fails without ever becoming
    /// the current connection.
    pub async fn connect(&self, url: &str) -> Result<Connection> {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let generation = {
            let mut inner = self.inner.lock();
            match inner.state {
                TransportState::Connecting => return Err(StateError::AlreadyConnecting.into()),
                TransportState::Connected => return Err(StateError::AlreadyConnected.into()),
                TransportState::Disconnected => inner.state = TransportState::Connecting,
            }
            inner.generation += 1;
            inner.cancel = Some(cancel_tx);
            inner.generation
        };
        let mut guard = ConnectingGuard {
            inner: &self.inner,
            generation,
            armed: true,
        };

        let mut ws_stream = tokio::select! {
            result = connect_async(url) => {
                let (ws_stream, _) = result.map_err(|e| {
                    RealtimeError::transport(format!("WebSocket connect error: {}", e))
                })?;
                ws_stream
            }
            _ = cancel_rx => {
                debug!("Connect attempt abandoned during handshake.");
                return Err(RealtimeError::transport("connect attempt was cancelled"));
            }
        };

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let current = {
            let mut inner = self.inner.lock();
            let current = inner.generation == generation;
            if current {
                inner.state = TransportState::Connected;
                inner.outbound = Some(outbound_tx);
                inner.cancel = None;
            }
            current
        };
        if !current {
            // Closed after the handshake finished but before it was installed.
            let _ = ws_stream.close(None).await;
            return Err(RealtimeError::transport("connect attempt was cancelled"));
        }
        guard.armed = false;
        info!("WebSocket connection established.");

        let (sink, source) = ws_stream.split();
        let _ = event_tx.send(TransportEvent::Open);
        tokio::spawn(write_loop(sink, outbound_rx, event_tx.clone()));
        tokio::spawn(read_loop(source, event_tx, self.inner.clone(), generation));
        Ok(Connection {
            id: generation,
            events: event_rx,
        })
    }

    /// Queues a frame for transmission. Frames go out in call order.
    pub fn send(&self, frame: RawFrame) -> Result<()> {
        let inner = self.inner.lock();
        let outbound = match (&inner.state, &inner.outbound) {
            (TransportState::Connected, Some(outbound)) => outbound,
            _ => return Err(StateError::NotConnected.into()),
        };
        let message = match frame {
            RawFrame::Text(text) => WsMessage::Text(text.into()),
            RawFrame::Binary(bytes) => WsMessage::Binary(bytes.into()),
        };
        outbound
            .send(message)
            .map_err(|_| RealtimeError::transport("writer task has stopped"))
    }

    /// Starts the close handshake and releases the connection, or abandons
    /// a connect attempt still in its handshake. Safe to call in any state.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        Self::release(&mut inner);
    }

    /// Like [`close`](Self::close), but only if `id` is still the current
    /// connection. Closing a connection that was already replaced is a no-op.
    pub fn close_connection(&self, id: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == id {
            Self::release(&mut inner);
        }
    }

    fn release(inner: &mut Inner) {
        if inner.outbound.take().is_some() {
            debug!("Closing WebSocket connection.");
        }
        if inner.cancel.take().is_some() {
            debug!("Cancelling pending connect attempt.");
        }
        inner.generation += 1;
        inner.state = TransportState::Disconnected;
    }
}

/// Puts the transport back to `Disconnected` if a connect attempt fails or
/// its future is dropped mid-flight.
struct ConnectingGuard<'a> {
    inner: &'a Arc<Mutex<Inner>>,
    generation: u64,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.inner.lock();
            if inner.generation == self.generation && inner.state == TransportState::Connecting {
                inner.state = TransportState::Disconnected;
                inner.cancel = None;
            }
        }
    }
}

fn mark_disconnected(inner: &Mutex<Inner>, generation: u64) {
    let mut inner = inner.lock();
    if inner.generation == generation {
        inner.state = TransportState::Disconnected;
        inner.outbound = None;
    }
}

async fn write_loop(
    mut sink: WsSink,
    mut outbound: mpsc::UnboundedReceiver<WsMessage>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = sink.send(message).await {
            error!("Error writing to WebSocket: {}", e);
            let _ = events.send(TransportEvent::Error(e.to_string()));
            return;
        }
    }
    // The sender was dropped by `close`; finish with a close frame.
    let _ = sink.close().await;
}

async fn read_loop(
    mut source: WsSource,
    events: mpsc::UnboundedSender<TransportEvent>,
    inner: Arc<Mutex<Inner>>,
    generation: u64,
) {
    while let Some(message) = source.next().await {
        let event = match message {
            Ok(WsMessage::Text(text)) => TransportEvent::Message(RawFrame::Text(text.as_str().to_owned())),
            Ok(WsMessage::Binary(bytes)) => TransportEvent::Message(RawFrame::Binary(Bytes::from(bytes))),
            Ok(WsMessage::Close(frame)) => {
                let reason = frame
                    .map(|f| f.reason.as_str().to_owned())
                    .filter(|r| !r.is_empty());
                info!(?reason, "WebSocket connection closed by server.");
                mark_disconnected(&inner, generation);
                let _ = events.send(TransportEvent::Close(reason));
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("Error reading from WebSocket: {}", e);
                mark_disconnected(&inner, generation);
                let _ = events.send(TransportEvent::Error(e.to_string()));
                return;
            }
        };
        if events.send(event).is_err() {
            // Owner is gone.
            break;
        }
    }
    mark_disconnected(&inner, generation);
    let _ = events.send(TransportEvent::Close(None));
}
