//! Persistent WebSocket connection to the generation backend
//!
//! One `ConnectionManager` owns at most one live socket. Outbound requests
//! go through a single writer task so they hit the wire in dispatch order and
//! every request is acknowledged (or failed) explicitly. Inbound frames are
//! decoded by the reader task and fanned out to all subscribers together
//! with connection state changes, in the order they happened.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_types::{ClientRequest, ConnectionState, EngineConfig, ReconnectConfig};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::codec;
use crate::error::{Result, TransportError};
use crate::traits::{ConnectionEvent, PendingSend, Transport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

enum Outbound {
    Frame {
        text: String,
        ack: oneshot::Sender<Result<()>>,
    },
    Ping,
    Close,
}

struct Writer {
    epoch: u64,
    tx: mpsc::UnboundedSender<Outbound>,
}

/// State shared between the manager and its socket tasks
struct Shared {
    state: watch::Sender<ConnectionState>,
    writer: Mutex<Option<Writer>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
    epoch: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            writer: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
            epoch: AtomicU64::new(0),
        }
    }

    fn current(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn broadcast(&self, event: ConnectionEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Move to `next`, optionally only from `expected`
    ///
    /// The subscriber lock is held across the update so state events reach
    /// every subscriber in the order the transitions happened.
    fn transition(&self, expected: Option<ConnectionState>, next: ConnectionState) -> bool {
        let mut subscribers = self.subscribers.lock();
        let changed = self.state.send_if_modified(|state| {
            let allowed = expected.map_or(true, |e| *state == e);
            if allowed && *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
        if changed {
            subscribers.retain(|tx| tx.send(ConnectionEvent::State(next)).is_ok());
        }
        changed
    }

    fn take_writer(&self, epoch: u64) -> Option<Writer> {
        let mut slot = self.writer.lock();
        match slot.as_ref() {
            Some(writer) if writer.epoch == epoch => slot.take(),
            _ => None,
        }
    }

    /// Tear down connection `epoch` if it is still the live one
    fn close_epoch(&self, epoch: u64) {
        if let Some(writer) = self.take_writer(epoch) {
            let _ = writer.tx.send(Outbound::Close);
            self.transition(None, ConnectionState::Disconnected);
            warn!(epoch, "Connection lost");
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }
}

/// Manages the single WebSocket connection to the backend
pub struct ConnectionManager {
    ws_url: String,
    reconnect: ReconnectConfig,
    heartbeat_interval: Duration,
    shared: Arc<Shared>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl ConnectionManager {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Duration::from_secs(10),
            shared: Arc::new(Shared::new()),
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.ws_url.clone())
            .with_reconnect(config.reconnect.clone())
            .with_heartbeat_interval(config.heartbeat_interval)
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open the socket, retrying with exponential backoff
    async fn open_with_retry(&self) -> Result<WsStream> {
        let max_attempts = self.reconnect.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(url = %self.ws_url, attempt, max_attempts, "Connecting");

            match connect_async_with_config(self.ws_url.as_str(), Some(ws_config()), false).await {
                Ok((stream, _)) => return Ok(stream),
                Err(e) if attempt < max_attempts => {
                    let delay = self.reconnect.backoff(attempt);
                    warn!(error = %e, ?delay, attempt, "Connection attempt failed, retrying");
                    tokio::time::sleep(delay).await;

                    if self.shared.current() != ConnectionState::Connecting {
                        return Err(TransportError::Closed);
                    }
                    attempt += 1;
                }
                Err(e) => {
                    error!(error = %e, attempts = attempt, "Giving up on connection");
                    return Err(e.into());
                }
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(writer) = self.shared.writer.lock().take() {
            let _ = writer.tx.send(Outbound::Close);
        }
    }
}

#[async_trait]
impl Transport for ConnectionManager {
    async fn connect(&self) -> Result<()> {
        if self.shared.current() != ConnectionState::Disconnected {
            debug!(state = ?self.shared.current(), "connect() ignored");
            return Ok(());
        }

        let _guard = self.connect_lock.lock().await;
        if !self
            .shared
            .transition(Some(ConnectionState::Disconnected), ConnectionState::Connecting)
        {
            return Ok(());
        }

        let stream = match self.open_with_retry().await {
            Ok(stream) => stream,
            Err(e) => {
                self.shared
                    .transition(Some(ConnectionState::Connecting), ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let epoch = self.shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (sink, source) = stream.split();
        let (tx, rx) = mpsc::unbounded_channel();

        *self.shared.writer.lock() = Some(Writer {
            epoch,
            tx: tx.clone(),
        });

        // disconnect() may have run while the socket was opening
        if !self
            .shared
            .transition(Some(ConnectionState::Connecting), ConnectionState::Connected)
        {
            self.shared.take_writer(epoch);
            return Err(TransportError::Closed);
        }

        tokio::spawn(write_loop(sink, rx, Arc::clone(&self.shared), epoch));
        tokio::spawn(read_loop(source, Arc::clone(&self.shared), epoch));
        if !self.heartbeat_interval.is_zero() {
            tokio::spawn(heartbeat(tx, self.heartbeat_interval));
        }

        info!(url = %self.ws_url, epoch, "Connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(writer) = self.shared.writer.lock().take() {
            let _ = writer.tx.send(Outbound::Close);
        }
        self.shared.transition(None, ConnectionState::Disconnected);
        info!("Disconnected");
    }

    fn state(&self) -> ConnectionState {
        self.shared.current()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    fn dispatch(&self, request: ClientRequest) -> Result<PendingSend> {
        if !self.shared.current().is_connected() {
            return Err(TransportError::NotConnected);
        }

        let text = codec::encode_request(&request)?;
        let (ack_tx, ack_rx) = oneshot::channel();

        let slot = self.shared.writer.lock();
        let writer = slot.as_ref().ok_or(TransportError::NotConnected)?;
        writer
            .tx
            .send(Outbound::Frame { text, ack: ack_tx })
            .map_err(|_| TransportError::Closed)?;

        debug!(kind = request.kind(), conversation_id = ?request.conversation_id(), "Request dispatched");
        Ok(PendingSend::new(ack_rx))
    }
}

fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..Default::default()
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    shared: Arc<Shared>,
    epoch: u64,
) {
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame { text, ack } => {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    error!(error = %e, "Write failed");
                    let _ = ack.send(Err(e.into()));
                    break;
                }
                let _ = ack.send(Ok(()));
            }
            Outbound::Ping => {
                if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                    warn!(error = %e, "Heartbeat failed");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink.close().await;
                break;
            }
        }
    }

    shared.close_epoch(epoch);

    rx.close();
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Frame { ack, .. } = outbound {
            let _ = ack.send(Err(TransportError::Closed));
        }
    }
    debug!(epoch, "Writer task exiting");
}

async fn read_loop(mut source: SplitStream<WsStream>, shared: Arc<Shared>, epoch: u64) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Text(text)) => deliver_frame(&shared, epoch, &text),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => deliver_frame(&shared, epoch, &text),
                Err(e) => warn!(error = %e, "Dropping non UTF-8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                info!(?frame, "Backend closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Read failed");
                break;
            }
        }
    }

    shared.close_epoch(epoch);
    debug!(epoch, "Reader task exiting");
}

fn deliver_frame(shared: &Shared, epoch: u64, text: &str) {
    if !shared.is_current(epoch) {
        debug!(epoch, "Dropping frame from a stale connection");
        return;
    }

    for decoded in codec::decode_frame(text) {
        match decoded {
            Ok(event) => shared.broadcast(ConnectionEvent::Server(event)),
            Err(e) => warn!(error = %e, "Failed to decode server frame"),
        }
    }
}

async fn heartbeat(tx: mpsc::UnboundedSender<Outbound>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if tx.send(Outbound::Ping).is_err() {
            break;
        }
    }
}
