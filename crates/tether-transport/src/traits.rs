use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tether_types::{
    ClientRequest, ConnectionState, Conversation, ConversationId, ConversationSummary,
    ModelDescriptor, ServerEvent,
};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, TransportError};

/// Everything a subscriber sees, in the order it happened
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    State(ConnectionState),
    Server(ServerEvent),
}

/// Acknowledgement of a request handed to the writer
///
/// Resolves once the frame has been written and flushed, or with
/// `TransportError::Closed` if the connection went away first.
pub struct PendingSend {
    ack: oneshot::Receiver<Result<()>>,
}

impl PendingSend {
    pub fn new(ack: oneshot::Receiver<Result<()>>) -> Self {
        Self { ack }
    }

    /// Already-resolved acknowledgement
    pub fn completed(result: Result<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { ack: rx }
    }

    /// Await the acknowledgement, failing with `Timeout` after `limit`
    pub async fn with_timeout(self, limit: Duration) -> Result<()> {
        match tokio::time::timeout(limit, self).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(limit)),
        }
    }
}

impl Future for PendingSend {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.ack).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(TransportError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The single streaming connection to the generation backend
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection; a no-op while connecting or connected
    async fn connect(&self) -> Result<()>;

    /// Close the connection and fail everything still in flight
    async fn disconnect(&self);

    fn state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Register a new subscriber for state changes and server events
    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent>;

    /// Enqueue a request without waiting for it to hit the wire
    ///
    /// Requests are written in dispatch order. Fails immediately with
    /// `NotConnected` when the connection is not established.
    fn dispatch(&self, request: ClientRequest) -> Result<PendingSend>;

    /// Dispatch and wait for the acknowledgement
    async fn send(&self, request: ClientRequest) -> Result<()> {
        self.dispatch(request)?.await
    }
}

/// REST-style conversation history service
#[async_trait]
pub trait ConversationHistory: Send + Sync {
    /// Full history of one conversation; `TransportError::NotFound` when the
    /// backend does not know the identifier
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation>;

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>>;

    /// Ordered list of models offered by the backend
    async fn list_models(&self) -> Result<Vec<ModelDescriptor>>;
}
