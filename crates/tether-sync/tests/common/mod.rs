#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_sync::{EngineHandle, EngineNotification, EngineSnapshot};
use tether_transport::{
    ConnectionEvent, ConversationHistory, PendingSend, Result, Transport, TransportError,
};
use tether_types::{
    ClientRequest, ConnectionState, Conversation, ConversationId, ConversationSummary,
    EngineConfig, Message, ModelDescriptor, ReconnectConfig, Role, ServerEvent,
};
use tokio::sync::{broadcast, mpsc};

/// In-process transport: records requests, lets tests push server events
#[derive(Default)]
pub struct FakeTransport {
    state: Mutex<ConnectionState>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<ConnectionEvent>>>,
    sent: Mutex<Vec<ClientRequest>>,
    fail_acks: AtomicBool,
    refuse_connect: AtomicBool,
    drop_during_connect: AtomicBool,
    connects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn broadcast(&self, event: ConnectionEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&self, next: ConnectionState) {
        let changed = {
            let mut state = self.state.lock();
            let changed = *state != next;
            *state = next;
            changed
        };
        if changed {
            self.broadcast(ConnectionEvent::State(next));
        }
    }

    pub fn emit(&self, event: ServerEvent) {
        self.broadcast(ConnectionEvent::Server(event));
    }

    pub fn drop_connection(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    pub fn fail_acks(&self, fail: bool) {
        self.fail_acks.store(fail, Ordering::SeqCst);
    }

    pub fn refuse_connect(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// The next connect() sees the socket open and close again before it
    /// returns `Ok`
    pub fn drop_during_connect(&self) {
        self.drop_during_connect.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<ClientRequest> {
        self.sent.lock().clone()
    }

    pub fn resumes(&self, id: &str) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|request| {
                matches!(request, ClientRequest::Resume { conversation_id } if conversation_id.as_str() == id)
            })
            .count()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<()> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if *self.state.lock() == ConnectionState::Disconnected {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.set_state(ConnectionState::Connected);
            if self.drop_during_connect.swap(false, Ordering::SeqCst) {
                self.set_state(ConnectionState::Disconnected);
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        self.set_state(ConnectionState::Disconnected);
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn dispatch(&self, request: ClientRequest) -> Result<PendingSend> {
        if !self.state().is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().push(request);

        if self.fail_acks.load(Ordering::SeqCst) {
            Ok(PendingSend::completed(Err(TransportError::Closed)))
        } else {
            Ok(PendingSend::completed(Ok(())))
        }
    }
}

/// In-process history service
#[derive(Default)]
pub struct FakeHistory {
    conversations: Mutex<HashMap<ConversationId, Conversation>>,
    delays: Mutex<HashMap<ConversationId, Duration>>,
    models: Mutex<Vec<ModelDescriptor>>,
    fetches: AtomicUsize,
}

impl FakeHistory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, conversation: Conversation) {
        self.conversations
            .lock()
            .insert(conversation.id.clone(), conversation);
    }

    pub fn delay(&self, id: &str, delay: Duration) {
        self.delays.lock().insert(ConversationId::from(id), delay);
    }

    pub fn set_models(&self, models: Vec<ModelDescriptor>) {
        *self.models.lock() = models;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationHistory for FakeHistory {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let delay = self.delays.lock().get(id).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);

        self.conversations
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(id.clone()))
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let mut summaries: Vec<_> = self
            .conversations
            .lock()
            .values()
            .map(Conversation::summary)
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        Ok(self.models.lock().clone())
    }
}

pub fn confirmed(role: Role, content: &str) -> Message {
    let mut message = Message::optimistic_user(content);
    message.role = role;
    message.pending = false;
    message
}

/// Conversation with `len` alternating user/assistant messages
pub fn history_of(id: &str, len: usize) -> Conversation {
    let mut conversation = Conversation::new(ConversationId::from(id), format!("Chat {}", id), "llama3.2");
    for i in 0..len {
        let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
        conversation.push(confirmed(role, &format!("message {}", i)));
    }
    conversation
}

pub fn test_config() -> EngineConfig {
    EngineConfig::default()
        .with_request_timeout(Duration::from_secs(2))
        .with_reconnect(ReconnectConfig {
            enabled: true,
            max_attempts: 1,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        })
}

/// Wait for the first notification matching `predicate`
pub async fn wait_for<F>(
    notifications: &mut broadcast::Receiver<EngineNotification>,
    mut predicate: F,
) -> EngineNotification
where
    F: FnMut(&EngineNotification) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match notifications.recv().await {
                Ok(notification) if predicate(&notification) => return notification,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("engine stopped"),
            }
        }
    })
    .await
    .expect("timed out waiting for notification")
}

/// Poll snapshots until `predicate` holds
pub async fn eventually<F>(handle: &EngineHandle, mut predicate: F) -> EngineSnapshot
where
    F: FnMut(&EngineSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = handle.snapshot().await.unwrap();
            if predicate(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held")
}

pub async fn wait_connected(handle: &EngineHandle) {
    eventually(handle, |s| s.connection.is_connected()).await;
}
