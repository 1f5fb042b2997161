//! The sync engine: one cooperative loop owning all client state
//!
//! Front-ends talk to it through a cloneable [`EngineHandle`]. Connection
//! events, front-end commands and completions of background work (history
//! fetches, acknowledgements, model and conversation listings) are handled
//! one at a time, each to completion. Background work runs in spawned tasks
//! that post their result back into the loop, so a slow fetch never blocks a
//! conversation switch.

use serde::Serialize;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tether_transport::{ConnectionEvent, ConversationHistory, PendingSend, Transport};
use tether_types::{
    ClientRequest, ConnectionState, Conversation, ConversationId, ConversationSummary,
    EngineConfig, Message, ModelDescriptor, ResumePolicy, ServerEvent,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::aggregator::{StreamOutcome, StreamingAggregator, StreamingView};
use crate::error::{GenerationError, Result, SyncError};
use crate::resume::{ResumeCoordinator, ResumeInputs};
use crate::store::{fetch_history, ConversationStore};

const COMMAND_BUFFER: usize = 256;
const NOTIFICATION_BUFFER: usize = 1024;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Changes front-ends re-render on
#[derive(Debug, Clone, PartialEq)]
pub enum EngineNotification {
    ConnectionChanged(ConnectionState),
    ConversationLoaded {
        conversation_id: ConversationId,
    },
    ConversationNotFound {
        conversation_id: ConversationId,
    },
    LoadFailed {
        conversation_id: ConversationId,
        reason: String,
    },
    /// Optimistic message appended or placeholder created
    ConversationUpdated {
        conversation_id: ConversationId,
    },
    ConversationStarted {
        request_id: String,
        conversation_id: ConversationId,
    },
    StreamingUpdated(StreamingView),
    MessageCommitted {
        conversation_id: ConversationId,
        message: Message,
    },
    GenerationFailed(GenerationError),
    SendFailed {
        conversation_id: ConversationId,
        reason: String,
    },
    ModelsLoaded {
        models: Vec<ModelDescriptor>,
        selected: Option<String>,
    },
    ConversationsListed(Vec<ConversationSummary>),
}

/// Point-in-time copy of the engine state
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    pub connection: ConnectionState,
    pub selected: Option<ConversationId>,
    pub history_loaded: bool,
    pub conversation: Option<Conversation>,
    pub streaming: StreamingView,
    pub summaries: Vec<ConversationSummary>,
    pub models: Vec<ModelDescriptor>,
    pub selected_model: Option<String>,
    pub last_error: Option<GenerationError>,
}

enum Command {
    Select {
        id: ConversationId,
        reply: Reply<()>,
    },
    ClearSelection {
        reply: Reply<()>,
    },
    StartConversation {
        text: String,
        model: Option<String>,
        reply: Reply<ConversationId>,
    },
    SendMessage {
        text: String,
        reply: Reply<()>,
    },
    FetchModels {
        reply: Reply<Vec<ModelDescriptor>>,
    },
    SetModel {
        model: String,
        reply: Reply<()>,
    },
    RefreshConversations {
        reply: Reply<Vec<ConversationSummary>>,
    },
    Conversation {
        id: ConversationId,
        reply: Reply<Option<Conversation>>,
    },
    ClearError {
        reply: Reply<Option<GenerationError>>,
    },
    Snapshot {
        reply: Reply<EngineSnapshot>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

enum Completion {
    Connected(Result<()>),
    HistoryLoaded {
        seq: u64,
        id: ConversationId,
        result: Result<Conversation>,
    },
    ResumeAcked {
        id: ConversationId,
        result: Result<()>,
    },
    SendAcked {
        id: ConversationId,
        result: Result<()>,
        reply: Option<Reply<()>>,
    },
    ModelsFetched {
        result: Result<Vec<ModelDescriptor>>,
        reply: Reply<Vec<ModelDescriptor>>,
    },
    ConversationsListed {
        result: Result<Vec<ConversationSummary>>,
        reply: Reply<Vec<ConversationSummary>>,
    },
}

struct PendingLoad {
    seq: u64,
    id: ConversationId,
    replies: Vec<Reply<()>>,
}

/// Cloneable front-end access to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    notifications: broadcast::Sender<EngineNotification>,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    /// Select a conversation and load its history
    ///
    /// Resolves once the history is installed. Fails with `NotFound` for an
    /// unknown identifier and with `Superseded` when another selection
    /// happened before the load finished.
    pub async fn select_conversation(&self, id: impl Into<ConversationId>) -> Result<()> {
        let id = id.into();
        self.request(|reply| Command::Select { id, reply }).await
    }

    pub async fn clear_selection(&self) -> Result<()> {
        self.request(|reply| Command::ClearSelection { reply }).await
    }

    /// Start a new conversation with `text` as its first message
    ///
    /// Returns the provisional identifier of the placeholder conversation;
    /// the server identifier follows as
    /// [`EngineNotification::ConversationStarted`].
    pub async fn start_new_conversation(
        &self,
        text: impl Into<String>,
        model: Option<String>,
    ) -> Result<ConversationId> {
        let text = text.into();
        self.request(|reply| Command::StartConversation { text, model, reply })
            .await
    }

    /// Send a message in the selected conversation
    pub async fn send_message(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request(|reply| Command::SendMessage { text, reply }).await
    }

    pub async fn fetch_models(&self) -> Result<Vec<ModelDescriptor>> {
        self.request(|reply| Command::FetchModels { reply }).await
    }

    pub async fn set_selected_model(&self, model: impl Into<String>) -> Result<()> {
        let model = model.into();
        self.request(|reply| Command::SetModel { model, reply }).await
    }

    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.request(|reply| Command::RefreshConversations { reply })
            .await
    }

    /// Cached copy of any conversation
    pub async fn conversation(&self, id: impl Into<ConversationId>) -> Result<Option<Conversation>> {
        let id = id.into();
        self.request(|reply| Command::Conversation { id, reply }).await
    }

    /// Take the last generation error
    pub async fn clear_error(&self) -> Result<Option<GenerationError>> {
        self.request(|reply| Command::ClearError { reply }).await
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotification> {
        self.notifications.subscribe()
    }

    /// Disconnect and stop the engine; later calls fail with `EngineStopped`
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

pub struct SyncEngine {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    history: Arc<dyn ConversationHistory>,
    store: ConversationStore,
    aggregator: StreamingAggregator,
    resume: ResumeCoordinator,
    connection: ConnectionState,
    notifications: broadcast::Sender<EngineNotification>,
    completions: mpsc::UnboundedSender<Completion>,
    pending_load: Option<PendingLoad>,
    load_seq: u64,
    connect_in_flight: bool,
    reconnect_attempt: u32,
    shutting_down: bool,
}

impl SyncEngine {
    /// Start the engine loop and begin connecting
    pub fn spawn(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        history: Arc<dyn ConversationHistory>,
    ) -> EngineHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (notifications, _) = broadcast::channel(NOTIFICATION_BUFFER);
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let events = transport.subscribe();

        let engine = Self {
            store: ConversationStore::new(config.max_cached_conversations),
            aggregator: StreamingAggregator::new(),
            resume: ResumeCoordinator::new(config.resume_policy),
            connection: transport.state(),
            notifications: notifications.clone(),
            completions: completion_tx,
            pending_load: None,
            load_seq: 0,
            connect_in_flight: false,
            reconnect_attempt: 0,
            shutting_down: false,
            config,
            transport,
            history,
        };

        tokio::spawn(engine.run(command_rx, events, completion_rx));

        EngineHandle {
            commands: command_tx,
            notifications,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
    ) {
        info!(ws_url = %self.config.ws_url, policy = ?self.config.resume_policy, "Sync engine started");
        self.spawn_connect(Duration::ZERO);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                Some(event) = events.recv() => match event {
                    ConnectionEvent::State(state) => self.on_connection_state(state),
                    ConnectionEvent::Server(event) => self.on_server_event(event),
                },
                Some(completion) = completions.recv() => self.handle_completion(completion),
            }
        }

        info!("Sync engine stopped");
    }

    async fn shutdown(&mut self) {
        self.shutting_down = true;
        self.supersede_load();
        self.aggregator.clear();
        self.transport.disconnect().await;
    }

    fn notify(&self, notification: EngineNotification) {
        // No receivers is fine
        let _ = self.notifications.send(notification);
    }

    // ---------------------------------------------------------------------
    // Connection
    // ---------------------------------------------------------------------

    fn spawn_connect(&mut self, delay: Duration) {
        if self.connect_in_flight || self.shutting_down {
            return;
        }
        self.connect_in_flight = true;

        let transport = Arc::clone(&self.transport);
        let completions = self.completions.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = transport.connect().await.map_err(SyncError::from);
            let _ = completions.send(Completion::Connected(result));
        });
    }

    fn schedule_reconnect(&mut self) {
        let reconnect = &self.config.reconnect;
        if !reconnect.enabled || self.shutting_down {
            return;
        }
        self.reconnect_attempt = self.reconnect_attempt.saturating_add(1);
        let delay = reconnect.backoff(self.reconnect_attempt);
        info!(attempt = self.reconnect_attempt, ?delay, "Scheduling reconnect");
        self.spawn_connect(delay);
    }

    fn on_connection_state(&mut self, state: ConnectionState) {
        let previous = mem::replace(&mut self.connection, state);
        if previous == state {
            return;
        }
        debug!(?previous, ?state, "Connection state changed");

        self.resume.on_connection_state(state);
        if state.is_connected() {
            self.reconnect_attempt = 0;
        } else if previous.is_connected() {
            // a resume on the next connection replays the generation
            if self.resume.policy() == ResumePolicy::PerConnection && self.aggregator.clear() {
                self.notify(EngineNotification::StreamingUpdated(self.aggregator.view()));
            }
            if state == ConnectionState::Disconnected {
                self.schedule_reconnect();
            }
        }

        self.evaluate_resume();
        self.notify(EngineNotification::ConnectionChanged(state));
    }

    // ---------------------------------------------------------------------
    // Resume
    // ---------------------------------------------------------------------

    fn evaluate_resume(&mut self) {
        let inputs = ResumeInputs {
            selected: self.store.selected().cloned(),
            connected: self.connection.is_connected(),
            history_loaded: self.store.history_loaded(),
        };
        let Some(id) = self.resume.evaluate(&inputs) else {
            return;
        };

        let request = ClientRequest::Resume {
            conversation_id: id.clone(),
        };
        match self.transport.dispatch(request) {
            Ok(pending) => {
                let limit = self.config.request_timeout;
                let completions = self.completions.clone();
                tokio::spawn(async move {
                    let result = pending.with_timeout(limit).await.map_err(SyncError::from);
                    let _ = completions.send(Completion::ResumeAcked { id, result });
                });
            }
            Err(e) => self.resume.record_failure(&id, &SyncError::from(e)),
        }
    }

    // ---------------------------------------------------------------------
    // Server events
    // ---------------------------------------------------------------------

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::ConversationStarted {
                request_id,
                conversation_id,
                title,
                model,
            } => {
                let Some(id) = self.store.promote(&request_id, conversation_id, title, &model) else {
                    debug!(%request_id, "conversation_started for unknown request");
                    return;
                };
                self.resume.mark_attached(&id);
                self.evaluate_resume();
                self.notify(EngineNotification::ConversationStarted {
                    request_id,
                    conversation_id: id,
                });
            }
            ServerEvent::ConversationSnapshot { conversation } => {
                let id = conversation.id.clone();
                if !self.store.is_cached(&id) && self.store.selected() != Some(&id) {
                    debug!(conversation_id = %id, "Ignoring snapshot of uncached conversation");
                    return;
                }
                self.store.install_history(conversation);
                self.evaluate_resume();
                self.notify(EngineNotification::ConversationLoaded {
                    conversation_id: id,
                });
            }
            event => self.on_stream_event(event),
        }
    }

    fn on_stream_event(&mut self, event: ServerEvent) {
        match self.aggregator.apply(self.store.selected(), &event) {
            StreamOutcome::Ignored => {}
            StreamOutcome::Updated | StreamOutcome::Finished => {
                self.notify(EngineNotification::StreamingUpdated(self.aggregator.view()));
            }
            StreamOutcome::Committed {
                conversation_id,
                message,
            } => {
                self.store.commit_message(&conversation_id, message.clone());
                self.notify(EngineNotification::StreamingUpdated(self.aggregator.view()));
                self.notify(EngineNotification::MessageCommitted {
                    conversation_id,
                    message,
                });
            }
            StreamOutcome::Failed(failure) => {
                warn!(error = %failure, "Generation failed");
                self.store.set_generation_error(failure.clone());
                self.notify(EngineNotification::StreamingUpdated(self.aggregator.view()));
                self.notify(EngineNotification::GenerationFailed(failure));
            }
        }
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Select { id, reply } => self.select(id, reply),
            Command::ClearSelection { reply } => {
                self.change_selection();
                self.store.deselect();
                let _ = reply.send(Ok(()));
            }
            Command::StartConversation { text, model, reply } => {
                let _ = reply.send(self.start_conversation(text, model));
            }
            Command::SendMessage { text, reply } => self.send_message(text, reply),
            Command::FetchModels { reply } => {
                let history = Arc::clone(&self.history);
                let limit = self.config.request_timeout;
                self.spawn_completion(async move {
                    let result = with_limit(limit, history.list_models()).await;
                    Completion::ModelsFetched { result, reply }
                });
            }
            Command::SetModel { model, reply } => {
                info!(%model, "Model selected");
                self.store.set_selected_model(model);
                let _ = reply.send(Ok(()));
            }
            Command::RefreshConversations { reply } => {
                let history = Arc::clone(&self.history);
                let limit = self.config.request_timeout;
                self.spawn_completion(async move {
                    let result = with_limit(limit, history.list_conversations()).await;
                    Completion::ConversationsListed { result, reply }
                });
            }
            Command::Conversation { id, reply } => {
                let _ = reply.send(Ok(self.store.conversation(&id).cloned()));
            }
            Command::ClearError { reply } => {
                let _ = reply.send(Ok(self.store.clear_error()));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(Ok(self.snapshot()));
            }
            // handled by the loop
            Command::Shutdown { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn select(&mut self, id: ConversationId, reply: Reply<()>) {
        if self.store.selected() == Some(&id) {
            if let Some(pending) = self.pending_load.as_mut().filter(|p| p.id == id) {
                pending.replies.push(reply);
                return;
            }
            if self.store.history_loaded() {
                let _ = reply.send(Ok(()));
                return;
            }
        }

        self.change_selection();
        self.store.select(id.clone());

        self.load_seq += 1;
        let seq = self.load_seq;
        self.pending_load = Some(PendingLoad {
            seq,
            id: id.clone(),
            replies: vec![reply],
        });

        info!(conversation_id = %id, "Loading conversation");
        let history = Arc::clone(&self.history);
        let limit = self.config.request_timeout;
        self.spawn_completion(async move {
            let result = fetch_history(history.as_ref(), &id, limit).await;
            Completion::HistoryLoaded { seq, id, result }
        });
    }

    /// Selection is about to move: drop the live buffer and stale loads
    fn change_selection(&mut self) {
        if self.aggregator.clear() {
            debug!("Discarded streaming buffer of previous conversation");
            self.notify(EngineNotification::StreamingUpdated(self.aggregator.view()));
        }
        self.supersede_load();
    }

    fn supersede_load(&mut self) {
        if let Some(pending) = self.pending_load.take() {
            debug!(conversation_id = %pending.id, "History load superseded");
            for reply in pending.replies {
                let _ = reply.send(Err(SyncError::Superseded(pending.id.clone())));
            }
        }
    }

    fn start_conversation(&mut self, text: String, model: Option<String>) -> Result<ConversationId> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let model = model
            .or_else(|| self.store.selected_model().map(str::to_string))
            .ok_or(SyncError::NoModel)?;

        self.change_selection();
        let request_id = uuid::Uuid::new_v4().to_string();
        let provisional = self.store.begin_new_conversation(&request_id, &model, &text);
        self.notify(EngineNotification::ConversationUpdated {
            conversation_id: provisional.clone(),
        });

        let request = ClientRequest::StartConversation {
            request_id,
            model,
            text,
        };
        match self.dispatch_or_report(&provisional, request) {
            Ok(pending) => {
                self.await_send(provisional.clone(), pending, None);
                Ok(provisional)
            }
            Err(e) => {
                self.store.start_failed(&provisional);
                Err(e)
            }
        }
    }

    fn send_message(&mut self, text: String, reply: Reply<()>) {
        let text = text.trim().to_string();
        if text.is_empty() {
            let _ = reply.send(Err(SyncError::EmptyMessage));
            return;
        }
        let Some(id) = self.store.selected().cloned() else {
            let _ = reply.send(Err(SyncError::NoSelection));
            return;
        };
        if self.store.is_provisional(&id) {
            match self.store.retry_start(&id) {
                Some((request_id, model)) => {
                    self.restart_conversation(id, request_id, model, text, reply)
                }
                None => {
                    let _ = reply.send(Err(SyncError::Unconfirmed(id)));
                }
            }
            return;
        }
        let Some(model) = self.store.model_for(&id) else {
            let _ = reply.send(Err(SyncError::NoModel));
            return;
        };

        self.store.add_user_message(&id, &text);
        self.notify(EngineNotification::ConversationUpdated {
            conversation_id: id.clone(),
        });

        let request = ClientRequest::SendMessage {
            conversation_id: id.clone(),
            text,
            model,
        };
        match self.dispatch_or_report(&id, request) {
            Ok(pending) => self.await_send(id, pending, Some(reply)),
            Err(e) => {
                let _ = reply.send(Err(e));
            }
        }
    }

    /// Start a placeholder whose first `start_conversation` never arrived,
    /// under the same request id so a late confirmation still matches
    fn restart_conversation(
        &mut self,
        id: ConversationId,
        request_id: String,
        model: String,
        text: String,
        reply: Reply<()>,
    ) {
        info!(conversation_id = %id, %request_id, "Retrying conversation start");
        self.store.add_user_message(&id, &text);
        self.notify(EngineNotification::ConversationUpdated {
            conversation_id: id.clone(),
        });

        let request = ClientRequest::StartConversation {
            request_id,
            model,
            text,
        };
        match self.dispatch_or_report(&id, request) {
            Ok(pending) => self.await_send(id, pending, Some(reply)),
            Err(e) => {
                self.store.start_failed(&id);
                let _ = reply.send(Err(e));
            }
        }
    }

    /// Dispatch in call order; an immediate failure is reported right away
    fn dispatch_or_report(
        &self,
        id: &ConversationId,
        request: ClientRequest,
    ) -> Result<PendingSend> {
        self.transport.dispatch(request).map_err(|e| {
            let e = SyncError::from(e);
            warn!(conversation_id = %id, error = %e, "Send failed");
            self.notify(EngineNotification::SendFailed {
                conversation_id: id.clone(),
                reason: e.to_string(),
            });
            e
        })
    }

    fn await_send(&self, id: ConversationId, pending: PendingSend, reply: Option<Reply<()>>) {
        let limit = self.config.request_timeout;
        self.spawn_completion(async move {
            let result = pending.with_timeout(limit).await.map_err(SyncError::from);
            Completion::SendAcked { id, result, reply }
        });
    }

    fn spawn_completion<F>(&self, work: F)
    where
        F: std::future::Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let _ = completions.send(work.await);
        });
    }

    // ---------------------------------------------------------------------
    // Completions
    // ---------------------------------------------------------------------

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Connected(result) => {
                self.connect_in_flight = false;
                match result {
                    // the socket may have dropped again before connect()
                    // returned, while a reconnect could not be scheduled
                    Ok(()) if !self.transport.state().is_connected() => {
                        warn!("Connection lost while connecting");
                        self.schedule_reconnect();
                    }
                    Ok(()) => {}
                    Err(e) => {
                        error!(error = %e, "Failed to connect");
                        self.schedule_reconnect();
                    }
                }
            }
            Completion::HistoryLoaded { seq, id, result } => self.on_history_loaded(seq, id, result),
            Completion::ResumeAcked { id, result } => match result {
                Ok(()) => debug!(conversation_id = %id, "Resume acknowledged"),
                Err(e) => self.resume.record_failure(&id, &e),
            },
            Completion::SendAcked { id, result, reply } => {
                if let Err(e) = &result {
                    warn!(conversation_id = %id, error = %e, "Send not acknowledged");
                    // no-op unless `id` is a placeholder
                    self.store.start_failed(&id);
                    self.notify(EngineNotification::SendFailed {
                        conversation_id: id,
                        reason: e.to_string(),
                    });
                }
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
            Completion::ModelsFetched { result, reply } => {
                if let Ok(models) = &result {
                    info!(count = models.len(), "Models loaded");
                    self.store.set_models(models.clone());
                    self.notify(EngineNotification::ModelsLoaded {
                        models: models.clone(),
                        selected: self.store.selected_model().map(str::to_string),
                    });
                }
                let _ = reply.send(result);
            }
            Completion::ConversationsListed { result, reply } => {
                if let Ok(summaries) = &result {
                    self.store.set_summaries(summaries.clone());
                    self.notify(EngineNotification::ConversationsListed(summaries.clone()));
                }
                let _ = reply.send(result);
            }
        }
    }

    fn on_history_loaded(&mut self, seq: u64, id: ConversationId, result: Result<Conversation>) {
        let pending = match self.pending_load.take() {
            Some(pending) if pending.seq == seq => pending,
            other => {
                self.pending_load = other;
                debug!(conversation_id = %id, "Discarding stale history load");
                return;
            }
        };

        let outcome = match result {
            Ok(conversation) => {
                self.store.install_history(conversation);
                self.evaluate_resume();
                self.notify(EngineNotification::ConversationLoaded {
                    conversation_id: id.clone(),
                });
                Ok(())
            }
            Err(SyncError::NotFound(_)) => {
                warn!(conversation_id = %id, "Conversation not found");
                self.store.forget(&id);
                self.notify(EngineNotification::ConversationNotFound {
                    conversation_id: id.clone(),
                });
                Err(SyncError::NotFound(id))
            }
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "Failed to load conversation");
                self.notify(EngineNotification::LoadFailed {
                    conversation_id: id,
                    reason: e.to_string(),
                });
                Err(e)
            }
        };

        for reply in pending.replies {
            let _ = reply.send(outcome.clone());
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            connection: self.connection,
            selected: self.store.selected().cloned(),
            history_loaded: self.store.history_loaded(),
            conversation: self.store.selected_conversation().cloned(),
            streaming: self.aggregator.view(),
            summaries: self.store.summaries().to_vec(),
            models: self.store.models().to_vec(),
            selected_model: self.store.selected_model().map(str::to_string),
            last_error: self.store.last_error().cloned(),
        }
    }
}

async fn with_limit<T, F>(limit: Duration, work: F) -> Result<T>
where
    F: std::future::Future<Output = tether_transport::Result<T>>,
{
    match tokio::time::timeout(limit, work).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}
