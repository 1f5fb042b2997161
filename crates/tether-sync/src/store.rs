use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tether_transport::ConversationHistory;
use tether_types::{
    generate_title, Conversation, ConversationId, ConversationSummary, Message, ModelDescriptor,
};
use tracing::{debug, info};

use crate::error::{GenerationError, Result, SyncError};

/// Fetch one conversation's history, bounded by `limit`
pub async fn fetch_history(
    history: &dyn ConversationHistory,
    id: &ConversationId,
    limit: Duration,
) -> Result<Conversation> {
    match tokio::time::timeout(limit, history.get_conversation(id)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(SyncError::Timeout(limit)),
    }
}

/// Canonical in-memory client state
///
/// Holds the conversation cache, the selection, optimistic messages, the
/// model list and the last generation failure. All mutation goes through
/// these methods; the store performs no I/O.
#[derive(Debug)]
pub struct ConversationStore {
    conversations: HashMap<ConversationId, Conversation>,
    /// Least recently selected first
    recency: VecDeque<ConversationId>,
    summaries: Vec<ConversationSummary>,
    selected: Option<ConversationId>,
    history_loaded: bool,
    /// request_id -> placeholder awaiting its server id
    pending_new: HashMap<String, PendingStart>,
    models: Vec<ModelDescriptor>,
    selected_model: Option<String>,
    last_error: Option<GenerationError>,
    max_cached: usize,
}

#[derive(Debug)]
struct PendingStart {
    provisional: ConversationId,
    model: String,
    /// A `start_conversation` is on the wire; cleared when it fails
    in_flight: bool,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(16)
    }
}

impl ConversationStore {
    pub fn new(max_cached: usize) -> Self {
        Self {
            conversations: HashMap::new(),
            recency: VecDeque::new(),
            summaries: Vec::new(),
            selected: None,
            history_loaded: false,
            pending_new: HashMap::new(),
            models: Vec::new(),
            selected_model: None,
            last_error: None,
            max_cached: max_cached.max(1),
        }
    }

    // ---------------------------------------------------------------------
    // Selection
    // ---------------------------------------------------------------------

    pub fn selected(&self) -> Option<&ConversationId> {
        self.selected.as_ref()
    }

    /// Whether the selected conversation's server history has been installed
    pub fn history_loaded(&self) -> bool {
        self.selected.is_some() && self.history_loaded
    }

    pub fn selected_conversation(&self) -> Option<&Conversation> {
        self.selected.as_ref().and_then(|id| self.conversations.get(id))
    }

    /// Select `id`; its history counts as not loaded until installed again
    pub fn select(&mut self, id: ConversationId) {
        self.touch(&id);
        self.selected = Some(id);
        self.history_loaded = false;
        self.evict();
    }

    pub fn deselect(&mut self) {
        self.selected = None;
        self.history_loaded = false;
    }

    // ---------------------------------------------------------------------
    // Conversations
    // ---------------------------------------------------------------------

    pub fn conversation(&self, id: &ConversationId) -> Option<&Conversation> {
        self.conversations.get(id)
    }

    pub fn is_cached(&self, id: &ConversationId) -> bool {
        self.conversations.contains_key(id)
    }

    pub fn cached_len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether `id` is a local placeholder still waiting for its server id
    pub fn is_provisional(&self, id: &ConversationId) -> bool {
        self.pending_new.values().any(|pending| &pending.provisional == id)
    }

    /// Whether a `start_conversation` for placeholder `id` may still be
    /// answered by the backend
    pub fn is_awaiting_start(&self, id: &ConversationId) -> bool {
        self.pending_new
            .values()
            .any(|pending| &pending.provisional == id && pending.in_flight)
    }

    /// The `start_conversation` for placeholder `id` was not delivered; the
    /// next send in it starts the conversation again
    pub fn start_failed(&mut self, id: &ConversationId) -> bool {
        match self.pending_new.values_mut().find(|p| &p.provisional == id) {
            Some(pending) => {
                pending.in_flight = false;
                debug!(conversation_id = %id, "Start of conversation failed");
                true
            }
            None => false,
        }
    }

    /// Claim a failed placeholder for another `start_conversation`,
    /// returning its request id and model
    pub fn retry_start(&mut self, id: &ConversationId) -> Option<(String, String)> {
        let (request_id, pending) = self
            .pending_new
            .iter_mut()
            .find(|(_, p)| &p.provisional == id && !p.in_flight)?;
        pending.in_flight = true;
        Some((request_id.clone(), pending.model.clone()))
    }

    /// Install server history, keeping optimistic messages it lacks
    pub fn install_history(&mut self, server: Conversation) {
        let id = server.id.clone();
        let merged = match self.conversations.remove(&id) {
            Some(local) => Conversation {
                messages: reconcile(server.messages, &local.messages),
                title: if server.title.is_empty() { local.title } else { server.title },
                model: if server.model.is_empty() { local.model } else { server.model },
                id: server.id,
            },
            None => server,
        };

        debug!(conversation_id = %id, messages = merged.len(), "History installed");
        self.upsert_summary(merged.summary());
        self.conversations.insert(id.clone(), merged);
        self.touch(&id);

        if self.selected.as_ref() == Some(&id) {
            self.history_loaded = true;
            // sends continue with the model the conversation was held with
            let model = self.conversations.get(&id).map(|c| &c.model);
            if let Some(model) = model.filter(|m| !m.is_empty()) {
                if self.selected_model.as_ref() != Some(model) {
                    debug!(conversation_id = %id, %model, "Adopting conversation model");
                    self.selected_model = Some(model.clone());
                }
            }
        }
        self.evict();
    }

    /// Drop a conversation the backend does not know
    pub fn forget(&mut self, id: &ConversationId) {
        self.conversations.remove(id);
        self.recency.retain(|cached| cached != id);
        self.summaries.retain(|summary| &summary.id != id);
        if self.selected.as_ref() == Some(id) {
            self.deselect();
        }
    }

    /// Optimistically append a user message; it stays even if sending fails
    pub fn add_user_message(&mut self, id: &ConversationId, text: &str) -> &Message {
        let model = self.selected_model.clone().unwrap_or_default();
        let conversation = self
            .conversations
            .entry(id.clone())
            .or_insert_with(|| Conversation::new(id.clone(), generate_title(text), model));
        conversation.push(Message::optimistic_user(text));
        &conversation.messages[conversation.messages.len() - 1]
    }

    /// Append a finished assistant message
    pub fn commit_message(&mut self, id: &ConversationId, message: Message) -> bool {
        match self.conversations.get_mut(id) {
            Some(conversation) => {
                conversation.push(message);
                true
            }
            None => {
                debug!(conversation_id = %id, "Dropping message for uncached conversation");
                false
            }
        }
    }

    /// Create a placeholder conversation holding the optimistic first
    /// message, select it and remember `request_id` for promotion
    pub fn begin_new_conversation(
        &mut self,
        request_id: &str,
        model: &str,
        first_text: &str,
    ) -> ConversationId {
        let provisional = ConversationId::new(format!("pending-{}", request_id));
        let mut conversation =
            Conversation::new(provisional.clone(), generate_title(first_text), model);
        conversation.push(Message::optimistic_user(first_text));

        self.conversations.insert(provisional.clone(), conversation);
        self.pending_new.insert(
            request_id.to_string(),
            PendingStart {
                provisional: provisional.clone(),
                model: model.to_string(),
                in_flight: true,
            },
        );
        self.select(provisional.clone());
        provisional
    }

    /// Re-key the placeholder for `request_id` to its server identifier
    ///
    /// The promoted conversation inherits the selection (when the
    /// placeholder was selected) and counts as loaded: its history is
    /// exactly what the client sent.
    pub fn promote(
        &mut self,
        request_id: &str,
        server_id: ConversationId,
        title: Option<String>,
        model: &str,
    ) -> Option<ConversationId> {
        let provisional = self.pending_new.remove(request_id)?.provisional;
        let mut conversation = self.conversations.remove(&provisional)?;

        conversation.id = server_id.clone();
        if let Some(title) = title.filter(|t| !t.is_empty()) {
            conversation.title = title;
        }
        if !model.is_empty() {
            conversation.model = model.to_string();
        }

        self.recency.retain(|cached| cached != &provisional);
        self.summaries.insert(0, conversation.summary());
        self.conversations.insert(server_id.clone(), conversation);
        self.touch(&server_id);

        if self.selected.as_ref() == Some(&provisional) {
            self.selected = Some(server_id.clone());
            self.history_loaded = true;
        }

        info!(%provisional, conversation_id = %server_id, "Conversation confirmed by backend");
        Some(server_id)
    }

    // ---------------------------------------------------------------------
    // Conversation list, models, errors
    // ---------------------------------------------------------------------

    pub fn summaries(&self) -> &[ConversationSummary] {
        &self.summaries
    }

    pub fn set_summaries(&mut self, summaries: Vec<ConversationSummary>) {
        self.summaries = summaries;
    }

    fn upsert_summary(&mut self, summary: ConversationSummary) {
        match self.summaries.iter_mut().find(|s| s.id == summary.id) {
            Some(existing) => *existing = summary,
            None => self.summaries.push(summary),
        }
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Replace the model list; an unset selection defaults to the first
    /// model, an existing one is kept even if the list no longer offers it
    pub fn set_models(&mut self, models: Vec<ModelDescriptor>) {
        if self.selected_model.is_none() {
            self.selected_model = models.first().map(|m| m.model.clone());
        }
        self.models = models;
    }

    pub fn selected_model(&self) -> Option<&str> {
        self.selected_model.as_deref()
    }

    pub fn set_selected_model(&mut self, model: impl Into<String>) {
        self.selected_model = Some(model.into());
    }

    /// Model for a send to `id`: the explicit selection, else the
    /// conversation's own model
    pub fn model_for(&self, id: &ConversationId) -> Option<String> {
        self.selected_model.clone().or_else(|| {
            self.conversations
                .get(id)
                .map(|c| c.model.clone())
                .filter(|m| !m.is_empty())
        })
    }

    pub fn last_error(&self) -> Option<&GenerationError> {
        self.last_error.as_ref()
    }

    pub fn set_generation_error(&mut self, error: GenerationError) {
        self.last_error = Some(error);
    }

    pub fn clear_error(&mut self) -> Option<GenerationError> {
        self.last_error.take()
    }

    // ---------------------------------------------------------------------
    // Eviction
    // ---------------------------------------------------------------------

    fn touch(&mut self, id: &ConversationId) {
        self.recency.retain(|cached| cached != id);
        self.recency.push_back(id.clone());
    }

    /// Drop least recently selected conversations beyond the cache bound.
    /// The selection and placeholders the backend may still confirm are
    /// never evicted.
    fn evict(&mut self) {
        while self.conversations.len() > self.max_cached {
            let victim = self.recency.iter().position(|id| {
                self.conversations.contains_key(id)
                    && self.selected.as_ref() != Some(id)
                    && !self.is_awaiting_start(id)
            });
            let Some(index) = victim else { break };
            if let Some(id) = self.recency.remove(index) {
                self.conversations.remove(&id);
                self.pending_new.retain(|_, pending| pending.provisional != id);
                debug!(conversation_id = %id, "Evicted conversation");
            }
        }
        let conversations = &self.conversations;
        let selected = &self.selected;
        self.recency
            .retain(|id| conversations.contains_key(id) || selected.as_ref() == Some(id));
    }
}

/// Merge server history with local messages
///
/// Server messages win. A local optimistic message is dropped once the
/// server list contains a user message with the same content at or after
/// the position the optimistic message was appended at; matches are taken
/// in order so two identical sends need two server messages. Unmatched
/// optimistic messages are kept after the server messages.
pub fn reconcile(server: Vec<Message>, local: &[Message]) -> Vec<Message> {
    let mut unmatched = Vec::new();
    let mut cursor = 0;
    let mut confirmed_before = 0;

    for message in local {
        if !message.pending {
            confirmed_before += 1;
            continue;
        }

        let from = cursor.max(confirmed_before);
        let found = server
            .iter()
            .skip(from)
            .position(|m| m.is_user() && m.content == message.content);

        match found {
            Some(offset) => cursor = from + offset + 1,
            None => unmatched.push(message.clone()),
        }
    }

    let mut merged = server;
    merged.extend(unmatched);
    merged
}
