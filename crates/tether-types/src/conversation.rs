use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, opaque conversation identifier issued by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single entry of a conversation's history
///
/// Field names follow the history service's JSON. `pending` never leaves the
/// client: it marks an optimistic message the server has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Role")]
    pub role: Role,
    #[serde(rename = "Content")]
    pub content: String,
    #[serde(rename = "Thinking", default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(rename = "CreatedAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub pending: bool,
}

impl Message {
    /// Locally created user message awaiting server confirmation
    pub fn optimistic_user(content: impl Into<String>) -> Self {
        Self {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            role: Role::User,
            content: content.into(),
            thinking: None,
            created_at: Utc::now(),
            pending: true,
        }
    }

    /// Assistant message built from a finished generation
    pub fn assistant(content: impl Into<String>, thinking: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            thinking,
            created_at: Utc::now(),
            pending: false,
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

/// A conversation and its ordered message history
///
/// Insertion order is display order; messages are never reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(rename = "ID")]
    pub id: ConversationId,
    #[serde(rename = "Title", default)]
    pub title: String,
    #[serde(rename = "Model", default)]
    pub model: String,
    #[serde(rename = "Messages", default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: ConversationId, title: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            model: model.into(),
            messages: Vec::new(),
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Messages confirmed by the server (everything not optimistic)
    pub fn confirmed_len(&self) -> usize {
        self.messages.iter().filter(|m| !m.pending).count()
    }

    pub fn summary(&self) -> ConversationSummary {
        ConversationSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            model: self.model.clone(),
        }
    }
}

/// Entry of the conversation list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(rename = "ID")]
    pub id: ConversationId,
    #[serde(rename = "Title", default)]
    pub title: String,
    #[serde(rename = "Model", default)]
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDetails {
    #[serde(default)]
    pub parameter_size: String,
}

/// Model offered by the serving backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub model: String,
    #[serde(default = "default_details")]
    pub details: ModelDetails,
}

fn default_details() -> ModelDetails {
    ModelDetails {
        parameter_size: String::new(),
    }
}

impl ModelDescriptor {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        parameter_size: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            details: ModelDetails {
                parameter_size: parameter_size.into(),
            },
        }
    }

    pub fn parameter_size(&self) -> &str {
        &self.details.parameter_size
    }
}

/// Derive a title from the first message of a conversation
///
/// Titles are at most 50 characters, cut at a word boundary and suffixed
/// with `...` when truncated.
pub fn generate_title(first_message: &str) -> String {
    let trimmed = first_message.trim();

    if trimmed.chars().count() <= 50 {
        return trimmed.to_string();
    }

    let truncated: String = trimmed.chars().take(50).collect();
    match truncated.rfind(' ') {
        Some(last_space) if last_space > 0 => format!("{}...", &truncated[..last_space]),
        _ => format!("{}...", truncated),
    }
}
