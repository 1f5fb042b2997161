use serde::{Deserialize, Serialize};

use crate::conversation::{Conversation, ConversationId};

/// Which buffer a delta belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaChannel {
    /// Reasoning emitted before the final answer
    Thinking,
    /// Final answer text
    Content,
}

/// Requests sent to the generation backend over the streaming channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Create a conversation and generate a reply to its first message.
    /// The backend answers with `ServerEvent::ConversationStarted` carrying
    /// the same `request_id`.
    StartConversation {
        request_id: String,
        model: String,
        text: String,
    },

    SendMessage {
        conversation_id: ConversationId,
        text: String,
        model: String,
    },

    /// Re-attach to an in-progress (or just finished) generation
    Resume {
        conversation_id: ConversationId,
    },
}

impl ClientRequest {
    /// Conversation the request targets, if it already has an identifier
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::StartConversation { .. } => None,
            Self::SendMessage { conversation_id, .. } | Self::Resume { conversation_id } => {
                Some(conversation_id)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartConversation { .. } => "start_conversation",
            Self::SendMessage { .. } => "send_message",
            Self::Resume { .. } => "resume",
        }
    }
}

/// Events received from the backend, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Incremental fragment of model output
    Delta {
        conversation_id: ConversationId,
        channel: DeltaChannel,
        text: String,
    },

    /// Generation finished
    Done {
        conversation_id: ConversationId,
    },

    /// Generation failed mid-stream
    Error {
        conversation_id: ConversationId,
        reason: String,
    },

    /// Full history of a conversation
    ConversationSnapshot {
        conversation: Conversation,
    },

    /// Server-issued identifier for a `start_conversation` request
    ConversationStarted {
        request_id: String,
        conversation_id: ConversationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default)]
        model: String,
    },
}

impl ServerEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::Delta { conversation_id, .. }
            | Self::Done { conversation_id }
            | Self::Error { conversation_id, .. }
            | Self::ConversationStarted { conversation_id, .. } => conversation_id,
            Self::ConversationSnapshot { conversation } => &conversation.id,
        }
    }

    pub fn thinking(conversation_id: impl Into<ConversationId>, text: impl Into<String>) -> Self {
        Self::Delta {
            conversation_id: conversation_id.into(),
            channel: DeltaChannel::Thinking,
            text: text.into(),
        }
    }

    pub fn content(conversation_id: impl Into<ConversationId>, text: impl Into<String>) -> Self {
        Self::Delta {
            conversation_id: conversation_id.into(),
            channel: DeltaChannel::Content,
            text: text.into(),
        }
    }

    pub fn done(conversation_id: impl Into<ConversationId>) -> Self {
        Self::Done {
            conversation_id: conversation_id.into(),
        }
    }
}

/// Lifecycle of the single backend connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_resume() {
        let req = ClientRequest::Resume {
            conversation_id: "c1".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, r#"{"type":"resume","conversation_id":"c1"}"#);
    }

    #[test]
    fn test_request_serialization_send_message() {
        let req = ClientRequest::SendMessage {
            conversation_id: "c1".into(),
            text: "hello".to_string(),
            model: "llama3.2".to_string(),
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["type"], "send_message");
        assert_eq!(value["conversation_id"], "c1");
        assert_eq!(value["model"], "llama3.2");
        assert_eq!(req.kind(), "send_message");
    }

    #[test]
    fn test_event_deserialization_delta() {
        let json = r#"{"type":"delta","conversation_id":"c1","channel":"thinking","text":"let me "}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, ServerEvent::thinking("c1", "let me "));
    }

    #[test]
    fn test_event_deserialization_started_without_title() {
        let json = r#"{"type":"conversation_started","request_id":"r1","conversation_id":"c7","model":"m"}"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::ConversationStarted { request_id, conversation_id, title, .. } => {
                assert_eq!(request_id, "r1");
                assert_eq!(conversation_id.as_str(), "c7");
                assert!(title.is_none());
            }
            other => panic!("Expected ConversationStarted, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_conversation_id() {
        let json = r#"{"type":"conversation_snapshot","conversation":{"ID":"c2","Messages":[]}}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.conversation_id().as_str(), "c2");
    }

    #[test]
    fn test_connection_state_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Connected.is_connected());
    }
}
