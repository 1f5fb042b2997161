use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tether_transport::TransportError;
use tether_types::ConversationId;
use thiserror::Error;

/// Mid-stream failure reported by the backend
///
/// Non-fatal: the live buffer is discarded but history is untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("Generation failed for {conversation_id}: {reason}")]
pub struct GenerationError {
    pub conversation_id: ConversationId,
    pub reason: String,
}

#[derive(Error, Debug, Clone)]
pub enum SyncError {
    #[error("Conversation not found: {0}")]
    NotFound(ConversationId),

    #[error("Not connected to backend")]
    NotConnected,

    #[error("Resume failed for {conversation_id}: {reason}")]
    ResumeFailure {
        conversation_id: ConversationId,
        reason: String,
    },

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection closed before the request was acknowledged")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(Arc<TransportError>),

    #[error("Load of {0} superseded by a newer selection")]
    Superseded(ConversationId),

    #[error("No conversation selected")]
    NoSelection,

    #[error("No model selected")]
    NoModel,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Conversation {0} has not been confirmed by the backend yet")]
    Unconfirmed(ConversationId),

    #[error("Sync engine stopped")]
    EngineStopped,
}

impl SyncError {
    /// Whether retrying later (after reconnecting) may succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NotConnected | Self::Timeout(_) | Self::Closed | Self::Superseded(_) => true,
            Self::Transport(e) => e.is_recoverable(),
            _ => false,
        }
    }
}

impl From<TransportError> for SyncError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NotFound(id) => Self::NotFound(id),
            TransportError::NotConnected => Self::NotConnected,
            TransportError::Timeout(limit) => Self::Timeout(limit),
            TransportError::Closed => Self::Closed,
            other => Self::Transport(Arc::new(other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_map_onto_sync_errors() {
        let not_found: SyncError = TransportError::NotFound(ConversationId::from("c1")).into();
        assert!(matches!(not_found, SyncError::NotFound(ref id) if id.as_str() == "c1"));

        let closed: SyncError = TransportError::Closed.into();
        assert!(matches!(closed, SyncError::Closed));
        assert!(closed.is_recoverable());

        let status: SyncError = TransportError::Status {
            status: 500,
            body: "boom".to_string(),
        }
        .into();
        assert!(matches!(status, SyncError::Transport(_)));
    }

    #[test]
    fn test_not_found_is_not_recoverable() {
        assert!(!SyncError::NotFound(ConversationId::from("c1")).is_recoverable());
        assert!(!SyncError::NoModel.is_recoverable());
    }
}
