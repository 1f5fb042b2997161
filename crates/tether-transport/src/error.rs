use std::time::Duration;
use tether_types::ConversationId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Not connected to backend")]
    NotConnected,

    #[error("Connection closed before the request was acknowledged")]
    Closed,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Conversation not found: {0}")]
    NotFound(ConversationId),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    #[error("Unexpected status ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("Malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether waiting for a reconnect can make the same request succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::NotFound(_) | Self::Decode(_) | Self::InvalidUrl(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
