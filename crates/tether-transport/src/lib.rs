//! Connection layer for a local LLM serving backend
//!
//! Two seams live here: [`Transport`], the single streaming WebSocket
//! connection carrying requests out and generation events in, and
//! [`ConversationHistory`], the REST service holding full conversation
//! histories and the model list.

pub mod codec;
pub mod connection;
pub mod error;
pub mod history;
pub mod traits;

pub use connection::ConnectionManager;
pub use error::{Result, TransportError};
pub use history::HttpHistoryClient;
pub use traits::{ConnectionEvent, ConversationHistory, PendingSend, Transport};
