//! Shared types for the Tether chat client: the conversation model, the
//! streaming wire protocol and engine configuration.

pub mod config;
pub mod conversation;
pub mod protocol;

pub use config::{EngineConfig, ReconnectConfig, ResumePolicy};
pub use conversation::{
    generate_title, Conversation, ConversationId, ConversationSummary, Message, ModelDescriptor,
    ModelDetails, Role,
};
pub use protocol::{ClientRequest, ConnectionState, DeltaChannel, ServerEvent};
