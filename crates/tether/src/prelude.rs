//! Prelude module for convenient imports
//!
//! ```rust
//! use tether::prelude::*;
//! ```

pub use crate::{
    ConnectionState, Conversation, ConversationId, EngineConfig, EngineHandle,
    EngineNotification, EngineSnapshot, Message, ModelDescriptor, ResumePolicy, Role,
    StreamPhase, StreamingView, SyncError, TetherBuilder, Transport, ConversationHistory,
};
