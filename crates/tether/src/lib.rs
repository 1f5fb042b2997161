//! # Tether
//!
//! Client for a locally hosted language-model serving backend that streams
//! model output, including a separate reasoning phase, over a WebSocket.
//!
//! ## Overview
//!
//! Tether keeps conversation state on the client consistent with the
//! backend while output streams in:
//!
//! - **Connection**: a single WebSocket with backoff, heartbeat and
//!   automatic reconnect
//! - **Resume**: an in-flight generation is resumed at most once per
//!   conversation and connection
//! - **Streaming**: thinking and content deltas fold into a live buffer that
//!   becomes a message on completion
//! - **Optimistic sends**: user messages appear immediately and are
//!   reconciled with server history
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tether::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SyncError> {
//!     let engine = TetherBuilder::new()
//!         .ws_url("ws://127.0.0.1:8080/ws")
//!         .api_url("http://127.0.0.1:8080/api")
//!         .build()?;
//!
//!     let mut notifications = engine.subscribe();
//!     engine.fetch_models().await?;
//!     engine.select_conversation("c1").await?;
//!     engine.send_message("Hello!").await?;
//!
//!     while let Ok(notification) = notifications.recv().await {
//!         match notification {
//!             EngineNotification::StreamingUpdated(view) => println!("{}", view.content),
//!             EngineNotification::MessageCommitted { .. } => break,
//!             _ => {}
//!         }
//!     }
//!
//!     engine.shutdown().await
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`tether-types`**: conversation model, wire protocol, configuration
//! - **`tether-transport`**: WebSocket connection manager and history client
//! - **`tether-sync`**: resume coordination, aggregation, store and engine

pub mod builder;
pub mod prelude;

pub use builder::TetherBuilder;

pub use tether_types::{
    generate_title, ClientRequest, ConnectionState, Conversation, ConversationId,
    ConversationSummary, DeltaChannel, EngineConfig, Message, ModelDescriptor, ReconnectConfig,
    ResumePolicy, Role, ServerEvent,
};

pub use tether_transport::{
    ConnectionEvent, ConnectionManager, ConversationHistory, HttpHistoryClient, PendingSend,
    Transport, TransportError,
};

pub use tether_sync::{
    ConversationStore, EngineHandle, EngineNotification, EngineSnapshot, GenerationError,
    ResumeCoordinator, ResumeGuard, StreamPhase, StreamingAggregator, StreamingView, SyncEngine,
    SyncError,
};
