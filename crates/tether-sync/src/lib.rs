//! Streaming conversation synchronization
//!
//! Keeps client-side conversation state consistent with a generation
//! backend that streams output over a single connection:
//!
//! - [`ResumeCoordinator`] resumes an in-flight generation at most once per
//!   conversation while it is guarded
//! - [`StreamingAggregator`] folds thinking and content deltas into a live
//!   buffer and commits it on `done`
//! - [`ConversationStore`] holds the selection, history and optimistic
//!   messages
//! - [`SyncEngine`] runs all of the above on one event loop behind an
//!   [`EngineHandle`]

pub mod aggregator;
pub mod engine;
pub mod error;
pub mod resume;
pub mod store;

pub use aggregator::{StreamOutcome, StreamPhase, StreamingAggregator, StreamingView};
pub use engine::{EngineHandle, EngineNotification, EngineSnapshot, SyncEngine};
pub use error::{GenerationError, Result, SyncError};
pub use resume::{ResumeCoordinator, ResumeGuard, ResumeInputs};
pub use store::{fetch_history, reconcile, ConversationStore};
