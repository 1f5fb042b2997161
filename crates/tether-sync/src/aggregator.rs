use serde::Serialize;
use tether_types::{ConversationId, DeltaChannel, Message, ServerEvent};
use tracing::debug;

use crate::error::GenerationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPhase {
    #[default]
    Idle,
    Thinking,
    Answering,
}

/// Read-only copy of the live streaming buffer
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct StreamingView {
    pub conversation_id: Option<ConversationId>,
    pub phase: StreamPhase,
    pub thinking: Option<String>,
    pub content: String,
}

/// What applying one server event did
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome {
    /// Not a streaming event, or not for the selected conversation
    Ignored,
    Updated,
    /// `done` arrived; `message` belongs at the end of the conversation
    Committed {
        conversation_id: ConversationId,
        message: Message,
    },
    /// `done` with nothing buffered
    Finished,
    Failed(GenerationError),
}

/// Folds delta events of the selected conversation into transient buffers
///
/// At most one buffer is live. It becomes a message only on `done`;
/// errors and selection changes drop it without committing anything.
#[derive(Debug, Default)]
pub struct StreamingAggregator {
    conversation_id: Option<ConversationId>,
    phase: StreamPhase,
    thinking: Option<String>,
    content: String,
}

impl StreamingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == StreamPhase::Idle
    }

    pub fn view(&self) -> StreamingView {
        StreamingView {
            conversation_id: self.conversation_id.clone(),
            phase: self.phase,
            thinking: self.thinking.clone(),
            content: self.content.clone(),
        }
    }

    pub fn apply(&mut self, selected: Option<&ConversationId>, event: &ServerEvent) -> StreamOutcome {
        let id = event.conversation_id();
        let is_stream_event = matches!(
            event,
            ServerEvent::Delta { .. } | ServerEvent::Done { .. } | ServerEvent::Error { .. }
        );
        if !is_stream_event {
            return StreamOutcome::Ignored;
        }
        if selected != Some(id) {
            debug!(conversation_id = %id, "Ignoring stream event for unselected conversation");
            return StreamOutcome::Ignored;
        }

        match event {
            ServerEvent::Delta { channel, text, .. } => {
                self.adopt(id);
                match channel {
                    DeltaChannel::Thinking => self.push_thinking(text),
                    DeltaChannel::Content => self.push_content(text),
                }
                StreamOutcome::Updated
            }
            ServerEvent::Done { .. } => self.finish(id),
            ServerEvent::Error { reason, .. } => {
                let discarded = self.clear();
                debug!(conversation_id = %id, discarded, "Generation failed");
                StreamOutcome::Failed(GenerationError {
                    conversation_id: id.clone(),
                    reason: reason.clone(),
                })
            }
            _ => StreamOutcome::Ignored,
        }
    }

    /// Drop the live buffer without committing; true if one was live
    pub fn clear(&mut self) -> bool {
        let was_live = !self.is_idle();
        self.conversation_id = None;
        self.phase = StreamPhase::Idle;
        self.thinking = None;
        self.content.clear();
        was_live
    }

    /// Point the buffer at `id`, dropping anything buffered for another one
    fn adopt(&mut self, id: &ConversationId) {
        if self.conversation_id.as_ref() != Some(id) {
            self.clear();
            self.conversation_id = Some(id.clone());
        }
    }

    fn push_thinking(&mut self, text: &str) {
        self.thinking.get_or_insert_with(String::new).push_str(text);
        if self.phase == StreamPhase::Idle {
            self.phase = StreamPhase::Thinking;
        }
    }

    fn push_content(&mut self, text: &str) {
        self.content.push_str(text);
        self.phase = StreamPhase::Answering;
    }

    fn finish(&mut self, id: &ConversationId) -> StreamOutcome {
        let buffered = self.conversation_id.as_ref() == Some(id)
            && (!self.content.is_empty() || self.thinking.as_deref().is_some_and(|t| !t.is_empty()));

        if !buffered {
            self.clear();
            return StreamOutcome::Finished;
        }

        let message = Message::assistant(std::mem::take(&mut self.content), self.thinking.take());
        self.clear();
        StreamOutcome::Committed {
            conversation_id: id.clone(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_types::Role;

    fn c1() -> ConversationId {
        ConversationId::from("c1")
    }

    #[test]
    fn test_thinking_then_content_commits_message() {
        let mut aggregator = StreamingAggregator::new();
        let selected = c1();

        aggregator.apply(Some(&selected), &ServerEvent::thinking("c1", "let me "));
        assert_eq!(aggregator.phase(), StreamPhase::Thinking);
        aggregator.apply(Some(&selected), &ServerEvent::thinking("c1", "think"));
        aggregator.apply(Some(&selected), &ServerEvent::content("c1", "Hi"));
        assert_eq!(aggregator.phase(), StreamPhase::Answering);
        aggregator.apply(Some(&selected), &ServerEvent::content("c1", " there"));

        match aggregator.apply(Some(&selected), &ServerEvent::done("c1")) {
            StreamOutcome::Committed {
                conversation_id,
                message,
            } => {
                assert_eq!(conversation_id, selected);
                assert_eq!(message.role, Role::Assistant);
                assert_eq!(message.content, "Hi there");
                assert_eq!(message.thinking.as_deref(), Some("let me think"));
            }
            other => panic!("Expected Committed, got {:?}", other),
        }
        assert!(aggregator.is_idle());
        assert_eq!(aggregator.view(), StreamingView::default());
    }

    #[test]
    fn test_late_thinking_stays_answering() {
        let mut aggregator = StreamingAggregator::new();
        let selected = c1();

        aggregator.apply(Some(&selected), &ServerEvent::thinking("c1", "a"));
        aggregator.apply(Some(&selected), &ServerEvent::content("c1", "b"));
        aggregator.apply(Some(&selected), &ServerEvent::thinking("c1", "c"));

        let view = aggregator.view();
        assert_eq!(view.phase, StreamPhase::Answering);
        assert_eq!(view.thinking.as_deref(), Some("ac"));
        assert_eq!(view.content, "b");
    }

    #[test]
    fn test_nothing_committed_without_done() {
        let mut aggregator = StreamingAggregator::new();
        let selected = c1();

        aggregator.apply(Some(&selected), &ServerEvent::content("c1", "Hel"));
        assert!(aggregator.clear());
        assert!(aggregator.is_idle());

        assert_eq!(
            aggregator.apply(Some(&selected), &ServerEvent::done("c1")),
            StreamOutcome::Finished
        );
    }

    #[test]
    fn test_done_with_empty_buffer() {
        let mut aggregator = StreamingAggregator::new();
        let selected = c1();

        assert_eq!(
            aggregator.apply(Some(&selected), &ServerEvent::done("c1")),
            StreamOutcome::Finished
        );
    }

    #[test]
    fn test_unselected_conversation_is_ignored() {
        let mut aggregator = StreamingAggregator::new();
        let selected = ConversationId::from("c2");

        assert_eq!(
            aggregator.apply(Some(&selected), &ServerEvent::content("c1", "Hi")),
            StreamOutcome::Ignored
        );
        assert_eq!(
            aggregator.apply(None, &ServerEvent::content("c1", "Hi")),
            StreamOutcome::Ignored
        );
        assert!(aggregator.is_idle());
    }

    #[test]
    fn test_error_discards_buffer() {
        let mut aggregator = StreamingAggregator::new();
        let selected = c1();
        aggregator.apply(Some(&selected), &ServerEvent::content("c1", "partial"));

        let outcome = aggregator.apply(
            Some(&selected),
            &ServerEvent::Error {
                conversation_id: c1(),
                reason: "model crashed".to_string(),
            },
        );

        assert_eq!(
            outcome,
            StreamOutcome::Failed(GenerationError {
                conversation_id: c1(),
                reason: "model crashed".to_string(),
            })
        );
        assert!(aggregator.is_idle());
        assert!(aggregator.view().content.is_empty());
    }
}
