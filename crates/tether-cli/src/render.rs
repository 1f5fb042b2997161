use tether::{EngineNotification, StreamPhase, StreamingView};

/// Turns engine notifications into terminal output
///
/// Streaming views carry the whole buffer, so only the part not yet printed
/// is emitted for each update.
#[derive(Debug, Default)]
pub struct Renderer {
    show_thinking: bool,
    thinking_printed: usize,
    content_printed: usize,
    streaming: bool,
}

impl Renderer {
    pub fn new(show_thinking: bool) -> Self {
        Self {
            show_thinking,
            ..Default::default()
        }
    }

    pub fn render(&mut self, notification: &EngineNotification) -> Option<String> {
        match notification {
            EngineNotification::StreamingUpdated(view) => self.render_stream(view),
            EngineNotification::MessageCommitted { .. } => {
                let was_streaming = self.streaming;
                self.reset();
                was_streaming.then(|| "\n".to_string())
            }
            EngineNotification::ConnectionChanged(state) => Some(format!("[connection: {:?}]\n", state)),
            EngineNotification::ConversationLoaded { conversation_id } => {
                Some(format!("[opened {}]\n", conversation_id))
            }
            EngineNotification::ConversationNotFound { conversation_id } => {
                Some(format!("[conversation {} not found]\n", conversation_id))
            }
            EngineNotification::LoadFailed {
                conversation_id,
                reason,
            } => Some(format!("[failed to load {}: {}]\n", conversation_id, reason)),
            EngineNotification::ConversationStarted {
                conversation_id, ..
            } => Some(format!("[started {}]\n", conversation_id)),
            EngineNotification::GenerationFailed(error) => {
                self.reset();
                Some(format!("\n[generation failed: {}]\n", error.reason))
            }
            EngineNotification::SendFailed { reason, .. } => {
                Some(format!("[send failed: {}]\n", reason))
            }
            EngineNotification::ModelsLoaded { models, selected } => {
                let mut out = String::new();
                for model in models {
                    let marker = if selected.as_deref() == Some(model.model.as_str()) {
                        '*'
                    } else {
                        ' '
                    };
                    out.push_str(&format!(
                        "{} {} ({})\n",
                        marker, model.model, model.details.parameter_size
                    ));
                }
                Some(out)
            }
            EngineNotification::ConversationsListed(summaries) => {
                let mut out = String::new();
                for summary in summaries {
                    out.push_str(&format!(
                        "{}  {}  [{}]\n",
                        summary.id, summary.title, summary.model
                    ));
                }
                Some(out)
            }
            EngineNotification::ConversationUpdated { .. } => None,
        }
    }

    fn render_stream(&mut self, view: &StreamingView) -> Option<String> {
        if view.phase == StreamPhase::Idle {
            // Buffer was cleared without a commit (switch or disconnect)
            let was_streaming = self.streaming;
            self.reset();
            return was_streaming.then(|| "\n".to_string());
        }

        let thinking = view.thinking.as_deref().unwrap_or("");
        if thinking.len() < self.thinking_printed || view.content.len() < self.content_printed {
            self.reset();
        }

        let mut out = String::new();
        if self.show_thinking && thinking.len() > self.thinking_printed {
            if self.thinking_printed == 0 {
                out.push_str("(thinking) ");
            }
            out.push_str(&thinking[self.thinking_printed..]);
        }
        self.thinking_printed = thinking.len();

        if view.content.len() > self.content_printed {
            if self.content_printed == 0 && self.show_thinking && !thinking.is_empty() {
                out.push('\n');
            }
            out.push_str(&view.content[self.content_printed..]);
            self.content_printed = view.content.len();
        }

        self.streaming = true;
        (!out.is_empty()).then_some(out)
    }

    fn reset(&mut self) {
        self.thinking_printed = 0;
        self.content_printed = 0;
        self.streaming = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether::{ConversationId, Message};

    fn view(phase: StreamPhase, thinking: Option<&str>, content: &str) -> EngineNotification {
        EngineNotification::StreamingUpdated(StreamingView {
            conversation_id: Some(ConversationId::from("c1")),
            phase,
            thinking: thinking.map(str::to_string),
            content: content.to_string(),
        })
    }

    #[test]
    fn test_prints_only_new_text() {
        let mut renderer = Renderer::new(true);

        assert_eq!(
            renderer.render(&view(StreamPhase::Thinking, Some("let me"), "")),
            Some("(thinking) let me".to_string())
        );
        assert_eq!(
            renderer.render(&view(StreamPhase::Thinking, Some("let me think"), "")),
            Some(" think".to_string())
        );
        assert_eq!(
            renderer.render(&view(StreamPhase::Answering, Some("let me think"), "Hi")),
            Some("\nHi".to_string())
        );
        assert_eq!(
            renderer.render(&view(StreamPhase::Answering, Some("let me think"), "Hi there")),
            Some(" there".to_string())
        );

        let committed = EngineNotification::MessageCommitted {
            conversation_id: ConversationId::from("c1"),
            message: Message::assistant("Hi there", None),
        };
        assert_eq!(renderer.render(&committed), Some("\n".to_string()));
    }

    #[test]
    fn test_hidden_thinking() {
        let mut renderer = Renderer::new(false);

        assert_eq!(
            renderer.render(&view(StreamPhase::Thinking, Some("hmm"), "")),
            None
        );
        assert_eq!(
            renderer.render(&view(StreamPhase::Answering, Some("hmm"), "Yes")),
            Some("Yes".to_string())
        );
    }

    #[test]
    fn test_cleared_buffer_restarts_output() {
        let mut renderer = Renderer::new(true);
        renderer.render(&view(StreamPhase::Answering, None, "partial answer"));

        assert_eq!(
            renderer.render(&view(StreamPhase::Idle, None, "")),
            Some("\n".to_string())
        );
        assert_eq!(
            renderer.render(&view(StreamPhase::Answering, None, "new")),
            Some("new".to_string())
        );
    }
}
