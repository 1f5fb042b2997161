use std::collections::HashSet;
use tether_types::{ConnectionState, ConversationId, ResumePolicy};
use tracing::{debug, info, warn};

use crate::error::SyncError;

/// Conversations a resume has already been issued for
///
/// An identifier in the guard never triggers another resume until it is
/// reset, no matter how many times its preconditions become true.
#[derive(Debug, Default)]
pub struct ResumeGuard {
    issued: HashSet<ConversationId>,
}

impl ResumeGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.issued.contains(id)
    }

    /// Record `id`; true if it was not in the guard yet
    pub fn try_claim(&mut self, id: &ConversationId) -> bool {
        self.issued.insert(id.clone())
    }

    pub fn reset(&mut self, id: &ConversationId) {
        self.issued.remove(id);
    }

    pub fn reset_all(&mut self) {
        self.issued.clear();
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

/// Everything a resume decision depends on
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeInputs {
    pub selected: Option<ConversationId>,
    pub connected: bool,
    pub history_loaded: bool,
}

/// Decides when an in-flight generation is resumed
///
/// Callers re-evaluate after every change to the selection, the connection
/// state or the history-loaded flag; the guard turns any number of
/// evaluations into at most one resume per identifier.
#[derive(Debug)]
pub struct ResumeCoordinator {
    guard: ResumeGuard,
    policy: ResumePolicy,
}

impl ResumeCoordinator {
    pub fn new(policy: ResumePolicy) -> Self {
        Self {
            guard: ResumeGuard::new(),
            policy,
        }
    }

    pub fn policy(&self) -> ResumePolicy {
        self.policy
    }

    /// Returns the identifier to resume, if one must be resumed now
    pub fn evaluate(&mut self, inputs: &ResumeInputs) -> Option<ConversationId> {
        let id = inputs.selected.as_ref()?;
        if !inputs.connected || !inputs.history_loaded {
            return None;
        }

        if self.guard.try_claim(id) {
            info!(conversation_id = %id, "Resuming conversation");
            Some(id.clone())
        } else {
            debug!(conversation_id = %id, "Resume already issued");
            None
        }
    }

    pub fn on_connection_state(&mut self, state: ConnectionState) {
        if state.is_connected() || self.policy != ResumePolicy::PerConnection {
            return;
        }
        if !self.guard.is_empty() {
            debug!(cleared = self.guard.len(), "Connection lost, re-arming resume guard");
            self.guard.reset_all();
        }
    }

    /// The client is already attached to `id` (it started the generation)
    pub fn mark_attached(&mut self, id: &ConversationId) {
        self.guard.try_claim(id);
    }

    /// Failed resumes stay in the guard and are never retried
    pub fn record_failure(&self, id: &ConversationId, error: &SyncError) {
        let failure = SyncError::ResumeFailure {
            conversation_id: id.clone(),
            reason: error.to_string(),
        };
        warn!(error = %failure, "Resume request failed");
    }

    pub fn guard(&self) -> &ResumeGuard {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(id: &str) -> ResumeInputs {
        ResumeInputs {
            selected: Some(ConversationId::from(id)),
            connected: true,
            history_loaded: true,
        }
    }

    #[test]
    fn test_requires_all_preconditions() {
        let mut coordinator = ResumeCoordinator::new(ResumePolicy::PerConnection);

        let mut inputs = ready("c1");
        inputs.connected = false;
        assert_eq!(coordinator.evaluate(&inputs), None);

        inputs.connected = true;
        inputs.history_loaded = false;
        assert_eq!(coordinator.evaluate(&inputs), None);

        inputs.selected = None;
        inputs.history_loaded = true;
        assert_eq!(coordinator.evaluate(&inputs), None);

        assert!(coordinator.guard().is_empty());
    }

    #[test]
    fn test_observers_converge_on_one_resume() {
        let mut coordinator = ResumeCoordinator::new(ResumePolicy::PerConnection);
        let inputs = ready("c1");

        let issued: Vec<_> = (0..3).filter_map(|_| coordinator.evaluate(&inputs)).collect();

        assert_eq!(issued, vec![ConversationId::from("c1")]);
    }

    #[test]
    fn test_switching_back_does_not_resume_again() {
        let mut coordinator = ResumeCoordinator::new(ResumePolicy::PerConnection);

        assert!(coordinator.evaluate(&ready("c1")).is_some());
        assert!(coordinator.evaluate(&ready("c2")).is_some());
        assert!(coordinator.evaluate(&ready("c1")).is_none());
    }

    #[test]
    fn test_per_connection_policy_rearms_on_disconnect() {
        let mut coordinator = ResumeCoordinator::new(ResumePolicy::PerConnection);
        assert!(coordinator.evaluate(&ready("c1")).is_some());

        coordinator.on_connection_state(ConnectionState::Disconnected);
        coordinator.on_connection_state(ConnectionState::Connected);

        assert!(coordinator.evaluate(&ready("c1")).is_some());
    }

    #[test]
    fn test_once_per_session_policy_keeps_guard() {
        let mut coordinator = ResumeCoordinator::new(ResumePolicy::OncePerSession);
        assert!(coordinator.evaluate(&ready("c1")).is_some());

        coordinator.on_connection_state(ConnectionState::Disconnected);
        coordinator.on_connection_state(ConnectionState::Connected);

        assert!(coordinator.evaluate(&ready("c1")).is_none());
    }

    #[test]
    fn test_attached_conversation_is_not_resumed() {
        let mut coordinator = ResumeCoordinator::new(ResumePolicy::PerConnection);
        coordinator.mark_attached(&ConversationId::from("c7"));

        assert!(coordinator.evaluate(&ready("c7")).is_none());
    }

    #[test]
    fn test_failed_resume_stays_guarded() {
        let mut coordinator = ResumeCoordinator::new(ResumePolicy::PerConnection);
        let id = coordinator.evaluate(&ready("c1")).unwrap();

        coordinator.record_failure(&id, &SyncError::Closed);

        assert!(coordinator.guard().contains(&id));
        assert!(coordinator.evaluate(&ready("c1")).is_none());
    }

    #[test]
    fn test_guard_reset_single_id() {
        let mut guard = ResumeGuard::new();
        let c1 = ConversationId::from("c1");
        let c2 = ConversationId::from("c2");

        assert!(guard.try_claim(&c1));
        assert!(guard.try_claim(&c2));
        assert!(!guard.try_claim(&c1));

        guard.reset(&c1);
        assert!(!guard.contains(&c1));
        assert!(guard.contains(&c2));
        assert_eq!(guard.len(), 1);
    }
}
