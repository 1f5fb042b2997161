use std::sync::Arc;
use tether_sync::{EngineHandle, Result, SyncEngine};
use tether_transport::{ConnectionManager, ConversationHistory, HttpHistoryClient, Transport};
use tether_types::{EngineConfig, ResumePolicy};
use tracing::debug;

/// Wires a [`SyncEngine`] to its collaborators
///
/// Without explicit collaborators the engine talks to the backend through a
/// [`ConnectionManager`] on `ws_url` and an [`HttpHistoryClient`] on
/// `api_url`.
pub struct TetherBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn Transport>>,
    history: Option<Arc<dyn ConversationHistory>>,
}

impl TetherBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            transport: None,
            history: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.config.ws_url = url.into();
        self
    }

    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.config.api_url = url.into();
        self
    }

    pub fn resume_policy(mut self, policy: ResumePolicy) -> Self {
        self.config.resume_policy = policy;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn history(mut self, history: Arc<dyn ConversationHistory>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.config
    }

    /// Spawn the engine; must be called inside a Tokio runtime
    pub fn build(self) -> Result<EngineHandle> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ConnectionManager::from_config(&self.config)),
        };
        let history: Arc<dyn ConversationHistory> = match self.history {
            Some(history) => history,
            None => Arc::new(HttpHistoryClient::new(
                self.config.api_url.clone(),
                self.config.request_timeout,
            )?),
        };

        debug!(ws_url = %self.config.ws_url, api_url = %self.config.api_url, "Building engine");
        Ok(SyncEngine::spawn(self.config, transport, history))
    }
}

impl Default for TetherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
