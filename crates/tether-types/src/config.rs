use serde::{Deserialize, Serialize};
use std::time::Duration;

/// When the resume guard is re-armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Guard entries live for one connection; a drop clears them so the
    /// next connection resumes again
    #[default]
    PerConnection,
    /// Guard entries live as long as the engine
    OncePerSession,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// Connection attempts made by a single `connect()` call
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_backoff: Duration,
    #[serde(with = "millis")]
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 8,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    /// Backoff before attempt `attempt` (1-based): initial, doubled each time,
    /// capped at `max_backoff`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << shift);
        delay.min(self.max_backoff)
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// WebSocket endpoint of the generation backend
    pub ws_url: String,
    /// Base URL of the conversation history service
    pub api_url: String,
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    pub resume_policy: ResumePolicy,
    pub reconnect: ReconnectConfig,
    /// Upper bound of conversations kept in memory
    pub max_cached_conversations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/ws".to_string(),
            api_url: "http://127.0.0.1:8080/api".to_string(),
            request_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
            resume_policy: ResumePolicy::default(),
            reconnect: ReconnectConfig::default(),
            max_cached_conversations: 16,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ws_url(mut self, url: impl Into<String>) -> Self {
        self.ws_url = url.into();
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_resume_policy(mut self, policy: ResumePolicy) -> Self {
        self.resume_policy = policy;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_max_cached_conversations(mut self, max: usize) -> Self {
        self.max_cached_conversations = max.max(1);
        self
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let cfg = ReconnectConfig::default();
        assert_eq!(cfg.backoff(1), Duration::from_millis(500));
        assert_eq!(cfg.backoff(2), Duration::from_secs(1));
        assert_eq!(cfg.backoff(4), Duration::from_secs(4));
        assert_eq!(cfg.backoff(10), Duration::from_secs(30));
        assert_eq!(cfg.backoff(1000), Duration::from_secs(30));
    }

    #[test]
    fn test_builder_methods() {
        let cfg = EngineConfig::new()
            .with_ws_url("ws://localhost:1/ws")
            .with_request_timeout(Duration::from_secs(2))
            .with_resume_policy(ResumePolicy::OncePerSession)
            .with_max_cached_conversations(0);

        assert_eq!(cfg.ws_url, "ws://localhost:1/ws");
        assert_eq!(cfg.request_timeout, Duration::from_secs(2));
        assert_eq!(cfg.resume_policy, ResumePolicy::OncePerSession);
        assert_eq!(cfg.max_cached_conversations, 1);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{"request_timeout": 1500, "resume_policy": "once_per_session", "reconnect": {"enabled": false}}"#,
        )
        .unwrap();

        assert_eq!(cfg.request_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.resume_policy, ResumePolicy::OncePerSession);
        assert!(!cfg.reconnect.enabled);
        assert_eq!(cfg.reconnect.max_attempts, 8);
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(10));
    }
}
