use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tether_types::{Conversation, ConversationId, ConversationSummary, ModelDescriptor};
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::ConversationHistory;

/// History service client (HTTP direct)
pub struct HttpHistoryClient {
    http_client: reqwest::Client,
    base_url: String,
    base: Url,
    timeout: Duration,
}

/// `/models` answers either with a bare array or wrapped in an object
#[derive(Deserialize)]
#[serde(untagged)]
enum ModelList {
    Bare(Vec<ModelDescriptor>),
    Wrapped { models: Vec<ModelDescriptor> },
}

impl From<ModelList> for Vec<ModelDescriptor> {
    fn from(list: ModelList) -> Self {
        match list {
            ModelList::Bare(models) | ModelList::Wrapped { models } => models,
        }
    }
}

impl HttpHistoryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| TransportError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(TransportError::InvalidUrl(base_url));
        }

        Ok(Self {
            http_client,
            base_url,
            base,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Base URL extended by `segments`, each percent-encoded as one segment
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        // checked in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!(%url, "GET");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_reqwest(e))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }

    fn map_reqwest(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else {
            TransportError::Http(e)
        }
    }
}

/// Whether a failed history lookup means the conversation does not exist
fn is_not_found(error: &TransportError) -> bool {
    match error {
        TransportError::Status { status, body } => {
            *status == StatusCode::NOT_FOUND.as_u16() || body.to_lowercase().contains("not found")
        }
        _ => false,
    }
}

#[async_trait]
impl ConversationHistory for HttpHistoryClient {
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let url = self.endpoint(&["conversations", id.as_str()]);
        match self.get_json::<Conversation>(url).await {
            Ok(conversation) => Ok(conversation),
            Err(e) if is_not_found(&e) => Err(TransportError::NotFound(id.clone())),
            Err(e) => Err(e),
        }
    }

    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        self.get_json(self.endpoint(&["conversations"])).await
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>> {
        let list = self.get_json::<ModelList>(self.endpoint(&["models"])).await?;
        Ok(list.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_detection() {
        let by_status = TransportError::Status {
            status: 404,
            body: String::new(),
        };
        let by_body = TransportError::Status {
            status: 500,
            body: "conversation Not Found".to_string(),
        };
        let other = TransportError::Status {
            status: 500,
            body: "boom".to_string(),
        };

        assert!(is_not_found(&by_status));
        assert!(is_not_found(&by_body));
        assert!(!is_not_found(&other));
        assert!(!is_not_found(&TransportError::Closed));
    }

    #[test]
    fn test_model_list_shapes() {
        let bare: ModelList =
            serde_json::from_str(r#"[{"name":"a","model":"a:1b"}]"#).unwrap();
        let wrapped: ModelList =
            serde_json::from_str(r#"{"models":[{"name":"b","model":"b:7b"}]}"#).unwrap();

        let bare: Vec<ModelDescriptor> = bare.into();
        let wrapped: Vec<ModelDescriptor> = wrapped.into();
        assert_eq!(bare[0].name, "a");
        assert_eq!(wrapped[0].model, "b:7b");
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HttpHistoryClient::new("http://localhost:8080/api/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080/api");
        assert_eq!(
            client.endpoint(&["models"]).as_str(),
            "http://localhost:8080/api/models"
        );
    }

    #[test]
    fn test_conversation_id_is_one_path_segment() {
        let client = HttpHistoryClient::new("http://localhost:8080/api", Duration::from_secs(1)).unwrap();
        let url = client.endpoint(&["conversations", "a/b c?x#y"]);

        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/conversations/a%2Fb%20c%3Fx%23y"
        );
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        assert!(matches!(
            HttpHistoryClient::new("not a url", Duration::from_secs(1)),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(matches!(
            HttpHistoryClient::new("mailto:someone@example.com", Duration::from_secs(1)),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
