//! Publishing to the dashboard topic over the Pub/Sub REST API.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::prelude::*;
use http::header::{AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_ENDPOINT: &str = "https://pubsub.googleapis.com";
pub const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";

/// Fully qualified topic name, `projects/{project}/topics/{topic}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicName(String);

impl TopicName {
    pub fn new(project_id: &str, topic: &str) -> Self {
        TopicName(format!("projects/{}/topics/{}", project_id, topic))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to build pubsub client - {0}")]
    Client(#[source] reqwest::Error),
    #[error("publish request to {topic} failed - {source}")]
    Transport {
        topic: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("publish to {topic} rejected with status {status}: {body}")]
    Rejected {
        topic: String,
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("publish to {topic} was not acknowledged")]
    NotAcknowledged { topic: String },
    #[error("failed to obtain pubsub credentials - {0}")]
    Credentials(String),
}

/// Hands out the bearer token for a publish call.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String, PublishError>;
}

/// A fixed token, for callers that manage credentials themselves.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        StaticToken(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String, PublishError> {
        Ok(self.0.clone())
    }
}

/// Google credentials discovered from the environment. The provider caches
/// the access token and refreshes it before it expires, so asking on every
/// publish is cheap.
pub struct GoogleTokenSource {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl GoogleTokenSource {
    pub async fn from_environment() -> Result<Self, PublishError> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| PublishError::Credentials(e.to_string()))?;
        Ok(GoogleTokenSource { provider })
    }
}

#[async_trait]
impl TokenSource for GoogleTokenSource {
    async fn token(&self) -> Result<String, PublishError> {
        let token = self
            .provider
            .token(&[PUBSUB_SCOPE])
            .await
            .map_err(|e| PublishError::Credentials(e.to_string()))?;
        Ok(token.as_str().to_string())
    }
}

/// A message bus the dashboard events are published to.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes one message and waits for the bus to acknowledge it,
    /// returning the message id assigned by the bus.
    async fn publish(&self, topic: &TopicName, data: Vec<u8>) -> Result<String, PublishError>;
}

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Serialize)]
struct PubsubMessage {
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

/// [Publisher] backed by the Pub/Sub `v1` REST API. Built once per process
/// and shared by every invocation.
#[derive(Clone)]
pub struct PubSubPublisher {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<Arc<dyn TokenSource>>,
}

impl PubSubPublisher {
    /// Without `credentials` requests are sent unauthenticated, which is what
    /// the emulator expects.
    pub fn new(
        endpoint: &str,
        credentials: Option<Arc<dyn TokenSource>>,
        timeout: Option<Duration>,
    ) -> Result<Self, PublishError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(PublishError::Client)?;

        Ok(PubSubPublisher {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn publish_url(&self, topic: &TopicName) -> String {
        format!("{}/v1/{}:publish", self.endpoint, topic)
    }
}

#[async_trait]
impl Publisher for PubSubPublisher {
    async fn publish(&self, topic: &TopicName, data: Vec<u8>) -> Result<String, PublishError> {
        let start_time = Instant::now();
        let request = PublishRequest {
            messages: vec![PubsubMessage {
                data: BASE64_STANDARD.encode(&data),
            }],
        };

        let mut builder = self
            .client
            .post(self.publish_url(topic))
            .header(
                USER_AGENT,
                concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")),
            )
            .json(&request);
        if let Some(credentials) = &self.credentials {
            let token = credentials.token().await?;
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        debug!("Publishing {} bytes to {}", data.len(), topic);
        let transport = |source| PublishError::Transport {
            topic: topic.to_string(),
            source,
        };
        let response = builder.send().await.map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                status,
                body,
            });
        }

        let ack: PublishResponse = response.json().await.map_err(transport)?;
        let message_id = ack
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| PublishError::NotAcknowledged {
                topic: topic.to_string(),
            })?;

        info!(
            "Published message {} to {} in {}ms.",
            message_id,
            topic,
            start_time.elapsed().as_millis()
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Issues a new token on every request, like a provider whose cached
    /// token keeps expiring.
    #[derive(Default)]
    struct RotatingToken {
        issued: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for RotatingToken {
        async fn token(&self) -> Result<String, PublishError> {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{n}"))
        }
    }

    struct NoCredentials;

    #[async_trait]
    impl TokenSource for NoCredentials {
        async fn token(&self) -> Result<String, PublishError> {
            Err(PublishError::Credentials("no credentials found".to_string()))
        }
    }

    fn topic() -> TopicName {
        TopicName::new("test-project", "dashboard-queue")
    }

    #[test]
    fn test_topic_name() {
        assert_eq!(
            topic().as_str(),
            "projects/test-project/topics/dashboard-queue"
        );
    }

    #[tokio::test]
    async fn test_publish_sends_base64_message_and_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/test-project/topics/dashboard-queue:publish"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_json(serde_json::json!({
                "messages": [{"data": BASE64_STANDARD.encode(br#"{"a":1}"#)}]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"messageIds": ["42"]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let credentials: Arc<dyn TokenSource> = Arc::new(StaticToken::new("secret-token"));
        let publisher = PubSubPublisher::new(&server.uri(), Some(credentials), None).unwrap();
        let id = publisher
            .publish(&topic(), br#"{"a":1}"#.to_vec())
            .await
            .unwrap();
        assert_eq!(id, "42");
    }

    #[tokio::test]
    async fn test_publish_to_missing_topic_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Resource not found"))
            .mount(&server)
            .await;

        let publisher = PubSubPublisher::new(&server.uri(), None, None).unwrap();
        let err = publisher.publish(&topic(), b"{}".to_vec()).await.unwrap_err();
        match err {
            PublishError::Rejected { status, body, .. } => {
                assert_eq!(status, reqwest::StatusCode::NOT_FOUND);
                assert_eq!(body, "Resource not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_message_ids_is_not_acknowledged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let publisher = PubSubPublisher::new(&server.uri(), None, None).unwrap();
        let err = publisher.publish(&topic(), b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, PublishError::NotAcknowledged { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_publish_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"messageIds": ["1"]}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let publisher =
            PubSubPublisher::new(&server.uri(), None, Some(Duration::from_millis(100))).unwrap();
        let err = publisher.publish(&topic(), b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, PublishError::Transport { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_publish_asks_for_a_token_every_time() {
        let server = MockServer::start().await;
        for (token, id) in [("token-1", "1"), ("token-2", "2")] {
            Mock::given(method("POST"))
                .and(header("authorization", format!("Bearer {token}").as_str()))
                .respond_with(
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"messageIds": [id]})),
                )
                .expect(1)
                .mount(&server)
                .await;
        }

        let credentials = Arc::new(RotatingToken::default());
        let publisher =
            PubSubPublisher::new(&server.uri(), Some(credentials.clone()), None).unwrap();
        assert_eq!(publisher.publish(&topic(), b"{}".to_vec()).await.unwrap(), "1");
        assert_eq!(publisher.publish(&topic(), b"{}".to_vec()).await.unwrap(), "2");
        assert_eq!(credentials.issued.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_publish_without_credentials_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"messageIds": ["1"]})))
            .expect(0)
            .mount(&server)
            .await;

        let publisher =
            PubSubPublisher::new(&server.uri(), Some(Arc::new(NoCredentials)), None).unwrap();
        let err = publisher.publish(&topic(), b"{}".to_vec()).await.unwrap_err();
        assert!(matches!(err, PublishError::Credentials(_)), "got {err:?}");
    }
}
