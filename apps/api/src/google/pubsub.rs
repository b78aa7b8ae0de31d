//! Pub/Sub publishing over REST and decoding of push deliveries.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use super::{GoogleApiError, GoogleClient};

const PUBSUB_API_URL: &str = "https://pubsub.googleapis.com/v1";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes `data` as JSON to the topic (short name) and returns the
    /// server-assigned message id.
    async fn publish(
        &self,
        topic: &str,
        data: &Value,
        attributes: HashMap<String, String>,
    ) -> Result<String, GoogleApiError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Clone)]
pub struct PubSubPublisher {
    google: GoogleClient,
    project_id: String,
}

impl PubSubPublisher {
    pub fn new(google: GoogleClient, project_id: impl Into<String>) -> Self {
        Self {
            google,
            project_id: project_id.into(),
        }
    }

    pub fn topic_path(&self, topic: &str) -> String {
        if topic.starts_with("projects/") {
            topic.to_string()
        } else {
            format!("projects/{}/topics/{topic}", self.project_id)
        }
    }
}

#[async_trait]
impl EventPublisher for PubSubPublisher {
    async fn publish(
        &self,
        topic: &str,
        data: &Value,
        attributes: HashMap<String, String>,
    ) -> Result<String, GoogleApiError> {
        let path = self.topic_path(topic);
        let encoded = STANDARD.encode(serde_json::to_vec(data)?);
        let body = json!({ "messages": [{ "data": encoded, "attributes": attributes }] });
        let response: PublishResponse = self
            .google
            .send_json(
                self.google
                    .http()
                    .post(format!("{}/{path}:publish", self.google.endpoint(PUBSUB_API_URL)))
                    .json(&body),
            )
            .await
            .map_err(|e| {
                error!(topic, error = %e, "Failed to publish event");
                e
            })?;
        let message_id = response
            .message_ids
            .into_iter()
            .next()
            .ok_or_else(|| GoogleApiError::Decode("publish returned no message id".to_string()))?;
        info!(topic, message_id = %message_id, "Published event");
        Ok(message_id)
    }
}

/// Topic names for each event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub airtable: String,
    pub gmail: String,
    pub drive: String,
    pub chat: String,
    pub applicant: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self {
            airtable: "jetsmx-airtable-events".to_string(),
            gmail: "jetsmx-gmail-events".to_string(),
            drive: "jetsmx-drive-events".to_string(),
            chat: "jetsmx-chat-events".to_string(),
            applicant: "jetsmx-applicant-events".to_string(),
        }
    }
}

/// A publisher bound to the configured per-source topics.
#[derive(Clone)]
pub struct EventBus {
    publisher: std::sync::Arc<dyn EventPublisher>,
    topics: Topics,
}

impl EventBus {
    pub fn new(publisher: std::sync::Arc<dyn EventPublisher>, topics: Topics) -> Self {
        Self { publisher, topics }
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub async fn publish(&self, topic: &str, data: &Value) -> Result<String, GoogleApiError> {
        self.publisher.publish(topic, data, HashMap::new()).await
    }

    pub async fn publish_airtable(&self, data: &Value) -> Result<String, GoogleApiError> {
        self.publish(&self.topics.airtable, data).await
    }

    pub async fn publish_gmail(&self, data: &Value) -> Result<String, GoogleApiError> {
        self.publish(&self.topics.gmail, data).await
    }

    pub async fn publish_drive(&self, data: &Value) -> Result<String, GoogleApiError> {
        self.publish(&self.topics.drive, data).await
    }

    pub async fn publish_chat(&self, data: &Value) -> Result<String, GoogleApiError> {
        self.publish(&self.topics.chat, data).await
    }

    pub async fn publish_applicant(&self, data: &Value) -> Result<String, GoogleApiError> {
        self.publish(&self.topics.applicant, data).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Push delivery
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default, alias = "message_id")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default, alias = "publish_time")]
    pub publish_time: Option<String>,
}

/// Body of a Pub/Sub push request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushEnvelope {
    #[serde(default)]
    pub message: Option<PushMessage>,
    #[serde(default)]
    pub subscription: Option<String>,
}

impl PushEnvelope {
    pub fn message_id(&self) -> Option<&str> {
        self.message.as_ref()?.message_id.as_deref()
    }

    /// Decodes `message.data` (base64 JSON). `Ok(None)` when the envelope
    /// carries no message; absent data decodes to an empty object.
    pub fn decode(&self) -> Result<Option<Value>, GoogleApiError> {
        let Some(message) = &self.message else {
            return Ok(None);
        };
        let Some(data) = message.data.as_deref().filter(|d| !d.is_empty()) else {
            return Ok(Some(json!({})));
        };
        let bytes = STANDARD
            .decode(data)
            .map_err(|e| GoogleApiError::Decode(format!("push data is not base64: {e}")))?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }
}
