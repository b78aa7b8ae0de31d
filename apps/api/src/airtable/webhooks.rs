//! Airtable webhook subscriptions and notification signature checks.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{error, info, warn};

use super::client::AirtableClient;
use super::AirtableError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "hmac-sha256=";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Webhook {
    pub id: String,
    #[serde(default)]
    pub mac_secret_base64: Option<String>,
    #[serde(default)]
    pub expiration_time: Option<String>,
    #[serde(default)]
    pub notification_url: Option<String>,
    #[serde(default)]
    pub are_notifications_enabled: Option<bool>,
    #[serde(default)]
    pub cursor_for_next_payload: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct WebhookList {
    #[serde(default)]
    webhooks: Vec<Webhook>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadPage {
    #[serde(default)]
    pub payloads: Vec<Value>,
    pub cursor: u64,
    #[serde(default)]
    pub might_have_more: bool,
}

/// Manages webhook subscriptions on the configured base.
#[derive(Clone)]
pub struct AirtableWebhookClient {
    client: AirtableClient,
}

impl AirtableWebhookClient {
    pub fn new(client: AirtableClient) -> Self {
        Self { client }
    }

    /// Subscribes `notification_url` to table data changes, optionally
    /// scoped to one table id.
    pub async fn create_webhook(&self, notification_url: &str, table_id: Option<&str>) -> Result<Webhook, AirtableError> {
        let url = self
            .client
            .url(&["bases", self.client.base_id(), "webhooks"])?;
        let mut filters = json!({ "dataTypes": ["tableData"] });
        if let Some(table_id) = table_id {
            filters["recordChangeScope"] = json!(table_id);
        }
        let body = json!({
            "notificationUrl": notification_url,
            "specification": { "options": { "filters": filters } },
        });
        let webhook: Webhook = self
            .client
            .execute(self.client.http_client().post(url).json(&body))
            .await
            .map_err(|e| {
                error!(error = %e, notification_url, "Failed to create webhook");
                e
            })?;
        info!(webhook_id = %webhook.id, base_id = %self.client.base_id(), notification_url, "Created webhook");
        Ok(webhook)
    }

    pub async fn list_webhooks(&self) -> Result<Vec<Webhook>, AirtableError> {
        let url = self
            .client
            .url(&["bases", self.client.base_id(), "webhooks"])?;
        let list: WebhookList = self
            .client
            .execute(self.client.http_client().get(url))
            .await?;
        info!(count = list.webhooks.len(), "Listed webhooks");
        Ok(list.webhooks)
    }

    pub async fn delete_webhook(&self, webhook_id: &str) -> Result<(), AirtableError> {
        let url = self
            .client
            .url(&["bases", self.client.base_id(), "webhooks", webhook_id])?;
        let _: Value = self
            .client
            .execute(self.client.http_client().delete(url))
            .await?;
        info!(webhook_id, "Deleted webhook");
        Ok(())
    }

    /// Extends the webhook expiry; Airtable expires idle webhooks after 7 days.
    pub async fn refresh_webhook(&self, webhook_id: &str) -> Result<Value, AirtableError> {
        let url = self
            .client
            .url(&["bases", self.client.base_id(), "webhooks", webhook_id, "refresh"])?;
        let refreshed: Value = self
            .client
            .execute(self.client.http_client().post(url).json(&json!({})))
            .await?;
        info!(
            webhook_id,
            expiration = %refreshed.get("expirationTime").cloned().unwrap_or(serde_json::Value::Null),
            "Refreshed webhook"
        );
        Ok(refreshed)
    }

    pub async fn enable_notifications(&self, webhook_id: &str, enable: bool) -> Result<(), AirtableError> {
        let url = self.client.url(&[
            "bases",
            self.client.base_id(),
            "webhooks",
            webhook_id,
            "enableNotifications",
        ])?;
        let _: Value = self
            .client
            .execute(self.client.http_client().post(url).json(&json!({ "enable": enable })))
            .await?;
        info!(webhook_id, enable, "Set webhook notifications");
        Ok(())
    }

    /// Payloads recorded since `cursor` (the first payload when `None`).
    pub async fn list_payloads(&self, webhook_id: &str, cursor: Option<u64>) -> Result<PayloadPage, AirtableError> {
        let url = self
            .client
            .url(&["bases", self.client.base_id(), "webhooks", webhook_id, "payloads"])?;
        let mut params = vec![("limit".to_string(), "50".to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor".to_string(), cursor.to_string()));
        }
        let page: PayloadPage = self
            .client
            .execute(self.client.http_client().get(url).query(&params))
            .await?;
        info!(
            webhook_id,
            count = page.payloads.len(),
            cursor = page.cursor,
            "Fetched webhook payloads"
        );
        Ok(page)
    }
}

/// Source of queued webhook payloads.
#[async_trait]
pub trait PayloadFeed: Send + Sync {
    async fn fetch_payloads(&self, webhook_id: &str, cursor: Option<u64>) -> Result<PayloadPage, AirtableError>;
}

#[async_trait]
impl PayloadFeed for AirtableWebhookClient {
    async fn fetch_payloads(&self, webhook_id: &str, cursor: Option<u64>) -> Result<PayloadPage, AirtableError> {
        self.list_payloads(webhook_id, cursor).await
    }
}

/// Checks the `X-Airtable-Content-MAC` header (`hmac-sha256=<hex>`) against
/// the body, keyed with the base64 `macSecretBase64` of the webhook.
pub fn verify_airtable_signature(mac_secret_b64: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_digest) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        warn!("Airtable MAC header missing hmac-sha256 prefix");
        return false;
    };
    let Ok(key) = STANDARD.decode(mac_secret_b64) else {
        error!("Airtable MAC secret is not valid base64");
        return false;
    };
    verify_hex_hmac(&key, body, hex_digest)
}

/// Generic HMAC-SHA256 check. Without a configured secret the request is
/// let through.
pub fn verify_webhook_signature(secret: Option<&str>, body: &[u8], signature_hex: Option<&str>) -> bool {
    let Some(secret) = secret.filter(|s| !s.is_empty()) else {
        warn!("No webhook secret configured, skipping signature verification");
        return true;
    };
    let Some(signature) = signature_hex else {
        warn!("Webhook request is missing its signature");
        return false;
    };
    verify_hex_hmac(secret.as_bytes(), body, signature.trim())
}

fn verify_hex_hmac(key: &[u8], body: &[u8], hex_digest: &str) -> bool {
    let Ok(expected) = hex::decode(hex_digest.to_ascii_lowercase()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(key: &[u8], body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(key).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_airtable_signature_round_trip() {
        let key = b"super-secret-key";
        let secret_b64 = STANDARD.encode(key);
        let body = br#"{"base":{"id":"app1"},"webhook":{"id":"ach1"}}"#;
        let header = format!("hmac-sha256={}", sign(key, body));

        assert!(verify_airtable_signature(&secret_b64, body, &header));
        assert!(!verify_airtable_signature(&secret_b64, b"tampered", &header));
        assert!(!verify_airtable_signature(&secret_b64, body, &sign(key, body)));
    }

    #[test]
    fn test_generic_signature_accepts_uppercase_hex() {
        let body = b"payload";
        let sig = sign(b"s3cret", body).to_uppercase();
        assert!(verify_webhook_signature(Some("s3cret"), body, Some(&sig)));
        assert!(!verify_webhook_signature(Some("other"), body, Some(&sig)));
        assert!(!verify_webhook_signature(Some("s3cret"), body, None));
    }

    #[test]
    fn test_missing_secret_allows_request() {
        assert!(verify_webhook_signature(None, b"x", None));
        assert!(verify_webhook_signature(Some(""), b"x", Some("zz")));
    }

    #[test]
    fn test_payload_page_shape() {
        let page: PayloadPage = serde_json::from_value(json!({
            "payloads": [{"timestamp": "2024-01-01T00:00:00.000Z"}],
            "cursor": 7,
            "mightHaveMore": false
        }))
        .unwrap();
        assert_eq!(page.cursor, 7);
        assert_eq!(page.payloads.len(), 1);
    }
}
