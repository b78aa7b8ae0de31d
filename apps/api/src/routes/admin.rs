use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::airtable::client::AirtableClient;
use crate::airtable::schema::SchemaDrift;
use crate::airtable::webhooks::{AirtableWebhookClient, Webhook};
use crate::errors::AppError;
use crate::state::AppState;
use crate::webhooks::WebhookError;

fn airtable_api(state: &AppState) -> Result<&AirtableClient, AppError> {
    state
        .airtable_api
        .as_ref()
        .ok_or_else(|| WebhookError::NotConfigured("Airtable administration".to_string()).into())
}

fn webhook_admin(state: &AppState) -> Result<AirtableWebhookClient, AppError> {
    Ok(AirtableWebhookClient::new(airtable_api(state)?.clone()))
}

#[derive(Serialize)]
pub struct SchemaCheck {
    pub tables: Vec<String>,
    pub in_sync: bool,
    pub drift: SchemaDrift,
}

/// GET /admin/airtable/schema
/// Lists the live tables and how they differ from the local schema file.
pub async fn check_airtable_schema(State(state): State<AppState>) -> Result<Json<SchemaCheck>, AppError> {
    let live = airtable_api(&state)?.list_tables().await?;
    let drift = state.schema.drift(&live);
    if !drift.is_clean() {
        warn!(?drift, "Airtable base differs from the schema file");
    }
    Ok(Json(SchemaCheck {
        tables: live.into_iter().map(|t| t.name).collect(),
        in_sync: drift.is_clean(),
        drift,
    }))
}

/// GET /admin/airtable/webhooks
pub async fn list_airtable_webhooks(State(state): State<AppState>) -> Result<Json<Vec<Webhook>>, AppError> {
    Ok(Json(webhook_admin(&state)?.list_webhooks().await?))
}

#[derive(Deserialize)]
pub struct CreateWebhookRequest {
    pub notification_url: String,
    #[serde(default)]
    pub table_id: Option<String>,
}

/// POST /admin/airtable/webhooks
/// Creates the subscription and turns notifications on. The response carries
/// `macSecretBase64`, which Airtable only returns once.
pub async fn create_airtable_webhook(
    State(state): State<AppState>,
    Json(req): Json<CreateWebhookRequest>,
) -> Result<Json<Webhook>, AppError> {
    if !req.notification_url.starts_with("https://") {
        return Err(AppError::Validation("notification_url must be an https URL".to_string()));
    }
    let admin = webhook_admin(&state)?;
    let webhook = admin
        .create_webhook(&req.notification_url, req.table_id.as_deref())
        .await?;
    if let Err(e) = admin.enable_notifications(&webhook.id, true).await {
        warn!(webhook_id = %webhook.id, error = %e, "Webhook created but notifications not enabled");
    }
    info!(webhook_id = %webhook.id, "Store macSecretBase64 as AIRTABLE_WEBHOOK_MAC_SECRET");
    Ok(Json(webhook))
}

/// DELETE /admin/airtable/webhooks/:webhook_id
pub async fn delete_airtable_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    webhook_admin(&state)?.delete_webhook(&webhook_id).await?;
    Ok(Json(json!({"status": "deleted", "webhook_id": webhook_id})))
}

/// POST /admin/airtable/webhooks/:webhook_id/refresh
pub async fn refresh_airtable_webhook(
    State(state): State<AppState>,
    Path(webhook_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let refreshed = webhook_admin(&state)?.refresh_webhook(&webhook_id).await?;
    Ok(Json(json!({
        "status": "refreshed",
        "webhook_id": webhook_id,
        "expiration_time": refreshed.get("expirationTime").cloned().unwrap_or(Value::Null),
    })))
}
