use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use super::payload::{AirtableWebhookPayload, ChangedRecord, RecordCells, TableChangeSet, TableChanges, WebhookRef};
use super::WebhookError;
use crate::airtable::webhooks::{verify_airtable_signature, verify_webhook_signature};
use crate::db::cursors;
use crate::errors::AppError;
use crate::google::drive::DriveFile;
use crate::google::pubsub::PushEnvelope;
use crate::idempotency::{first_delivery, release_claim, DRIVE_FILE_TTL};
use crate::state::AppState;

const AIRTABLE_MAC_HEADER: &str = "x-airtable-content-mac";
const SIGNATURE_HEADER: &str = "x-webhook-signature";
/// Payload pages drained per notification ping.
const MAX_PAYLOAD_PAGES: usize = 20;
const DRIVE_POLL_WINDOW_MINUTES: i64 = 10;
const PDF_MIME_TYPE: &str = "application/pdf";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, WebhookError> {
    serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))
}

// ────────────────────────────────────────────────────────────────────────────
// Airtable
// ────────────────────────────────────────────────────────────────────────────

/// POST /webhooks/airtable
pub async fn handle_airtable(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    if let Some(secret) = &state.config.airtable_webhook_mac_secret {
        let mac = header(&headers, AIRTABLE_MAC_HEADER).unwrap_or_default();
        if !verify_airtable_signature(secret, &body, mac) {
            warn!("Rejected Airtable webhook with a bad MAC");
            return Err(WebhookError::InvalidSignature.into());
        }
    }

    let payload: AirtableWebhookPayload = parse_json(&body)?;
    info!(
        webhook_id = ?payload.webhook_id(),
        timestamp = ?payload.timestamp,
        ping = payload.is_ping(),
        "Received Airtable webhook"
    );

    if payload.is_ping() {
        let webhook_id = payload
            .webhook_id()
            .ok_or_else(|| WebhookError::InvalidPayload("notification has no webhook id".to_string()))?;
        return Ok(Json(drain_payloads(&state, webhook_id).await?));
    }
    Ok(Json(state.webhook_handlers.dispatch(&payload).await))
}

/// Fetches every payload queued since the stored cursor, dispatches each
/// and advances the cursor page by page.
async fn drain_payloads(state: &AppState, webhook_id: &str) -> Result<Value, WebhookError> {
    let key = cursors::airtable_webhook(webhook_id);
    let mut cursor = match state.cursors.get(&key).await {
        Ok(value) => value.and_then(|v| v.parse::<u64>().ok()),
        Err(e) => {
            warn!(webhook_id, error = %e, "Could not read payload cursor, starting from the beginning");
            None
        }
    };

    let mut results = Vec::new();
    for _ in 0..MAX_PAYLOAD_PAGES {
        let page = state.airtable_payloads.fetch_payloads(webhook_id, cursor).await?;
        for raw in page.payloads {
            match serde_json::from_value::<AirtableWebhookPayload>(raw) {
                Ok(mut payload) => {
                    if payload.webhook_id().is_none() {
                        payload.webhook = Some(WebhookRef {
                            id: webhook_id.to_string(),
                        });
                    }
                    results.push(state.webhook_handlers.dispatch(&payload).await);
                }
                Err(e) => warn!(webhook_id, error = %e, "Skipping unreadable webhook payload"),
            }
        }

        cursor = Some(page.cursor);
        if let Err(e) = state.cursors.set(&key, &page.cursor.to_string()).await {
            error!(webhook_id, error = %e, "Failed to store payload cursor");
        }
        if !page.might_have_more {
            break;
        }
    }

    info!(webhook_id, payloads = results.len(), ?cursor, "Drained webhook payloads");
    Ok(json!({
        "status": "processed",
        "webhook_id": webhook_id,
        "payloads": results.len(),
        "cursor": cursor,
        "results": results,
    }))
}

#[derive(Debug, Deserialize)]
struct LegacyChange {
    #[serde(default)]
    table_id: Option<String>,
    #[serde(default)]
    record_id: Option<String>,
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    timestamp: Option<String>,
}

/// POST /webhooks/airtable/:table_name
///
/// For manually configured senders. Bodies already in Airtable's format
/// are dispatched as-is; anything else becomes a change set for the named
/// table.
pub async fn handle_airtable_legacy(
    State(state): State<AppState>,
    Path(table_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let secret = state.config.webhook_secret.as_deref();
    if !verify_webhook_signature(secret, &body, header(&headers, SIGNATURE_HEADER)) {
        return Err(WebhookError::InvalidSignature.into());
    }

    let raw: Value = parse_json(&body)?;
    info!(table = %table_name, "Received legacy Airtable webhook");
    if raw.get("changedTablesById").is_some() {
        let payload: AirtableWebhookPayload =
            serde_json::from_value(raw).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
        return Ok(Json(state.webhook_handlers.dispatch(&payload).await));
    }

    let change: LegacyChange =
        serde_json::from_value(raw).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
    let mut changes = TableChanges {
        name: Some(table_name.clone()),
        ..Default::default()
    };
    if let Some(record_id) = change.record_id {
        changes.changed_records_by_id.insert(
            record_id,
            ChangedRecord {
                current: Some(RecordCells {
                    cell_values_by_field_id: change.fields,
                }),
                ..Default::default()
            },
        );
    }
    let set = TableChangeSet {
        webhook_id: Some("legacy".to_string()),
        timestamp: change.timestamp,
        table_id: change.table_id.unwrap_or_else(|| "unknown".to_string()),
        table_name: table_name.clone(),
        changes,
    };
    let result = state.webhook_handlers.dispatch_table(&set).await;
    Ok(Json(json!({"status": "processed", "table": table_name, "result": result})))
}

// ────────────────────────────────────────────────────────────────────────────
// Google push notifications
// ────────────────────────────────────────────────────────────────────────────

fn history_id_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// POST /webhooks/gmail
pub async fn handle_gmail(
    State(state): State<AppState>,
    Json(envelope): Json<PushEnvelope>,
) -> Result<Json<Value>, AppError> {
    let data = envelope
        .decode()
        .map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
    let Some(data) = data else {
        return Ok(Json(json!({"status": "ignored", "reason": "no_message"})));
    };

    let history_id = history_id_text(data.get("historyId"));
    info!(history_id = ?history_id, "Received Gmail push notification");
    let event = json!({
        "history_id": history_id,
        "email_address": data.get("emailAddress"),
    });
    let message_id = state.events.publish_gmail(&event).await?;
    Ok(Json(json!({"status": "accepted", "message_id": message_id})))
}

/// POST /webhooks/drive
pub async fn handle_drive(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, AppError> {
    // Channels registered by the watch renewal echo the shared secret as their token.
    if let Some(secret) = &state.config.webhook_secret {
        if header(&headers, "x-goog-channel-token") != Some(secret.as_str()) {
            warn!("Rejected Drive notification with a bad channel token");
            return Err(WebhookError::InvalidSignature.into());
        }
    }
    let resource_state = header(&headers, "x-goog-resource-state").unwrap_or_default();
    let channel_id = header(&headers, "x-goog-channel-id");
    info!(resource_state, channel_id = ?channel_id, "Received Drive notification");

    if !matches!(resource_state, "add" | "update" | "exists") {
        return Ok(Json(json!({
            "status": "ignored",
            "reason": format!("Resource state {resource_state} not handled"),
        })));
    }
    let event = json!({
        "channel_id": channel_id,
        "resource_id": header(&headers, "x-goog-resource-id"),
        "resource_state": resource_state,
    });
    let message_id = state.events.publish_drive(&event).await?;
    Ok(Json(json!({"status": "accepted", "message_id": message_id})))
}

// ────────────────────────────────────────────────────────────────────────────
// Google Chat
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct Named {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatMessageBody {
    #[serde(default)]
    text: String,
    #[serde(default)]
    create_time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCommandEvent {
    #[serde(default)]
    message: ChatMessageBody,
    #[serde(default)]
    space: Named,
    #[serde(default)]
    user: Named,
}

#[derive(Debug, Deserialize)]
struct ActionParameter {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardAction {
    #[serde(default)]
    action_method_name: Option<String>,
    #[serde(default)]
    parameters: Vec<ActionParameter>,
}

#[derive(Debug, Deserialize)]
pub struct ChatInteractionEvent {
    #[serde(default)]
    action: CardAction,
    #[serde(default)]
    space: Named,
    #[serde(default)]
    user: Named,
}

/// POST /webhooks/chat/command
pub async fn handle_chat_command(
    State(state): State<AppState>,
    Json(event): Json<ChatCommandEvent>,
) -> Result<Json<Value>, AppError> {
    let text = event.message.text.trim();
    info!(user = ?event.user.name, text, "Received Chat command");
    if !text.starts_with('/') {
        return Ok(Json(json!({"text": "No command recognized"})));
    }

    let (command, args) = text.split_once(' ').unwrap_or((text, ""));
    let published = json!({
        "space": event.space.name,
        "user": event.user.name,
        "command": command,
        "args": args.trim(),
        "timestamp": event.message.create_time,
    });
    state.events.publish_chat(&published).await?;
    Ok(Json(json!({"text": format!("Processing command: {command}...")})))
}

/// POST /webhooks/chat/interaction
pub async fn handle_chat_interaction(
    State(state): State<AppState>,
    Json(event): Json<ChatInteractionEvent>,
) -> Result<Json<Value>, AppError> {
    let action_name = event.action.action_method_name.unwrap_or_default();
    info!(action = %action_name, user = ?event.user.name, "Received Chat interaction");
    let parameters: Map<String, Value> = event
        .action
        .parameters
        .into_iter()
        .map(|p| (p.key, Value::String(p.value)))
        .collect();
    let published = json!({
        "action_name": action_name,
        "parameters": parameters,
        "space": event.space.name,
        "user": event.user.name,
    });
    state.events.publish_chat(&published).await?;
    Ok(Json(json!({"text": "Processing your action..."})))
}

// ────────────────────────────────────────────────────────────────────────────
// Scheduler
// ────────────────────────────────────────────────────────────────────────────

/// POST /scheduler/renew-gmail-watch
///
/// Gmail watches lapse after seven days; Cloud Scheduler calls this well
/// before that.
pub async fn handle_renew_gmail_watch(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let topic = state
        .config
        .gmail_watch_topic
        .as_deref()
        .ok_or_else(|| WebhookError::NotConfigured("GMAIL_WATCH_TOPIC".to_string()))?;
    let watch = state.google.gmail.watch(topic, &["INBOX"]).await?;

    // Seed the history cursor so the first notification has a starting point.
    match state.cursors.get(cursors::GMAIL_HISTORY).await {
        Ok(None) => {
            if let Err(e) = state.cursors.set(cursors::GMAIL_HISTORY, &watch.history_id).await {
                warn!(error = %e, "Failed to seed Gmail history cursor");
            }
        }
        Ok(Some(_)) => {}
        Err(e) => warn!(error = %e, "Could not read Gmail history cursor"),
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Gmail watch renewed successfully",
        "history_id": watch.history_id,
        "expiration": watch.expiration,
    })))
}

/// POST /scheduler/renew-drive-watch
/// Drive channels expire after a day at most, so this runs daily.
pub async fn handle_renew_drive_watch(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let folder = state
        .config
        .drive_folder_resumes_incoming
        .as_deref()
        .ok_or_else(|| WebhookError::NotConfigured("DRIVE_FOLDER_RESUMES_INCOMING".to_string()))?;
    let address = state
        .config
        .drive_watch_address
        .as_deref()
        .ok_or_else(|| WebhookError::NotConfigured("DRIVE_WATCH_ADDRESS".to_string()))?;
    let channel = state
        .google
        .drive
        .watch_folder(folder, address, state.config.webhook_secret.as_deref())
        .await?;
    Ok(Json(json!({
        "status": "success",
        "channel_id": channel.id,
        "resource_id": channel.resource_id,
        "expiration": channel.expiration,
    })))
}

/// POST /scheduler/stop-gmail-watch
pub async fn handle_stop_gmail_watch(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    state.google.gmail.stop_watch().await?;
    info!("Gmail watch stopped");
    Ok(Json(json!({"status": "success", "message": "Gmail watch stopped"})))
}

fn drive_created_event(file: &DriveFile) -> Value {
    json!({
        "event_type": "drive.file.created",
        "file_id": file.id,
        "name": file.name,
        "mime_type": file.mime_type,
        "parents": file.parents,
        "created_time": file.created_time,
        "web_view_link": file.web_view_link,
        "folder_type": "resumes",
        "resource_state": "add",
    })
}

/// POST /scheduler/poll-drive
pub async fn handle_poll_drive(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let folder = state
        .config
        .drive_folder_resumes_incoming
        .as_deref()
        .ok_or_else(|| WebhookError::NotConfigured("DRIVE_FOLDER_RESUMES_INCOMING".to_string()))?;
    let since = Utc::now() - Duration::minutes(DRIVE_POLL_WINDOW_MINUTES);
    let files = state
        .google
        .drive
        .list_files_in_folder(folder, Some(PDF_MIME_TYPE), Some(since))
        .await?;

    let mut published = Vec::new();
    let mut skipped = 0;
    for file in &files {
        let key = format!("drive:file:{}", file.id);
        if !first_delivery(state.idempotency.as_ref(), &key, DRIVE_FILE_TTL).await {
            skipped += 1;
            continue;
        }
        match state.events.publish_drive(&drive_created_event(file)).await {
            Ok(message_id) => {
                info!(file_id = %file.id, name = %file.name, message_id = %message_id, "Queued new resume");
                published.push(json!({"file_id": file.id, "name": file.name, "message_id": message_id}));
            }
            Err(e) => {
                error!(file_id = %file.id, error = %e, "Failed to publish Drive file event");
                release_claim(state.idempotency.as_ref(), &key).await;
            }
        }
    }

    info!(folder, found = files.len(), published = published.len(), skipped, "Drive poll finished");
    Ok(Json(json!({
        "status": "ok",
        "files_found": files.len(),
        "published": published,
        "already_seen": skipped,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CursorStore;
    use crate::airtable::webhooks::PayloadPage;
    use crate::events::airtable::{decide, AirtableAction, RecordChangeEvent};
    use crate::google::testing::GoogleStub;
    use crate::routes::build_router;
    use crate::state::testing::{harness, ScriptedFeed};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use tower::ServiceExt;

    async fn post(state: AppState, uri: &str, headers: &[(&str, &str)], body: Value) -> (StatusCode, Value) {
        let mut request = Request::post(uri).header("content-type", "application/json");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = build_router(state)
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn sign(key: &[u8], body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
        mac.update(body.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn pipeline_payload() -> Value {
        json!({
            "webhook": {"id": "ach1"},
            "changedTablesById": {
                "tblPipeline000001": {
                    "changedRecordsById": {
                        "recP1": {"current": {"cellValuesByFieldId": {"fldPipelineStage1": "Interview Complete"}}}
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn test_airtable_push_is_dispatched() {
        let h = harness().build();
        let (status, body) = post(h.state.clone(), "/webhooks/airtable", &[], pipeline_payload()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "processed");
        let messages = h.publisher.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1["current_values"]["Pipeline Stage"], "Interview Complete");
    }

    #[tokio::test]
    async fn test_airtable_mac_is_enforced() {
        let secret = STANDARD.encode(b"mac-secret");
        let h = harness()
            .config(|c| c.airtable_webhook_mac_secret = Some(secret.clone()))
            .build();
        let (status, body) = post(
            h.state.clone(),
            "/webhooks/airtable",
            &[("X-Airtable-Content-MAC", "hmac-sha256=00")],
            pipeline_payload(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");

        let signature = format!("hmac-sha256={}", sign(b"mac-secret", &pipeline_payload().to_string()));
        let (status, _) = post(
            h.state,
            "/webhooks/airtable",
            &[("X-Airtable-Content-MAC", signature.as_str())],
            pipeline_payload(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ping_drains_payloads_and_advances_cursor() {
        let feed = ScriptedFeed::default()
            .page(PayloadPage {
                payloads: vec![json!({
                    "timestamp": "2024-06-05T14:00:00.000Z",
                    "changedTablesById": {
                        "tblApplicants0001": {
                            "changedRecordsById": {"recA1": {"current": {"cellValuesByFieldId": {"Email": "a@b.com"}}}}
                        }
                    }
                })],
                cursor: 5,
                might_have_more: true,
            })
            .page(PayloadPage {
                payloads: vec![],
                cursor: 6,
                might_have_more: false,
            });
        let h = harness().feed(feed).build();
        h.cursors.set("airtable_webhook:ach7", "4").await.unwrap();

        let (status, body) = post(
            h.state.clone(),
            "/webhooks/airtable",
            &[],
            json!({"base": {"id": "app1"}, "webhook": {"id": "ach7"}, "timestamp": "2024-06-05T14:00:01.000Z"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payloads"], 1);
        assert_eq!(body["cursor"], 6);
        assert_eq!(*h.feed.requested.lock().unwrap(), vec![Some(4), Some(5)]);
        assert_eq!(h.cursors.value("airtable_webhook:ach7").as_deref(), Some("6"));

        let messages = h.publisher.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1["webhook_id"], "ach7");
    }

    #[tokio::test]
    async fn test_legacy_endpoint_wraps_body_and_checks_signature() {
        let h = harness().config(|c| c.webhook_secret = Some("s3cret".into())).build();
        let body = json!({"record_id": "recA9", "fields": {"Email": "x@y.com"}});

        let (status, _) = post(h.state.clone(), "/webhooks/airtable/applicants", &[], body.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let signature = sign(b"s3cret", &body.to_string());
        let (status, response) = post(
            h.state,
            "/webhooks/airtable/applicants",
            &[("X-Webhook-Signature", signature.as_str())],
            body,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["table"], "applicants");
        assert_eq!(response["result"]["result"]["actions_taken"][0]["record_id"], "recA9");
        assert_eq!(h.publisher.messages()[0].1["webhook_id"], "legacy");
    }

    #[tokio::test]
    async fn test_legacy_display_name_routes_to_outreach() {
        let h = harness().build();
        let (status, response) = post(
            h.state,
            "/webhooks/airtable/Applicant%20Pipeline",
            &[],
            json!({"record_id": "recP1", "fields": {"Screening Decision": "Approve"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response["table"], "Applicant Pipeline");

        let messages = h.publisher.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].1["table_name"], "applicant_pipeline");
        let event: RecordChangeEvent = serde_json::from_value(messages[0].1.clone()).unwrap();
        assert_eq!(
            decide(&event),
            AirtableAction::GenerateOutreachDraft {
                pipeline_id: "recP1".into()
            }
        );
    }

    #[tokio::test]
    async fn test_gmail_push_is_republished() {
        let h = harness().build();
        let data = STANDARD.encode(json!({"emailAddress": "hr@jetsmx.com", "historyId": 98765}).to_string());
        let (status, body) = post(
            h.state.clone(),
            "/webhooks/gmail",
            &[],
            json!({"message": {"data": data, "messageId": "m1"}, "subscription": "s"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "accepted");
        let (topic, event) = &h.publisher.messages()[0];
        assert_eq!(topic, "jetsmx-gmail-events");
        assert_eq!(event["history_id"], "98765");

        let (_, ignored) = post(h.state, "/webhooks/gmail", &[], json!({})).await;
        assert_eq!(ignored["status"], "ignored");
    }

    #[tokio::test]
    async fn test_drive_states() {
        let h = harness().build();
        let (_, body) = post(h.state.clone(), "/webhooks/drive", &[("X-Goog-Resource-State", "sync")], json!({})).await;
        assert_eq!(body["status"], "ignored");

        let (_, body) = post(
            h.state,
            "/webhooks/drive",
            &[("X-Goog-Resource-State", "add"), ("X-Goog-Channel-ID", "chan-1")],
            json!({}),
        )
        .await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(h.publisher.messages()[0].1["channel_id"], "chan-1");
    }

    #[tokio::test]
    async fn test_drive_channel_token_enforced_with_secret() {
        let h = harness().config(|c| c.webhook_secret = Some("s3cret".into())).build();
        let (status, _) = post(h.state.clone(), "/webhooks/drive", &[("X-Goog-Resource-State", "add")], json!({})).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = post(
            h.state,
            "/webhooks/drive",
            &[("X-Goog-Resource-State", "add"), ("X-Goog-Channel-Token", "s3cret")],
            json!({}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "accepted");
    }

    #[tokio::test]
    async fn test_chat_command_and_interaction() {
        let h = harness().build();
        let (_, reply) = post(
            h.state.clone(),
            "/webhooks/chat/command",
            &[],
            json!({"message": {"text": "/probe recP1 2024-06-06T14:00:00Z 2024-06-06T14:30:00Z"}, "space": {"name": "spaces/1"}}),
        )
        .await;
        assert_eq!(reply["text"], "Processing command: /probe...");

        let (_, reply) = post(h.state.clone(), "/webhooks/chat/command", &[], json!({"message": {"text": "hello"}})).await;
        assert_eq!(reply["text"], "No command recognized");

        let (_, reply) = post(
            h.state,
            "/webhooks/chat/interaction",
            &[],
            json!({"action": {"actionMethodName": "approve_outreach", "parameters": [{"key": "draft_id", "value": "d1"}]}}),
        )
        .await;
        assert_eq!(reply["text"], "Processing your action...");

        let messages = h.publisher.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].1["command"], "/probe");
        assert_eq!(messages[0].1["args"], "recP1 2024-06-06T14:00:00Z 2024-06-06T14:30:00Z");
        assert_eq!(messages[1].1["parameters"], json!({"draft_id": "d1"}));
    }

    #[tokio::test]
    async fn test_scheduler_requires_configuration() {
        let h = harness().build();
        let (status, body) = post(h.state.clone(), "/scheduler/renew-gmail-watch", &[], json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("GMAIL_WATCH_TOPIC"));

        let (status, _) = post(h.state.clone(), "/scheduler/poll-drive", &[], json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = post(h.state.clone(), "/scheduler/renew-drive-watch", &[], json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("DRIVE_FOLDER_RESUMES_INCOMING"));

        let (status, body) = post(h.state, "/scheduler/stop-gmail-watch", &[], json!({})).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "EXTERNAL_SERVICE_ERROR");
    }

    #[tokio::test]
    async fn test_poll_drive_retries_file_after_publish_failure() {
        let stub = GoogleStub::start().await;
        stub.on(
            Method::GET,
            "/drive/v3/files",
            json!({"files": [{"id": "f1", "name": "Jane_Resume.pdf", "mimeType": "application/pdf", "parents": ["folder-in"]}]}),
        );
        let h = harness()
            .config(|c| c.drive_folder_resumes_incoming = Some("folder-in".into()))
            .google(stub.services())
            .build();

        h.publisher.set_failing(true);
        let (status, body) = post(h.state.clone(), "/scheduler/poll-drive", &[], json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files_found"], 1);
        assert_eq!(body["published"], json!([]));
        assert_eq!(body["already_seen"], 0);

        h.publisher.set_failing(false);
        let (_, body) = post(h.state.clone(), "/scheduler/poll-drive", &[], json!({})).await;
        assert_eq!(body["published"][0]["file_id"], "f1");
        assert_eq!(body["already_seen"], 0);
        assert_eq!(h.publisher.messages()[0].1["file_id"], "f1");

        let (_, body) = post(h.state, "/scheduler/poll-drive", &[], json!({})).await;
        assert_eq!(body["published"], json!([]));
        assert_eq!(body["already_seen"], 1);
        assert_eq!(stub.requests_to(Method::GET, "/drive/v3/files").len(), 3);
    }

    #[test]
    fn test_drive_created_event_shape() {
        let file: DriveFile = serde_json::from_value(json!({
            "id": "f1", "name": "Jane_Resume.pdf", "mimeType": "application/pdf", "parents": ["folder"]
        }))
        .unwrap();
        let event = drive_created_event(&file);
        assert_eq!(event["event_type"], "drive.file.created");
        assert_eq!(event["folder_type"], "resumes");
        assert_eq!(event["mime_type"], "application/pdf");
    }
}
