//! Applicant replies arriving in the hiring inbox.

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::EventError;
use crate::db::cursors;
use crate::pipeline::repository::PipelineRepository;
use crate::state::AppState;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailEvent {
    #[serde(default, deserialize_with = "string_or_number")]
    pub history_id: Option<String>,
    #[serde(default)]
    pub email_address: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Compares bare addresses, ignoring case.
pub fn is_from_applicant(sender: Option<&str>, applicant_email: Option<&str>) -> bool {
    match (sender, applicant_email) {
        (Some(sender), Some(applicant)) => sender.trim().eq_ignore_ascii_case(applicant.trim()),
        _ => false,
    }
}

pub async fn route(state: &AppState, data: Value) -> Result<Value, EventError> {
    let event: GmailEvent = serde_json::from_value(data)?;
    info!(history_id = ?event.history_id, message_id = ?event.message_id, "Routing Gmail event");

    if let Some(message_id) = &event.message_id {
        return process_message_direct(state, message_id).await;
    }
    match &event.history_id {
        Some(history_id) => process_history(state, history_id).await,
        None => Ok(json!({"status": "ignored", "reason": "Event has neither message_id nor history_id"})),
    }
}

/// Handles one message: it must sit on a pipeline's outreach thread and come
/// from that applicant.
pub async fn process_message_direct(state: &AppState, message_id: &str) -> Result<Value, EventError> {
    let message = state.google.gmail.get_message(message_id).await?;
    let Some(thread_id) = message.thread_id.clone() else {
        return Ok(json!({"status": "ignored", "reason": "Message has no thread", "message_id": message_id}));
    };

    let repo = PipelineRepository::new(state.store.as_ref(), &state.audit);
    let Some(pipeline) = repo.find_pipeline_by_thread_id(&thread_id).await? else {
        info!(thread_id = %thread_id, "Thread is not an outreach thread");
        return Ok(json!({
            "status": "ignored",
            "reason": "Thread not associated with pipeline",
            "thread_id": thread_id,
        }));
    };

    let sender = message.sender_email();
    if !is_from_applicant(sender.as_deref(), pipeline.primary_email.as_deref()) {
        info!(pipeline_id = %pipeline.id, from = ?sender, "Message is not from the applicant");
        return Ok(json!({"status": "ignored", "reason": "Message not from applicant", "from": sender}));
    }

    let outcome = state
        .hr_pipeline
        .parse_applicant_email_reply(&thread_id, &message.id, &message.body_text, &pipeline.id)
        .await?;
    if let Err(e) = state.google.gmail.mark_as_read(&message.id).await {
        warn!(message_id = %message.id, error = %e, "Failed to mark reply as read");
    }
    Ok(json!({
        "status": "processed",
        "pipeline_id": pipeline.id,
        "applicant_name": pipeline.applicant_name,
        "result": outcome,
    }))
}

/// Walks the mailbox history from the stored cursor. The first notification
/// only records its history id.
async fn process_history(state: &AppState, history_id: &str) -> Result<Value, EventError> {
    let Some(cursor) = state.cursors.get(cursors::GMAIL_HISTORY).await? else {
        state.cursors.set(cursors::GMAIL_HISTORY, history_id).await?;
        info!(history_id, "Initialized Gmail history cursor");
        return Ok(json!({"status": "cursor_initialized", "history_id": history_id}));
    };

    let page = state.google.gmail.list_history(&cursor).await?;
    let mut results = Vec::with_capacity(page.message_ids.len());
    for message_id in &page.message_ids {
        match process_message_direct(state, message_id).await {
            Ok(result) => results.push(json!({"message_id": message_id, "result": result})),
            Err(e) => {
                error!(message_id = %message_id, error = %e, "Failed to process Gmail message");
                results.push(json!({"message_id": message_id, "status": "error", "error": e.to_string()}));
            }
        }
    }

    let next = page.history_id.unwrap_or_else(|| history_id.to_string());
    if let Err(e) = state.cursors.set(cursors::GMAIL_HISTORY, &next).await {
        warn!(history_id = %next, error = %e, "Failed to advance Gmail history cursor");
    }
    info!(from = %cursor, to = %next, messages = results.len(), "Processed Gmail history");
    Ok(json!({
        "status": "processed",
        "history_id": next,
        "messages": results.len(),
        "results": results,
    }))
}
