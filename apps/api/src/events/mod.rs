//! Pub/Sub push consumer. Messages republished by the webhook receivers come
//! back here and are routed to the agents that act on them.

pub mod airtable;
pub mod chat;
pub mod commands;
pub mod drive;
pub mod gmail;

use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::agents::AgentError;
use crate::airtable::AirtableError;
use crate::errors::AppError;
use crate::google::pubsub::PushEnvelope;
use crate::google::GoogleApiError;
use crate::idempotency::{first_delivery, MESSAGE_TTL};
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Could not decode event: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Google API error: {0}")]
    Google(#[from] GoogleApiError),

    #[error("Airtable error: {0}")]
    Airtable(#[from] AirtableError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Where a Pub/Sub message came from, taken from the push endpoint path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Airtable,
    Gmail,
    Drive,
    Chat,
    Commands,
}

impl EventSource {
    /// Substring match so topic or subscription names also resolve.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        // Command topics are named after Airtable, so they are checked first.
        if name.contains("command") {
            Some(Self::Commands)
        } else if name.contains("airtable") {
            Some(Self::Airtable)
        } else if name.contains("gmail") {
            Some(Self::Gmail)
        } else if name.contains("drive") {
            Some(Self::Drive)
        } else if name.contains("chat") {
            Some(Self::Chat)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Airtable => "airtable",
            Self::Gmail => "gmail",
            Self::Drive => "drive",
            Self::Chat => "chat",
            Self::Commands => "commands",
        }
    }
}

/// Runs the workflow for one decoded event.
pub async fn route_event(state: &AppState, source: EventSource, data: Value) -> Result<Value, EventError> {
    info!(source = source.as_str(), "Routing event");
    match source {
        EventSource::Airtable => airtable::route(state, data).await,
        EventSource::Gmail => gmail::route(state, data).await,
        EventSource::Drive => drive::route(state, data).await,
        EventSource::Chat => chat::route(state, data).await,
        EventSource::Commands => commands::route(state, data).await,
    }
}

/// POST /pubsub/:source
///
/// Workflow failures are reported in the body with a 2xx status: the message
/// id is already claimed, so a redelivery would be dropped anyway.
pub async fn handle_pubsub(
    State(state): State<AppState>,
    Path(source): Path<String>,
    Json(envelope): Json<PushEnvelope>,
) -> Result<Json<Value>, AppError> {
    let data = envelope
        .decode()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let Some(data) = data else {
        return Ok(Json(json!({"status": "ignored", "reason": "No message in envelope"})));
    };
    let message_id = envelope.message_id().map(str::to_string);
    info!(source = %source, message_id = ?message_id, "Received Pub/Sub message");

    let Some(event_source) = EventSource::from_name(&source) else {
        warn!(source = %source, "Unknown event source");
        return Ok(Json(json!({"status": "unknown_event", "source": source})));
    };

    if let Some(id) = &message_id {
        let key = format!("pubsub:{id}");
        if !first_delivery(state.idempotency.as_ref(), &key, MESSAGE_TTL).await {
            info!(message_id = %id, "Dropping redelivered message");
            return Ok(Json(json!({"status": "duplicate", "message_id": id})));
        }
    }

    match route_event(&state, event_source, data).await {
        Ok(result) => Ok(Json(json!({
            "status": "processed",
            "message_id": message_id,
            "result": result,
        }))),
        Err(e) => {
            error!(source = event_source.as_str(), message_id = ?message_id, error = %e, "Event processing failed");
            Ok(Json(json!({
                "status": "error",
                "message_id": message_id,
                "error": e.to_string(),
            })))
        }
    }
}
