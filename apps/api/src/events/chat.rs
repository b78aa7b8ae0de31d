//! Slash commands and card clicks from the HR Chat space.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::EventError;
use crate::google::chat::{ACTION_APPROVE_OUTREACH, ACTION_SELECT_PROBE_TIME};
use crate::state::AppState;

/// Older probe cards used this action name.
const ACTION_APPROVE_PROBE_TIME: &str = "approve_probe_time";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatEvent {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub action_name: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    #[serde(default)]
    pub user: Option<String>,
}

/// What a Chat event asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatRequest {
    ScheduleProbe {
        pipeline_id: String,
        start: String,
        end: String,
        phone: Option<String>,
    },
    CancelProbe {
        pipeline_id: String,
        reason: Option<String>,
    },
    RescheduleProbe {
        pipeline_id: String,
        start: String,
        end: String,
    },
    SendOutreach {
        pipeline_id: String,
        draft_id: String,
    },
    Unknown(String),
}

fn usage(text: &str) -> EventError {
    EventError::InvalidCommand(format!("usage: {text}"))
}

fn required(params: &HashMap<String, String>, key: &str, action: &str) -> Result<String, EventError> {
    params
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| EventError::InvalidCommand(format!("{action} requires {key}")))
}

pub fn parse_command(command: &str, args: &str) -> Result<ChatRequest, EventError> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    match command {
        "/probe" => match parts.as_slice() {
            [pipeline_id, start, end, ..] => Ok(ChatRequest::ScheduleProbe {
                pipeline_id: pipeline_id.to_string(),
                start: start.to_string(),
                end: end.to_string(),
                phone: None,
            }),
            _ => Err(usage("/probe <pipeline_id> <start> <end>")),
        },
        "/cancel-probe" => match parts.split_first() {
            Some((pipeline_id, reason)) => Ok(ChatRequest::CancelProbe {
                pipeline_id: pipeline_id.to_string(),
                reason: (!reason.is_empty()).then(|| reason.join(" ")),
            }),
            None => Err(usage("/cancel-probe <pipeline_id> [reason]")),
        },
        "/reschedule-probe" => match parts.as_slice() {
            [pipeline_id, start, end, ..] => Ok(ChatRequest::RescheduleProbe {
                pipeline_id: pipeline_id.to_string(),
                start: start.to_string(),
                end: end.to_string(),
            }),
            _ => Err(usage("/reschedule-probe <pipeline_id> <start> <end>")),
        },
        other => Ok(ChatRequest::Unknown(other.to_string())),
    }
}

pub fn parse_action(action: &str, params: &HashMap<String, String>) -> Result<ChatRequest, EventError> {
    match action {
        ACTION_APPROVE_OUTREACH => Ok(ChatRequest::SendOutreach {
            pipeline_id: required(params, "pipeline_id", action)?,
            draft_id: required(params, "draft_id", action)?,
        }),
        ACTION_SELECT_PROBE_TIME | ACTION_APPROVE_PROBE_TIME => Ok(ChatRequest::ScheduleProbe {
            pipeline_id: required(params, "pipeline_id", action)?,
            start: required(params, "start_time", action)?,
            end: required(params, "end_time", action)?,
            phone: params.get("phone").filter(|p| !p.is_empty()).cloned(),
        }),
        other => Ok(ChatRequest::Unknown(other.to_string())),
    }
}

pub async fn route(state: &AppState, data: Value) -> Result<Value, EventError> {
    let event: ChatEvent = serde_json::from_value(data)?;
    info!(command = ?event.command, action = ?event.action_name, user = ?event.user, "Routing Chat event");

    let request = match (&event.command, &event.action_name) {
        (Some(command), _) if !command.is_empty() => parse_command(command, &event.args)?,
        (_, Some(action)) if !action.is_empty() => parse_action(action, &event.parameters)?,
        _ => ChatRequest::Unknown(String::new()),
    };

    let hr = &state.hr_pipeline;
    match request {
        ChatRequest::ScheduleProbe {
            pipeline_id,
            start,
            end,
            phone,
        } => {
            let scheduled = hr
                .approve_probe_schedule(&pipeline_id, &start, &end, phone.as_deref())
                .await?;
            Ok(json!({"status": "probe_scheduled", "result": scheduled}))
        }
        ChatRequest::CancelProbe { pipeline_id, reason } => {
            let cancelled = hr.cancel_probe_call(&pipeline_id, reason.as_deref()).await?;
            Ok(json!({"status": "probe_cancelled", "result": cancelled}))
        }
        ChatRequest::RescheduleProbe { pipeline_id, start, end } => {
            let scheduled = hr.reschedule_probe_call(&pipeline_id, &start, &end).await?;
            Ok(json!({"status": "probe_rescheduled", "result": scheduled}))
        }
        ChatRequest::SendOutreach { pipeline_id, draft_id } => {
            let sent = hr.send_approved_outreach(&pipeline_id, &draft_id).await?;
            Ok(json!({"status": "email_sent", "draft_id": draft_id, "result": sent}))
        }
        ChatRequest::Unknown(name) => {
            info!(name = %name, "Unknown Chat command");
            Ok(json!({"status": "unknown_command", "command": name}))
        }
    }
}
