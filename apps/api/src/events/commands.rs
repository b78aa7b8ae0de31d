//! Asynchronous Airtable commands delivered over Pub/Sub.
//!
//! Other services publish a command, this consumer runs it through the
//! Airtable agent and sends a [`CommandResult`] to the callback URL and/or
//! topic named in the command.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use super::EventError;
use crate::agents::AgentError;
use crate::airtable::bulk::{BulkOperationResult, UpdateRequest};
use crate::airtable::export::{upload_export, ExportFormat};
use crate::airtable::formula::Condition;
use crate::airtable::query::AggregateOp;
use crate::airtable::Fields;
use crate::state::AppState;

const DEFAULT_INITIATOR: &str = "pubsub_system";
const DEFAULT_BATCH_SIZE: usize = 10;
const DEFAULT_MAX_RECORDS: usize = 100;
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);

fn new_command_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_initiator() -> String {
    DEFAULT_INITIATOR.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_records() -> Option<usize> {
    Some(DEFAULT_MAX_RECORDS)
}

fn default_true() -> bool {
    true
}

fn default_format() -> String {
    "csv".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirtableCommand {
    #[serde(default = "new_command_id")]
    pub command_id: String,
    #[serde(default = "default_initiator")]
    pub initiated_by: String,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub callback_topic: Option<String>,
    #[serde(flatten)]
    pub kind: CommandKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command_type", rename_all = "snake_case")]
pub enum CommandKind {
    Query {
        table: String,
        #[serde(default)]
        filters: Vec<Condition>,
        #[serde(default)]
        formula: Option<String>,
        #[serde(default = "default_max_records")]
        max_records: Option<usize>,
    },
    BulkCreate {
        table: String,
        records: Vec<Fields>,
        #[serde(default = "default_batch_size")]
        batch_size: usize,
        #[serde(default = "default_true")]
        validate: bool,
    },
    BulkUpdate {
        table: String,
        updates: Vec<UpdateRequest>,
        #[serde(default = "default_batch_size")]
        batch_size: usize,
        #[serde(default = "default_true")]
        validate: bool,
        #[serde(default)]
        replace: bool,
    },
    BulkDelete {
        table: String,
        record_ids: Vec<String>,
        #[serde(default = "default_batch_size")]
        batch_size: usize,
    },
    Export {
        table: String,
        #[serde(default = "default_format")]
        format: String,
        #[serde(default)]
        filters: Vec<Condition>,
        #[serde(default)]
        upload_to: Option<String>,
    },
    Analytics {
        table: String,
        agg_type: String,
        #[serde(default)]
        field: Option<String>,
        #[serde(default)]
        group_by: Option<String>,
        #[serde(default)]
        filters: Vec<Condition>,
    },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Query { .. } => "query",
            Self::BulkCreate { .. } => "bulk_create",
            Self::BulkUpdate { .. } => "bulk_update",
            Self::BulkDelete { .. } => "bulk_delete",
            Self::Export { .. } => "export",
            Self::Analytics { .. } => "analytics",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub command_id: String,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub execution_time_ms: Option<f64>,
}

/// Success and payload of a finished command, before timing is attached.
struct Outcome {
    success: bool,
    result: Value,
}

impl Outcome {
    fn ok(result: Value) -> Self {
        Self { success: true, result }
    }

    /// Bulk commands only succeed when every record did.
    fn bulk(result: BulkOperationResult) -> Self {
        Self {
            success: result.is_complete_success(),
            result: result.to_json(),
        }
    }
}

async fn run(state: &AppState, command: &AirtableCommand) -> Result<Outcome, AgentError> {
    let agent = &state.airtable_agent;
    let by = command.initiated_by.as_str();
    match &command.kind {
        CommandKind::Query {
            table,
            filters,
            formula,
            max_records,
        } => {
            let records = agent.query(table, filters, formula.as_deref(), *max_records).await?;
            Ok(Outcome::ok(json!({"count": records.len(), "records": records})))
        }
        CommandKind::BulkCreate {
            table,
            records,
            batch_size,
            validate,
        } => Ok(Outcome::bulk(
            agent
                .bulk_create(table, records.clone(), *validate, Some(*batch_size), by)
                .await,
        )),
        CommandKind::BulkUpdate {
            table,
            updates,
            batch_size,
            validate,
            replace,
        } => Ok(Outcome::bulk(
            agent
                .bulk_update(table, updates.clone(), *validate, *replace, Some(*batch_size), by)
                .await,
        )),
        CommandKind::BulkDelete {
            table,
            record_ids,
            batch_size,
        } => Ok(Outcome::bulk(
            agent.bulk_delete(table, record_ids, Some(*batch_size), by).await,
        )),
        CommandKind::Export {
            table,
            format,
            filters,
            upload_to,
        } => {
            let format = ExportFormat::parse(format)?;
            let export = agent.export(table, format, filters).await?;
            match upload_to {
                Some(path) => {
                    let location = upload_export(&state.s3, path, export.data.into_bytes(), format).await?;
                    Ok(Outcome::ok(json!({
                        "uploaded_to": location,
                        "record_count": export.record_count,
                    })))
                }
                None => Ok(Outcome::ok(json!({
                    "data": export.data,
                    "record_count": export.record_count,
                }))),
            }
        }
        CommandKind::Analytics {
            table,
            agg_type,
            field,
            group_by,
            filters,
        } => {
            let op = AggregateOp::parse(agg_type)?;
            let result = agent
                .aggregate(table, op, field.as_deref().unwrap_or_default(), group_by.as_deref(), filters)
                .await?;
            Ok(Outcome::ok(result))
        }
    }
}

/// Runs a command. Failures are captured in the result, never returned.
pub async fn execute(state: &AppState, command: &AirtableCommand) -> CommandResult {
    let started = Instant::now();
    let outcome = run(state, command).await;
    let elapsed = started.elapsed().as_secs_f64() * 1000.0;

    match outcome {
        Ok(outcome) => {
            info!(
                command_id = %command.command_id,
                command_type = command.kind.name(),
                success = outcome.success,
                elapsed_ms = elapsed,
                "Command completed"
            );
            CommandResult {
                command_id: command.command_id.clone(),
                success: outcome.success,
                result: Some(outcome.result),
                error: None,
                timestamp: Utc::now(),
                execution_time_ms: Some(elapsed),
            }
        }
        Err(e) => {
            error!(command_id = %command.command_id, command_type = command.kind.name(), error = %e, "Command failed");
            CommandResult {
                command_id: command.command_id.clone(),
                success: false,
                result: None,
                error: Some(e.to_string()),
                timestamp: Utc::now(),
                execution_time_ms: Some(elapsed),
            }
        }
    }
}

/// Sends the result to the command's callbacks. Failures are only logged.
async fn deliver(state: &AppState, command: &AirtableCommand, result: &Value) {
    if let Some(url) = &command.callback_url {
        let response = state
            .http
            .post(url)
            .json(result)
            .timeout(CALLBACK_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status());
        match response {
            Ok(_) => info!(command_id = %command.command_id, url = %url, "Posted command result"),
            Err(e) => error!(command_id = %command.command_id, url = %url, error = %e, "Callback POST failed"),
        }
    }

    if let Some(topic) = &command.callback_topic {
        match state.events.publish(topic, result).await {
            Ok(message_id) => info!(command_id = %command.command_id, topic = %topic, message_id = %message_id, "Published command result"),
            Err(e) => error!(command_id = %command.command_id, topic = %topic, error = %e, "Callback publish failed"),
        }
    }
}

pub async fn route(state: &AppState, data: Value) -> Result<Value, EventError> {
    let command: AirtableCommand =
        serde_json::from_value(data).map_err(|e| EventError::InvalidCommand(e.to_string()))?;
    info!(command_id = %command.command_id, command_type = command.kind.name(), initiated_by = %command.initiated_by, "Processing command");

    let result = serde_json::to_value(execute(state, &command).await)?;
    deliver(state, &command, &result).await;
    Ok(result)
}
