//! Read-only question answering over Airtable, Gmail, Calendar and Drive.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse_args, run_tool_loop, AgentError, ToolExecutor};
use crate::airtable::{Record, RecordStore};
use crate::google::calendar::CalendarService;
use crate::google::drive::DriveService;
use crate::google::gmail::GmailService;
use crate::llm_client::{ChatMessage, ChatModel, LlmError, ToolDefinition};
use crate::pipeline::tables;

const MAX_ITERATIONS: usize = 10;
const DEFAULT_THREAD_LIMIT: u32 = 10;
const DEFAULT_EVENT_LIMIT: u32 = 25;
const DEFAULT_SLOT_MINUTES: i64 = 30;
const DEFAULT_SLOT_WINDOW_DAYS: i64 = 7;

const SYSTEM_PROMPT: &str = "You are the JetsMX Company Knowledge Base assistant. You answer \
questions about applicants, contractors and pipeline status in Airtable, calendar events, \
email threads and Drive files.

Your access is READ-ONLY. You can look things up but cannot change anything.

Name the system each answer comes from, summarize concisely, suggest next steps when useful, \
and say so when the information is out of reach.";

#[derive(Clone)]
pub struct CompanyKbAgent {
    store: Arc<dyn RecordStore>,
    gmail: GmailService,
    calendar: CalendarService,
    drive: DriveService,
    model: Arc<dyn ChatModel>,
}

impl CompanyKbAgent {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gmail: GmailService,
        calendar: CalendarService,
        drive: DriveService,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        Self {
            store,
            gmail,
            calendar,
            drive,
            model,
        }
    }

    pub async fn chat(&self, message: &str, history: &[ChatMessage]) -> Result<String, LlmError> {
        info!(agent = "company_kb", "Handling chat request");
        run_tool_loop(self.model.as_ref(), SYSTEM_PROMPT, history, message, self, MAX_ITERATIONS).await
    }
}

#[derive(Debug, Deserialize)]
struct RecordIdArgs {
    record_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct FindArgs {
    #[serde(default)]
    formula: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageArgs {
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct ThreadArgs {
    thread_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct ListThreadsArgs {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    max_results: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EventsArgs {
    #[serde(default)]
    time_min: Option<String>,
    #[serde(default)]
    time_max: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EventArgs {
    event_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct FreeSlotArgs {
    #[serde(default)]
    duration_minutes: Option<i64>,
    #[serde(default)]
    window_days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FileArgs {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct FolderArgs {
    folder_id: String,
    #[serde(default)]
    mime_type: Option<String>,
}

fn id_param(name: &str, description: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(name.to_string(), json!({"type": "string", "description": description}));
    json!({ "type": "object", "properties": properties, "required": [name] })
}

#[async_trait]
impl ToolExecutor for CompanyKbAgent {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::function(
                "airtable_get_applicant",
                "Get an applicant by Airtable record ID",
                id_param("record_id", "Airtable record ID"),
            ),
            ToolDefinition::function(
                "airtable_get_pipeline",
                "Get an applicant pipeline record by Airtable record ID",
                id_param("record_id", "Airtable record ID"),
            ),
            ToolDefinition::function(
                "airtable_find_applicants",
                "Find applicants matching an Airtable formula",
                json!({
                    "type": "object",
                    "properties": {
                        "formula": {
                            "type": "string",
                            "description": "Airtable formula, e.g. {Email} = 'a@b.com'. Leave empty for all applicants."
                        }
                    }
                }),
            ),
            ToolDefinition::function(
                "gmail_get_message",
                "Get a Gmail message by ID",
                id_param("message_id", "Gmail message ID"),
            ),
            ToolDefinition::function(
                "gmail_get_thread",
                "Get a Gmail thread with all of its messages",
                id_param("thread_id", "Gmail thread ID"),
            ),
            ToolDefinition::function(
                "gmail_list_threads",
                "List Gmail threads matching a search query",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "Gmail search, e.g. from:user@example.com"},
                        "max_results": {"type": "integer", "description": "Default 10"}
                    }
                }),
            ),
            ToolDefinition::function(
                "calendar_list_events",
                "List calendar events in a time range",
                json!({
                    "type": "object",
                    "properties": {
                        "time_min": {"type": "string", "description": "RFC 3339 start, defaults to now"},
                        "time_max": {"type": "string", "description": "RFC 3339 end"}
                    }
                }),
            ),
            ToolDefinition::function(
                "calendar_get_event",
                "Get one calendar event with attendees and Meet link",
                id_param("event_id", "Calendar event ID"),
            ),
            ToolDefinition::function(
                "calendar_find_free_slots",
                "Find open calendar slots in the coming days",
                json!({
                    "type": "object",
                    "properties": {
                        "duration_minutes": {"type": "integer", "description": "Default 30"},
                        "window_days": {"type": "integer", "description": "Default 7"}
                    }
                }),
            ),
            ToolDefinition::function(
                "drive_get_file_metadata",
                "Get a Drive file's name, MIME type, created time and link",
                id_param("file_id", "Drive file ID"),
            ),
            ToolDefinition::function(
                "drive_list_files_in_folder",
                "List files in a Drive folder",
                json!({
                    "type": "object",
                    "properties": {
                        "folder_id": {"type": "string"},
                        "mime_type": {"type": "string", "description": "Optional filter, e.g. application/pdf"}
                    },
                    "required": ["folder_id"]
                }),
            ),
        ]
    }

    async fn execute(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        match name {
            "airtable_get_applicant" => {
                let a: RecordIdArgs = parse_args(args)?;
                let record = self.store.get(tables::APPLICANTS, &a.record_id).await?;
                Ok(record.into_value())
            }
            "airtable_get_pipeline" => {
                let a: RecordIdArgs = parse_args(args)?;
                let record = self
                    .store
                    .get(tables::APPLICANT_PIPELINE, &a.record_id)
                    .await?;
                Ok(record.into_value())
            }
            "airtable_find_applicants" => {
                let a: FindArgs = parse_args(args)?;
                let formula = a.formula.as_deref().filter(|f| !f.trim().is_empty());
                let records = self.store.all(tables::APPLICANTS, formula).await?;
                Ok(json!({
                    "count": records.len(),
                    "records": records.into_iter().map(Record::into_value).collect::<Vec<_>>(),
                }))
            }
            "gmail_get_message" => {
                let a: MessageArgs = parse_args(args)?;
                Ok(serde_json::to_value(self.gmail.get_message(&a.message_id).await?)
                    .unwrap_or(Value::Null))
            }
            "gmail_get_thread" => {
                let a: ThreadArgs = parse_args(args)?;
                Ok(serde_json::to_value(self.gmail.get_thread(&a.thread_id).await?)
                    .unwrap_or(Value::Null))
            }
            "gmail_list_threads" => {
                let a: ListThreadsArgs = parse_args(args)?;
                let threads = self
                    .gmail
                    .list_threads(a.query.as_deref(), a.max_results.unwrap_or(DEFAULT_THREAD_LIMIT))
                    .await?;
                Ok(json!({ "threads": threads }))
            }
            "calendar_list_events" => {
                let a: EventsArgs = parse_args(args)?;
                let events = self
                    .calendar
                    .list_events(a.time_min.as_deref(), a.time_max.as_deref(), DEFAULT_EVENT_LIMIT)
                    .await?;
                Ok(json!({ "events": events }))
            }
            "calendar_get_event" => {
                let a: EventArgs = parse_args(args)?;
                Ok(self.calendar.get_event(&a.event_id).await?)
            }
            "calendar_find_free_slots" => {
                let a: FreeSlotArgs = parse_args(args)?;
                let minutes = a.duration_minutes.unwrap_or(DEFAULT_SLOT_MINUTES).max(1);
                let days = a.window_days.unwrap_or(DEFAULT_SLOT_WINDOW_DAYS).clamp(1, 30);
                let slots = self
                    .calendar
                    .find_free_slots(chrono::Duration::minutes(minutes), days)
                    .await?;
                Ok(json!({ "slots": slots }))
            }
            "drive_get_file_metadata" => {
                let a: FileArgs = parse_args(args)?;
                Ok(json!(self.drive.get_file_metadata(&a.file_id).await?))
            }
            "drive_list_files_in_folder" => {
                let a: FolderArgs = parse_args(args)?;
                let files = self
                    .drive
                    .list_files_in_folder(&a.folder_id, a.mime_type.as_deref(), None)
                    .await?;
                Ok(json!({ "files": files }))
            }
            other => Err(AgentError::UnknownTool(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::testing::MemoryStore;
    use crate::google::testing::offline_services;
    use crate::google::GoogleApiError;
    use crate::llm_client::testing::ScriptedModel;

    fn agent(store: Arc<MemoryStore>) -> CompanyKbAgent {
        let google = offline_services();
        CompanyKbAgent::new(
            store,
            google.gmail,
            google.calendar,
            google.drive,
            Arc::new(ScriptedModel::new()),
        )
    }

    #[test]
    fn test_exposes_only_read_tools() {
        let names: Vec<String> = agent(Arc::new(MemoryStore::new()))
            .tool_definitions()
            .into_iter()
            .map(|t| t.function.name)
            .collect();
        assert_eq!(names.len(), 11);
        assert!(names.iter().all(|n| !n.contains("create") && !n.contains("update")));
    }

    #[tokio::test]
    async fn test_find_applicants_with_formula() {
        let store = Arc::new(MemoryStore::new());
        store.insert("applicants", "rec1", json!({"Email": "ann@example.com"}));
        store.insert("applicants", "rec2", json!({"Email": "bob@example.com"}));
        let out = agent(store)
            .execute("airtable_find_applicants", json!({"formula": "{Email} = 'bob@example.com'"}))
            .await
            .unwrap();
        assert_eq!(out["count"], json!(1));
        assert_eq!(out["records"][0]["id"], json!("rec2"));
    }

    #[tokio::test]
    async fn test_get_pipeline_reads_pipeline_table() {
        let store = Arc::new(MemoryStore::new());
        store.insert("applicant_pipeline", "recP", json!({"Pipeline Stage": "New"}));
        let out = agent(store)
            .execute("airtable_get_pipeline", json!({"record_id": "recP"}))
            .await
            .unwrap();
        assert_eq!(out["fields"]["Pipeline Stage"], json!("New"));
    }

    #[tokio::test]
    async fn test_google_failures_surface_as_errors() {
        let err = agent(Arc::new(MemoryStore::new()))
            .execute("gmail_get_message", json!({"message_id": "m1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Google(GoogleApiError::Auth(_))));
    }
}
