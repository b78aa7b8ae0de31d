//! Natural-language and programmatic access to the Airtable base.
//!
//! The same operations back both surfaces: the model reaches them through
//! function calls, Pub/Sub commands call the methods directly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{parse_args, run_tool_loop, AgentError, ToolExecutor};
use crate::airtable::analytics::{self, ApplicantAnalytics, PipelineAnalytics};
use crate::airtable::bulk::{BulkOperationResult, BulkOperations, UpdateRequest, UpsertResult};
use crate::airtable::export::ExportFormat;
use crate::airtable::formula::{self, Condition, Logic};
use crate::airtable::query::{AggregateOp, QueryEngine};
use crate::airtable::schema::SchemaManager;
use crate::airtable::{Fields, Record, RecordStore};
use crate::audit::AuditLogger;
use crate::llm_client::prompts::AUDIT_NOTICE;
use crate::llm_client::{ChatMessage, ChatModel, LlmError, ToolDefinition};
use crate::pipeline::{tables, PipelineStage};

pub const AGENT_NAME: &str = "airtable_agent";
const MAX_ITERATIONS: usize = 10;
const DEFAULT_MAX_RECORDS: usize = 100;
const DEFAULT_REPORT_DAYS: i64 = 30;

const SYSTEM_PROMPT: &str = "You are the JetsMX Airtable Agent. You help the team read and \
maintain the company's Airtable base.

Turn each request into function calls, run them, and answer in short, readable text.

Tables:
- applicants: one record per candidate (name, email, phone, licenses, experience)
- applicant_pipeline: hiring stage and automation state for each applicant
- contractors: onboarded technicians
- interactions: log of every applicant communication

You can search and filter records, create and update them, run bulk creates, updates, \
deletes and upserts, count and group records, summarize the hiring funnel, export to CSV \
or JSON, and describe table structure. Excel export is not available.

Ask a clarifying question when a request is ambiguous. Validate required fields before \
creating records. When you cannot do something, say why and offer an alternative.";

/// Rendered export returned to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutput {
    pub format: ExportFormat,
    pub record_count: usize,
    pub data: String,
}

#[derive(Clone)]
pub struct AirtableAgent {
    store: Arc<dyn RecordStore>,
    schema: Arc<SchemaManager>,
    audit: AuditLogger,
    engine: QueryEngine,
    model: Arc<dyn ChatModel>,
}

impl AirtableAgent {
    pub fn new(
        store: Arc<dyn RecordStore>,
        schema: Arc<SchemaManager>,
        audit: AuditLogger,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        let engine = QueryEngine::new(store.clone()).with_schema(schema.clone());
        Self {
            store,
            schema,
            audit,
            engine,
            model,
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Conversational entry point
    // ────────────────────────────────────────────────────────────────────────

    pub async fn chat(&self, message: &str, history: &[ChatMessage]) -> Result<String, LlmError> {
        info!(agent = AGENT_NAME, "Handling chat request");
        let system = format!("{SYSTEM_PROMPT}\n\n{AUDIT_NOTICE}");
        run_tool_loop(self.model.as_ref(), &system, history, message, self, MAX_ITERATIONS).await
    }

    // ────────────────────────────────────────────────────────────────────────
    // Reads
    // ────────────────────────────────────────────────────────────────────────

    /// Filters take precedence over a raw formula; neither lists the table.
    pub async fn query(
        &self,
        table: &str,
        filters: &[Condition],
        formula: Option<&str>,
        max_records: Option<usize>,
    ) -> Result<Vec<Record>, AgentError> {
        let built;
        let formula = if filters.is_empty() {
            formula
        } else {
            built = formula::build_complex_query(filters, Logic::And);
            Some(built.as_str())
        };
        Ok(self
            .engine
            .simple_query(table, formula, max_records, Vec::new(), None)
            .await?)
    }

    pub async fn search(
        &self,
        table: &str,
        term: &str,
        fields: Option<&[String]>,
    ) -> Result<Vec<Record>, AgentError> {
        Ok(self.engine.search(table, term, fields).await?)
    }

    pub async fn get(&self, table: &str, record_id: &str) -> Option<Record> {
        self.engine.get_by_id(table, record_id).await
    }

    pub async fn find_by_email(&self, table: &str, email: &str) -> Result<Vec<Record>, AgentError> {
        Ok(self.engine.get_by_email(table, email).await?)
    }

    pub async fn count(&self, table: &str, filters: &[Condition]) -> Result<usize, AgentError> {
        Ok(self.query(table, filters, None, None).await?.len())
    }

    pub async fn aggregate(
        &self,
        table: &str,
        op: AggregateOp,
        field: &str,
        group_by: Option<&str>,
        filters: &[Condition],
    ) -> Result<Value, AgentError> {
        let formula = (!filters.is_empty()).then(|| formula::build_complex_query(filters, Logic::And));
        Ok(self
            .engine
            .aggregate(table, field, op, group_by, formula.as_deref())
            .await?)
    }

    /// Funnel, outreach and applicant-pool statistics across the hiring tables.
    pub async fn hiring_report(&self, recent_days: i64) -> Result<Value, AgentError> {
        let pipelines = self.query(tables::APPLICANT_PIPELINE, &[], None, None).await?;
        let applicants = self.query(tables::APPLICANTS, &[], None, None).await?;
        let outreach = PipelineAnalytics::response_rate(&pipelines);
        let reply_conversion = PipelineAnalytics::conversion_rate(
            &pipelines,
            PipelineStage::InitialEmailSent.as_str(),
            PipelineStage::ApplicantResponded.as_str(),
        );
        Ok(json!({
            "pipeline": {
                "total": pipelines.len(),
                "stages": PipelineAnalytics::stage_funnel(&pipelines),
                "outreach": outreach,
                "reply_conversion_percent": reply_conversion,
                "recent_outreach": analytics::date_range_analysis(
                    &pipelines,
                    "Initial Email Sent At",
                    recent_days,
                    Utc::now(),
                ),
            },
            "applicants": {
                "certification": ApplicantAnalytics::certification_stats(&applicants),
                "experience": ApplicantAnalytics::experience_stats(&applicants),
                "geography": ApplicantAnalytics::geographic_distribution(&applicants),
            },
        }))
    }

    pub async fn export(
        &self,
        table: &str,
        format: ExportFormat,
        filters: &[Condition],
    ) -> Result<ExportOutput, AgentError> {
        let records = self.query(table, filters, None, None).await?;
        let data = format.render(&records)?;
        info!(table, format = format.extension(), count = records.len(), "Exported records");
        Ok(ExportOutput {
            format,
            record_count: records.len(),
            data,
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Schema
    // ────────────────────────────────────────────────────────────────────────

    pub fn tables(&self) -> Vec<String> {
        self.schema.tables().into_iter().map(str::to_string).collect()
    }

    /// `"all"` describes every table in the base.
    pub fn schema(&self, table: &str) -> Result<String, AgentError> {
        if table == "all" {
            return Ok(self.schema.describe_all_tables());
        }
        Ok(self.schema.describe_table(table)?)
    }

    pub fn validate(&self, table: &str, fields: &Fields) -> Vec<String> {
        self.schema.validate_record(table, fields)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Writes
    // ────────────────────────────────────────────────────────────────────────

    pub async fn create(
        &self,
        table: &str,
        fields: Fields,
        initiated_by: &str,
        reason: &str,
    ) -> Result<Record, AgentError> {
        let errors = self.validate(table, &fields);
        if !errors.is_empty() {
            return Err(AgentError::Validation(errors));
        }
        let record = self.store.create(table, fields, true).await?;
        self.audit
            .log_airtable_created(table, &record.id, &record.fields, initiated_by, reason)
            .await;
        info!(table, record_id = %record.id, "Created record");
        Ok(record)
    }

    /// Patches `fields`, or replaces the record when `replace` is set. The
    /// previous values of the touched fields go into the audit event.
    pub async fn update(
        &self,
        table: &str,
        record_id: &str,
        fields: Fields,
        replace: bool,
        initiated_by: &str,
        reason: &str,
    ) -> Result<Record, AgentError> {
        let errors = self.validate(table, &fields);
        if !errors.is_empty() {
            return Err(AgentError::Validation(errors));
        }
        let before: Option<Fields> = self.engine.get_by_id(table, record_id).await.map(|r| {
            fields
                .keys()
                .filter_map(|k| r.fields.get(k).map(|v| (k.clone(), v.clone())))
                .collect()
        });
        let record = self.store.update(table, record_id, fields.clone(), replace).await?;
        self.audit
            .log_airtable_update(table, record_id, &fields, before, initiated_by, reason)
            .await;
        info!(table, record_id, "Updated record");
        Ok(record)
    }

    fn bulk(&self, initiated_by: &str, batch_size: Option<usize>) -> BulkOperations {
        let ops = BulkOperations::new(self.store.clone())
            .with_schema(self.schema.clone())
            .with_audit(self.audit.clone())
            .initiated_by(initiated_by);
        match batch_size {
            Some(n) => ops.batch_size(n),
            None => ops,
        }
    }

    pub async fn bulk_create(
        &self,
        table: &str,
        records: Vec<Fields>,
        validate: bool,
        batch_size: Option<usize>,
        initiated_by: &str,
    ) -> BulkOperationResult {
        self.bulk(initiated_by, batch_size)
            .bulk_create(table, records, validate, true)
            .await
    }

    pub async fn bulk_update(
        &self,
        table: &str,
        updates: Vec<UpdateRequest>,
        validate: bool,
        replace: bool,
        batch_size: Option<usize>,
        initiated_by: &str,
    ) -> BulkOperationResult {
        self.bulk(initiated_by, batch_size)
            .bulk_update(table, updates, validate, replace)
            .await
    }

    pub async fn bulk_delete(
        &self,
        table: &str,
        record_ids: &[String],
        batch_size: Option<usize>,
        initiated_by: &str,
    ) -> BulkOperationResult {
        self.bulk(initiated_by, batch_size)
            .bulk_delete(table, record_ids)
            .await
    }

    pub async fn upsert(
        &self,
        table: &str,
        records: Vec<Fields>,
        key_field: &str,
        validate: bool,
        initiated_by: &str,
    ) -> UpsertResult {
        self.bulk(initiated_by, None)
            .bulk_upsert(table, records, key_field, validate)
            .await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tool surface
// ────────────────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    table: String,
    #[serde(default)]
    search_term: Option<String>,
    #[serde(default)]
    filters: Vec<Condition>,
    #[serde(default)]
    max_records: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    table: String,
    term: String,
    #[serde(default)]
    fields: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct RecordArgs {
    table: String,
    record_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateArgs {
    table: String,
    fields: Fields,
}

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    table: String,
    record_id: String,
    fields: Fields,
    #[serde(default)]
    replace: bool,
}

#[derive(Debug, Deserialize)]
struct FilterArgs {
    table: String,
    #[serde(default)]
    filters: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct GroupArgs {
    table: String,
    field: String,
}

#[derive(Debug, Deserialize)]
struct ReportArgs {
    #[serde(default)]
    days: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ExportArgs {
    table: String,
    format: String,
    #[serde(default)]
    filters: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct TableArgs {
    table: String,
}

#[derive(Debug, Deserialize)]
struct BulkCreateArgs {
    table: String,
    records: Vec<Fields>,
    #[serde(default = "default_true")]
    validate: bool,
}

#[derive(Debug, Deserialize)]
struct BulkUpdateArgs {
    table: String,
    updates: Vec<UpdateRequest>,
    #[serde(default = "default_true")]
    validate: bool,
    #[serde(default)]
    replace: bool,
}

#[derive(Debug, Deserialize)]
struct BulkDeleteArgs {
    table: String,
    record_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UpsertArgs {
    table: String,
    records: Vec<Fields>,
    key_field: String,
    #[serde(default = "default_true")]
    validate: bool,
}

fn records_json(records: &[Record]) -> Vec<Value> {
    records.iter().cloned().map(Record::into_value).collect()
}

fn table_param() -> Value {
    json!({"type": "string", "description": "Table name, e.g. applicants or applicant_pipeline"})
}

fn filters_param() -> Value {
    json!({
        "type": "array",
        "description": "Filters as {field, op, value}; op is one of equals, not_equals, contains, >, <, >=, <=, is_empty, is_not_empty, in, date_after, date_before",
        "items": {"type": "object"}
    })
}

#[async_trait]
impl ToolExecutor for AirtableAgent {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::function(
                "query_records",
                "Find records in a table by search term or filters",
                json!({
                    "type": "object",
                    "properties": {
                        "table": table_param(),
                        "search_term": {"type": "string", "description": "Free text to search for"},
                        "filters": filters_param(),
                        "max_records": {"type": "integer", "description": "Maximum records to return (default 100)"}
                    },
                    "required": ["table"]
                }),
            ),
            ToolDefinition::function(
                "search_records",
                "Full-text search across a table's text fields",
                json!({
                    "type": "object",
                    "properties": {
                        "table": table_param(),
                        "term": {"type": "string"},
                        "fields": {"type": "array", "items": {"type": "string"}, "description": "Fields to search (defaults to all text fields)"}
                    },
                    "required": ["table", "term"]
                }),
            ),
            ToolDefinition::function(
                "get_record_by_id",
                "Get a single record by its ID",
                json!({
                    "type": "object",
                    "properties": {"table": table_param(), "record_id": {"type": "string"}},
                    "required": ["table", "record_id"]
                }),
            ),
            ToolDefinition::function(
                "create_record",
                "Create a new record",
                json!({
                    "type": "object",
                    "properties": {
                        "table": table_param(),
                        "fields": {"type": "object", "description": "Field values keyed by field name"}
                    },
                    "required": ["table", "fields"]
                }),
            ),
            ToolDefinition::function(
                "update_record",
                "Update fields of an existing record",
                json!({
                    "type": "object",
                    "properties": {
                        "table": table_param(),
                        "record_id": {"type": "string"},
                        "fields": {"type": "object"},
                        "replace": {"type": "boolean", "description": "Clear fields not given"}
                    },
                    "required": ["table", "record_id", "fields"]
                }),
            ),
            ToolDefinition::function(
                "count_records",
                "Count records, optionally filtered",
                json!({
                    "type": "object",
                    "properties": {"table": table_param(), "filters": filters_param()},
                    "required": ["table"]
                }),
            ),
            ToolDefinition::function(
                "group_and_count",
                "Count records grouped by the values of a field",
                json!({
                    "type": "object",
                    "properties": {"table": table_param(), "field": {"type": "string"}},
                    "required": ["table", "field"]
                }),
            ),
            ToolDefinition::function(
                "hiring_report",
                "Pipeline funnel, outreach response rate and applicant pool statistics",
                json!({
                    "type": "object",
                    "properties": {
                        "days": {"type": "integer", "description": "Window for recent outreach, default 30"}
                    }
                }),
            ),
            ToolDefinition::function(
                "export_data",
                "Export records as CSV, JSON, or a readable text or chat listing",
                json!({
                    "type": "object",
                    "properties": {
                        "table": table_param(),
                        "format": {"type": "string", "enum": ["csv", "json", "text", "chat"]},
                        "filters": filters_param()
                    },
                    "required": ["table", "format"]
                }),
            ),
            ToolDefinition::function(
                "get_table_schema",
                "Describe the fields of a table, or of every table when table is \"all\"",
                json!({
                    "type": "object",
                    "properties": {"table": table_param()},
                    "required": ["table"]
                }),
            ),
            ToolDefinition::function(
                "bulk_create",
                "Create many records in batches of ten",
                json!({
                    "type": "object",
                    "properties": {
                        "table": table_param(),
                        "records": {"type": "array", "items": {"type": "object"}},
                        "validate": {"type": "boolean"}
                    },
                    "required": ["table", "records"]
                }),
            ),
            ToolDefinition::function(
                "bulk_update",
                "Update many records; each entry is {id, fields}",
                json!({
                    "type": "object",
                    "properties": {
                        "table": table_param(),
                        "updates": {"type": "array", "items": {"type": "object"}},
                        "validate": {"type": "boolean"},
                        "replace": {"type": "boolean"}
                    },
                    "required": ["table", "updates"]
                }),
            ),
            ToolDefinition::function(
                "bulk_delete",
                "Delete many records by ID",
                json!({
                    "type": "object",
                    "properties": {
                        "table": table_param(),
                        "record_ids": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["table", "record_ids"]
                }),
            ),
            ToolDefinition::function(
                "upsert",
                "Update records whose key field matches an existing record, create the rest",
                json!({
                    "type": "object",
                    "properties": {
                        "table": table_param(),
                        "records": {"type": "array", "items": {"type": "object"}},
                        "key_field": {"type": "string"},
                        "validate": {"type": "boolean"}
                    },
                    "required": ["table", "records", "key_field"]
                }),
            ),
        ]
    }

    async fn execute(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        match name {
            "query_records" => {
                let a: QueryArgs = parse_args(args)?;
                let max = a.max_records.unwrap_or(DEFAULT_MAX_RECORDS);
                let mut records = match a.search_term.as_deref().filter(|t| !t.is_empty()) {
                    Some(term) => self.search(&a.table, term, None).await?,
                    None => self.query(&a.table, &a.filters, None, Some(max)).await?,
                };
                let count = records.len();
                records.truncate(max);
                Ok(json!({ "success": true, "count": count, "records": records_json(&records) }))
            }
            "search_records" => {
                let a: SearchArgs = parse_args(args)?;
                let records = self.search(&a.table, &a.term, a.fields.as_deref()).await?;
                Ok(json!({ "success": true, "count": records.len(), "records": records_json(&records) }))
            }
            "get_record_by_id" => {
                let a: RecordArgs = parse_args(args)?;
                match self.get(&a.table, &a.record_id).await {
                    Some(record) => Ok(json!({ "success": true, "record": record.into_value() })),
                    None => Err(AgentError::NotFound(format!("{}/{}", a.table, a.record_id))),
                }
            }
            "create_record" => {
                let a: CreateArgs = parse_args(args)?;
                let record = self
                    .create(&a.table, a.fields, AGENT_NAME, "Created via conversational request")
                    .await?;
                Ok(json!({ "success": true, "record": record.into_value() }))
            }
            "update_record" => {
                let a: UpdateArgs = parse_args(args)?;
                let record = self
                    .update(
                        &a.table,
                        &a.record_id,
                        a.fields,
                        a.replace,
                        AGENT_NAME,
                        "Updated via conversational request",
                    )
                    .await?;
                Ok(json!({ "success": true, "record": record.into_value() }))
            }
            "count_records" => {
                let a: FilterArgs = parse_args(args)?;
                let count = self.count(&a.table, &a.filters).await?;
                Ok(json!({ "success": true, "count": count }))
            }
            "group_and_count" => {
                let a: GroupArgs = parse_args(args)?;
                let records = self.query(&a.table, &[], None, None).await?;
                Ok(json!({ "success": true, "counts": analytics::count_by_field(&records, &a.field) }))
            }
            "hiring_report" => {
                let a: ReportArgs = parse_args(args)?;
                let days = a.days.unwrap_or(DEFAULT_REPORT_DAYS).max(1);
                Ok(json!({ "success": true, "report": self.hiring_report(days).await? }))
            }
            "export_data" => {
                let a: ExportArgs = parse_args(args)?;
                let output = self
                    .export(&a.table, ExportFormat::parse(&a.format)?, &a.filters)
                    .await?;
                Ok(json!({
                    "success": true,
                    "format": output.format.extension(),
                    "record_count": output.record_count,
                    "data": output.data,
                }))
            }
            "get_table_schema" => {
                let a: TableArgs = parse_args(args)?;
                Ok(json!({ "success": true, "schema": self.schema(&a.table)? }))
            }
            "bulk_create" => {
                let a: BulkCreateArgs = parse_args(args)?;
                let result = self
                    .bulk_create(&a.table, a.records, a.validate, None, AGENT_NAME)
                    .await;
                Ok(bulk_json(&result))
            }
            "bulk_update" => {
                let a: BulkUpdateArgs = parse_args(args)?;
                let result = self
                    .bulk_update(&a.table, a.updates, a.validate, a.replace, None, AGENT_NAME)
                    .await;
                Ok(bulk_json(&result))
            }
            "bulk_delete" => {
                let a: BulkDeleteArgs = parse_args(args)?;
                let result = self.bulk_delete(&a.table, &a.record_ids, None, AGENT_NAME).await;
                Ok(bulk_json(&result))
            }
            "upsert" => {
                let a: UpsertArgs = parse_args(args)?;
                let result = self
                    .upsert(&a.table, a.records, &a.key_field, a.validate, AGENT_NAME)
                    .await;
                let mut out = bulk_json(&result.combined());
                out["created"] = json!(result.created.success_count());
                out["updated"] = json!(result.updated.success_count());
                Ok(out)
            }
            other => {
                warn!(tool = other, "Unknown Airtable tool");
                Err(AgentError::UnknownTool(other.to_string()))
            }
        }
    }
}

fn bulk_json(result: &BulkOperationResult) -> Value {
    let mut out = result.to_json();
    out["success"] = json!(result.is_complete_success());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::testing::MemoryStore;
    use crate::llm_client::testing::{tool_call_message, ScriptedModel};
    use crate::llm_client::Role;

    const SCHEMA: &str = include_str!("../../config/airtable_schema.yaml");

    fn agent_with(store: Arc<MemoryStore>, model: Arc<ScriptedModel>) -> AirtableAgent {
        let schema = Arc::new(SchemaManager::from_yaml_str(SCHEMA).unwrap());
        AirtableAgent::new(store, schema, AuditLogger::tracing_only(), model)
    }

    fn agent(store: Arc<MemoryStore>) -> AirtableAgent {
        agent_with(store, Arc::new(ScriptedModel::new()))
    }

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_fields() {
        let store = Arc::new(MemoryStore::new());
        let agent = agent(store.clone());
        let err = agent
            .create("applicants", fields(json!({"Email": "not-an-email"})), "tester", "test")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(ref e) if e.len() == 1));
        assert_eq!(store.call_count("create"), 0);
    }

    #[tokio::test]
    async fn test_update_patches_record() {
        let store = Arc::new(MemoryStore::new());
        store.insert("applicant_pipeline", "recP1", json!({"Pipeline Stage": "New", "Screening Notes": "x"}));
        let agent = agent(store.clone());
        let record = agent
            .update(
                "applicant_pipeline",
                "recP1",
                fields(json!({"Pipeline Stage": "Profile Generated"})),
                false,
                "tester",
                "test",
            )
            .await
            .unwrap();
        assert_eq!(record.str_field("Pipeline Stage"), Some("Profile Generated"));
        assert_eq!(record.str_field("Screening Notes"), Some("x"));
    }

    #[tokio::test]
    async fn test_query_tool_truncates_but_reports_total() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..3 {
            store.insert("applicants", &format!("rec{i}"), json!({"Applicant Name": format!("A{i}")}));
        }
        let agent = agent(store.clone());
        let out = agent
            .execute("query_records", json!({"table": "applicants", "max_records": 2}))
            .await
            .unwrap();
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["records"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_filters_become_formula() {
        let store = Arc::new(MemoryStore::new());
        store.insert("applicants", "rec1", json!({"Baseline Verdict": "Strong Fit"}));
        store.insert("applicants", "rec2", json!({"Baseline Verdict": "Maybe"}));
        let agent = agent(store.clone());
        let out = agent
            .execute(
                "count_records",
                json!({"table": "applicants", "filters": [{"field": "Baseline Verdict", "op": "equals", "value": "Maybe"}]}),
            )
            .await
            .unwrap();
        assert_eq!(out["count"], json!(1));
        assert_eq!(store.formulas.lock().unwrap()[0], "{Baseline Verdict} = 'Maybe'");
    }

    #[tokio::test]
    async fn test_group_and_count() {
        let store = Arc::new(MemoryStore::new());
        store.insert("applicant_pipeline", "r1", json!({"Pipeline Stage": "New"}));
        store.insert("applicant_pipeline", "r2", json!({"Pipeline Stage": "New"}));
        store.insert("applicant_pipeline", "r3", json!({"Pipeline Stage": "Initial Email Sent"}));
        let out = agent(store)
            .execute("group_and_count", json!({"table": "applicant_pipeline", "field": "Pipeline Stage"}))
            .await
            .unwrap();
        assert_eq!(out["counts"], json!({"Initial Email Sent": 1, "New": 2}));
    }

    #[tokio::test]
    async fn test_hiring_report() {
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "applicant_pipeline",
            "recP1",
            json!({"Pipeline Stage": "Initial Email Sent", "Initial Email Sent At": "2020-01-01T00:00:00Z"}),
        );
        store.insert(
            "applicant_pipeline",
            "recP2",
            json!({
                "Pipeline Stage": "Applicant Responded",
                "Initial Email Sent At": "2020-01-01T00:00:00Z",
                "Last Reply Received At": "2020-01-02T00:00:00Z"
            }),
        );
        store.insert("applicants", "recA1", json!({"Has FAA A&P": true, "Years in Aviation": 8}));
        store.insert("applicants", "recA2", json!({"Has FAA A&P": false}));

        let out = agent(store).execute("hiring_report", json!({})).await.unwrap();
        let report = &out["report"];
        assert_eq!(report["pipeline"]["total"], 2);
        assert_eq!(report["pipeline"]["outreach"]["emails_sent"], 2);
        assert_eq!(report["pipeline"]["outreach"]["response_rate_percent"], 50.0);
        assert_eq!(report["pipeline"]["reply_conversion_percent"], 100.0);
        assert_eq!(report["pipeline"]["recent_outreach"]["older_count"], 2);
        assert_eq!(report["applicants"]["certification"]["with_faa_ap"], 1);
        assert_eq!(report["applicants"]["experience"]["max_years"], 8.0);
    }

    #[tokio::test]
    async fn test_export_excel_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let err = agent(store)
            .execute("export_data", json!({"table": "applicants", "format": "excel"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Export(_)));
    }

    #[tokio::test]
    async fn test_export_csv() {
        let store = Arc::new(MemoryStore::new());
        store.insert("applicants", "rec1", json!({"Applicant Name": "Ann"}));
        let output = agent(store)
            .export("applicants", ExportFormat::Csv, &[])
            .await
            .unwrap();
        assert_eq!(output.record_count, 1);
        assert!(output.data.contains("Ann"));
    }

    #[tokio::test]
    async fn test_get_missing_record_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = agent(store)
            .execute("get_record_by_id", json!({"table": "applicants", "record_id": "recNope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_bulk_create_tool_reports_success() {
        let store = Arc::new(MemoryStore::new());
        let out = agent(store.clone())
            .execute(
                "bulk_create",
                json!({"table": "applicants", "records": [{"Applicant Name": "A"}, {"Applicant Name": "B"}]}),
            )
            .await
            .unwrap();
        assert_eq!(out["success"], json!(true));
        assert_eq!(out["success_count"], json!(2));
        assert_eq!(store.records("applicants").len(), 2);
    }

    #[tokio::test]
    async fn test_schema_tool_for_unknown_table() {
        let store = Arc::new(MemoryStore::new());
        let err = agent(store)
            .execute("get_table_schema", json!({"table": "aircraft"}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Schema(_)));
    }

    #[tokio::test]
    async fn test_schema_tool_describes_whole_base() {
        let store = Arc::new(MemoryStore::new());
        let result = agent(store)
            .execute("get_table_schema", json!({"table": "all"}))
            .await
            .unwrap();
        let text = result["schema"].as_str().unwrap();
        assert!(text.contains("(API: applicants)"));
        assert!(text.contains("(API: interactions)"));
    }

    #[tokio::test]
    async fn test_chat_runs_tools_then_answers() {
        let store = Arc::new(MemoryStore::new());
        store.insert("applicants", "rec1", json!({"Applicant Name": "Ann"}));
        let model = Arc::new(
            ScriptedModel::new()
                .reply(tool_call_message(&[("c1", "count_records", r#"{"table": "applicants"}"#)]))
                .reply(ChatMessage::assistant("There is 1 applicant.")),
        );
        let agent = agent_with(store, model.clone());
        let reply = agent.chat("How many applicants?", &[]).await.unwrap();
        assert_eq!(reply, "There is 1 applicant.");

        let second = &model.requests.lock().unwrap()[1];
        let tool_reply = second.iter().find(|m| m.role == Role::Tool).unwrap();
        let value: Value = serde_json::from_str(tool_reply.content.as_deref().unwrap()).unwrap();
        assert_eq!(value["count"], json!(1));
    }
}
