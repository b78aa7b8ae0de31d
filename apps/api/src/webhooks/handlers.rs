//! Per-table handlers for Airtable change notifications.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::payload::{extract_changed_fields, get_field_changes, name_cells, AirtableWebhookPayload, TableChangeSet};
use super::WebhookError;
use crate::airtable::schema::SchemaManager;
use crate::google::pubsub::EventBus;
use crate::pipeline::tables;

const SOURCE: &str = "airtable_webhook";

#[async_trait]
pub trait TableHandler: Send + Sync {
    /// Handles one table's changes and returns a summary of the actions taken.
    async fn handle(&self, changes: &TableChangeSet) -> Result<Value, WebhookError>;
}

fn processed(changes: &TableChangeSet, actions: Vec<Value>) -> Value {
    json!({
        "status": "processed",
        "actions_taken": actions,
        "webhook_id": changes.webhook_id,
    })
}

fn field_name(schema: &SchemaManager, table: &str, field: String) -> String {
    schema
        .field_name_for_id(table, &field)
        .map(str::to_string)
        .unwrap_or(field)
}

// ────────────────────────────────────────────────────────────────────────────
// Republishing handlers
// ────────────────────────────────────────────────────────────────────────────

/// Republishes every changed record to the Airtable topic so the event
/// router can act on it.
struct RecordChangePublisher {
    events: EventBus,
    schema: Arc<SchemaManager>,
}

impl RecordChangePublisher {
    async fn publish(&self, changes: &TableChangeSet) -> Vec<Value> {
        let table = changes.table_name.as_str();
        // Downstream routing keys on the API name, whatever name the sender used.
        let api_name = self.schema.table_api_name(table);
        let mut actions = Vec::new();

        for (record_id, record) in &changes.changes.changed_records_by_id {
            let changed_fields: Vec<String> = extract_changed_fields(record)
                .into_iter()
                .map(|f| field_name(&self.schema, table, f))
                .collect();
            info!(table, record_id = %record_id, ?changed_fields, "Record updated");

            let event = json!({
                "source": SOURCE,
                "table_id": changes.table_id,
                "table_name": api_name,
                "record_id": record_id,
                "changed_fields": changed_fields,
                "current_values": name_cells(&record.current_values(), table, Some(&self.schema)),
                "timestamp": changes.timestamp,
                "webhook_id": changes.webhook_id,
            });
            match self.events.publish_airtable(&event).await {
                Ok(message_id) => actions.push(json!({
                    "action": "published_to_pubsub",
                    "record_id": record_id,
                    "message_id": message_id,
                    "topic": self.events.topics().airtable,
                })),
                Err(e) => {
                    error!(table, record_id = %record_id, error = %e, "Failed to publish record change");
                    actions.push(json!({
                        "action": "pubsub_failed",
                        "record_id": record_id,
                        "error": e.to_string(),
                    }));
                }
            }
        }

        for record_id in changes.changes.created_records_by_id.keys() {
            info!(table, record_id = %record_id, "Record created");
            actions.push(json!({
                "action": "record_created",
                "record_id": record_id,
                "table": table,
            }));
        }
        actions
    }
}

pub struct ApplicantsHandler {
    publisher: RecordChangePublisher,
}

impl ApplicantsHandler {
    pub fn new(events: EventBus, schema: Arc<SchemaManager>) -> Self {
        Self {
            publisher: RecordChangePublisher { events, schema },
        }
    }
}

#[async_trait]
impl TableHandler for ApplicantsHandler {
    async fn handle(&self, changes: &TableChangeSet) -> Result<Value, WebhookError> {
        Ok(processed(changes, self.publisher.publish(changes).await))
    }
}

/// Stage transitions and screening decisions are acted on downstream by the
/// event router; this handler only republishes them.
pub struct PipelineHandler {
    publisher: RecordChangePublisher,
}

impl PipelineHandler {
    pub fn new(events: EventBus, schema: Arc<SchemaManager>) -> Self {
        Self {
            publisher: RecordChangePublisher { events, schema },
        }
    }
}

#[async_trait]
impl TableHandler for PipelineHandler {
    async fn handle(&self, changes: &TableChangeSet) -> Result<Value, WebhookError> {
        Ok(processed(changes, self.publisher.publish(changes).await))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Logging handlers
// ────────────────────────────────────────────────────────────────────────────

/// The interactions table is an audit log; new rows are only recorded.
pub struct InteractionsHandler {
    schema: Arc<SchemaManager>,
}

impl InteractionsHandler {
    pub fn new(schema: Arc<SchemaManager>) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl TableHandler for InteractionsHandler {
    async fn handle(&self, changes: &TableChangeSet) -> Result<Value, WebhookError> {
        let table = changes.table_name.as_str();
        let actions = changes
            .changes
            .created_records_by_id
            .iter()
            .map(|(record_id, record)| {
                let fields = name_cells(&record.cell_values_by_field_id, table, Some(&self.schema));
                info!(
                    record_id = %record_id,
                    interaction_type = %fields.get("Type").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
                    "New interaction logged"
                );
                json!({"action": "interaction_logged", "record_id": record_id})
            })
            .collect();
        Ok(processed(changes, actions))
    }
}

pub struct ContractorsHandler {
    schema: Arc<SchemaManager>,
}

impl ContractorsHandler {
    pub fn new(schema: Arc<SchemaManager>) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl TableHandler for ContractorsHandler {
    async fn handle(&self, changes: &TableChangeSet) -> Result<Value, WebhookError> {
        let table = changes.table_name.as_str();
        let mut actions = Vec::new();
        for (record_id, record) in &changes.changes.changed_records_by_id {
            for (field, change) in get_field_changes(record) {
                let field = field_name(&self.schema, table, field);
                if !field.to_lowercase().contains("status") {
                    continue;
                }
                info!(
                    record_id = %record_id,
                    field = %field,
                    old = %change["old"],
                    new = %change["new"],
                    "Contractor status changed"
                );
                actions.push(json!({
                    "action": "status_changed",
                    "record_id": record_id,
                    "field": field,
                    "old": change["old"],
                    "new": change["new"],
                }));
            }
        }
        Ok(processed(changes, actions))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Registry
// ────────────────────────────────────────────────────────────────────────────

/// Maps table names to handlers and fans a payload out to them.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TableHandler>>,
    schema: Arc<SchemaManager>,
}

impl HandlerRegistry {
    pub fn new(schema: Arc<SchemaManager>) -> Self {
        Self {
            handlers: HashMap::new(),
            schema,
        }
    }

    /// The four built-in table handlers.
    pub fn with_defaults(events: EventBus, schema: Arc<SchemaManager>) -> Self {
        let mut registry = Self::new(schema.clone());
        registry.register(
            tables::APPLICANTS,
            Arc::new(ApplicantsHandler::new(events.clone(), schema.clone())),
        );
        registry.register(
            tables::APPLICANT_PIPELINE,
            Arc::new(PipelineHandler::new(events, schema.clone())),
        );
        registry.register(tables::INTERACTIONS, Arc::new(InteractionsHandler::new(schema.clone())));
        registry.register(tables::CONTRACTORS, Arc::new(ContractorsHandler::new(schema)));
        registry
    }

    pub fn register(&mut self, table: &str, handler: Arc<dyn TableHandler>) {
        self.handlers.insert(table.to_string(), handler);
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    pub async fn dispatch(&self, payload: &AirtableWebhookPayload) -> Value {
        let tables = payload.changed_tables(Some(&self.schema));
        if tables.is_empty() {
            warn!(webhook_id = ?payload.webhook_id(), "Webhook has no changed tables");
            return json!({"status": "ignored", "reason": "no_changes"});
        }

        let mut results = Vec::with_capacity(tables.len());
        for changes in &tables {
            results.push(self.dispatch_table(changes).await);
        }
        json!({
            "status": "processed",
            "webhook_id": payload.webhook_id(),
            "results": results,
        })
    }

    /// Runs the handler registered for one table's changes.
    pub async fn dispatch_table(&self, changes: &TableChangeSet) -> Value {
        let table = changes.table_name.as_str();
        info!(table, table_id = %changes.table_id, "Processing table changes");
        let key = self.schema.table_api_name(table);
        let Some(handler) = self.handlers.get(key) else {
            warn!(table, "No handler registered for table");
            return json!({"table": table, "table_id": changes.table_id, "status": "no_handler"});
        };
        match handler.handle(changes).await {
            Ok(result) => json!({"table": table, "table_id": changes.table_id, "result": result}),
            Err(e) => {
                error!(table, error = %e, "Table handler failed");
                json!({"table": table, "table_id": changes.table_id, "error": e.to_string()})
            }
        }
    }
}
