//! Airtable webhook payloads and change-set helpers.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::airtable::schema::SchemaManager;

/// Cell values keyed by field id (or by field name for legacy senders).
pub type CellValues = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookRef {
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCells {
    #[serde(default)]
    pub cell_values_by_field_id: CellValues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangedRecord {
    #[serde(default)]
    pub current: Option<RecordCells>,
    #[serde(default)]
    pub previous: Option<RecordCells>,
    #[serde(default)]
    pub unchanged: Option<RecordCells>,
}

impl ChangedRecord {
    pub fn current_values(&self) -> CellValues {
        self.current
            .as_ref()
            .map(|c| c.cell_values_by_field_id.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRecord {
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub cell_values_by_field_id: CellValues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableChanges {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub changed_records_by_id: BTreeMap<String, ChangedRecord>,
    #[serde(default)]
    pub created_records_by_id: BTreeMap<String, CreatedRecord>,
    #[serde(default)]
    pub destroyed_record_ids: Vec<String>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.changed_records_by_id.is_empty()
            && self.created_records_by_id.is_empty()
            && self.destroyed_record_ids.is_empty()
    }
}

/// A change notification as Airtable delivers it, either pushed directly or
/// fetched from the payloads endpoint. Older senders put the id in
/// `webhookId` instead of `webhook.id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AirtableWebhookPayload {
    #[serde(default)]
    pub webhook: Option<WebhookRef>,
    #[serde(default, rename = "webhookId", skip_serializing_if = "Option::is_none")]
    pub legacy_webhook_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub base_transaction_number: Option<u64>,
    #[serde(default)]
    pub changed_tables_by_id: Option<BTreeMap<String, TableChanges>>,
}

impl AirtableWebhookPayload {
    pub fn webhook_id(&self) -> Option<&str> {
        self.webhook
            .as_ref()
            .map(|w| w.id.as_str())
            .or(self.legacy_webhook_id.as_deref())
    }

    /// A bare notification that only says new payloads are waiting.
    pub fn is_ping(&self) -> bool {
        self.changed_tables_by_id.is_none()
    }

    /// Changed tables with their names resolved from the payload, then from
    /// the schema's table ids.
    pub fn changed_tables(&self, schema: Option<&SchemaManager>) -> Vec<TableChangeSet> {
        let Some(tables) = &self.changed_tables_by_id else {
            return Vec::new();
        };
        tables
            .iter()
            .map(|(table_id, changes)| {
                let table_name = changes
                    .name
                    .clone()
                    .or_else(|| schema.and_then(|s| s.table_name_for_id(table_id)).map(str::to_string))
                    .unwrap_or_else(|| "unknown".to_string());
                TableChangeSet {
                    webhook_id: self.webhook_id().map(str::to_string),
                    timestamp: self.timestamp.clone(),
                    table_id: table_id.clone(),
                    table_name,
                    changes: changes.clone(),
                }
            })
            .collect()
    }
}

/// One table's slice of a payload, as handed to its handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableChangeSet {
    pub webhook_id: Option<String>,
    pub timestamp: Option<String>,
    pub table_id: String,
    pub table_name: String,
    pub changes: TableChanges,
}

/// Union of field keys present in the current and previous values.
pub fn extract_changed_fields(record: &ChangedRecord) -> BTreeSet<String> {
    [&record.current, &record.previous]
        .into_iter()
        .flatten()
        .flat_map(|cells| cells.cell_values_by_field_id.keys().cloned())
        .collect()
}

/// `{field: {old, new}}` for every field whose value actually changed.
pub fn get_field_changes(record: &ChangedRecord) -> Map<String, Value> {
    let empty = CellValues::new();
    let previous = record
        .previous
        .as_ref()
        .map(|c| &c.cell_values_by_field_id)
        .unwrap_or(&empty);
    let current = record
        .current
        .as_ref()
        .map(|c| &c.cell_values_by_field_id)
        .unwrap_or(&empty);

    extract_changed_fields(record)
        .into_iter()
        .filter_map(|field| {
            let old = previous.get(&field).cloned().unwrap_or(Value::Null);
            let new = current.get(&field).cloned().unwrap_or(Value::Null);
            (old != new).then(|| (field, json!({ "old": old, "new": new })))
        })
        .collect()
}

/// True when the field's current value equals `expected`.
pub fn check_condition(record: &ChangedRecord, field: &str, expected: &Value) -> bool {
    record
        .current
        .as_ref()
        .and_then(|c| c.cell_values_by_field_id.get(field))
        .is_some_and(|v| v == expected)
}

/// Rewrites field-id keys to display names where the schema knows them.
pub fn name_cells(cells: &CellValues, table: &str, schema: Option<&SchemaManager>) -> CellValues {
    let Some(schema) = schema else {
        return cells.clone();
    };
    cells
        .iter()
        .map(|(key, value)| {
            let name = schema.field_name_for_id(table, key).unwrap_or(key);
            (name.to_string(), value.clone())
        })
        .collect()
}
