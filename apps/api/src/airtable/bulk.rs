//! Chunked batch writes with per-record fallback.
//!
//! Each operation sends records to Airtable in chunks of at most ten. When
//! a chunk is rejected the error is recorded as `Batch N: ...` and every
//! record of that chunk is retried on its own, so one bad row cannot sink
//! its neighbours.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::schema::SchemaManager;
use super::{formula, Fields, ListOptions, RecordStore, RecordUpdate, MAX_BATCH_SIZE};
use crate::audit::{AuditEvent, AuditLogger};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkOperationResult {
    pub successful: Vec<Value>,
    pub failed: Vec<Value>,
    pub errors: Vec<String>,
}

impl BulkOperationResult {
    pub fn success_count(&self) -> usize {
        self.successful.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }

    pub fn total_count(&self) -> usize {
        self.success_count() + self.failure_count()
    }

    /// Percentage rounded to one decimal; 0 when nothing was attempted.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_count();
        if total == 0 {
            return 0.0;
        }
        let rate = self.success_count() as f64 / total as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    }

    pub fn is_complete_success(&self) -> bool {
        self.failure_count() == 0 && self.errors.is_empty()
    }

    pub fn merge(&mut self, other: BulkOperationResult) {
        self.successful.extend(other.successful);
        self.failed.extend(other.failed);
        self.errors.extend(other.errors);
    }

    pub fn to_json(&self) -> Value {
        json!({
            "successful": self.successful,
            "failed": self.failed,
            "errors": self.errors,
            "success_count": self.success_count(),
            "failure_count": self.failure_count(),
            "total_count": self.total_count(),
            "success_rate": self.success_rate(),
        })
    }
}

/// An entry of a bulk update request. `id` is optional on the wire so a
/// missing id is reported per record instead of failing the whole call.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub fields: Fields,
}

impl UpdateRequest {
    pub fn new(id: &str, fields: Fields) -> Self {
        Self {
            id: Some(id.to_string()),
            fields,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertResult {
    pub created: BulkOperationResult,
    pub updated: BulkOperationResult,
    /// Records whose key lookup failed; never written.
    pub lookup_failed: BulkOperationResult,
}

impl UpsertResult {
    pub fn combined(&self) -> BulkOperationResult {
        let mut all = self.created.clone();
        all.merge(self.updated.clone());
        all.merge(self.lookup_failed.clone());
        all
    }
}

pub struct BulkOperations {
    store: Arc<dyn RecordStore>,
    schema: Option<Arc<SchemaManager>>,
    audit: Option<AuditLogger>,
    batch_size: usize,
    initiated_by: String,
}

impl BulkOperations {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            schema: None,
            audit: None,
            batch_size: MAX_BATCH_SIZE,
            initiated_by: "airtable_agent".to_string(),
        }
    }

    pub fn with_schema(mut self, schema: Arc<SchemaManager>) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn initiated_by(mut self, who: &str) -> Self {
        self.initiated_by = who.to_string();
        self
    }

    /// Clamped to 1..=10.
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n.clamp(1, MAX_BATCH_SIZE);
        self
    }

    fn validation_errors(&self, table: &str, fields: &Fields, validate: bool) -> Option<String> {
        if !validate {
            return None;
        }
        let schema = self.schema.as_ref()?;
        let errors = schema.validate_record(table, fields);
        if errors.is_empty() {
            None
        } else {
            Some(format!("Validation failed: {}", errors.join("; ")))
        }
    }

    /// The audit entry for a finished operation, or `None` when nothing
    /// was written.
    fn audit_event(&self, action: &str, table: &str, result: &BulkOperationResult, extra: Value) -> Option<AuditEvent> {
        if result.success_count() == 0 {
            return None;
        }
        let mut metadata = json!({
            "table": table,
            "success_count": result.success_count(),
            "failure_count": result.failure_count(),
            "total_count": result.total_count(),
        });
        if let (Some(meta), Value::Object(extra)) = (metadata.as_object_mut(), extra) {
            meta.extend(extra);
        }
        let event = AuditEvent::new(
            action,
            "airtable_record",
            format!("{table}:bulk"),
            self.initiated_by.as_str(),
            format!("Bulk {} operation", action.trim_start_matches("bulk_")),
        )
        .with_metadata(metadata);
        Some(event)
    }

    async fn audit_operation(&self, action: &str, table: &str, result: &BulkOperationResult, extra: Value) {
        let Some(audit) = &self.audit else {
            return;
        };
        match self.audit_event(action, table, result, extra) {
            Some(event) => audit.log(event).await,
            None => warn!(table, action, failed = result.failure_count(), "Nothing written, skipping audit"),
        }
    }

    pub async fn bulk_create(
        &self,
        table: &str,
        records: Vec<Fields>,
        validate: bool,
        typecast: bool,
    ) -> BulkOperationResult {
        let mut result = BulkOperationResult::default();
        if records.is_empty() {
            return result;
        }
        info!(table, count = records.len(), "Bulk create");

        let mut valid = Vec::with_capacity(records.len());
        for fields in records {
            match self.validation_errors(table, &fields, validate) {
                Some(err) => {
                    result.failed.push(Value::Object(fields));
                    result.errors.push(err);
                }
                None => valid.push(fields),
            }
        }

        for (i, chunk) in valid.chunks(self.batch_size).enumerate() {
            match self.store.batch_create(table, chunk.to_vec(), typecast).await {
                Ok(created) => {
                    info!(table, count = created.len(), "Created batch");
                    result
                        .successful
                        .extend(created.into_iter().map(|r| r.into_value()));
                }
                Err(e) => {
                    error!(table, batch = i + 1, error = %e, "Batch create failed, retrying records individually");
                    result.errors.push(format!("Batch {}: {e}", i + 1));
                    for fields in chunk {
                        match self.store.create(table, fields.clone(), typecast).await {
                            Ok(record) => result.successful.push(record.into_value()),
                            Err(e) => {
                                error!(table, error = %e, "Individual create failed");
                                result.failed.push(Value::Object(fields.clone()));
                                result.errors.push(format!("Record failed: {e}"));
                            }
                        }
                    }
                }
            }
        }

        info!(
            table,
            successful = result.success_count(),
            total = result.total_count(),
            "Bulk create complete"
        );
        self.audit_operation("bulk_create", table, &result, json!({})).await;
        result
    }

    pub async fn bulk_update(
        &self,
        table: &str,
        updates: Vec<UpdateRequest>,
        validate: bool,
        replace: bool,
    ) -> BulkOperationResult {
        let mut result = BulkOperationResult::default();
        if updates.is_empty() {
            return result;
        }
        info!(table, count = updates.len(), replace, "Bulk update");

        let mut valid: Vec<RecordUpdate> = Vec::with_capacity(updates.len());
        for update in updates {
            let Some(id) = update.id.clone().filter(|id| !id.is_empty()) else {
                result.failed.push(json!({ "fields": update.fields }));
                result.errors.push("Missing record id".to_string());
                continue;
            };
            match self.validation_errors(table, &update.fields, validate) {
                Some(err) => {
                    result.failed.push(json!({ "id": id, "fields": update.fields }));
                    result.errors.push(err);
                }
                None => valid.push(RecordUpdate {
                    id,
                    fields: update.fields,
                }),
            }
        }

        for (i, chunk) in valid.chunks(self.batch_size).enumerate() {
            match self.store.batch_update(table, chunk.to_vec(), replace).await {
                Ok(updated) => {
                    info!(table, count = updated.len(), "Updated batch");
                    result
                        .successful
                        .extend(updated.into_iter().map(|r| r.into_value()));
                }
                Err(e) => {
                    error!(table, batch = i + 1, error = %e, "Batch update failed, retrying records individually");
                    result.errors.push(format!("Batch {}: {e}", i + 1));
                    for update in chunk {
                        match self
                            .store
                            .update(table, &update.id, update.fields.clone(), replace)
                            .await
                        {
                            Ok(record) => result.successful.push(record.into_value()),
                            Err(e) => {
                                error!(table, record_id = %update.id, error = %e, "Individual update failed");
                                result
                                    .failed
                                    .push(json!({ "id": update.id, "fields": update.fields }));
                                result.errors.push(format!("Record {} failed: {e}", update.id));
                            }
                        }
                    }
                }
            }
        }

        info!(
            table,
            successful = result.success_count(),
            total = result.total_count(),
            "Bulk update complete"
        );
        self.audit_operation("bulk_update", table, &result, json!({ "replace": replace }))
            .await;
        result
    }

    pub async fn bulk_delete(&self, table: &str, record_ids: &[String]) -> BulkOperationResult {
        let mut result = BulkOperationResult::default();
        if record_ids.is_empty() {
            return result;
        }
        warn!(table, count = record_ids.len(), "Bulk delete");

        for (i, chunk) in record_ids.chunks(self.batch_size).enumerate() {
            match self.store.batch_delete(table, chunk).await {
                Ok(_) => {
                    info!(table, count = chunk.len(), "Deleted batch");
                    result
                        .successful
                        .extend(chunk.iter().map(|id| json!({ "id": id, "deleted": true })));
                }
                Err(e) => {
                    error!(table, batch = i + 1, error = %e, "Batch delete failed, retrying records individually");
                    result.errors.push(format!("Batch {}: {e}", i + 1));
                    for id in chunk {
                        match self.store.delete(table, id).await {
                            Ok(_) => result.successful.push(json!({ "id": id, "deleted": true })),
                            Err(e) => {
                                error!(table, record_id = %id, error = %e, "Individual delete failed");
                                result.failed.push(json!({ "id": id }));
                                result.errors.push(format!("Record {id} failed: {e}"));
                            }
                        }
                    }
                }
            }
        }

        let ids: Vec<&String> = record_ids.iter().take(100).collect();
        self.audit_operation("bulk_delete", table, &result, json!({ "record_ids": ids }))
            .await;
        result
    }

    /// Updates records whose `key_field` value already exists and creates
    /// the rest. Records without a key value are always created.
    pub async fn bulk_upsert(
        &self,
        table: &str,
        records: Vec<Fields>,
        key_field: &str,
        validate: bool,
    ) -> UpsertResult {
        let mut result = UpsertResult::default();
        if records.is_empty() {
            return result;
        }
        info!(table, count = records.len(), key_field, "Bulk upsert");

        let mut to_create = Vec::new();
        let mut to_update = Vec::new();

        for fields in records {
            let key_value = match fields.get(key_field) {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) if s.is_empty() => None,
                Some(v) => Some(v.clone()),
            };
            let Some(key_value) = key_value else {
                to_create.push(fields);
                continue;
            };

            let lookup = ListOptions::with_formula(formula::equals(key_field, &key_value)).max_records(1);
            match self.store.list(table, &lookup).await {
                Ok(existing) => match existing.into_iter().next() {
                    Some(record) => to_update.push(UpdateRequest::new(&record.id, fields)),
                    None => to_create.push(fields),
                },
                Err(e) => {
                    error!(table, key_field, error = %e, "Upsert lookup failed");
                    let shown = key_value.as_str().map(str::to_string).unwrap_or_else(|| key_value.to_string());
                    result.lookup_failed.failed.push(Value::Object(fields));
                    result.lookup_failed.errors.push(format!("Key {shown}: {e}"));
                }
            }
        }

        if !to_create.is_empty() {
            result.created = self.bulk_create(table, to_create, validate, false).await;
        }
        if !to_update.is_empty() {
            result.updated = self.bulk_update(table, to_update, validate, false).await;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::testing::MemoryStore;

    fn fields(v: Value) -> Fields {
        v.as_object().cloned().unwrap()
    }

    fn schema() -> Arc<SchemaManager> {
        Arc::new(SchemaManager::from_yaml_str(include_str!("../../config/airtable_schema.yaml")).unwrap())
    }

    #[test]
    fn test_success_rate_rounding() {
        let mut result = BulkOperationResult::default();
        assert_eq!(result.success_rate(), 0.0);
        result.successful = vec![json!(1), json!(2)];
        result.failed = vec![json!(3)];
        assert_eq!(result.success_rate(), 66.7);
        assert_eq!(result.to_json()["total_count"], json!(3));
    }

    #[test]
    fn test_batch_size_is_clamped() {
        let store = Arc::new(MemoryStore::new());
        assert_eq!(BulkOperations::new(store.clone()).batch_size(50).batch_size, 10);
        assert_eq!(BulkOperations::new(store).batch_size(0).batch_size, 1);
    }

    #[tokio::test]
    async fn test_bulk_create_chunks_by_ten() {
        let store = Arc::new(MemoryStore::new());
        let ops = BulkOperations::new(store.clone());
        let records = (0..23).map(|i| fields(json!({"Name": format!("n{i}")}))).collect();

        let result = ops.bulk_create("contractors", records, false, false).await;
        assert_eq!(result.success_count(), 23);
        assert_eq!(store.call_count("batch_create:contractors:10"), 2);
        assert_eq!(store.call_count("batch_create:contractors:3"), 1);
        assert_eq!(store.records("contractors").len(), 23);
    }

    #[tokio::test]
    async fn test_failed_batch_falls_back_to_individual_creates() {
        let store = Arc::new(MemoryStore::new());
        store.fail_batches(true);
        store.reject_value("Name", json!("bad"));
        let ops = BulkOperations::new(store.clone()).batch_size(5);
        let records = vec![
            fields(json!({"Name": "a"})),
            fields(json!({"Name": "bad"})),
            fields(json!({"Name": "c"})),
        ];

        let result = ops.bulk_create("contractors", records, false, false).await;
        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failure_count(), 1);
        assert_eq!(result.failed[0]["Name"], json!("bad"));
        assert!(result.errors[0].starts_with("Batch 1:"));
        assert!(result.errors[1].starts_with("Record failed:"));
        assert_eq!(store.call_count("create:contractors"), 3);
    }

    #[tokio::test]
    async fn test_validation_failures_are_not_sent() {
        let store = Arc::new(MemoryStore::new());
        let ops = BulkOperations::new(store.clone()).with_schema(schema());
        let records = vec![
            fields(json!({"Applicant Name": "Ann", "Email": "ann@example.com"})),
            fields(json!({"Applicant Name": "Bob", "Email": "not-an-email"})),
        ];

        let result = ops.bulk_create("applicants", records, true, false).await;
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.failure_count(), 1);
        assert!(result.errors[0].starts_with("Validation failed:"));
        assert_eq!(store.call_count("batch_create:applicants:1"), 1);
    }

    #[tokio::test]
    async fn test_bulk_update_reports_missing_id() {
        let store = Arc::new(MemoryStore::new());
        store.insert("contractors", "rec1", json!({"Name": "old"}));
        let ops = BulkOperations::new(store.clone());
        let updates = vec![
            UpdateRequest::new("rec1", fields(json!({"Name": "new"}))),
            UpdateRequest {
                id: None,
                fields: fields(json!({"Name": "orphan"})),
            },
        ];

        let result = ops.bulk_update("contractors", updates, false, false).await;
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.errors, vec!["Missing record id".to_string()]);
        assert_eq!(store.records("contractors")[0].fields["Name"], json!("new"));
    }

    #[tokio::test]
    async fn test_bulk_update_fallback_names_failing_record() {
        let store = Arc::new(MemoryStore::new());
        store.insert("contractors", "rec1", json!({}));
        store.insert("contractors", "rec2", json!({}));
        store.reject_id("rec2");
        let ops = BulkOperations::new(store.clone());
        let updates = vec![
            UpdateRequest::new("rec1", fields(json!({"Name": "x"}))),
            UpdateRequest::new("rec2", fields(json!({"Name": "y"}))),
        ];

        let result = ops.bulk_update("contractors", updates, false, false).await;
        assert_eq!(result.success_count(), 1);
        assert_eq!(result.failed[0]["id"], json!("rec2"));
        assert!(result.errors.iter().any(|e| e.starts_with("Record rec2 failed:")));
    }

    #[tokio::test]
    async fn test_bulk_delete_fallback() {
        let store = Arc::new(MemoryStore::new());
        store.insert("contractors", "rec1", json!({}));
        store.insert("contractors", "rec2", json!({}));
        store.reject_id("rec2");
        let ops = BulkOperations::new(store.clone());

        let result = ops
            .bulk_delete("contractors", &["rec1".to_string(), "rec2".to_string()])
            .await;
        assert_eq!(result.successful, vec![json!({"id": "rec1", "deleted": true})]);
        assert_eq!(result.failed, vec![json!({"id": "rec2"})]);
        assert_eq!(store.records("contractors").len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_splits_creates_and_updates() {
        let store = Arc::new(MemoryStore::new());
        store.insert("contractors", "rec1", json!({"Email": "a@x.com", "Name": "A"}));
        let ops = BulkOperations::new(store.clone());
        let records = vec![
            fields(json!({"Email": "a@x.com", "Name": "A2"})),
            fields(json!({"Email": "b@x.com", "Name": "B"})),
            fields(json!({"Name": "no key"})),
        ];

        let result = ops.bulk_upsert("contractors", records, "Email", false).await;
        assert_eq!(result.updated.success_count(), 1);
        assert_eq!(result.created.success_count(), 2);
        assert_eq!(result.lookup_failed.total_count(), 0);
        let rows = store.records("contractors");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].fields["Name"], json!("A2"));
        assert_eq!(result.combined().success_count(), 3);
    }

    #[tokio::test]
    async fn test_upsert_lookup_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        store.fail_lists(true);
        let ops = BulkOperations::new(store.clone());
        let result = ops
            .bulk_upsert("contractors", vec![fields(json!({"Email": "a@x.com"}))], "Email", false)
            .await;
        assert_eq!(result.lookup_failed.failed, vec![json!({"Email": "a@x.com"})]);
        assert!(result.lookup_failed.errors[0].starts_with("Key a@x.com:"));
        assert_eq!(store.call_count("batch_create"), 0);

        let combined = result.combined();
        assert_eq!(combined.failure_count(), 1);
        assert_eq!(combined.success_rate(), 0.0);
        assert!(!combined.is_complete_success());
    }

    #[tokio::test]
    async fn test_audit_only_when_something_was_written() {
        let store = Arc::new(MemoryStore::new());
        store.fail_batches(true);
        store.reject_value("Name", json!("bad"));
        let ops = BulkOperations::new(store.clone()).initiated_by("ops_test");

        let all_failed = ops
            .bulk_create("contractors", vec![fields(json!({"Name": "bad"}))], false, false)
            .await;
        assert_eq!(all_failed.success_count(), 0);
        assert!(ops.audit_event("bulk_create", "contractors", &all_failed, json!({})).is_none());

        let partial = ops
            .bulk_create(
                "contractors",
                vec![fields(json!({"Name": "ok"})), fields(json!({"Name": "bad"}))],
                false,
                false,
            )
            .await;
        let event = ops
            .audit_event("bulk_create", "contractors", &partial, json!({"replace": false}))
            .unwrap();
        assert_eq!(event.initiated_by, "ops_test");
        assert_eq!(event.resource_id, "contractors:bulk");
        assert_eq!(event.metadata["success_count"], json!(1));
        assert_eq!(event.metadata["failure_count"], json!(1));
        assert_eq!(event.metadata["replace"], json!(false));
    }
}
