//! In-memory `RecordStore` used by unit tests across the crate.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{
    AirtableError, DeletedRecord, Fields, ListOptions, Record, RecordStore, RecordUpdate,
    MAX_BATCH_SIZE,
};

static EQUALS_FORMULA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{([^}]+)\} = '((?:[^'\\]|\\.)*)'$").unwrap());

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, Vec<Record>>>,
    next_id: AtomicUsize,
    fail_batches: AtomicBool,
    fail_lists: AtomicBool,
    rejected_values: Mutex<Vec<(String, Value)>>,
    rejected_ids: Mutex<HashSet<String>>,
    pub calls: Mutex<Vec<String>>,
    pub formulas: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: &str, id: &str, fields: Value) {
        let fields = fields.as_object().cloned().unwrap_or_default();
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(Record {
                id: id.to_string(),
                fields,
                created_time: Some("2024-01-01T00:00:00.000Z".to_string()),
            });
    }

    /// Every batch_* call fails with a 422 while set.
    pub fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    /// Single-record writes whose `field` equals `value` fail with a 422.
    pub fn reject_value(&self, field: &str, value: Value) {
        self.rejected_values
            .lock()
            .unwrap()
            .push((field.to_string(), value));
    }

    /// Single-record update/delete of `id` fails with a 422.
    pub fn reject_id(&self, id: &str) {
        self.rejected_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn records(&self, table: &str) -> Vec<Record> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record_call(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_batch(&self, len: usize) -> Result<(), AirtableError> {
        if len > MAX_BATCH_SIZE {
            return Err(AirtableError::BatchTooLarge(len));
        }
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(unprocessable("batch rejected"));
        }
        Ok(())
    }

    fn check_fields(&self, fields: &Fields) -> Result<(), AirtableError> {
        let rejected = self.rejected_values.lock().unwrap();
        for (field, value) in rejected.iter() {
            if fields.get(field) == Some(value) {
                return Err(unprocessable(&format!("invalid value for {field}")));
            }
        }
        Ok(())
    }

    fn check_id(&self, id: &str) -> Result<(), AirtableError> {
        if self.rejected_ids.lock().unwrap().contains(id) {
            return Err(unprocessable(&format!("cannot modify {id}")));
        }
        Ok(())
    }

    fn new_record(&self, fields: Fields) -> Record {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Record {
            id: format!("recMem{n:05}"),
            fields,
            created_time: Some("2024-01-01T00:00:00.000Z".to_string()),
        }
    }

    fn apply_update(
        &self,
        table: &str,
        id: &str,
        fields: Fields,
        replace: bool,
    ) -> Result<Record, AirtableError> {
        let mut tables = self.tables.lock().unwrap();
        let record = tables
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| r.id == id))
            .ok_or_else(|| AirtableError::NotFound(id.to_string()))?;
        if replace {
            record.fields = fields;
        } else {
            record.fields.extend(fields);
        }
        Ok(record.clone())
    }

    fn remove(&self, table: &str, id: &str) -> Result<DeletedRecord, AirtableError> {
        let mut tables = self.tables.lock().unwrap();
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| AirtableError::NotFound(id.to_string()))?;
        let before = rows.len();
        rows.retain(|r| r.id != id);
        if rows.len() == before {
            return Err(AirtableError::NotFound(id.to_string()));
        }
        Ok(DeletedRecord {
            id: id.to_string(),
            deleted: true,
        })
    }
}

fn unprocessable(message: &str) -> AirtableError {
    AirtableError::Api {
        status: 422,
        message: message.to_string(),
    }
}

/// Supports `{Field} = 'value'`. Any other formula matches every record.
fn matches_formula(record: &Record, formula: Option<&str>) -> bool {
    let Some(formula) = formula else {
        return true;
    };
    match EQUALS_FORMULA.captures(formula) {
        Some(caps) => {
            let expected = caps[2].replace("\\'", "'");
            match record.fields.get(&caps[1]) {
                Some(Value::String(s)) => *s == expected,
                Some(other) => other.to_string() == expected,
                None => false,
            }
        }
        None => true,
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list(&self, table: &str, options: &ListOptions) -> Result<Vec<Record>, AirtableError> {
        self.record_call(format!("list:{table}"));
        if let Some(formula) = &options.formula {
            self.formulas.lock().unwrap().push(formula.clone());
        }
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(unprocessable("list rejected"));
        }
        let mut rows: Vec<Record> = self
            .records(table)
            .into_iter()
            .filter(|r| matches_formula(r, options.formula.as_deref()))
            .collect();
        if let Some(max) = options.max_records {
            rows.truncate(max);
        }
        Ok(rows)
    }

    async fn get(&self, table: &str, record_id: &str) -> Result<Record, AirtableError> {
        self.record_call(format!("get:{table}:{record_id}"));
        self.records(table)
            .into_iter()
            .find(|r| r.id == record_id)
            .ok_or_else(|| AirtableError::NotFound(record_id.to_string()))
    }

    async fn create(&self, table: &str, fields: Fields, _typecast: bool) -> Result<Record, AirtableError> {
        self.record_call(format!("create:{table}"));
        self.check_fields(&fields)?;
        let record = self.new_record(fields);
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Ok(record)
    }

    async fn batch_create(
        &self,
        table: &str,
        records: Vec<Fields>,
        _typecast: bool,
    ) -> Result<Vec<Record>, AirtableError> {
        self.record_call(format!("batch_create:{table}:{}", records.len()));
        self.check_batch(records.len())?;
        for fields in &records {
            self.check_fields(fields)?;
        }
        let created: Vec<Record> = records.into_iter().map(|f| self.new_record(f)).collect();
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .extend(created.iter().cloned());
        Ok(created)
    }

    async fn update(
        &self,
        table: &str,
        record_id: &str,
        fields: Fields,
        replace: bool,
    ) -> Result<Record, AirtableError> {
        self.record_call(format!("update:{table}:{record_id}"));
        self.check_id(record_id)?;
        self.check_fields(&fields)?;
        self.apply_update(table, record_id, fields, replace)
    }

    async fn batch_update(
        &self,
        table: &str,
        updates: Vec<RecordUpdate>,
        replace: bool,
    ) -> Result<Vec<Record>, AirtableError> {
        self.record_call(format!("batch_update:{table}:{}", updates.len()));
        self.check_batch(updates.len())?;
        for update in &updates {
            self.check_id(&update.id)?;
            self.check_fields(&update.fields)?;
        }
        updates
            .into_iter()
            .map(|u| self.apply_update(table, &u.id, u.fields, replace))
            .collect()
    }

    async fn delete(&self, table: &str, record_id: &str) -> Result<DeletedRecord, AirtableError> {
        self.record_call(format!("delete:{table}:{record_id}"));
        self.check_id(record_id)?;
        self.remove(table, record_id)
    }

    async fn batch_delete(
        &self,
        table: &str,
        record_ids: &[String],
    ) -> Result<Vec<DeletedRecord>, AirtableError> {
        self.record_call(format!("batch_delete:{table}:{}", record_ids.len()));
        self.check_batch(record_ids.len())?;
        for id in record_ids {
            self.check_id(id)?;
        }
        record_ids.iter().map(|id| self.remove(table, id)).collect()
    }
}
