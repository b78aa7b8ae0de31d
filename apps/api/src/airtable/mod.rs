//! Airtable record store: the REST client, formula builders, bulk operations,
//! query engine, schema manager, analytics and export helpers.
//!
//! Everything above the HTTP client talks to Airtable through the
//! `RecordStore` trait so tests can swap in an in-memory store.

pub mod analytics;
pub mod bulk;
pub mod client;
pub mod export;
pub mod formula;
pub mod query;
pub mod schema;
pub mod webhooks;

#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Field-name to value mapping of a single record.
pub type Fields = Map<String, Value>;

/// Airtable's per-request limit for batch create/update/delete.
pub const MAX_BATCH_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum AirtableError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Airtable API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Batch of {0} records exceeds the Airtable limit of 10")]
    BatchTooLarge(usize),

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },
}

/// A row in an Airtable table. Serializes as `{id, fields, createdTime}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(
        rename = "createdTime",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub created_time: Option<String>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// One entry of a batch update request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    pub id: String,
    pub fields: Fields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedRecord {
    pub id: String,
    pub deleted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Options for listing records.
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub formula: Option<String>,
    pub view: Option<String>,
    pub max_records: Option<usize>,
    pub page_size: Option<usize>,
    pub sort: Vec<SortSpec>,
    pub fields: Vec<String>,
}

impl ListOptions {
    pub fn with_formula(formula: impl Into<String>) -> Self {
        let formula = formula.into();
        Self {
            formula: (!formula.is_empty()).then_some(formula),
            ..Default::default()
        }
    }

    pub fn max_records(mut self, max: usize) -> Self {
        self.max_records = Some(max);
        self
    }
}

/// Storage seam for Airtable tables.
///
/// `AirtableClient` is the production implementation. Higher layers (bulk
/// operations, the query engine, agents, webhook handlers) hold an
/// `Arc<dyn RecordStore>`.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list(&self, table: &str, options: &ListOptions) -> Result<Vec<Record>, AirtableError>;

    async fn get(&self, table: &str, record_id: &str) -> Result<Record, AirtableError>;

    async fn create(&self, table: &str, fields: Fields, typecast: bool) -> Result<Record, AirtableError>;

    async fn batch_create(
        &self,
        table: &str,
        records: Vec<Fields>,
        typecast: bool,
    ) -> Result<Vec<Record>, AirtableError>;

    async fn update(
        &self,
        table: &str,
        record_id: &str,
        fields: Fields,
        replace: bool,
    ) -> Result<Record, AirtableError>;

    async fn batch_update(
        &self,
        table: &str,
        updates: Vec<RecordUpdate>,
        replace: bool,
    ) -> Result<Vec<Record>, AirtableError>;

    async fn delete(&self, table: &str, record_id: &str) -> Result<DeletedRecord, AirtableError>;

    async fn batch_delete(
        &self,
        table: &str,
        record_ids: &[String],
    ) -> Result<Vec<DeletedRecord>, AirtableError>;

    /// Every record matching `formula` (all records when `None`).
    async fn all(&self, table: &str, formula: Option<&str>) -> Result<Vec<Record>, AirtableError> {
        let options = formula.map(ListOptions::with_formula).unwrap_or_default();
        self.list(table, &options).await
    }

    /// First record matching `formula`, fetched with `maxRecords=1`.
    async fn find_first(&self, table: &str, formula: &str) -> Result<Option<Record>, AirtableError> {
        let options = ListOptions::with_formula(formula).max_records(1);
        Ok(self.list(table, &options).await?.into_iter().next())
    }
}
