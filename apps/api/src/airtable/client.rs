//! Airtable REST client, the production `RecordStore`.
//!
//! Wraps `https://api.airtable.com/v0/{base}/{table}` with bearer auth,
//! offset pagination and retry on 429 / 5xx with exponential backoff.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::{
    AirtableError, DeletedRecord, Fields, ListOptions, Record, RecordStore, RecordUpdate,
    MAX_BATCH_SIZE,
};

const AIRTABLE_API_URL: &str = "https://api.airtable.com/v0";
const MAX_RETRIES: u32 = 3;
const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct ListResponse {
    records: Vec<Record>,
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecordsResponse {
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    records: Vec<DeletedRecord>,
}

#[derive(Debug, Deserialize)]
struct AirtableErrorEnvelope {
    error: AirtableErrorBody,
}

/// Airtable sends either `{"error": "NOT_FOUND"}` or `{"error": {"type", "message"}}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AirtableErrorBody {
    Detailed {
        #[serde(rename = "type")]
        kind: String,
        message: Option<String>,
    },
    Code(String),
}

impl AirtableErrorBody {
    fn into_message(self) -> String {
        match self {
            AirtableErrorBody::Detailed { kind, message } => match message {
                Some(message) => format!("{kind}: {message}"),
                None => kind,
            },
            AirtableErrorBody::Code(code) => code,
        }
    }
}

/// Table metadata returned by the base schema endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMeta {
    pub id: String,
    pub name: String,
    pub primary_field_id: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldMeta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldMeta {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Deserialize)]
struct TablesResponse {
    tables: Vec<TableMeta>,
}

#[derive(Clone)]
pub struct AirtableClient {
    client: Client,
    api_key: String,
    base_id: String,
    api_url: String,
}

impl AirtableClient {
    pub fn new(api_key: String, base_id: String) -> Result<Self, AirtableError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_id,
            api_url: AIRTABLE_API_URL.to_string(),
        })
    }

    pub fn base_id(&self) -> &str {
        &self.base_id
    }

    /// Shared HTTP client for the webhook management endpoints.
    pub(crate) fn http_client(&self) -> &Client {
        &self.client
    }

    /// Builds `{api}/{segments...}` with each segment percent-encoded.
    pub(crate) fn url(&self, segments: &[&str]) -> Result<Url, AirtableError> {
        let mut url =
            Url::parse(&self.api_url).map_err(|e| AirtableError::InvalidUrl(e.to_string()))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| AirtableError::InvalidUrl(self.api_url.clone()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn table_url(&self, table: &str) -> Result<Url, AirtableError> {
        self.url(&[&self.base_id, table])
    }

    fn record_url(&self, table: &str, record_id: &str) -> Result<Url, AirtableError> {
        self.url(&[&self.base_id, table, record_id])
    }

    /// Sends a request and decodes the JSON body.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    pub(crate) async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, AirtableError> {
        let mut last_error: Option<AirtableError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Airtable request attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let Some(builder) = request.try_clone() else {
                // Streaming bodies cannot be replayed; send once.
                return decode_response(request.bearer_auth(&self.api_key).send().await?).await;
            };

            let response = match builder.bearer_auth(&self.api_key).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(AirtableError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Airtable API returned {}: {}", status, body);
                last_error = Some(AirtableError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            return decode_response(response).await;
        }

        Err(last_error.unwrap_or(AirtableError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }

    /// Lists the tables of the base via the metadata API.
    pub async fn list_tables(&self) -> Result<Vec<TableMeta>, AirtableError> {
        let url = self.url(&["meta", "bases", &self.base_id, "tables"])?;
        let response: TablesResponse = self.execute(self.client.get(url)).await?;
        info!(base_id = %self.base_id, count = response.tables.len(), "Fetched base schema");
        Ok(response.tables)
    }
}

async fn decode_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AirtableError> {
    let status = response.status();
    if status.is_success() {
        let body = response.text().await?;
        // Some endpoints (webhook delete) answer 200 with no body.
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };
        return serde_json::from_str(body).map_err(AirtableError::Parse);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<AirtableErrorEnvelope>(&body)
        .map(|e| e.error.into_message())
        .unwrap_or(body);

    if status.as_u16() == 404 {
        return Err(AirtableError::NotFound(message));
    }
    Err(AirtableError::Api {
        status: status.as_u16(),
        message,
    })
}

fn list_params(options: &ListOptions, offset: Option<&str>) -> Vec<(String, String)> {
    let mut params = Vec::new();
    if let Some(formula) = &options.formula {
        params.push(("filterByFormula".to_string(), formula.clone()));
    }
    if let Some(view) = &options.view {
        params.push(("view".to_string(), view.clone()));
    }
    if let Some(max) = options.max_records {
        params.push(("maxRecords".to_string(), max.to_string()));
    }
    let page_size = options
        .page_size
        .unwrap_or(MAX_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    params.push(("pageSize".to_string(), page_size.to_string()));
    for (i, sort) in options.sort.iter().enumerate() {
        params.push((format!("sort[{i}][field]"), sort.field.clone()));
        params.push((
            format!("sort[{i}][direction]"),
            sort.direction.as_str().to_string(),
        ));
    }
    for field in &options.fields {
        params.push(("fields[]".to_string(), field.clone()));
    }
    if let Some(offset) = offset {
        params.push(("offset".to_string(), offset.to_string()));
    }
    params
}

fn check_batch(len: usize) -> Result<(), AirtableError> {
    if len > MAX_BATCH_SIZE {
        return Err(AirtableError::BatchTooLarge(len));
    }
    Ok(())
}

#[async_trait]
impl RecordStore for AirtableClient {
    async fn list(&self, table: &str, options: &ListOptions) -> Result<Vec<Record>, AirtableError> {
        let url = self.table_url(table)?;
        let mut records = Vec::new();
        let mut offset: Option<String> = None;

        loop {
            let params = list_params(options, offset.as_deref());
            let page: ListResponse = self
                .execute(self.client.get(url.clone()).query(&params))
                .await
                .map_err(|e| {
                    error!(table, error = %e, "Failed to list records");
                    e
                })?;
            records.extend(page.records);

            if let Some(max) = options.max_records {
                if records.len() >= max {
                    records.truncate(max);
                    break;
                }
            }
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        debug!(table, count = records.len(), "Listed records");
        Ok(records)
    }

    async fn get(&self, table: &str, record_id: &str) -> Result<Record, AirtableError> {
        let url = self.record_url(table, record_id)?;
        self.execute(self.client.get(url)).await
    }

    async fn create(&self, table: &str, fields: Fields, typecast: bool) -> Result<Record, AirtableError> {
        let url = self.table_url(table)?;
        let body = json!({ "fields": fields, "typecast": typecast });
        let record: Record = self.execute(self.client.post(url).json(&body)).await?;
        info!(table, record_id = %record.id, "Created record");
        Ok(record)
    }

    async fn batch_create(
        &self,
        table: &str,
        records: Vec<Fields>,
        typecast: bool,
    ) -> Result<Vec<Record>, AirtableError> {
        check_batch(records.len())?;
        let url = self.table_url(table)?;
        let body = json!({
            "records": records.into_iter().map(|f| json!({ "fields": f })).collect::<Vec<_>>(),
            "typecast": typecast,
        });
        let response: RecordsResponse = self.execute(self.client.post(url).json(&body)).await?;
        info!(table, count = response.records.len(), "Batch created records");
        Ok(response.records)
    }

    async fn update(
        &self,
        table: &str,
        record_id: &str,
        fields: Fields,
        replace: bool,
    ) -> Result<Record, AirtableError> {
        let url = self.record_url(table, record_id)?;
        let body = json!({ "fields": fields });
        let request = if replace {
            self.client.put(url)
        } else {
            self.client.patch(url)
        };
        let record: Record = self.execute(request.json(&body)).await?;
        info!(table, record_id, "Updated record");
        Ok(record)
    }

    async fn batch_update(
        &self,
        table: &str,
        updates: Vec<RecordUpdate>,
        replace: bool,
    ) -> Result<Vec<Record>, AirtableError> {
        check_batch(updates.len())?;
        let url = self.table_url(table)?;
        let body = json!({ "records": updates });
        let request = if replace {
            self.client.put(url)
        } else {
            self.client.patch(url)
        };
        let response: RecordsResponse = self.execute(request.json(&body)).await?;
        info!(table, count = response.records.len(), "Batch updated records");
        Ok(response.records)
    }

    async fn delete(&self, table: &str, record_id: &str) -> Result<DeletedRecord, AirtableError> {
        let url = self.record_url(table, record_id)?;
        let deleted: DeletedRecord = self.execute(self.client.delete(url)).await?;
        info!(table, record_id, "Deleted record");
        Ok(deleted)
    }

    async fn batch_delete(
        &self,
        table: &str,
        record_ids: &[String],
    ) -> Result<Vec<DeletedRecord>, AirtableError> {
        check_batch(record_ids.len())?;
        let url = self.table_url(table)?;
        let params: Vec<(&str, &str)> = record_ids
            .iter()
            .map(|id| ("records[]", id.as_str()))
            .collect();
        let response: DeleteResponse = self
            .execute(self.client.delete(url).query(&params))
            .await?;
        info!(table, count = response.records.len(), "Batch deleted records");
        Ok(response.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::{SortDirection, SortSpec};

    fn client() -> AirtableClient {
        AirtableClient::new("key".into(), "appBase".into()).unwrap()
    }

    #[test]
    fn test_table_url_encodes_names() {
        let url = client().table_url("Applicant Pipeline").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.airtable.com/v0/appBase/Applicant%20Pipeline"
        );
    }

    #[test]
    fn test_meta_url() {
        let url = client().url(&["meta", "bases", "appBase", "tables"]).unwrap();
        assert_eq!(url.as_str(), "https://api.airtable.com/v0/meta/bases/appBase/tables");
    }

    #[test]
    fn test_list_params_include_sort_and_offset() {
        let options = ListOptions {
            formula: Some("{Email} = 'a@b.com'".into()),
            max_records: Some(5),
            sort: vec![SortSpec {
                field: "Applicant Name".into(),
                direction: SortDirection::Desc,
            }],
            ..Default::default()
        };
        let params = list_params(&options, Some("itr123"));
        assert!(params.contains(&("filterByFormula".into(), "{Email} = 'a@b.com'".into())));
        assert!(params.contains(&("maxRecords".into(), "5".into())));
        assert!(params.contains(&("sort[0][field]".into(), "Applicant Name".into())));
        assert!(params.contains(&("sort[0][direction]".into(), "desc".into())));
        assert!(params.contains(&("offset".into(), "itr123".into())));
    }

    #[test]
    fn test_page_size_is_clamped() {
        let options = ListOptions {
            page_size: Some(500),
            ..Default::default()
        };
        let params = list_params(&options, None);
        assert!(params.contains(&("pageSize".into(), "100".into())));
    }

    #[tokio::test]
    async fn test_batch_over_limit_rejected_before_request() {
        let records = vec![Fields::new(); 11];
        let err = client().batch_create("applicants", records, false).await.unwrap_err();
        assert!(matches!(err, AirtableError::BatchTooLarge(11)));
    }

    #[test]
    fn test_error_body_shapes() {
        let detailed: AirtableErrorEnvelope =
            serde_json::from_str(r#"{"error":{"type":"INVALID_VALUE","message":"bad"}}"#).unwrap();
        assert_eq!(detailed.error.into_message(), "INVALID_VALUE: bad");
        let code: AirtableErrorEnvelope = serde_json::from_str(r#"{"error":"NOT_FOUND"}"#).unwrap();
        assert_eq!(code.error.into_message(), "NOT_FOUND");
    }
}
