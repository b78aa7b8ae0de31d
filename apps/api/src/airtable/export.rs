//! Record export: JSON, CSV, plain-text and chat renderings, plus upload of
//! export files to object storage.

use std::collections::BTreeSet;

use aws_sdk_s3::primitives::ByteStream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::info;

use super::Record;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid upload destination '{0}', expected bucket/path")]
    InvalidDestination(String),

    #[error("Upload failed: {0}")]
    Upload(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
    /// Plain-text listing for email bodies.
    Text,
    /// Markdown-ish listing for Google Chat, capped at a short preview.
    Chat,
}

const CHAT_PREVIEW_RECORDS: usize = 10;

impl ExportFormat {
    pub fn parse(s: &str) -> Result<Self, ExportError> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "text" | "email" => Ok(Self::Text),
            "chat" => Ok(Self::Chat),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
            Self::Text | Self::Chat => "text/plain",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Text | Self::Chat => "txt",
        }
    }

    pub fn render(&self, records: &[Record]) -> Result<String, ExportError> {
        match self {
            Self::Json => export_json(records, true),
            Self::Csv => export_csv(records, true),
            Self::Text => Ok(format_for_email(records, records.len())),
            Self::Chat => Ok(format_for_chat(records, CHAT_PREVIEW_RECORDS)),
        }
    }
}

pub fn export_json(records: &[Record], pretty: bool) -> Result<String, ExportError> {
    let text = if pretty {
        serde_json::to_string_pretty(records)?
    } else {
        serde_json::to_string(records)?
    };
    Ok(text)
}

/// Text form of a field value: strings unquoted, lists joined with `", "`,
/// objects JSON-encoded.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(cell_text).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// CSV with a `record_id` column followed by the sorted union of field names.
pub fn export_csv(records: &[Record], include_id: bool) -> Result<String, ExportError> {
    if records.is_empty() {
        return Ok(String::new());
    }
    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header: Vec<&str> = Vec::with_capacity(columns.len() + 1);
    if include_id {
        header.push("record_id");
    }
    header.extend(columns.iter().copied());
    writer.write_record(&header)?;

    for record in records {
        let mut row: Vec<String> = Vec::with_capacity(header.len());
        if include_id {
            row.push(record.id.clone());
        }
        row.extend(
            columns
                .iter()
                .map(|c| record.fields.get(*c).map(cell_text).unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn is_link_list(value: &Value) -> bool {
    match value.as_array() {
        Some(items) => items
            .iter()
            .all(|v| v.as_str().is_some_and(|s| s.starts_with("rec"))),
        None => false,
    }
}

/// Cleans records for export. Linked-record id lists collapse to
/// `"N linked record(s)"` when `flatten_linked` is set.
pub fn prepare_export_data(records: &[Record], flatten_linked: bool, include_metadata: bool) -> Vec<Value> {
    records
        .iter()
        .map(|record| {
            let fields: serde_json::Map<String, Value> = record
                .fields
                .iter()
                .map(|(k, v)| {
                    let value = if flatten_linked && is_link_list(v) {
                        let n = v.as_array().map(Vec::len).unwrap_or(0);
                        json!(format!("{n} linked record(s)"))
                    } else {
                        v.clone()
                    };
                    (k.clone(), value)
                })
                .collect();
            let mut out = json!({ "id": record.id, "fields": fields });
            if include_metadata {
                out["createdTime"] = json!(record.created_time);
            }
            out
        })
        .collect()
}

pub fn format_for_email(records: &[Record], max_records: usize) -> String {
    if records.is_empty() {
        return "No records found.".to_string();
    }
    let mut out = vec![format!("Total records: {}", records.len()), String::new()];
    if records.len() > max_records {
        out.push(format!(
            "Showing first {max_records} of {} records:",
            records.len()
        ));
    }
    for (idx, record) in records.iter().take(max_records).enumerate() {
        out.push(format!("Record {} (ID: {})", idx + 1, record.id));
        for (key, value) in &record.fields {
            out.push(format!("  {key}: {}", cell_text(value)));
        }
        out.push(String::new());
    }
    out.join("\n")
}

const NAME_FIELDS: [&str; 3] = ["Applicant Name", "Name", "Contractor ID"];

pub fn format_for_chat(records: &[Record], max_records: usize) -> String {
    if records.is_empty() {
        return "*No records found.*".to_string();
    }
    let mut out = vec![format!("**Found {} record(s)**\n", records.len())];
    for (idx, record) in records.iter().take(max_records).enumerate() {
        let name = NAME_FIELDS
            .iter()
            .filter_map(|f| record.field(f))
            .map(cell_text)
            .find(|s| !s.is_empty())
            .unwrap_or_else(|| record.id.clone());
        out.push(format!("{}. **{name}**", idx + 1));
        for (key, value) in record.fields.iter().take(5) {
            if !NAME_FIELDS.contains(&key.as_str()) {
                out.push(format!("   • {key}: {}", cell_text(value)));
            }
        }
        out.push(String::new());
    }
    if records.len() > max_records {
        out.push(format!("_...and {} more._", records.len() - max_records));
    }
    out.join("\n")
}

/// Splits `bucket/path/to/file` into bucket and key.
pub fn parse_destination(bucket_path: &str) -> Result<(&str, &str), ExportError> {
    let trimmed = bucket_path
        .trim_start_matches("gs://")
        .trim_start_matches("s3://");
    match trimmed.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok((bucket, key)),
        _ => Err(ExportError::InvalidDestination(bucket_path.to_string())),
    }
}

/// Uploads an export file and returns its `s3://bucket/key` location.
pub async fn upload_export(
    s3: &aws_sdk_s3::Client,
    bucket_path: &str,
    body: Vec<u8>,
    format: ExportFormat,
) -> Result<String, ExportError> {
    let (bucket, key) = parse_destination(bucket_path)?;
    s3.put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .content_type(format.content_type())
        .send()
        .await
        .map_err(|e| ExportError::Upload(e.to_string()))?;
    info!(bucket, key, "Uploaded export");
    Ok(format!("s3://{bucket}/{key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: &str, fields: Value) -> Record {
        Record {
            id: id.into(),
            fields: fields.as_object().cloned().unwrap(),
            created_time: Some("2024-01-01T00:00:00.000Z".into()),
        }
    }

    #[test]
    fn test_csv_uses_sorted_union_of_fields() {
        let records = vec![
            rec("rec1", json!({"Name": "Ann", "Skills": ["Avionics", "Airframe"]})),
            rec("rec2", json!({"Email": "b@x.com", "Meta": {"k": 1}})),
        ];
        let csv = export_csv(&records, true).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "record_id,Email,Meta,Name,Skills");
        assert_eq!(lines[1], "rec1,,,Ann,\"Avionics, Airframe\"");
        assert_eq!(lines[2], "rec2,b@x.com,\"{\"\"k\"\":1}\",,");
    }

    #[test]
    fn test_csv_empty_input() {
        assert_eq!(export_csv(&[], true).unwrap(), "");
    }

    #[test]
    fn test_text_formats_render_listings() {
        let records = vec![rec("rec1", json!({"Applicant Name": "Ann"}))];
        let email = ExportFormat::parse("email").unwrap();
        assert_eq!(email, ExportFormat::Text);
        assert!(email.render(&records).unwrap().starts_with("Total records: 1"));
        let chat = ExportFormat::parse("chat").unwrap();
        assert!(chat.render(&records).unwrap().contains("1. **Ann**"));
        assert_eq!(chat.extension(), "txt");
    }

    #[test]
    fn test_excel_is_rejected() {
        assert!(matches!(
            ExportFormat::parse("excel"),
            Err(ExportError::UnsupportedFormat(_))
        ));
        assert_eq!(ExportFormat::parse("CSV").unwrap(), ExportFormat::Csv);
    }

    #[test]
    fn test_prepare_export_flattens_links() {
        let records = vec![rec(
            "rec1",
            json!({"Applicant": ["recA", "recB"], "Skills": ["Avionics"]}),
        )];
        let out = prepare_export_data(&records, true, true);
        assert_eq!(out[0]["fields"]["Applicant"], json!("2 linked record(s)"));
        assert_eq!(out[0]["fields"]["Skills"], json!(["Avionics"]));
        assert_eq!(out[0]["createdTime"], json!("2024-01-01T00:00:00.000Z"));
    }

    #[test]
    fn test_format_for_email_truncates() {
        let records = vec![
            rec("rec1", json!({"Name": "Ann"})),
            rec("rec2", json!({"Name": "Bob"})),
        ];
        let text = format_for_email(&records, 1);
        assert!(text.starts_with("Total records: 2"));
        assert!(text.contains("Showing first 1 of 2 records:"));
        assert!(text.contains("Record 1 (ID: rec1)\n  Name: Ann"));
        assert!(!text.contains("rec2"));
        assert_eq!(format_for_email(&[], 10), "No records found.");
    }

    #[test]
    fn test_format_for_chat_names_and_overflow() {
        let records = vec![
            rec("rec1", json!({"Applicant Name": "Ann", "Email": "a@x.com"})),
            rec("rec2", json!({"Location": "TX"})),
        ];
        let text = format_for_chat(&records, 1);
        assert!(text.starts_with("**Found 2 record(s)**"));
        assert!(text.contains("1. **Ann**"));
        assert!(text.contains("   • Email: a@x.com"));
        assert!(text.contains("_...and 1 more._"));
    }

    #[test]
    fn test_parse_destination() {
        assert_eq!(
            parse_destination("exports/2024/out.csv").unwrap(),
            ("exports", "2024/out.csv")
        );
        assert_eq!(
            parse_destination("gs://bkt/a.json").unwrap(),
            ("bkt", "a.json")
        );
        assert!(parse_destination("no-key").is_err());
    }
}
