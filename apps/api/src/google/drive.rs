//! Google Drive: file metadata, download, multipart upload, folder listing
//! and change watches.

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};
use uuid::Uuid;

use super::{GoogleApiError, GoogleClient};
use crate::audit::AuditLogger;

const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const FILE_FIELDS: &str = "id,name,mimeType,parents,createdTime,modifiedTime,webViewLink,size";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchChannel {
    pub id: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub expiration: Option<String>,
}

/// `q` expression for files directly inside `folder_id`.
pub fn folder_query(folder_id: &str, mime_type: Option<&str>, created_after: Option<DateTime<Utc>>) -> String {
    let mut parts = vec![
        format!("'{}' in parents", folder_id.replace('\'', "\\'")),
        "trashed = false".to_string(),
    ];
    if let Some(mime) = mime_type {
        parts.push(format!("mimeType='{mime}'"));
    }
    if let Some(after) = created_after {
        parts.push(format!(
            "createdTime > '{}'",
            after.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    parts.join(" and ")
}

/// Body and content type of a `multipart/related` upload: JSON metadata
/// part followed by the media part.
pub fn multipart_body(metadata: &Value, mime_type: &str, content: &[u8]) -> (String, Vec<u8>) {
    let boundary = format!("jetsmx-{}", Uuid::new_v4().simple());
    let mut body = Vec::with_capacity(content.len() + 512);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata.to_string().as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(format!("Content-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());
    (format!("multipart/related; boundary={boundary}"), body)
}

#[derive(Clone)]
pub struct DriveService {
    google: GoogleClient,
    audit: AuditLogger,
}

impl DriveService {
    pub fn new(google: GoogleClient, audit: AuditLogger) -> Self {
        Self { google, audit }
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("{}/files/{file_id}", self.google.endpoint(DRIVE_API_URL))
    }

    pub async fn get_file_metadata(&self, file_id: &str) -> Result<DriveFile, GoogleApiError> {
        self.google
            .send_json(
                self.google
                    .http()
                    .get(self.file_url(file_id))
                    .query(&[("fields", FILE_FIELDS), ("supportsAllDrives", "true")]),
            )
            .await
            .map_err(|e| {
                error!(file_id, error = %e, "Failed to get file metadata");
                e
            })
    }

    pub async fn download_file(&self, file_id: &str) -> Result<Bytes, GoogleApiError> {
        let response = self
            .google
            .send_with_retry(
                self.google
                    .http()
                    .get(self.file_url(file_id))
                    .query(&[("alt", "media"), ("supportsAllDrives", "true")]),
            )
            .await
            .map_err(|e| {
                error!(file_id, error = %e, "Failed to download file");
                e
            })?;
        let bytes = response.bytes().await?;
        info!(file_id, size = bytes.len(), "Downloaded file");
        Ok(bytes)
    }

    pub async fn upload_file(
        &self,
        name: &str,
        mime_type: &str,
        content: Vec<u8>,
        parent_folder: Option<&str>,
        initiated_by: &str,
    ) -> Result<DriveFile, GoogleApiError> {
        let mut metadata = json!({ "name": name, "mimeType": mime_type });
        if let Some(parent) = parent_folder {
            metadata["parents"] = json!([parent]);
        }
        let (content_type, body) = multipart_body(&metadata, mime_type, &content);
        let file: DriveFile = self
            .google
            .send_json(
                self.google
                    .http()
                    .post(self.google.endpoint(DRIVE_UPLOAD_URL))
                    .query(&[
                        ("uploadType", "multipart"),
                        ("fields", FILE_FIELDS),
                        ("supportsAllDrives", "true"),
                    ])
                    .header(reqwest::header::CONTENT_TYPE, content_type)
                    .body(body),
            )
            .await
            .map_err(|e| {
                error!(name, error = %e, "Failed to upload file");
                e
            })?;
        info!(file_id = %file.id, name, "Uploaded file");
        self.audit
            .log_drive_upload(&file.id, name, parent_folder, initiated_by)
            .await;
        Ok(file)
    }

    /// Files in a folder, newest first, following pagination.
    pub async fn list_files_in_folder(
        &self,
        folder_id: &str,
        mime_type: Option<&str>,
        created_after: Option<DateTime<Utc>>,
    ) -> Result<Vec<DriveFile>, GoogleApiError> {
        let query = folder_query(folder_id, mime_type, created_after);
        let fields = format!("nextPageToken,files({FILE_FIELDS})");
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q".to_string(), query.clone()),
                ("fields".to_string(), fields.clone()),
                ("orderBy".to_string(), "createdTime desc".to_string()),
                ("pageSize".to_string(), "100".to_string()),
                ("supportsAllDrives".to_string(), "true".to_string()),
                ("includeItemsFromAllDrives".to_string(), "true".to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }
            let list: FileList = self
                .google
                .send_json(
                    self.google
                        .http()
                        .get(format!("{}/files", self.google.endpoint(DRIVE_API_URL)))
                        .query(&params),
                )
                .await?;
            files.extend(list.files);
            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        info!(folder_id, count = files.len(), "Listed folder");
        Ok(files)
    }

    /// Moves a file out of all its current parents into `new_parent`.
    pub async fn move_file(&self, file_id: &str, new_parent: &str) -> Result<DriveFile, GoogleApiError> {
        let current = self.get_file_metadata(file_id).await?;
        let remove = current.parents.join(",");
        let moved: DriveFile = self
            .google
            .send_json(
                self.google
                    .http()
                    .patch(self.file_url(file_id))
                    .query(&[
                        ("addParents", new_parent),
                        ("removeParents", remove.as_str()),
                        ("fields", FILE_FIELDS),
                        ("supportsAllDrives", "true"),
                    ])
                    .json(&json!({})),
            )
            .await?;
        info!(file_id, new_parent, "Moved file");
        Ok(moved)
    }

    /// Registers a push channel on a folder; notifications arrive at
    /// `address` with `X-Goog-Resource-State` headers.
    pub async fn watch_folder(&self, folder_id: &str, address: &str, token: Option<&str>) -> Result<WatchChannel, GoogleApiError> {
        let mut body = json!({
            "id": Uuid::new_v4().to_string(),
            "type": "web_hook",
            "address": address,
        });
        if let Some(token) = token {
            body["token"] = json!(token);
        }
        let channel: WatchChannel = self
            .google
            .send_json(
                self.google
                    .http()
                    .post(format!("{}/files/{folder_id}/watch", self.google.endpoint(DRIVE_API_URL)))
                    .query(&[("supportsAllDrives", "true")])
                    .json(&body),
            )
            .await?;
        info!(folder_id, channel_id = %channel.id, "Watching folder");
        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_folder_query() {
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        assert_eq!(
            folder_query("fold1", Some("application/pdf"), Some(after)),
            "'fold1' in parents and trashed = false and mimeType='application/pdf' and createdTime > '2024-06-01T12:00:00Z'"
        );
        assert_eq!(folder_query("f", None, None), "'f' in parents and trashed = false");
    }

    #[test]
    fn test_multipart_body_layout() {
        let (content_type, body) = multipart_body(&json!({"name": "a.pdf"}), "application/pdf", b"%PDF-1.4");
        let boundary = content_type
            .strip_prefix("multipart/related; boundary=")
            .unwrap()
            .to_string();
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with(&format!("--{boundary}\r\nContent-Type: application/json")));
        assert!(text.contains("{\"name\":\"a.pdf\"}"));
        assert!(text.contains("Content-Type: application/pdf\r\n\r\n%PDF-1.4"));
        assert!(text.ends_with(&format!("--{boundary}--")));
    }

    #[test]
    fn test_drive_file_shape() {
        let file: DriveFile = serde_json::from_value(json!({
            "id": "f1",
            "name": "resume.pdf",
            "mimeType": "application/pdf",
            "parents": ["p1"],
            "createdTime": "2024-06-01T12:00:00.000Z"
        }))
        .unwrap();
        assert_eq!(file.mime_type, "application/pdf");
        assert_eq!(file.parents, vec!["p1".to_string()]);
    }
}
