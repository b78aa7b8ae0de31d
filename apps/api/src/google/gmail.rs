//! Gmail: messages, drafts, threads, labels, push watch and history.

use std::collections::HashMap;

use base64::{
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
    Engine as _,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use super::{GoogleApiError, GoogleClient};
use crate::audit::AuditLogger;

const GMAIL_API_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    history_id: Option<String>,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<MessagePart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    headers: Vec<Header>,
    #[serde(default)]
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

/// A fetched message with headers indexed by name and the text/plain body
/// decoded.
#[derive(Debug, Clone, Serialize)]
pub struct GmailMessage {
    pub id: String,
    pub thread_id: Option<String>,
    pub label_ids: Vec<String>,
    pub snippet: String,
    pub history_id: Option<String>,
    pub internal_date: Option<String>,
    pub headers: HashMap<String, String>,
    pub body_text: String,
}

impl GmailMessage {
    /// Header lookup, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn sender(&self) -> Option<&str> {
        self.header("From")
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    /// Bare address of the sender: `"Ann <ann@x.com>"` becomes `ann@x.com`.
    pub fn sender_email(&self) -> Option<String> {
        self.sender().map(extract_address)
    }
}

impl From<RawMessage> for GmailMessage {
    fn from(raw: RawMessage) -> Self {
        let payload = raw.payload.unwrap_or_default();
        let headers = payload
            .headers
            .iter()
            .map(|h| (h.name.clone(), h.value.clone()))
            .collect();
        let body_text = plain_text_body(&payload).unwrap_or_default();
        Self {
            id: raw.id,
            thread_id: raw.thread_id,
            label_ids: raw.label_ids,
            snippet: raw.snippet.unwrap_or_default(),
            history_id: raw.history_id,
            internal_date: raw.internal_date,
            headers,
            body_text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub message_id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub draft_id: String,
    pub message_id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSent {
    id: String,
    #[serde(default)]
    thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDraft {
    id: String,
    message: RawSent,
}

#[derive(Debug, Clone, Serialize)]
pub struct GmailThread {
    pub id: String,
    pub messages: Vec<GmailMessage>,
}

#[derive(Debug, Deserialize)]
struct RawThread {
    id: String,
    #[serde(default)]
    messages: Vec<RawMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: String,
    #[serde(default)]
    pub snippet: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadList {
    #[serde(default)]
    threads: Vec<ThreadSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchResponse {
    pub history_id: String,
    pub expiration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryList {
    #[serde(default)]
    history: Vec<HistoryRecord>,
    #[serde(default)]
    history_id: Option<String>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    #[serde(default)]
    messages_added: Vec<MessageAdded>,
}

#[derive(Debug, Deserialize)]
struct MessageAdded {
    message: RawSent,
}

/// Messages added since a history id, and the mailbox's latest history id.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HistoryPage {
    pub message_ids: Vec<String>,
    pub history_id: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

/// Decodes Gmail's base64url body data, padded or not.
pub fn decode_body(data: &str) -> Result<String, GoogleApiError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| GoogleApiError::Decode(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// First text/plain part, searched depth-first.
fn plain_text_body(part: &MessagePart) -> Option<String> {
    if part.mime_type.as_deref() == Some("text/plain") {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            if let Ok(text) = decode_body(data) {
                if !text.is_empty() {
                    return Some(text);
                }
            }
        }
    }
    part.parts.iter().find_map(plain_text_body)
}

pub fn extract_address(from: &str) -> String {
    match (from.rfind('<'), from.rfind('>')) {
        (Some(start), Some(end)) if start < end => from[start + 1..end].trim().to_string(),
        _ => from.trim().to_string(),
    }
}

/// Outgoing plain-text message.
#[derive(Debug, Clone, Default)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub from: Option<String>,
    pub cc: Option<String>,
    pub in_reply_to: Option<String>,
}

impl OutgoingEmail {
    pub fn new(to: &str, subject: &str, body: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            ..Default::default()
        }
    }

    /// RFC 2822 text of the message.
    pub fn to_rfc2822(&self) -> String {
        let mut lines = vec![format!("To: {}", self.to)];
        if let Some(from) = &self.from {
            lines.push(format!("From: {from}"));
        }
        if let Some(cc) = &self.cc {
            lines.push(format!("Cc: {cc}"));
        }
        lines.push(format!("Subject: {}", self.subject));
        if let Some(reply_to) = &self.in_reply_to {
            lines.push(format!("In-Reply-To: {reply_to}"));
            lines.push(format!("References: {reply_to}"));
        }
        lines.push("MIME-Version: 1.0".to_string());
        lines.push("Content-Type: text/plain; charset=\"utf-8\"".to_string());
        lines.push(String::new());
        lines.push(self.body.replace("\r\n", "\n").replace('\n', "\r\n"));
        lines.join("\r\n")
    }

    /// base64url of the RFC 2822 text, the `raw` field Gmail expects.
    pub fn encode_raw(&self) -> String {
        URL_SAFE.encode(self.to_rfc2822().as_bytes())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Service
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GmailService {
    google: GoogleClient,
    audit: AuditLogger,
}

impl GmailService {
    pub fn new(google: GoogleClient, audit: AuditLogger) -> Self {
        Self { google, audit }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.google.endpoint(GMAIL_API_URL))
    }

    pub async fn get_message(&self, message_id: &str) -> Result<GmailMessage, GoogleApiError> {
        let raw: RawMessage = self
            .google
            .send_json(
                self.google
                    .http()
                    .get(self.url(&format!("messages/{message_id}")))
                    .query(&[("format", "full")]),
            )
            .await
            .map_err(|e| {
                error!(message_id, error = %e, "Failed to get message");
                e
            })?;
        Ok(raw.into())
    }

    pub async fn send_message(
        &self,
        email: &OutgoingEmail,
        thread_id: Option<&str>,
        initiated_by: &str,
        reason: &str,
    ) -> Result<SentMessage, GoogleApiError> {
        let mut body = json!({ "raw": email.encode_raw() });
        if let Some(thread_id) = thread_id {
            body["threadId"] = json!(thread_id);
        }
        let sent: RawSent = self
            .google
            .send_json(self.google.http().post(self.url("messages/send")).json(&body))
            .await
            .map_err(|e| {
                error!(to = %email.to, error = %e, "Failed to send message");
                e
            })?;
        info!(message_id = %sent.id, to = %email.to, "Sent message");
        self.audit
            .log_email_sent(&email.to, &email.subject, &sent.id, sent.thread_id.as_deref(), initiated_by, reason)
            .await;
        Ok(SentMessage {
            message_id: sent.id,
            thread_id: sent.thread_id,
        })
    }

    /// Replies in-thread, prefixing the subject with `Re:` when missing.
    pub async fn send_reply(
        &self,
        thread_id: &str,
        in_reply_to: &str,
        mut email: OutgoingEmail,
        initiated_by: &str,
        reason: &str,
    ) -> Result<SentMessage, GoogleApiError> {
        if !email.subject.to_ascii_lowercase().starts_with("re:") {
            email.subject = format!("Re: {}", email.subject);
        }
        email.in_reply_to = Some(in_reply_to.to_string());
        self.send_message(&email, Some(thread_id), initiated_by, reason)
            .await
    }

    pub async fn create_draft(&self, email: &OutgoingEmail, thread_id: Option<&str>) -> Result<Draft, GoogleApiError> {
        let mut message = json!({ "raw": email.encode_raw() });
        if let Some(thread_id) = thread_id {
            message["threadId"] = json!(thread_id);
        }
        let draft: RawDraft = self
            .google
            .send_json(
                self.google
                    .http()
                    .post(self.url("drafts"))
                    .json(&json!({ "message": message })),
            )
            .await
            .map_err(|e| {
                error!(to = %email.to, error = %e, "Failed to create draft");
                e
            })?;
        info!(draft_id = %draft.id, to = %email.to, "Created draft");
        Ok(Draft {
            draft_id: draft.id,
            message_id: draft.message.id,
            thread_id: draft.message.thread_id,
        })
    }

    pub async fn send_draft(
        &self,
        draft_id: &str,
        to: &str,
        subject: &str,
        initiated_by: &str,
        reason: &str,
    ) -> Result<SentMessage, GoogleApiError> {
        let sent: RawSent = self
            .google
            .send_json(
                self.google
                    .http()
                    .post(self.url("drafts/send"))
                    .json(&json!({ "id": draft_id })),
            )
            .await
            .map_err(|e| {
                error!(draft_id, error = %e, "Failed to send draft");
                e
            })?;
        info!(draft_id, message_id = %sent.id, "Sent draft");
        self.audit
            .log_email_sent(to, subject, &sent.id, sent.thread_id.as_deref(), initiated_by, reason)
            .await;
        Ok(SentMessage {
            message_id: sent.id,
            thread_id: sent.thread_id,
        })
    }

    pub async fn delete_draft(&self, draft_id: &str) -> Result<(), GoogleApiError> {
        self.google
            .send_empty(
                self.google
                    .http()
                    .delete(self.url(&format!("drafts/{draft_id}"))),
            )
            .await?;
        info!(draft_id, "Deleted draft");
        Ok(())
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<GmailThread, GoogleApiError> {
        let raw: RawThread = self
            .google
            .send_json(
                self.google
                    .http()
                    .get(self.url(&format!("threads/{thread_id}")))
                    .query(&[("format", "full")]),
            )
            .await?;
        Ok(GmailThread {
            id: raw.id,
            messages: raw.messages.into_iter().map(GmailMessage::from).collect(),
        })
    }

    pub async fn list_threads(&self, query: Option<&str>, max_results: u32) -> Result<Vec<ThreadSummary>, GoogleApiError> {
        let mut params = vec![("maxResults".to_string(), max_results.to_string())];
        if let Some(q) = query {
            params.push(("q".to_string(), q.to_string()));
        }
        let list: ThreadList = self
            .google
            .send_json(self.google.http().get(self.url("threads")).query(&params))
            .await?;
        Ok(list.threads)
    }

    pub async fn modify_labels(
        &self,
        message_id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> Result<(), GoogleApiError> {
        let body = json!({ "addLabelIds": add, "removeLabelIds": remove });
        let _: Value = self
            .google
            .send_json(
                self.google
                    .http()
                    .post(self.url(&format!("messages/{message_id}/modify")))
                    .json(&body),
            )
            .await?;
        info!(message_id, "Modified message labels");
        Ok(())
    }

    pub async fn mark_as_read(&self, message_id: &str) -> Result<(), GoogleApiError> {
        self.modify_labels(message_id, &[], &["UNREAD"]).await
    }

    /// Starts push notifications for `labels` to a Pub/Sub topic. Gmail
    /// watches expire after 7 days and must be renewed.
    pub async fn watch(&self, topic: &str, labels: &[&str]) -> Result<WatchResponse, GoogleApiError> {
        let body = json!({
            "topicName": topic,
            "labelIds": labels,
            "labelFilterAction": "include",
        });
        let watch: WatchResponse = self
            .google
            .send_json(self.google.http().post(self.url("watch")).json(&body))
            .await?;
        info!(topic, history_id = %watch.history_id, expiration = %watch.expiration, "Gmail watch set");
        Ok(watch)
    }

    pub async fn stop_watch(&self) -> Result<(), GoogleApiError> {
        self.google
            .send_empty(self.google.http().post(self.url("stop")))
            .await?;
        info!("Gmail watch stopped");
        Ok(())
    }

    /// Ids of INBOX messages added since `start_history_id`, across pages.
    pub async fn list_history(&self, start_history_id: &str) -> Result<HistoryPage, GoogleApiError> {
        let mut page = HistoryPage::default();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("startHistoryId".to_string(), start_history_id.to_string()),
                ("historyTypes".to_string(), "messageAdded".to_string()),
                ("labelId".to_string(), "INBOX".to_string()),
            ];
            if let Some(token) = &page_token {
                params.push(("pageToken".to_string(), token.clone()));
            }
            let list: HistoryList = self
                .google
                .send_json(self.google.http().get(self.url("history")).query(&params))
                .await?;
            for record in list.history {
                for added in record.messages_added {
                    if !page.message_ids.contains(&added.message.id) {
                        page.message_ids.push(added.message.id);
                    }
                }
            }
            if list.history_id.is_some() {
                page.history_id = list.history_id;
            }
            match list.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        info!(start_history_id, count = page.message_ids.len(), "Listed Gmail history");
        Ok(page)
    }
}
