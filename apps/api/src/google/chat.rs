//! Google Chat messages and the cardsV2 cards posted to the hiring space.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use super::{GoogleApiError, GoogleClient};
use crate::audit::AuditLogger;

const CHAT_API_URL: &str = "https://chat.googleapis.com/v1";
const CARD_ID: &str = "jetsmx-card";

pub const ACTION_APPROVE_OUTREACH: &str = "approve_outreach";
pub const ACTION_SELECT_PROBE_TIME: &str = "select_probe_time";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub name: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thread: Option<Value>,
    #[serde(default)]
    pub create_time: Option<String>,
}

/// Accepts either a bare space id or a `spaces/<id>` resource name.
pub fn space_name(space: &str) -> String {
    if space.starts_with("spaces/") {
        space.to_string()
    } else {
        format!("spaces/{space}")
    }
}

fn thread_query(thread_key: Option<&str>) -> Vec<(&'static str, String)> {
    match thread_key {
        Some(_) => vec![(
            "messageReplyOption",
            "REPLY_MESSAGE_FALLBACK_TO_NEW_THREAD".to_string(),
        )],
        None => Vec::new(),
    }
}

#[derive(Clone)]
pub struct ChatService {
    google: GoogleClient,
    audit: AuditLogger,
}

impl ChatService {
    pub fn new(google: GoogleClient, audit: AuditLogger) -> Self {
        Self { google, audit }
    }

    async fn create(
        &self,
        space: &str,
        mut body: Value,
        thread_key: Option<&str>,
        initiated_by: &str,
    ) -> Result<ChatMessage, GoogleApiError> {
        let space = space_name(space);
        if let Some(key) = thread_key {
            body["thread"] = json!({ "threadKey": key });
        }
        let message: ChatMessage = self
            .google
            .send_json(
                self.google
                    .http()
                    .post(format!("{}/{space}/messages", self.google.endpoint(CHAT_API_URL)))
                    .query(&thread_query(thread_key))
                    .json(&body),
            )
            .await
            .map_err(|e| {
                error!(space = %space, error = %e, "Failed to post chat message");
                e
            })?;
        info!(space = %space, message_name = %message.name, "Posted chat message");
        self.audit
            .log_chat_post(&space, &message.name, initiated_by)
            .await;
        Ok(message)
    }

    pub async fn post_message(
        &self,
        space: &str,
        text: &str,
        thread_key: Option<&str>,
        initiated_by: &str,
    ) -> Result<ChatMessage, GoogleApiError> {
        self.create(space, json!({ "text": text }), thread_key, initiated_by)
            .await
    }

    pub async fn post_card(
        &self,
        space: &str,
        card: Value,
        thread_key: Option<&str>,
        initiated_by: &str,
    ) -> Result<ChatMessage, GoogleApiError> {
        let body = json!({ "cardsV2": [{ "cardId": CARD_ID, "card": card }] });
        self.create(space, body, thread_key, initiated_by).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Cards
// ────────────────────────────────────────────────────────────────────────────

/// A card button action: method name plus string parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CardAction {
    pub function: String,
    pub parameters: Vec<(String, String)>,
}

impl CardAction {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
            parameters: Vec::new(),
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push((key.into(), value.into()));
        self
    }

    fn to_json(&self) -> Value {
        json!({
            "actionMethodName": self.function,
            "function": self.function,
            "parameters": self
                .parameters
                .iter()
                .map(|(k, v)| json!({ "key": k, "value": v }))
                .collect::<Vec<_>>(),
        })
    }
}

fn button(text: &str, action: &CardAction) -> Value {
    json!({ "text": text, "onClick": { "action": action.to_json() } })
}

fn decorated(label: &str, text: &str) -> Value {
    json!({ "decoratedText": { "topLabel": label, "text": text } })
}

fn paragraph(text: &str) -> Value {
    json!({ "textParagraph": { "text": text } })
}

pub fn build_approval_card(
    title: &str,
    preview_text: &str,
    approve: &CardAction,
    edit: Option<&CardAction>,
    cancel: Option<&CardAction>,
) -> Value {
    let mut buttons = vec![button("Approve", approve)];
    if let Some(edit) = edit {
        buttons.push(button("Edit", edit));
    }
    if let Some(cancel) = cancel {
        buttons.push(button("Cancel", cancel));
    }
    json!({
        "header": { "title": title },
        "sections": [
            { "widgets": [paragraph(preview_text)] },
            { "widgets": [{ "buttonList": { "buttons": buttons } }] },
        ]
    })
}

pub fn build_notification_card(title: &str, message: &str, fields: &[(&str, &str)]) -> Value {
    let mut widgets = vec![paragraph(message)];
    widgets.extend(fields.iter().map(|(label, value)| decorated(label, value)));
    json!({
        "header": { "title": title },
        "sections": [{ "widgets": widgets }]
    })
}

#[derive(Debug, Clone, Default)]
pub struct ApplicantSummary<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub has_ap_license: bool,
    pub baseline_verdict: Option<&'a str>,
}

pub fn build_applicant_summary_card(applicant: &ApplicantSummary<'_>, actions: &[(&str, CardAction)]) -> Value {
    let email = if applicant.email.is_empty() { "N/A" } else { applicant.email };
    let mut widgets = vec![
        decorated("Email", email),
        decorated("Phone", applicant.phone.unwrap_or("N/A")),
        decorated(
            "A&P License",
            if applicant.has_ap_license { "✓ Yes" } else { "✗ No" },
        ),
    ];
    if let Some(verdict) = applicant.baseline_verdict {
        widgets.push(decorated("Verdict", verdict));
    }
    let mut sections = vec![json!({ "widgets": widgets })];
    if !actions.is_empty() {
        let buttons: Vec<Value> = actions.iter().map(|(text, a)| button(text, a)).collect();
        sections.push(json!({ "widgets": [{ "buttonList": { "buttons": buttons } }] }));
    }
    json!({
        "header": { "title": format!("Applicant: {}", applicant.name) },
        "sections": sections
    })
}

/// One proposed probe-call slot as shown on the scheduling card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedTime {
    pub start_time: String,
    pub end_time: String,
    pub display_text: String,
}

pub fn build_probe_scheduling_card(
    applicant_name: &str,
    email_summary: &str,
    proposed_times: &[ProposedTime],
    pipeline_id: &str,
) -> Value {
    let buttons: Vec<Value> = proposed_times
        .iter()
        .map(|slot| {
            let action = CardAction::new(ACTION_SELECT_PROBE_TIME)
                .param("pipeline_id", pipeline_id)
                .param("start_time", &slot.start_time)
                .param("end_time", &slot.end_time)
                .param("display_text", &slot.display_text);
            button(&slot.display_text, &action)
        })
        .collect();

    let widgets = vec![
        paragraph(&format!("<b>Applicant Reply Received</b>\n\n{email_summary}")),
        json!({ "divider": {} }),
        paragraph("<b>Proposed Probe Call Times:</b>"),
        json!({ "buttonList": { "buttons": buttons } }),
        json!({ "divider": {} }),
        json!({ "buttonList": { "buttons": [{
            "text": "Schedule Manually",
            "onClick": { "openLink": { "url": "https://calendar.google.com" } }
        }] } }),
    ];
    json!({
        "header": {
            "title": format!("Schedule Probe Call: {applicant_name}"),
            "subtitle": "Select a time to schedule",
        },
        "sections": [{ "widgets": widgets }]
    })
}
