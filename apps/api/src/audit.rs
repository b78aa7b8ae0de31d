//! Audit trail for actions that modify external resources.
//!
//! Every event is emitted as a structured `tracing` record on the `audit`
//! target. When a Postgres pool is attached the event is also appended to
//! `audit_events`; insert failures are logged and swallowed so an audit
//! outage never blocks the action being audited.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::airtable::Fields;

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub initiated_by: String,
    pub reason: String,
    pub agent_name: Option<String>,
    pub before_state: Option<Value>,
    pub after_state: Option<Value>,
    pub metadata: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        initiated_by: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            initiated_by: initiated_by.into(),
            reason: reason.into(),
            agent_name: None,
            before_state: None,
            after_state: None,
            metadata: json!({}),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_states(mut self, before: Option<Value>, after: Option<Value>) -> Self {
        self.before_state = before;
        self.after_state = after;
        self
    }
}

#[derive(Clone, Default)]
pub struct AuditLogger {
    pool: Option<PgPool>,
}

impl AuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Some(pool) }
    }

    /// Logger that only emits tracing events.
    pub fn tracing_only() -> Self {
        Self { pool: None }
    }

    pub async fn log(&self, event: AuditEvent) {
        let agent_name = event
            .agent_name
            .clone()
            .unwrap_or_else(|| event.initiated_by.clone());

        info!(
            target: "audit",
            action = %event.action,
            resource_type = %event.resource_type,
            resource_id = %event.resource_id,
            initiated_by = %event.initiated_by,
            agent_name = %agent_name,
            reason = %event.reason,
            metadata = %event.metadata,
            "Audit: {} on {} {}",
            event.action,
            event.resource_type,
            event.resource_id
        );

        let Some(pool) = &self.pool else {
            return;
        };

        let result = sqlx::query(
            r#"
            INSERT INTO audit_events
                (id, action, resource_type, resource_id, initiated_by, reason,
                 agent_name, before_state, after_state, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&event.action)
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(&event.initiated_by)
        .bind(&event.reason)
        .bind(&agent_name)
        .bind(&event.before_state)
        .bind(&event.after_state)
        .bind(&event.metadata)
        .bind(event.timestamp)
        .execute(pool)
        .await;

        if let Err(e) = result {
            error!(action = %event.action, error = %e, "Failed to persist audit event");
        }
    }

    pub async fn log_email_sent(
        &self,
        to: &str,
        subject: &str,
        message_id: &str,
        thread_id: Option<&str>,
        initiated_by: &str,
        reason: &str,
    ) {
        let event = AuditEvent::new("email_sent", "gmail_message", message_id, initiated_by, reason)
            .with_metadata(json!({ "to": to, "subject": subject, "thread_id": thread_id }));
        self.log(event).await;
    }

    pub async fn log_airtable_update(
        &self,
        table: &str,
        record_id: &str,
        fields_updated: &Fields,
        before_values: Option<Fields>,
        initiated_by: &str,
        reason: &str,
    ) {
        let event = AuditEvent::new(
            "airtable_updated",
            "airtable_record",
            format!("{table}/{record_id}"),
            initiated_by,
            reason,
        )
        .with_states(
            before_values.map(Value::Object),
            Some(Value::Object(fields_updated.clone())),
        )
        .with_metadata(json!({ "table": table }));
        self.log(event).await;
    }

    pub async fn log_airtable_created(
        &self,
        table: &str,
        record_id: &str,
        fields: &Fields,
        initiated_by: &str,
        reason: &str,
    ) {
        let event = AuditEvent::new(
            "airtable_created",
            "airtable_record",
            format!("{table}/{record_id}"),
            initiated_by,
            reason,
        )
        .with_states(None, Some(Value::Object(fields.clone())))
        .with_metadata(json!({ "table": table }));
        self.log(event).await;
    }

    pub async fn log_calendar_event_created(
        &self,
        event_id: &str,
        summary: &str,
        start_time: &str,
        attendees: &[String],
        initiated_by: &str,
    ) {
        let event = AuditEvent::new(
            "calendar_event_created",
            "calendar_event",
            event_id,
            initiated_by,
            format!("Scheduling '{summary}'"),
        )
        .with_metadata(json!({
            "summary": summary,
            "start_time": start_time,
            "attendees": attendees,
        }));
        self.log(event).await;
    }

    pub async fn log_drive_upload(&self, file_id: &str, name: &str, folder_id: Option<&str>, initiated_by: &str) {
        let event = AuditEvent::new(
            "drive_file_uploaded",
            "drive_file",
            file_id,
            initiated_by,
            format!("Uploading {name}"),
        )
        .with_metadata(json!({ "name": name, "folder_id": folder_id }));
        self.log(event).await;
    }

    pub async fn log_chat_post(&self, space: &str, message_name: &str, initiated_by: &str) {
        let event = AuditEvent::new(
            "chat_message_posted",
            "chat_message",
            message_name,
            initiated_by,
            "Posting notification to Google Chat",
        )
        .with_metadata(json!({ "space": space }));
        self.log(event).await;
    }

    pub async fn log_workflow_execution(
        &self,
        workflow_name: &str,
        event_type: &str,
        event_data: &Value,
        status: &str,
        result: Option<&Value>,
    ) {
        let event = AuditEvent::new(
            format!("workflow_{status}"),
            "workflow_execution",
            format!("{workflow_name}/{event_type}"),
            format!("{workflow_name}_workflow"),
            format!("Processing {event_type} event"),
        )
        .with_metadata(json!({
            "workflow_name": workflow_name,
            "event_type": event_type,
            "status": status,
            "event_data": event_data,
            "result": result,
        }));
        self.log(event).await;
    }
}
