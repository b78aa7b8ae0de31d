//! Routing rules for Airtable record changes.

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::EventError;
use crate::pipeline::{screening, tables, PipelineStage};
use crate::state::AppState;

const SCREENING_DECISION: &str = "Screening Decision";
const PIPELINE_STAGE: &str = "Pipeline Stage";
const EMAIL_DRAFT_GENERATED: &str = "Email Draft Generated";

/// A record change as published by the Airtable webhook handlers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordChangeEvent {
    #[serde(default)]
    pub table_id: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub record_id: Option<String>,
    #[serde(default)]
    pub changed_fields: Vec<String>,
    #[serde(default, alias = "new_values")]
    pub current_values: Map<String, Value>,
}

impl RecordChangeEvent {
    fn is_pipeline(&self) -> bool {
        [self.table_name.as_deref(), self.table_id.as_deref()]
            .into_iter()
            .flatten()
            .any(|t| t == tables::APPLICANT_PIPELINE)
    }

    fn changed(&self, field: &str) -> bool {
        self.changed_fields.iter().any(|f| f == field)
    }

    fn value_str(&self, field: &str) -> Option<&str> {
        self.current_values.get(field).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AirtableAction {
    GenerateOutreachDraft { pipeline_id: String },
    NotifyInterviewComplete { pipeline_id: String },
    NoAction,
}

/// Picks the workflow a pipeline change triggers, if any.
pub fn decide(event: &RecordChangeEvent) -> AirtableAction {
    let Some(record_id) = event.record_id.as_deref() else {
        return AirtableAction::NoAction;
    };
    if !event.is_pipeline() {
        return AirtableAction::NoAction;
    }

    let draft_generated = event
        .current_values
        .get(EMAIL_DRAFT_GENERATED)
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if event.changed(SCREENING_DECISION)
        && event.value_str(SCREENING_DECISION) == Some(screening::APPROVE)
        && !draft_generated
    {
        return AirtableAction::GenerateOutreachDraft {
            pipeline_id: record_id.to_string(),
        };
    }

    if event.changed(PIPELINE_STAGE)
        && event.value_str(PIPELINE_STAGE) == Some(PipelineStage::InterviewComplete.as_str())
    {
        return AirtableAction::NotifyInterviewComplete {
            pipeline_id: record_id.to_string(),
        };
    }
    AirtableAction::NoAction
}

pub async fn route(state: &AppState, data: Value) -> Result<Value, EventError> {
    let event: RecordChangeEvent = serde_json::from_value(data)?;
    info!(
        table = ?event.table_name,
        record_id = ?event.record_id,
        changed_fields = ?event.changed_fields,
        "Routing Airtable event"
    );

    match decide(&event) {
        AirtableAction::GenerateOutreachDraft { pipeline_id } => {
            info!(pipeline_id = %pipeline_id, "Screening approved, drafting outreach");
            let draft = state.hr_pipeline.generate_outreach_draft(&pipeline_id).await?;
            Ok(json!({"status": "outreach_draft_created", "result": draft}))
        }
        AirtableAction::NotifyInterviewComplete { pipeline_id } => {
            info!(pipeline_id = %pipeline_id, "Interview complete, notifying HR");
            let notified = state.hr_pipeline.notify_interview_complete(&pipeline_id).await?;
            Ok(json!({"status": "notification_sent", "pipeline_id": pipeline_id, "chat_notified": notified}))
        }
        AirtableAction::NoAction => Ok(json!({"status": "no_action", "reason": "No matching routing rule"})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(changed: &[&str], values: Value) -> RecordChangeEvent {
        RecordChangeEvent {
            table_name: Some(tables::APPLICANT_PIPELINE.to_string()),
            record_id: Some("recP1".to_string()),
            changed_fields: changed.iter().map(|s| s.to_string()).collect(),
            current_values: values.as_object().cloned().unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn test_approval_without_draft_generates_outreach() {
        let e = event(&["Screening Decision"], json!({"Screening Decision": "Approve"}));
        assert_eq!(
            decide(&e),
            AirtableAction::GenerateOutreachDraft {
                pipeline_id: "recP1".into()
            }
        );
    }

    #[test]
    fn test_approval_with_existing_draft_is_ignored() {
        let e = event(
            &["Screening Decision"],
            json!({"Screening Decision": "Approve", "Email Draft Generated": true}),
        );
        assert_eq!(decide(&e), AirtableAction::NoAction);
    }

    #[test]
    fn test_unchanged_decision_does_not_retrigger() {
        let e = event(&["Notes"], json!({"Screening Decision": "Approve"}));
        assert_eq!(decide(&e), AirtableAction::NoAction);
    }

    #[test]
    fn test_interview_complete_notifies() {
        let e = event(&["Pipeline Stage"], json!({"Pipeline Stage": "Interview Complete"}));
        assert_eq!(
            decide(&e),
            AirtableAction::NotifyInterviewComplete {
                pipeline_id: "recP1".into()
            }
        );
    }

    #[test]
    fn test_other_tables_take_no_action() {
        let mut e = event(&["Screening Decision"], json!({"Screening Decision": "Approve"}));
        e.table_name = Some(tables::APPLICANTS.to_string());
        assert_eq!(decide(&e), AirtableAction::NoAction);
    }

    #[test]
    fn test_legacy_value_key_is_accepted() {
        let e: RecordChangeEvent = serde_json::from_value(json!({
            "table_id": "applicant_pipeline",
            "record_id": "recP2",
            "changed_fields": ["Pipeline Stage"],
            "new_values": {"Pipeline Stage": "Interview Complete"},
        }))
        .unwrap();
        assert!(matches!(decide(&e), AirtableAction::NotifyInterviewComplete { .. }));
    }
}
