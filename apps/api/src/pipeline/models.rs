use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::airtable::{Fields, Record};

use super::PipelineStage;

/// Airtable returns linked records and lookups as arrays; collapse to the
/// first element.
fn first_of<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Array(items)) => items
            .into_iter()
            .find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    })
}

/// Serializes a typed model into Airtable fields, dropping unset values.
pub fn to_fields<T: Serialize>(model: &T) -> Fields {
    match serde_json::to_value(model) {
        Ok(Value::Object(map)) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => Fields::new(),
    }
}

fn from_record<T: for<'de> Deserialize<'de>>(record: &Record) -> Result<T, serde_json::Error> {
    let mut fields = record.fields.clone();
    fields.insert("id".to_string(), Value::String(record.id.clone()));
    serde_json::from_value(Value::Object(fields))
}

// ────────────────────────────────────────────────────────────────────────────
// Applicants
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicantCreate {
    #[serde(rename = "Applicant Name")]
    pub applicant_name: String,
    #[serde(rename = "Email", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "Phone", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(rename = "Location", skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(rename = "Time Zone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
    #[serde(rename = "Resume Drive File ID", skip_serializing_if = "Option::is_none")]
    pub resume_drive_file_id: Option<String>,
    #[serde(rename = "Resume Link", skip_serializing_if = "Option::is_none")]
    pub resume_link: Option<String>,
    #[serde(rename = "Has FAA A&P")]
    pub has_faa_ap: bool,
    #[serde(rename = "FAA A&P Number", skip_serializing_if = "Option::is_none")]
    pub faa_ap_number: Option<String>,
    #[serde(rename = "Other Certs", skip_serializing_if = "Option::is_none")]
    pub other_certs: Option<String>,
    #[serde(rename = "Years in Aviation", skip_serializing_if = "Option::is_none")]
    pub years_in_aviation: Option<f64>,
    #[serde(rename = "Business Aviation Experience")]
    pub business_aviation_experience: bool,
    #[serde(rename = "AOG / Field Experience")]
    pub aog_field_experience: bool,
    #[serde(rename = "Geographic Flexibility", skip_serializing_if = "Option::is_none")]
    pub geographic_flexibility: Option<String>,
    #[serde(rename = "AOG Suitability Score", skip_serializing_if = "Option::is_none")]
    pub aog_suitability_score: Option<f64>,
    #[serde(rename = "Baseline Verdict", skip_serializing_if = "Option::is_none")]
    pub baseline_verdict: Option<String>,
    #[serde(rename = "Missing Info Summary", skip_serializing_if = "Option::is_none")]
    pub missing_info_summary: Option<String>,
    #[serde(rename = "Follow-up Questions", skip_serializing_if = "Option::is_none")]
    pub follow_up_questions: Option<String>,
    #[serde(rename = "Source", skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Applicant {
    pub id: String,
    #[serde(rename = "Applicant Name", default)]
    pub applicant_name: String,
    #[serde(rename = "Email", default)]
    pub email: Option<String>,
    #[serde(rename = "Phone", default)]
    pub phone: Option<String>,
    #[serde(rename = "Location", default)]
    pub location: Option<String>,
    #[serde(rename = "Resume Drive File ID", default)]
    pub resume_drive_file_id: Option<String>,
    #[serde(rename = "ICC PDF Drive File ID", default)]
    pub icc_pdf_drive_file_id: Option<String>,
    #[serde(rename = "ICC PDF Link", default)]
    pub icc_pdf_link: Option<String>,
    #[serde(rename = "Has FAA A&P", default)]
    pub has_faa_ap: bool,
    #[serde(rename = "Years in Aviation", default)]
    pub years_in_aviation: Option<f64>,
    #[serde(rename = "AOG / Field Experience", default)]
    pub aog_field_experience: bool,
    #[serde(rename = "Baseline Verdict", default)]
    pub baseline_verdict: Option<String>,
}

impl Applicant {
    pub fn from_record(record: &Record) -> Result<Self, serde_json::Error> {
        from_record(record)
    }
}

/// Partial applicant update; only set fields are written.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplicantUpdate {
    #[serde(rename = "ICC PDF Drive File ID", skip_serializing_if = "Option::is_none")]
    pub icc_pdf_drive_file_id: Option<String>,
    #[serde(rename = "ICC PDF Link", skip_serializing_if = "Option::is_none")]
    pub icc_pdf_link: Option<String>,
    #[serde(rename = "Resume Link", skip_serializing_if = "Option::is_none")]
    pub resume_link: Option<String>,
    #[serde(rename = "Baseline Verdict", skip_serializing_if = "Option::is_none")]
    pub baseline_verdict: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Applicant pipeline
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PipelineCreate {
    #[serde(rename = "Applicant")]
    pub applicant: Vec<String>,
    #[serde(rename = "Pipeline Stage")]
    pub pipeline_stage: PipelineStage,
    #[serde(rename = "Screening Decision", skip_serializing_if = "Option::is_none")]
    pub screening_decision: Option<String>,
    #[serde(rename = "Screening Notes", skip_serializing_if = "Option::is_none")]
    pub screening_notes: Option<String>,
}

impl PipelineCreate {
    pub fn for_applicant(applicant_id: &str, stage: PipelineStage) -> Self {
        Self {
            applicant: vec![applicant_id.to_string()],
            pipeline_stage: stage,
            screening_decision: None,
            screening_notes: None,
        }
    }
}

/// Partial pipeline update. `None` fields are omitted from the PATCH.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineUpdate {
    #[serde(rename = "Pipeline Stage", skip_serializing_if = "Option::is_none")]
    pub pipeline_stage: Option<PipelineStage>,
    #[serde(rename = "Screening Decision", skip_serializing_if = "Option::is_none")]
    pub screening_decision: Option<String>,
    #[serde(rename = "Screening Notes", skip_serializing_if = "Option::is_none")]
    pub screening_notes: Option<String>,
    #[serde(rename = "Outreach Email Draft ID", skip_serializing_if = "Option::is_none")]
    pub outreach_email_draft_id: Option<String>,
    #[serde(rename = "Outreach Thread ID", skip_serializing_if = "Option::is_none")]
    pub outreach_thread_id: Option<String>,
    #[serde(rename = "Initial Email Sent At", skip_serializing_if = "Option::is_none")]
    pub initial_email_sent_at: Option<DateTime<Utc>>,
    #[serde(rename = "Last Reply Received At", skip_serializing_if = "Option::is_none")]
    pub last_reply_received_at: Option<DateTime<Utc>>,
    #[serde(rename = "Last Reply Summary", skip_serializing_if = "Option::is_none")]
    pub last_reply_summary: Option<String>,
    #[serde(rename = "Preferred Call Window 1", skip_serializing_if = "Option::is_none")]
    pub preferred_call_window_1: Option<String>,
    #[serde(rename = "Preferred Call Window 2", skip_serializing_if = "Option::is_none")]
    pub preferred_call_window_2: Option<String>,
    #[serde(rename = "Confirmed Phone Number", skip_serializing_if = "Option::is_none")]
    pub confirmed_phone_number: Option<String>,
    #[serde(rename = "Constraints", skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    #[serde(rename = "Probe Call Event ID", skip_serializing_if = "Option::is_none")]
    pub probe_call_event_id: Option<String>,
    #[serde(rename = "Probe Call Datetime", skip_serializing_if = "Option::is_none")]
    pub probe_call_datetime: Option<DateTime<Utc>>,
    #[serde(rename = "Probe Call Meet Link", skip_serializing_if = "Option::is_none")]
    pub probe_call_meet_link: Option<String>,
    #[serde(rename = "Probe Call Transcript File ID", skip_serializing_if = "Option::is_none")]
    pub probe_call_transcript_file_id: Option<String>,
    #[serde(rename = "Probe Call Transcript Link", skip_serializing_if = "Option::is_none")]
    pub probe_call_transcript_link: Option<String>,
    #[serde(rename = "Interview Event ID", skip_serializing_if = "Option::is_none")]
    pub interview_event_id: Option<String>,
    #[serde(rename = "Interview Datetime", skip_serializing_if = "Option::is_none")]
    pub interview_datetime: Option<DateTime<Utc>>,
    #[serde(rename = "Interview Meet Link", skip_serializing_if = "Option::is_none")]
    pub interview_meet_link: Option<String>,
    #[serde(rename = "Interview Transcript File ID", skip_serializing_if = "Option::is_none")]
    pub interview_transcript_file_id: Option<String>,
    #[serde(rename = "Interview Transcript Link", skip_serializing_if = "Option::is_none")]
    pub interview_transcript_link: Option<String>,
    #[serde(rename = "Run Background Check", skip_serializing_if = "Option::is_none")]
    pub run_background_check: Option<bool>,
    #[serde(rename = "Background Check Status", skip_serializing_if = "Option::is_none")]
    pub background_check_status: Option<String>,
    #[serde(rename = "Background Check Notes", skip_serializing_if = "Option::is_none")]
    pub background_check_notes: Option<String>,
    #[serde(rename = "Email Draft Generated", skip_serializing_if = "Option::is_none")]
    pub email_draft_generated: Option<bool>,
    #[serde(rename = "Initial Chat Notified", skip_serializing_if = "Option::is_none")]
    pub initial_chat_notified: Option<bool>,
    #[serde(rename = "Probe Chat Notified", skip_serializing_if = "Option::is_none")]
    pub probe_chat_notified: Option<bool>,
    #[serde(rename = "Interview Chat Notified", skip_serializing_if = "Option::is_none")]
    pub interview_chat_notified: Option<bool>,
    #[serde(rename = "Contractor Created", skip_serializing_if = "Option::is_none")]
    pub contractor_created: Option<bool>,
}

impl PipelineUpdate {
    pub fn stage(stage: PipelineStage) -> Self {
        Self {
            pipeline_stage: Some(stage),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Pipeline {
    pub id: String,
    #[serde(rename = "Applicant", default, deserialize_with = "first_of")]
    pub applicant: Option<String>,
    #[serde(rename = "Applicant Name", default, deserialize_with = "first_of")]
    pub applicant_name: Option<String>,
    #[serde(rename = "Primary Email", default, deserialize_with = "first_of")]
    pub primary_email: Option<String>,
    #[serde(rename = "Pipeline Stage", default)]
    pub pipeline_stage: Option<String>,
    #[serde(rename = "Screening Decision", default)]
    pub screening_decision: Option<String>,
    #[serde(rename = "Outreach Email Draft ID", default)]
    pub outreach_email_draft_id: Option<String>,
    #[serde(rename = "Outreach Thread ID", default)]
    pub outreach_thread_id: Option<String>,
    #[serde(rename = "Confirmed Phone Number", default)]
    pub confirmed_phone_number: Option<String>,
    #[serde(rename = "Probe Call Event ID", default)]
    pub probe_call_event_id: Option<String>,
    #[serde(rename = "Probe Call Meet Link", default)]
    pub probe_call_meet_link: Option<String>,
    #[serde(rename = "Interview Event ID", default)]
    pub interview_event_id: Option<String>,
    #[serde(rename = "Email Draft Generated", default)]
    pub email_draft_generated: bool,
    #[serde(rename = "Interview Chat Notified", default)]
    pub interview_chat_notified: bool,
}

impl Pipeline {
    pub fn from_record(record: &Record) -> Result<Self, serde_json::Error> {
        from_record(record)
    }

    pub fn stage(&self) -> Option<PipelineStage> {
        self.pipeline_stage.as_deref().and_then(PipelineStage::parse)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Interactions
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct InteractionCreate {
    #[serde(rename = "Applicant")]
    pub applicant: Vec<String>,
    #[serde(rename = "Type")]
    pub interaction_type: String,
    #[serde(rename = "Direction")]
    pub direction: String,
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "Summary")]
    pub summary: String,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "Gmail Message ID", skip_serializing_if = "Option::is_none")]
    pub gmail_message_id: Option<String>,
    #[serde(rename = "Gmail Thread ID", skip_serializing_if = "Option::is_none")]
    pub gmail_thread_id: Option<String>,
}
