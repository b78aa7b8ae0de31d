//! Hiring workflow: outreach drafts, reply parsing and probe-call scheduling.
//!
//! Every outbound email waits for a human to approve it from a Chat card.
//! Chat notifications are best effort; a failed post is logged and the
//! Airtable and Gmail side of the step still counts as done.

pub mod prompts;
pub mod reply_parser;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use super::AgentError;
use crate::airtable::RecordStore;
use crate::audit::AuditLogger;
use crate::google::calendar::NewEvent;
use crate::google::chat::{
    build_approval_card, build_notification_card, build_probe_scheduling_card, CardAction,
    ProposedTime, ACTION_APPROVE_OUTREACH,
};
use crate::google::gmail::OutgoingEmail;
use crate::google::GoogleServices;
use crate::pipeline::models::{Pipeline, PipelineUpdate};
use crate::pipeline::repository::PipelineRepository;
use crate::pipeline::{interaction, PipelineStage};

use self::prompts::{build_outreach_email, build_probe_confirmation, probe_call_description, OUTREACH_SUBJECT};
use self::reply_parser::parse_applicant_reply;

pub const AGENT_NAME: &str = "hr_pipeline_agent";
const PREVIEW_CHARS: usize = 500;
const DEFAULT_AIRCRAFT: &str = "business aviation";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutreachDraft {
    pub pipeline_id: String,
    pub draft_id: String,
    pub chat_notified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutreachSent {
    pub pipeline_id: String,
    pub message_id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyOutcome {
    pub pipeline_id: String,
    pub phone: Option<String>,
    pub availability_windows: Vec<String>,
    pub proposed_times: Vec<ProposedTime>,
    pub constraints: Option<String>,
    pub chat_notified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeScheduled {
    pub pipeline_id: String,
    pub event_id: String,
    pub meet_link: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub applicant_name: String,
    /// Whether the applicant was emailed a confirmation in the outreach thread.
    pub applicant_confirmed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeCancelled {
    pub pipeline_id: String,
    pub cancelled_event_id: String,
}

#[derive(Clone)]
pub struct HrPipelineAgent {
    store: Arc<dyn RecordStore>,
    audit: AuditLogger,
    google: GoogleServices,
    chat_space: Option<String>,
}

impl HrPipelineAgent {
    pub fn new(
        store: Arc<dyn RecordStore>,
        audit: AuditLogger,
        google: GoogleServices,
        chat_space: Option<String>,
    ) -> Self {
        Self {
            store,
            audit,
            google,
            chat_space: chat_space.filter(|s| !s.is_empty()),
        }
    }

    fn repo(&self) -> PipelineRepository<'_> {
        PipelineRepository::new(self.store.as_ref(), &self.audit)
    }

    async fn pipeline(&self, pipeline_id: &str) -> Result<Pipeline, AgentError> {
        self.repo().get_pipeline(pipeline_id).await.map_err(|e| {
            error!(pipeline_id, error = %e, "Pipeline lookup failed");
            match e {
                crate::airtable::AirtableError::NotFound(_) => {
                    AgentError::NotFound(format!("pipeline {pipeline_id}"))
                }
                other => other.into(),
            }
        })
    }

    /// Posts a card when a space is configured, falling back to plain text
    /// when the card is rejected. Returns whether anything was posted.
    async fn notify(&self, card: Value, fallback: &str) -> bool {
        let Some(space) = &self.chat_space else {
            return false;
        };
        let chat = &self.google.chat;
        match chat.post_card(space, card, None, AGENT_NAME).await {
            Ok(_) => true,
            Err(e) => {
                warn!(space = %space, error = %e, "Failed to post Chat card, sending text");
                match chat.post_message(space, fallback, None, AGENT_NAME).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!(space = %space, error = %e, "Failed to post Chat message");
                        false
                    }
                }
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Outreach
    // ────────────────────────────────────────────────────────────────────────

    pub async fn generate_outreach_draft(&self, pipeline_id: &str) -> Result<OutreachDraft, AgentError> {
        info!(pipeline_id, "Generating outreach draft");
        let pipeline = self.pipeline(pipeline_id).await?;
        let to = pipeline
            .primary_email
            .as_deref()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AgentError::InvalidArguments(format!("pipeline {pipeline_id} has no primary email")))?;
        let name = pipeline.applicant_name.clone().unwrap_or_default();
        let content = build_outreach_email(&name, DEFAULT_AIRCRAFT);

        let draft = self
            .google
            .gmail
            .create_draft(&OutgoingEmail::new(to, &content.subject, &content.body), None)
            .await?;

        if let Some(stale) = pipeline.outreach_email_draft_id.as_deref().filter(|id| !id.is_empty()) {
            match self.google.gmail.delete_draft(stale).await {
                Ok(()) => info!(pipeline_id, draft_id = stale, "Deleted superseded outreach draft"),
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(pipeline_id, draft_id = stale, error = %e, "Failed to delete superseded draft"),
            }
        }

        let update = PipelineUpdate {
            outreach_email_draft_id: Some(draft.draft_id.clone()),
            email_draft_generated: Some(true),
            ..PipelineUpdate::stage(PipelineStage::OutreachDraftCreated)
        };
        self.repo()
            .update_pipeline(pipeline_id, &update, AGENT_NAME, "Outreach draft created")
            .await?;

        let approve = CardAction::new(ACTION_APPROVE_OUTREACH)
            .param("pipeline_id", pipeline_id)
            .param("draft_id", &draft.draft_id);
        let preview: String = content.body.chars().take(PREVIEW_CHARS).collect();
        let title = format!(
            "Outreach Draft Ready: {}",
            pipeline.applicant_name.as_deref().unwrap_or("Applicant")
        );
        let fallback = format!("{title}\nPipeline {pipeline_id}, draft {}", draft.draft_id);
        let chat_notified = self
            .notify(build_approval_card(&title, &preview, &approve, None, None), &fallback)
            .await;

        info!(pipeline_id, draft_id = %draft.draft_id, "Outreach draft ready for approval");
        Ok(OutreachDraft {
            pipeline_id: pipeline_id.to_string(),
            draft_id: draft.draft_id,
            chat_notified,
        })
    }

    pub async fn send_approved_outreach(&self, pipeline_id: &str, draft_id: &str) -> Result<OutreachSent, AgentError> {
        info!(pipeline_id, draft_id, "Sending approved outreach");
        let pipeline = self.pipeline(pipeline_id).await?;
        let to = pipeline.primary_email.clone().unwrap_or_default();

        let sent = self
            .google
            .gmail
            .send_draft(draft_id, &to, OUTREACH_SUBJECT, AGENT_NAME, "Outreach approved in Chat")
            .await?;

        let update = PipelineUpdate {
            outreach_thread_id: sent.thread_id.clone(),
            initial_email_sent_at: Some(Utc::now()),
            ..PipelineUpdate::stage(PipelineStage::InitialEmailSent)
        };
        self.repo()
            .update_pipeline(pipeline_id, &update, AGENT_NAME, "Outreach email sent")
            .await?;

        if let Some(applicant_id) = pipeline.applicant.as_deref() {
            let thread = sent.thread_id.as_deref().unwrap_or_default();
            if let Err(e) = self
                .repo()
                .log_interaction(
                    applicant_id,
                    interaction::TYPE_EMAIL,
                    interaction::DIRECTION_OUTBOUND,
                    interaction::CHANNEL_GMAIL,
                    "Initial outreach email sent",
                    Some((&sent.message_id, thread)),
                )
                .await
            {
                warn!(pipeline_id, error = %e, "Failed to log outreach interaction");
            }
        }

        Ok(OutreachSent {
            pipeline_id: pipeline_id.to_string(),
            message_id: sent.message_id,
            thread_id: sent.thread_id,
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Replies
    // ────────────────────────────────────────────────────────────────────────

    pub async fn parse_applicant_email_reply(
        &self,
        thread_id: &str,
        message_id: &str,
        body: &str,
        pipeline_id: &str,
    ) -> Result<ReplyOutcome, AgentError> {
        let now = Utc::now().with_timezone(&New_York);
        self.handle_reply_at(thread_id, message_id, body, pipeline_id, now)
            .await
    }

    async fn handle_reply_at(
        &self,
        thread_id: &str,
        message_id: &str,
        body: &str,
        pipeline_id: &str,
        now: DateTime<Tz>,
    ) -> Result<ReplyOutcome, AgentError> {
        info!(pipeline_id, message_id, "Parsing applicant reply");
        let pipeline = self.pipeline(pipeline_id).await?;
        let parsed = parse_applicant_reply(body, now);
        let windows = &parsed.availability_windows;

        let update = PipelineUpdate {
            last_reply_received_at: Some(now.with_timezone(&Utc)),
            last_reply_summary: Some(parsed.raw_summary.clone()),
            confirmed_phone_number: parsed.phone.clone(),
            preferred_call_window_1: windows.first().cloned(),
            preferred_call_window_2: windows.get(1).cloned(),
            constraints: parsed.constraints.clone(),
            ..PipelineUpdate::stage(PipelineStage::ApplicantResponded)
        };
        self.repo()
            .update_pipeline(pipeline_id, &update, AGENT_NAME, "Applicant replied")
            .await?;

        let mut chat_notified = false;
        if !parsed.proposed_times.is_empty() {
            let summary = format!(
                "Phone: {}\nAvailability: {}",
                parsed.phone.as_deref().unwrap_or("Not provided"),
                if windows.is_empty() { "See email".to_string() } else { windows.join(", ") }
            );
            let name = pipeline.applicant_name.as_deref().unwrap_or("Applicant");
            let fallback = format!("Probe call availability from {name} ({pipeline_id})\n{summary}");
            let card = build_probe_scheduling_card(name, &summary, &parsed.proposed_times, pipeline_id);
            chat_notified = self.notify(card, &fallback).await;
        }

        if let Some(applicant_id) = pipeline.applicant.as_deref() {
            let summary: String = parsed.raw_summary.chars().take(200).collect();
            if let Err(e) = self
                .repo()
                .log_interaction(
                    applicant_id,
                    interaction::TYPE_EMAIL,
                    interaction::DIRECTION_INBOUND,
                    interaction::CHANNEL_GMAIL,
                    &summary,
                    Some((message_id, thread_id)),
                )
                .await
            {
                warn!(pipeline_id, error = %e, "Failed to log reply interaction");
            }
        }

        Ok(ReplyOutcome {
            pipeline_id: pipeline_id.to_string(),
            phone: parsed.phone,
            availability_windows: parsed.availability_windows,
            proposed_times: parsed.proposed_times,
            constraints: parsed.constraints,
            chat_notified,
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Probe calls
    // ────────────────────────────────────────────────────────────────────────

    /// Creates the Meet-enabled calendar event and moves the pipeline to
    /// "Phone Probe Scheduled". `start`/`end` are RFC 3339.
    pub async fn approve_probe_schedule(
        &self,
        pipeline_id: &str,
        start: &str,
        end: &str,
        phone: Option<&str>,
    ) -> Result<ProbeScheduled, AgentError> {
        info!(pipeline_id, start, "Approving probe schedule");
        if start.is_empty() || end.is_empty() {
            return Err(AgentError::InvalidArguments("start_time and end_time required".to_string()));
        }
        let start_at = parse_timestamp(start)?;
        parse_timestamp(end)?;

        let pipeline = self.pipeline(pipeline_id).await?;
        let applicant_name = pipeline
            .applicant_name
            .clone()
            .unwrap_or_else(|| "Applicant".to_string());
        let phone = phone
            .filter(|p| !p.is_empty())
            .or(pipeline.confirmed_phone_number.as_deref())
            .unwrap_or("Phone TBD");
        let attendees: Vec<String> = pipeline.primary_email.iter().cloned().collect();
        let summary = format!("Probe Call - {applicant_name}");
        let description = probe_call_description(&applicant_name, phone, pipeline_id);

        let event = self
            .google
            .calendar
            .create_event(
                NewEvent {
                    summary: &summary,
                    start,
                    end,
                    attendees: &attendees,
                    description: Some(&description),
                    conference: true,
                },
                AGENT_NAME,
            )
            .await?;

        let update = PipelineUpdate {
            probe_call_event_id: Some(event.event_id.clone()),
            probe_call_datetime: Some(start_at),
            probe_call_meet_link: event.meet_link.clone(),
            probe_chat_notified: Some(true),
            ..PipelineUpdate::stage(PipelineStage::PhoneProbeScheduled)
        };
        if let Err(e) = self
            .repo()
            .update_pipeline(pipeline_id, &update, AGENT_NAME, "Probe call scheduled")
            .await
        {
            // The event exists; report it even though Airtable is behind.
            error!(pipeline_id, event_id = %event.event_id, error = %e, "Failed to record probe call");
        }

        let meet = event.meet_link.as_deref().unwrap_or("N/A");
        let card = build_notification_card(
            &format!("Probe Call Scheduled: {applicant_name}"),
            "Event created successfully",
            &[("Time", start), ("Meet Link", meet)],
        );
        let fallback = format!("Probe call scheduled: {applicant_name} at {start}. Meet: {meet}");
        self.notify(card, &fallback).await;
        let applicant_confirmed = self
            .confirm_with_applicant(&pipeline, &applicant_name, start_at, event.meet_link.as_deref())
            .await;

        Ok(ProbeScheduled {
            pipeline_id: pipeline_id.to_string(),
            event_id: event.event_id,
            meet_link: event.meet_link,
            start_time: start.to_string(),
            end_time: end.to_string(),
            applicant_name,
            applicant_confirmed,
        })
    }

    /// Replies in the outreach thread with the confirmed time. Failures are
    /// logged; the calendar invite still reaches the applicant.
    async fn confirm_with_applicant(
        &self,
        pipeline: &Pipeline,
        applicant_name: &str,
        start_at: DateTime<Utc>,
        meet_link: Option<&str>,
    ) -> bool {
        let (Some(thread_id), Some(to)) = (
            pipeline.outreach_thread_id.as_deref().filter(|t| !t.is_empty()),
            pipeline.primary_email.as_deref().filter(|e| !e.is_empty()),
        ) else {
            return false;
        };
        let thread = match self.google.gmail.get_thread(thread_id).await {
            Ok(thread) => thread,
            Err(e) => {
                warn!(pipeline_id = %pipeline.id, error = %e, "Could not load outreach thread");
                return false;
            }
        };
        let Some(last_id) = thread.messages.last().and_then(|m| m.header("Message-ID")) else {
            warn!(pipeline_id = %pipeline.id, "Outreach thread has no Message-ID to reply to");
            return false;
        };
        let when = start_at
            .with_timezone(&New_York)
            .format("%A, %B %-d at %-I:%M %p %Z")
            .to_string();
        let email = OutgoingEmail::new(to, OUTREACH_SUBJECT, &build_probe_confirmation(applicant_name, &when, meet_link));
        match self
            .google
            .gmail
            .send_reply(thread_id, last_id, email, AGENT_NAME, "Probe call confirmation")
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(pipeline_id = %pipeline.id, error = %e, "Failed to send probe confirmation");
                false
            }
        }
    }

    /// Deletes the probe event and returns the pipeline to "Applicant Responded".
    pub async fn cancel_probe_call(&self, pipeline_id: &str, reason: Option<&str>) -> Result<ProbeCancelled, AgentError> {
        let pipeline = self.pipeline(pipeline_id).await?;
        let event_id = pipeline
            .probe_call_event_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AgentError::NotFound(format!("probe call event for {pipeline_id}")))?;

        match self.google.calendar.delete_event(&event_id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => info!(event_id = %event_id, "Probe call event already gone"),
            Err(e) => warn!(event_id = %event_id, error = %e, "Failed to delete probe call event"),
        }

        let update = PipelineUpdate {
            screening_notes: Some(format!(
                "Probe call cancelled. Reason: {}",
                reason.unwrap_or("Not specified")
            )),
            ..PipelineUpdate::stage(PipelineStage::ApplicantResponded)
        };
        self.repo()
            .update_pipeline(pipeline_id, &update, AGENT_NAME, "Probe call cancelled")
            .await?;
        Ok(ProbeCancelled {
            pipeline_id: pipeline_id.to_string(),
            cancelled_event_id: event_id,
        })
    }

    /// Moves an existing probe event, or schedules one when none exists.
    pub async fn reschedule_probe_call(&self, pipeline_id: &str, start: &str, end: &str) -> Result<ProbeScheduled, AgentError> {
        let pipeline = self.pipeline(pipeline_id).await?;
        let Some(event_id) = pipeline.probe_call_event_id.clone().filter(|id| !id.is_empty()) else {
            return self.approve_probe_schedule(pipeline_id, start, end, None).await;
        };
        let start_at = parse_timestamp(start)?;
        parse_timestamp(end)?;

        let updates = serde_json::json!({
            "start": { "dateTime": start, "timeZone": "America/New_York" },
            "end": { "dateTime": end, "timeZone": "America/New_York" },
        });
        self.google.calendar.update_event(&event_id, &updates).await?;

        let update = PipelineUpdate {
            probe_call_datetime: Some(start_at),
            ..Default::default()
        };
        self.repo()
            .update_pipeline(pipeline_id, &update, AGENT_NAME, "Probe call rescheduled")
            .await?;

        Ok(ProbeScheduled {
            pipeline_id: pipeline_id.to_string(),
            event_id,
            meet_link: pipeline.probe_call_meet_link,
            start_time: start.to_string(),
            end_time: end.to_string(),
            applicant_name: pipeline.applicant_name.unwrap_or_else(|| "Applicant".to_string()),
            applicant_confirmed: false,
        })
    }

    // ────────────────────────────────────────────────────────────────────────
    // Interviews
    // ────────────────────────────────────────────────────────────────────────

    /// Announces a finished interview once. Returns whether a card was posted.
    pub async fn notify_interview_complete(&self, pipeline_id: &str) -> Result<bool, AgentError> {
        let pipeline = self.pipeline(pipeline_id).await?;
        if pipeline.interview_chat_notified {
            info!(pipeline_id, "Interview completion already announced");
            return Ok(false);
        }
        let name = pipeline.applicant_name.as_deref().unwrap_or("Applicant");
        let card = build_notification_card(
            &format!("Interview Complete: {name}"),
            "The interview is complete. Review the transcript and decide on a background check.",
            &[
                ("Email", pipeline.primary_email.as_deref().unwrap_or("N/A")),
                ("Pipeline ID", pipeline_id),
            ],
        );
        let posted = self
            .notify(card, &format!("Interview complete: {name} ({pipeline_id})"))
            .await;
        if posted {
            let update = PipelineUpdate {
                interview_chat_notified: Some(true),
                ..Default::default()
            };
            self.repo()
                .update_pipeline(pipeline_id, &update, AGENT_NAME, "Interview completion announced")
                .await?;
        }
        Ok(posted)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AgentError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AgentError::InvalidArguments(format!("invalid timestamp '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::testing::MemoryStore;
    use crate::google::testing::{offline_services, GoogleStub};
    use crate::google::GoogleApiError;
    use axum::http::Method;
    use base64::{engine::general_purpose::URL_SAFE, Engine as _};
    use chrono::TimeZone;
    use serde_json::json;

    const GMAIL: &str = "/gmail/v1/users/me";
    const EVENTS: &str = "/calendar/v3/calendars/primary/events";
    const CHAT_MESSAGES: &str = "/v1/spaces/AAA/messages";

    fn agent(store: Arc<MemoryStore>, space: Option<&str>) -> HrPipelineAgent {
        HrPipelineAgent::new(
            store,
            AuditLogger::tracing_only(),
            offline_services(),
            space.map(str::to_string),
        )
    }

    fn stub_agent(store: Arc<MemoryStore>, stub: &GoogleStub) -> HrPipelineAgent {
        HrPipelineAgent::new(
            store,
            AuditLogger::tracing_only(),
            stub.services(),
            Some("spaces/AAA".to_string()),
        )
    }

    fn decoded_raw(body: &Value) -> String {
        let raw = body["raw"].as_str().unwrap();
        String::from_utf8(URL_SAFE.decode(raw).unwrap()).unwrap()
    }

    fn seed(store: &MemoryStore) {
        store.insert(
            "applicant_pipeline",
            "recP1",
            json!({
                "Applicant": ["recA1"],
                "Applicant Name": ["Jane Smith"],
                "Primary Email": ["jane@example.com"],
                "Pipeline Stage": "Initial Email Sent",
                "Outreach Thread ID": "thread-1"
            }),
        );
    }

    fn wednesday() -> DateTime<Tz> {
        New_York.with_ymd_and_hms(2024, 6, 5, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_reply_updates_pipeline_and_logs_interaction() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let body = "Thanks! My cell is 555-123-4567. I'm available Thursday afternoon. \
                    I can't do Mondays.";
        let outcome = agent(store.clone(), None)
            .handle_reply_at("thread-1", "msg-1", body, "recP1", wednesday())
            .await
            .unwrap();

        assert_eq!(outcome.phone.as_deref(), Some("(555) 123-4567"));
        assert_eq!(outcome.availability_windows, vec!["Thursday afternoon".to_string()]);
        assert_eq!(outcome.proposed_times.len(), 3);
        assert!(!outcome.chat_notified);

        let pipeline = &store.records("applicant_pipeline")[0];
        assert_eq!(pipeline.str_field("Pipeline Stage"), Some("Applicant Responded"));
        assert_eq!(pipeline.str_field("Confirmed Phone Number"), Some("(555) 123-4567"));
        assert_eq!(pipeline.str_field("Preferred Call Window 1"), Some("Thursday afternoon"));
        assert!(pipeline.field("Preferred Call Window 2").is_none());

        let interactions = store.records("interactions");
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].str_field("Direction"), Some("Inbound"));
        assert_eq!(interactions[0].str_field("Gmail Thread ID"), Some("thread-1"));
    }

    #[tokio::test]
    async fn test_reply_chat_failure_is_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let outcome = agent(store.clone(), Some("spaces/AAA"))
            .handle_reply_at("thread-1", "msg-1", "Free Friday morning", "recP1", wednesday())
            .await
            .unwrap();
        assert!(!outcome.chat_notified);
        assert_eq!(
            store.records("applicant_pipeline")[0].str_field("Pipeline Stage"),
            Some("Applicant Responded")
        );
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let err = agent(store, None)
            .handle_reply_at("t", "m", "hi", "recMissing", wednesday())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_outreach_requires_primary_email() {
        let store = Arc::new(MemoryStore::new());
        store.insert("applicant_pipeline", "recP2", json!({"Applicant Name": ["No Email"]}));
        let err = agent(store.clone(), None)
            .generate_outreach_draft("recP2")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments(_)));
        assert_eq!(store.call_count("update"), 0);
    }

    #[tokio::test]
    async fn test_outreach_draft_failure_leaves_pipeline_untouched() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let err = agent(store.clone(), None)
            .generate_outreach_draft("recP1")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Google(GoogleApiError::Auth(_))));
        assert_eq!(
            store.records("applicant_pipeline")[0].str_field("Pipeline Stage"),
            Some("Initial Email Sent")
        );
    }

    #[tokio::test]
    async fn test_probe_schedule_validates_times() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let agent = agent(store.clone(), None);
        let err = agent
            .approve_probe_schedule("recP1", "", "2024-06-06T14:30:00-04:00", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments(_)));
        let err = agent
            .approve_probe_schedule("recP1", "tomorrow", "later", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_probe_schedule_calendar_failure_skips_update() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let err = agent(store.clone(), None)
            .approve_probe_schedule("recP1", "2024-06-06T14:00:00-04:00", "2024-06-06T14:30:00-04:00", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Google(_)));
        assert_eq!(store.call_count("update"), 0);
    }

    #[tokio::test]
    async fn test_interview_notice_without_space_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let posted = agent(store.clone(), None)
            .notify_interview_complete("recP1")
            .await
            .unwrap();
        assert!(!posted);
        assert_eq!(store.call_count("update"), 0);
    }

    #[tokio::test]
    async fn test_cancel_without_event_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let err = agent(store, None).cancel_probe_call("recP1", None).await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_outreach_draft_replaces_stale_draft() {
        let stub = GoogleStub::start().await;
        stub.on(
            Method::POST,
            &format!("{GMAIL}/drafts"),
            json!({"id": "draft-2", "message": {"id": "m1", "threadId": "t1"}}),
        )
        .on(Method::POST, CHAT_MESSAGES, json!({"name": "spaces/AAA/messages/1"}));
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "applicant_pipeline",
            "recP1",
            json!({
                "Applicant Name": ["Jane Smith"],
                "Primary Email": ["jane@example.com"],
                "Pipeline Stage": "New",
                "Outreach Email Draft ID": "draft-1"
            }),
        );

        let draft = stub_agent(store.clone(), &stub)
            .generate_outreach_draft("recP1")
            .await
            .unwrap();

        assert_eq!(draft.draft_id, "draft-2");
        assert!(draft.chat_notified);
        // The old draft was already gone; a 404 does not fail the step.
        assert_eq!(stub.requests_to(Method::DELETE, &format!("{GMAIL}/drafts/draft-1")).len(), 1);
        let created = &stub.requests_to(Method::POST, &format!("{GMAIL}/drafts"))[0];
        assert!(decoded_raw(&created.body["message"]).contains("To: jane@example.com"));

        let pipeline = &store.records("applicant_pipeline")[0];
        assert_eq!(pipeline.str_field("Pipeline Stage"), Some("Outreach Draft Created"));
        assert_eq!(pipeline.str_field("Outreach Email Draft ID"), Some("draft-2"));
        assert_eq!(pipeline.field("Email Draft Generated"), Some(&json!(true)));

        let card = &stub.requests_to(Method::POST, CHAT_MESSAGES)[0].body;
        assert!(card.to_string().contains("approve_outreach"));
    }

    #[tokio::test]
    async fn test_approved_outreach_is_sent_and_logged() {
        let stub = GoogleStub::start().await;
        stub.on(
            Method::POST,
            &format!("{GMAIL}/drafts/send"),
            json!({"id": "msg-9", "threadId": "thread-9"}),
        );
        let store = Arc::new(MemoryStore::new());
        seed(&store);

        let sent = stub_agent(store.clone(), &stub)
            .send_approved_outreach("recP1", "draft-2")
            .await
            .unwrap();

        assert_eq!(sent.message_id, "msg-9");
        assert_eq!(stub.requests_to(Method::POST, &format!("{GMAIL}/drafts/send"))[0].body, json!({"id": "draft-2"}));
        let pipeline = &store.records("applicant_pipeline")[0];
        assert_eq!(pipeline.str_field("Outreach Thread ID"), Some("thread-9"));
        assert_eq!(pipeline.str_field("Pipeline Stage"), Some("Initial Email Sent"));
        assert!(pipeline.field("Initial Email Sent At").is_some());

        let interactions = store.records("interactions");
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].str_field("Direction"), Some("Outbound"));
        assert_eq!(interactions[0].str_field("Gmail Message ID"), Some("msg-9"));
    }

    #[tokio::test]
    async fn test_probe_schedule_confirms_in_outreach_thread() {
        let stub = GoogleStub::start().await;
        stub.on(
            Method::POST,
            EVENTS,
            json!({
                "id": "evt-1",
                "htmlLink": "https://calendar.google.com/event?eid=evt-1",
                "conferenceData": {"entryPoints": [
                    {"entryPointType": "phone", "uri": "tel:+1-555-0100"},
                    {"entryPointType": "video", "uri": "https://meet.google.com/abc-defg-hij"}
                ]}
            }),
        )
        .on(
            Method::GET,
            &format!("{GMAIL}/threads/thread-1"),
            json!({"id": "thread-1", "messages": [
                {"id": "m1", "threadId": "thread-1", "payload": {"headers": [
                    {"name": "Message-ID", "value": "<first@mail.gmail.com>"}
                ]}},
                {"id": "m2", "threadId": "thread-1", "payload": {"headers": [
                    {"name": "Message-Id", "value": "<reply@mail.gmail.com>"}
                ]}}
            ]}),
        )
        .on(
            Method::POST,
            &format!("{GMAIL}/messages/send"),
            json!({"id": "m3", "threadId": "thread-1"}),
        )
        .on(Method::POST, CHAT_MESSAGES, json!({"name": "spaces/AAA/messages/2"}));
        let store = Arc::new(MemoryStore::new());
        seed(&store);

        let scheduled = stub_agent(store.clone(), &stub)
            .approve_probe_schedule("recP1", "2024-06-06T18:00:00Z", "2024-06-06T18:30:00Z", Some("555-123-4567"))
            .await
            .unwrap();

        assert_eq!(scheduled.event_id, "evt-1");
        assert_eq!(scheduled.meet_link.as_deref(), Some("https://meet.google.com/abc-defg-hij"));
        assert!(scheduled.applicant_confirmed);

        let event = &stub.requests_to(Method::POST, EVENTS)[0];
        assert!(event.query.contains("conferenceDataVersion=1"));
        assert_eq!(event.body["summary"], "Probe Call - Jane Smith");

        let reply = &stub.requests_to(Method::POST, &format!("{GMAIL}/messages/send"))[0];
        assert_eq!(reply.body["threadId"], "thread-1");
        let text = decoded_raw(&reply.body);
        assert!(text.contains("In-Reply-To: <reply@mail.gmail.com>"));
        assert!(text.contains("Subject: Re: "));
        assert!(text.contains("Thursday, June 6 at 2:00 PM EDT"));
        assert!(text.contains("https://meet.google.com/abc-defg-hij"));

        let pipeline = &store.records("applicant_pipeline")[0];
        assert_eq!(pipeline.str_field("Pipeline Stage"), Some("Phone Probe Scheduled"));
        assert_eq!(pipeline.str_field("Probe Call Event ID"), Some("evt-1"));
        assert_eq!(pipeline.field("Probe Chat Notified"), Some(&json!(true)));
    }

    #[tokio::test]
    async fn test_probe_schedule_without_thread_skips_confirmation() {
        let stub = GoogleStub::start().await;
        stub.on(Method::POST, EVENTS, json!({"id": "evt-2"}))
            .on(Method::POST, CHAT_MESSAGES, json!({"name": "spaces/AAA/messages/3"}));
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "applicant_pipeline",
            "recP3",
            json!({"Applicant Name": ["Sam Lee"], "Primary Email": ["sam@example.com"]}),
        );

        let scheduled = stub_agent(store, &stub)
            .approve_probe_schedule("recP3", "2024-06-06T18:00:00Z", "2024-06-06T18:30:00Z", None)
            .await
            .unwrap();

        assert!(!scheduled.applicant_confirmed);
        assert!(scheduled.meet_link.is_none());
        assert!(stub.requests_to(Method::POST, &format!("{GMAIL}/messages/send")).is_empty());
    }

    #[tokio::test]
    async fn test_cancel_tolerates_deleted_event() {
        let stub = GoogleStub::start().await;
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "applicant_pipeline",
            "recP1",
            json!({
                "Applicant Name": ["Jane Smith"],
                "Pipeline Stage": "Phone Probe Scheduled",
                "Probe Call Event ID": "evt-1"
            }),
        );

        let cancelled = stub_agent(store.clone(), &stub)
            .cancel_probe_call("recP1", Some("Applicant withdrew"))
            .await
            .unwrap();

        assert_eq!(cancelled.cancelled_event_id, "evt-1");
        assert_eq!(stub.requests_to(Method::DELETE, &format!("{EVENTS}/evt-1")).len(), 1);
        let pipeline = &store.records("applicant_pipeline")[0];
        assert_eq!(pipeline.str_field("Pipeline Stage"), Some("Applicant Responded"));
        assert_eq!(
            pipeline.str_field("Screening Notes"),
            Some("Probe call cancelled. Reason: Applicant withdrew")
        );
    }

    #[tokio::test]
    async fn test_reschedule_moves_existing_event() {
        let stub = GoogleStub::start().await;
        stub.on(Method::PATCH, &format!("{EVENTS}/evt-1"), json!({"id": "evt-1"}));
        let store = Arc::new(MemoryStore::new());
        store.insert(
            "applicant_pipeline",
            "recP1",
            json!({
                "Applicant Name": ["Jane Smith"],
                "Pipeline Stage": "Phone Probe Scheduled",
                "Probe Call Event ID": "evt-1",
                "Probe Call Meet Link": "https://meet.google.com/abc-defg-hij"
            }),
        );

        let moved = stub_agent(store.clone(), &stub)
            .reschedule_probe_call("recP1", "2024-06-07T15:00:00-04:00", "2024-06-07T15:30:00-04:00")
            .await
            .unwrap();

        assert_eq!(moved.event_id, "evt-1");
        assert_eq!(moved.meet_link.as_deref(), Some("https://meet.google.com/abc-defg-hij"));
        let patch = &stub.requests_to(Method::PATCH, &format!("{EVENTS}/evt-1"))[0];
        assert_eq!(patch.body["start"]["dateTime"], "2024-06-07T15:00:00-04:00");
        assert!(stub.requests_to(Method::POST, EVENTS).is_empty());

        let pipeline = &store.records("applicant_pipeline")[0];
        assert_eq!(pipeline.str_field("Probe Call Datetime"), Some("2024-06-07T19:00:00Z"));
        assert_eq!(pipeline.str_field("Pipeline Stage"), Some("Phone Probe Scheduled"));
    }

    #[tokio::test]
    async fn test_interview_notice_is_posted_once() {
        let stub = GoogleStub::start().await;
        stub.on(Method::POST, CHAT_MESSAGES, json!({"name": "spaces/AAA/messages/4"}));
        let store = Arc::new(MemoryStore::new());
        seed(&store);
        let agent = stub_agent(store.clone(), &stub);

        assert!(agent.notify_interview_complete("recP1").await.unwrap());
        assert_eq!(
            store.records("applicant_pipeline")[0].field("Interview Chat Notified"),
            Some(&json!(true))
        );
        assert!(!agent.notify_interview_complete("recP1").await.unwrap());
        assert_eq!(stub.requests_to(Method::POST, CHAT_MESSAGES).len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_card_falls_back_to_text() {
        let stub = GoogleStub::start().await;
        stub.on_status(
            Method::POST,
            CHAT_MESSAGES,
            400,
            json!({"error": {"code": 400, "message": "Invalid card"}}),
        );
        let store = Arc::new(MemoryStore::new());
        seed(&store);

        let posted = stub_agent(store, &stub).notify_interview_complete("recP1").await.unwrap();

        // Both the card and the text fallback were rejected.
        assert!(!posted);
        let attempts = stub.requests_to(Method::POST, CHAT_MESSAGES);
        assert_eq!(attempts.len(), 2);
        assert!(attempts[0].body.get("cardsV2").is_some());
        assert_eq!(attempts[1].body["text"], "Interview complete: Jane Smith (recP1)");
    }

    #[test]
    fn test_parse_timestamp_converts_to_utc() {
        let ts = parse_timestamp("2024-06-06T14:00:00-04:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2024, 6, 6, 18, 0, 0).unwrap());
    }
}
