//! Resume ingestion: download, parse, assess, record, report, announce.
//!
//! A `ResumeRun` holds the intermediate artifacts (PDF bytes, parsed
//! resume, analysis, record ids) so tool calls pass only small arguments.
//! Whatever the model leaves unfinished is completed deterministically.

pub mod icc;
pub mod prompts;
pub mod resume;

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::{parse_args, run_tool_loop, AgentError, ToolExecutor};
use crate::airtable::RecordStore;
use crate::audit::AuditLogger;
use crate::google::drive::DriveService;
use crate::google::pubsub::EventBus;
use crate::llm_client::{call_json, ChatModel, ToolDefinition};
use crate::pipeline::models::{ApplicantCreate, ApplicantUpdate, PipelineCreate};
use crate::pipeline::repository::PipelineRepository;
use crate::pipeline::{interaction, verdict, PipelineStage};

use self::icc::{generate_icc_pdf, icc_filename};
use self::prompts::{build_analysis_prompt, CandidateAnalysis, AGENT_SYSTEM_PROMPT, ANALYSIS_SYSTEM_PROMPT};
use self::resume::{parse_resume, ParsedResume};

pub const AGENT_NAME: &str = "applicant_analysis_agent";
const MAX_ITERATIONS: usize = 15;
const SOURCE_DRIVE_RESUME: &str = "Drive Resume";
pub const EVENT_PROFILE_CREATED: &str = "applicant_profile_created";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessResumeResult {
    pub success: bool,
    pub applicant_id: Option<String>,
    pub pipeline_id: Option<String>,
    pub icc_file_id: Option<String>,
    pub applicant_name: Option<String>,
    pub baseline_verdict: Option<String>,
    pub error: Option<String>,
}

#[derive(Clone)]
pub struct ApplicantAnalysisAgent {
    store: Arc<dyn RecordStore>,
    audit: AuditLogger,
    drive: DriveService,
    events: EventBus,
    model: Arc<dyn ChatModel>,
    icc_folder: Option<String>,
}

impl ApplicantAnalysisAgent {
    pub fn new(
        store: Arc<dyn RecordStore>,
        audit: AuditLogger,
        drive: DriveService,
        events: EventBus,
        model: Arc<dyn ChatModel>,
        icc_folder: Option<String>,
    ) -> Self {
        Self {
            store,
            audit,
            drive,
            events,
            model,
            icc_folder: icc_folder.filter(|f| !f.is_empty()),
        }
    }

    /// Lets the model drive the tool sequence, then completes any step it
    /// skipped.
    pub async fn process_resume(&self, file_id: &str, filename: &str) -> ProcessResumeResult {
        info!(file_id, filename, "Processing resume");
        let run = ResumeRun::new(self, file_id);
        let prompt = format!(
            "Process this resume through the complete JetsMX applicant analysis workflow.\n\n\
             - Drive File ID: {file_id}\n- Filename: {filename}\n\n\
             Start by downloading the resume."
        );
        match run_tool_loop(self.model.as_ref(), AGENT_SYSTEM_PROMPT, &[], &prompt, &run, MAX_ITERATIONS).await {
            Ok(summary) => info!(file_id, summary = %summary.chars().take(300).collect::<String>(), "Agent loop finished"),
            Err(e) => warn!(file_id, error = %e, "Agent loop failed, completing steps directly"),
        }
        run.finish().await
    }

    /// Runs every step in order without the model loop.
    pub async fn process_resume_direct(&self, file_id: &str, filename: &str) -> ProcessResumeResult {
        info!(file_id, filename, "Processing resume directly");
        ResumeRun::new(self, file_id).finish().await
    }

    fn repo(&self) -> PipelineRepository<'_> {
        PipelineRepository::new(self.store.as_ref(), &self.audit)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-resume run
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct RunState {
    pdf: Option<Bytes>,
    parsed: Option<ParsedResume>,
    analysis: Option<CandidateAnalysis>,
    applicant_id: Option<String>,
    pipeline_id: Option<String>,
    icc_pdf: Option<Vec<u8>>,
    icc_file_id: Option<String>,
    event_message_id: Option<String>,
}

struct ResumeRun<'a> {
    agent: &'a ApplicantAnalysisAgent,
    file_id: String,
    state: Mutex<RunState>,
}

fn missing(step: &str) -> AgentError {
    AgentError::InvalidArguments(format!("call {step} first"))
}

impl<'a> ResumeRun<'a> {
    fn new(agent: &'a ApplicantAnalysisAgent, file_id: &str) -> Self {
        Self {
            agent,
            file_id: file_id.to_string(),
            state: Mutex::new(RunState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn download(&self, file_id: Option<&str>) -> Result<Value, AgentError> {
        let file_id = file_id.filter(|f| !f.is_empty()).unwrap_or(self.file_id.as_str());
        let content = self.agent.drive.download_file(file_id).await?;
        if content.is_empty() {
            return Err(AgentError::Document(format!("file {file_id} is empty")));
        }
        let size = content.len();
        self.state().pdf = Some(content);
        info!(file_id, bytes = size, "Downloaded resume");
        Ok(json!({ "success": true, "file_size_bytes": size }))
    }

    fn parse(&self) -> Result<Value, AgentError> {
        let pdf = self.state().pdf.clone().ok_or_else(|| missing("download_resume"))?;
        let parsed = parse_resume(&pdf, Utc::now().year())?;
        let summary = json!({
            "success": true,
            "applicant_name": parsed.applicant_name,
            "email": parsed.email,
            "phone": parsed.phone,
            "location": parsed.location,
            "has_faa_ap": parsed.has_faa_ap,
            "years_in_aviation": parsed.years_in_aviation,
            "business_aviation_experience": parsed.business_aviation_experience,
            "aog_field_experience": parsed.aog_field_experience,
            "text_length": parsed.text_length,
        });
        self.state().parsed = Some(parsed);
        Ok(summary)
    }

    async fn analyze(&self) -> Result<Value, AgentError> {
        let parsed = self.state().parsed.clone().ok_or_else(|| missing("parse_resume_text"))?;
        let prompt = build_analysis_prompt(&parsed);
        let mut analysis =
            match call_json::<CandidateAnalysis>(self.agent.model.as_ref(), &prompt, ANALYSIS_SYSTEM_PROMPT).await {
                Ok(analysis) => analysis,
                Err(e) => {
                    error!(file_id = %self.file_id, error = %e, "Candidate analysis failed");
                    CandidateAnalysis::fallback(parsed.applicant_name.as_deref(), &e.to_string())
                }
            };
        if analysis.applicant_name.trim().is_empty() || analysis.applicant_name == "Unknown" {
            if let Some(name) = &parsed.applicant_name {
                analysis.applicant_name = name.clone();
            }
        }
        info!(verdict = %analysis.baseline_verdict, "Candidate analysis complete");
        let value = serde_json::to_value(&analysis).unwrap_or(Value::Null);
        self.state().analysis = Some(analysis);
        Ok(json!({ "success": true, "analysis": value }))
    }

    async fn create_records(&self) -> Result<Value, AgentError> {
        let (parsed, analysis, existing) = {
            let state = self.state();
            (
                state.parsed.clone().ok_or_else(|| missing("parse_resume_text"))?,
                state.analysis.clone().ok_or_else(|| missing("analyze_candidate_fit"))?,
                state.applicant_id.clone().zip(state.pipeline_id.clone()),
            )
        };
        if let Some((applicant_id, pipeline_id)) = existing {
            return Ok(json!({ "success": true, "applicant_id": applicant_id, "pipeline_id": pipeline_id }));
        }

        let repo = self.agent.repo();
        let applicant = ApplicantCreate {
            applicant_name: analysis.applicant_name.clone(),
            email: parsed.email.clone(),
            phone: parsed.phone.clone(),
            location: parsed.location.clone(),
            resume_drive_file_id: Some(self.file_id.clone()),
            has_faa_ap: parsed.has_faa_ap,
            faa_ap_number: parsed.faa_ap_number.clone(),
            years_in_aviation: parsed.years_in_aviation,
            business_aviation_experience: parsed.business_aviation_experience,
            aog_field_experience: parsed.aog_field_experience,
            geographic_flexibility: analysis.geographic_flexibility.clone(),
            aog_suitability_score: Some(analysis.aog_suitability_score),
            baseline_verdict: Some(analysis.baseline_verdict.clone()),
            missing_info_summary: Some(analysis.missing_info.clone()).filter(|s| !s.is_empty()),
            follow_up_questions: Some(analysis.follow_up_questions.clone()).filter(|s| !s.is_empty()),
            source: Some(SOURCE_DRIVE_RESUME.to_string()),
            ..Default::default()
        };
        let applicant_id = repo
            .create_applicant(&applicant, AGENT_NAME, "Resume processed")
            .await?;
        self.state().applicant_id = Some(applicant_id.clone());

        let pipeline_id = repo
            .create_pipeline(
                &PipelineCreate::for_applicant(&applicant_id, PipelineStage::ProfileGenerated),
                AGENT_NAME,
                "Profile generated from resume",
            )
            .await?;
        self.state().pipeline_id = Some(pipeline_id.clone());

        if let Err(e) = repo
            .log_system_interaction(
                &applicant_id,
                interaction::CHANNEL_DRIVE,
                "Resume processed and profile generated by Applicant Analysis Agent",
            )
            .await
        {
            warn!(applicant_id = %applicant_id, error = %e, "Failed to log resume interaction");
        }

        info!(applicant_id = %applicant_id, pipeline_id = %pipeline_id, "Created applicant records");
        Ok(json!({ "success": true, "applicant_id": applicant_id, "pipeline_id": pipeline_id }))
    }

    fn generate_icc(&self) -> Result<Value, AgentError> {
        let (parsed, analysis) = {
            let state = self.state();
            (
                state.parsed.clone().ok_or_else(|| missing("parse_resume_text"))?,
                state.analysis.clone().ok_or_else(|| missing("analyze_candidate_fit"))?,
            )
        };
        let pdf = generate_icc_pdf(&parsed, &analysis, Utc::now())?;
        let size = pdf.len();
        self.state().icc_pdf = Some(pdf);
        Ok(json!({ "success": true, "pdf_size_bytes": size }))
    }

    async fn upload_icc(&self, parent_folder_id: Option<&str>) -> Result<Value, AgentError> {
        let (pdf, applicant_id, name) = {
            let state = self.state();
            (
                state.icc_pdf.clone().ok_or_else(|| missing("generate_icc"))?,
                state.applicant_id.clone().ok_or_else(|| missing("create_applicant_records"))?,
                state
                    .analysis
                    .as_ref()
                    .map(|a| a.applicant_name.clone())
                    .unwrap_or_else(|| "Unknown".to_string()),
            )
        };
        let folder = parent_folder_id
            .filter(|f| !f.is_empty())
            .or(self.agent.icc_folder.as_deref());
        let file = self
            .agent
            .drive
            .upload_file(&icc_filename(&name, Utc::now()), "application/pdf", pdf, folder, AGENT_NAME)
            .await?;
        let link = file
            .web_view_link
            .clone()
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", file.id));

        self.agent
            .repo()
            .update_applicant(
                &applicant_id,
                &ApplicantUpdate {
                    icc_pdf_drive_file_id: Some(file.id.clone()),
                    icc_pdf_link: Some(link.clone()),
                    ..Default::default()
                },
                AGENT_NAME,
                "ICC report uploaded",
            )
            .await?;
        self.state().icc_file_id = Some(file.id.clone());
        info!(applicant_id = %applicant_id, file_id = %file.id, "Uploaded ICC report");
        Ok(json!({ "success": true, "file_id": file.id, "web_view_link": link }))
    }

    async fn publish(&self) -> Result<Value, AgentError> {
        let (applicant_id, pipeline_id, verdict) = {
            let state = self.state();
            (
                state.applicant_id.clone().ok_or_else(|| missing("create_applicant_records"))?,
                state.pipeline_id.clone().ok_or_else(|| missing("create_applicant_records"))?,
                state
                    .analysis
                    .as_ref()
                    .map(|a| a.baseline_verdict.clone())
                    .unwrap_or_else(|| verdict::NEEDS_REVIEW.to_string()),
            )
        };
        let event = json!({
            "event_type": EVENT_PROFILE_CREATED,
            "applicant_id": applicant_id,
            "pipeline_id": pipeline_id,
            "baseline_verdict": verdict,
            "timestamp": Utc::now().to_rfc3339(),
            "source": AGENT_NAME,
        });
        let message_id = self.agent.events.publish_applicant(&event).await?;
        self.state().event_message_id = Some(message_id.clone());
        info!(applicant_id = %applicant_id, message_id = %message_id, "Published profile event");
        Ok(json!({ "success": true, "message_id": message_id }))
    }

    /// Completes every step not yet done. The completion event is best
    /// effort; the records and report stand even when it fails.
    async fn finish(&self) -> ProcessResumeResult {
        let outcome = self.complete_steps().await;
        let state = self.state();
        let mut result = ProcessResumeResult {
            success: outcome.is_ok(),
            applicant_id: state.applicant_id.clone(),
            pipeline_id: state.pipeline_id.clone(),
            icc_file_id: state.icc_file_id.clone(),
            applicant_name: state.analysis.as_ref().map(|a| a.applicant_name.clone()),
            baseline_verdict: state.analysis.as_ref().map(|a| a.baseline_verdict.clone()),
            error: None,
        };
        if let Err(e) = outcome {
            error!(file_id = %self.file_id, error = %e, "Resume processing failed");
            result.error = Some(e.to_string());
        }
        result
    }

    async fn complete_steps(&self) -> Result<(), AgentError> {
        if self.state().pdf.is_none() {
            self.download(None).await?;
        }
        if self.state().parsed.is_none() {
            self.parse()?;
        }
        if self.state().analysis.is_none() {
            self.analyze().await?;
        }
        let needs_records = {
            let state = self.state();
            state.applicant_id.is_none() || state.pipeline_id.is_none()
        };
        if needs_records {
            self.create_records().await?;
        }
        if self.state().icc_pdf.is_none() {
            self.generate_icc()?;
        }
        if self.state().icc_file_id.is_none() {
            self.upload_icc(None).await?;
        }
        if self.state().event_message_id.is_none() {
            if let Err(e) = self.publish().await {
                warn!(file_id = %self.file_id, error = %e, "Failed to publish profile event");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct DownloadArgs {
    #[serde(default)]
    file_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UploadArgs {
    #[serde(default)]
    parent_folder_id: Option<String>,
}

fn no_params() -> Value {
    json!({ "type": "object", "properties": {} })
}

#[async_trait]
impl ToolExecutor for ResumeRun<'_> {
    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition::function(
                "download_resume",
                "Download the resume PDF from Google Drive",
                json!({
                    "type": "object",
                    "properties": {
                        "file_id": {"type": "string", "description": "Google Drive file ID"}
                    },
                    "required": ["file_id"]
                }),
            ),
            ToolDefinition::function(
                "parse_resume_text",
                "Extract contact info, licensing and experience from the downloaded resume",
                no_params(),
            ),
            ToolDefinition::function(
                "analyze_candidate_fit",
                "Assess the parsed candidate's fit for AOG technician positions",
                no_params(),
            ),
            ToolDefinition::function(
                "create_applicant_records",
                "Create the Applicants and Applicant Pipeline records in Airtable",
                no_params(),
            ),
            ToolDefinition::function(
                "generate_icc",
                "Generate the Initial Candidate Coverage (ICC) PDF report",
                no_params(),
            ),
            ToolDefinition::function(
                "upload_icc",
                "Upload the ICC PDF to Drive and link it on the applicant record",
                json!({
                    "type": "object",
                    "properties": {
                        "parent_folder_id": {"type": "string", "description": "Optional Drive folder ID"}
                    }
                }),
            ),
            ToolDefinition::function(
                "publish_completion_event",
                "Publish the applicant_profile_created event for downstream workflows",
                no_params(),
            ),
        ]
    }

    async fn execute(&self, name: &str, args: Value) -> Result<Value, AgentError> {
        match name {
            "download_resume" => {
                let a: DownloadArgs = parse_args(args)?;
                self.download(a.file_id.as_deref()).await
            }
            "parse_resume_text" => self.parse(),
            "analyze_candidate_fit" => self.analyze().await,
            "create_applicant_records" => self.create_records().await,
            "generate_icc" => self.generate_icc(),
            "upload_icc" => {
                let a: UploadArgs = parse_args(args)?;
                self.upload_icc(a.parent_folder_id.as_deref()).await
            }
            "publish_completion_event" => self.publish().await,
            other => Err(AgentError::UnknownTool(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::airtable::testing::MemoryStore;
    use crate::google::pubsub::testing::RecordingPublisher;
    use crate::google::pubsub::Topics;
    use crate::google::testing::offline_services;
    use crate::llm_client::testing::{tool_call_message, ScriptedModel};
    use crate::llm_client::ChatMessage;

    fn agent(store: Arc<MemoryStore>, model: ScriptedModel, publisher: Arc<RecordingPublisher>) -> ApplicantAnalysisAgent {
        ApplicantAnalysisAgent::new(
            store,
            AuditLogger::tracing_only(),
            offline_services().drive,
            EventBus::new(publisher, Topics::default()),
            Arc::new(model),
            Some("folder-icc".to_string()),
        )
    }

    fn parsed() -> ParsedResume {
        ParsedResume {
            raw_text: "Jane Smith\nA&P mechanic, Gulfstream line maintenance".into(),
            applicant_name: Some("Jane Smith".into()),
            email: Some("jane@example.com".into()),
            has_faa_ap: true,
            business_aviation_experience: true,
            ..Default::default()
        }
    }

    fn seeded(run: &ResumeRun<'_>) {
        let mut state = run.state();
        state.pdf = Some(Bytes::from_static(b"%PDF-1.4"));
        state.parsed = Some(parsed());
    }

    #[tokio::test]
    async fn test_analysis_failure_falls_back_to_needs_review() {
        let store = Arc::new(MemoryStore::new());
        let agent = agent(store, ScriptedModel::new(), Arc::new(RecordingPublisher::default()));
        let run = ResumeRun::new(&agent, "file-1");
        seeded(&run);
        let out = run.analyze().await.unwrap();
        assert_eq!(out["analysis"]["baseline_verdict"], json!("Needs Review"));
        assert_eq!(out["analysis"]["applicant_name"], json!("Jane Smith"));
    }

    #[tokio::test]
    async fn test_records_created_before_upload_failure() {
        let store = Arc::new(MemoryStore::new());
        let model = ScriptedModel::new().reply(ChatMessage::assistant(
            r#"{"applicant_name": "Jane Smith", "baseline_verdict": "Strong Fit", "aog_suitability_score": 8}"#,
        ));
        let publisher = Arc::new(RecordingPublisher::default());
        let agent = agent(store.clone(), model, publisher.clone());
        let run = ResumeRun::new(&agent, "file-1");
        seeded(&run);

        let result = run.finish().await;
        assert!(!result.success);
        assert!(result.applicant_id.is_some());
        assert!(result.pipeline_id.is_some());
        assert_eq!(result.icc_file_id, None);
        assert_eq!(result.baseline_verdict.as_deref(), Some("Strong Fit"));
        assert!(result.error.unwrap().contains("Google API error"));

        let applicant = &store.records("applicants")[0];
        assert_eq!(applicant.str_field("Source"), Some("Drive Resume"));
        assert_eq!(applicant.str_field("Resume Drive File ID"), Some("file-1"));
        let pipeline = &store.records("applicant_pipeline")[0];
        assert_eq!(pipeline.str_field("Pipeline Stage"), Some("Profile Generated"));
        assert_eq!(store.records("interactions").len(), 1);
        assert!(publisher.messages().is_empty());
    }

    #[tokio::test]
    async fn test_publish_event_payload() {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let agent = agent(store, ScriptedModel::new(), publisher.clone());
        let run = ResumeRun::new(&agent, "file-1");
        {
            let mut state = run.state();
            state.applicant_id = Some("recA".into());
            state.pipeline_id = Some("recP".into());
        }
        run.publish().await.unwrap();
        let messages = publisher.messages();
        assert_eq!(messages[0].0, "jetsmx-applicant-events");
        assert_eq!(messages[0].1["event_type"], json!("applicant_profile_created"));
        assert_eq!(messages[0].1["baseline_verdict"], json!("Needs Review"));
    }

    #[tokio::test]
    async fn test_steps_out_of_order_are_rejected() {
        let agent = agent(
            Arc::new(MemoryStore::new()),
            ScriptedModel::new(),
            Arc::new(RecordingPublisher::default()),
        );
        let run = ResumeRun::new(&agent, "file-1");
        let err = run.execute("generate_icc", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_direct_download_failure_reports_error() {
        let agent = agent(
            Arc::new(MemoryStore::new()),
            ScriptedModel::new(),
            Arc::new(RecordingPublisher::default()),
        );
        let result = agent.process_resume_direct("file-1", "resume.pdf").await;
        assert!(!result.success);
        assert_eq!(result.applicant_id, None);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_loop_stall_falls_through_to_direct_steps() {
        let model = ScriptedModel::new().reply(tool_call_message(&[("c1", "download_resume", r#"{"file_id": "file-1"}"#)]));
        let agent = agent(
            Arc::new(MemoryStore::new()),
            model,
            Arc::new(RecordingPublisher::default()),
        );
        let result = agent.process_resume("file-1", "resume.pdf").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Google API error"));
    }
}
