//! Resume uploads to the incoming Drive folder.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::EventError;
use crate::state::AppState;

const PDF_MIME_TYPE: &str = "application/pdf";
const RESUME_FOLDER_TYPE: &str = "resumes";
const WORKFLOW: &str = "applicant_analysis";
const EVENT_TYPE: &str = "resume_upload";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DriveEvent {
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub folder_type: Option<String>,
    #[serde(default)]
    pub resource_state: Option<String>,
}

impl DriveEvent {
    pub fn is_resume_candidate(&self) -> bool {
        let name = self.name.to_lowercase();
        name.contains("resume") || name.contains("cv") || self.folder_type.as_deref() == Some(RESUME_FOLDER_TYPE)
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type == PDF_MIME_TYPE || self.name.to_lowercase().ends_with(".pdf")
    }
}

pub async fn route(state: &AppState, data: Value) -> Result<Value, EventError> {
    let event: DriveEvent = serde_json::from_value(data.clone())?;
    info!(file_id = ?event.file_id, name = %event.name, state = ?event.resource_state, "Routing Drive event");

    let Some(file_id) = event.file_id.as_deref() else {
        // Channel notifications carry no file; the poller publishes those.
        return Ok(json!({"status": "skipped", "reason": "No file id in event"}));
    };
    if !event.is_resume_candidate() {
        info!(file_id, name = %event.name, "No handler for Drive file");
        return Ok(json!({"status": "skipped", "reason": "Not a resume file", "file_id": file_id}));
    }
    if !event.is_pdf() {
        info!(file_id, mime_type = %event.mime_type, "Skipping non-PDF upload");
        return Ok(json!({"status": "skipped", "reason": "Not a PDF file", "file_id": file_id}));
    }

    state
        .audit
        .log_workflow_execution(WORKFLOW, EVENT_TYPE, &data, "started", None)
        .await;
    let result = state.applicant_analysis.process_resume(file_id, &event.name).await;
    let result_json = serde_json::to_value(&result)?;

    let status = if result.success {
        info!(
            file_id,
            applicant_id = ?result.applicant_id,
            verdict = ?result.baseline_verdict,
            "Resume processed"
        );
        archive(state, file_id).await;
        "completed"
    } else {
        error!(file_id, error = ?result.error, "Resume processing failed");
        "failed"
    };
    state
        .audit
        .log_workflow_execution(WORKFLOW, EVENT_TYPE, &data, status, Some(&result_json))
        .await;

    Ok(json!({"status": status, "file_id": file_id, "result": result_json}))
}

/// Moves a processed resume out of the incoming folder when a processed
/// folder is configured.
async fn archive(state: &AppState, file_id: &str) {
    let Some(folder) = state.config.drive_folder_resumes_processed.as_deref() else {
        return;
    };
    match state.google.drive.move_file(file_id, folder).await {
        Ok(_) => info!(file_id, folder, "Moved resume to processed folder"),
        Err(e) => warn!(file_id, folder, error = %e, "Failed to move processed resume"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::applicant_analysis::icc::render_pdf;
    use crate::google::testing::GoogleStub;
    use crate::llm_client::testing::ScriptedModel;
    use crate::llm_client::ChatMessage;
    use crate::state::testing::harness;
    use axum::http::Method;

    const FILE: &str = "/drive/v3/files/f1";
    const UPLOAD: &str = "/upload/drive/v3/files";

    fn resume_pdf() -> Vec<u8> {
        render_pdf(
            "Jane Smith\n\
             jane.smith@example.com | (214) 555-0142 | Dallas, TX\n\
             FAA A&P Certificate 3456789\n\
             Aircraft Maintenance Technician, Gulfstream G550 line maintenance, 2016 - present\n\
             AOG field support for charter operators",
        )
        .unwrap()
    }

    fn resume_stub(stub: &GoogleStub) {
        stub.on(
            Method::GET,
            FILE,
            json!({"id": "f1", "name": "Jane_Smith_Resume.pdf", "mimeType": "application/pdf", "parents": ["folder-in"]}),
        )
        .on_bytes(Method::GET, FILE, "alt=media", resume_pdf())
        .on(
            Method::POST,
            UPLOAD,
            json!({"id": "icc-1", "name": "ICC_Jane_Smith.pdf", "webViewLink": "https://drive.google.com/file/d/icc-1/view"}),
        )
        .on(Method::PATCH, FILE, json!({"id": "f1", "parents": ["folder-done"]}));
    }

    fn analysis_model() -> ScriptedModel {
        ScriptedModel::new()
            .reply(ChatMessage::assistant("Handing off to the pipeline."))
            .reply(ChatMessage::assistant(
                r#"{"applicant_name": "Jane Smith", "baseline_verdict": "Strong Fit", "aog_suitability_score": 8}"#,
            ))
    }

    fn resume_event() -> Value {
        json!({"file_id": "f1", "name": "Jane_Smith_Resume.pdf", "mime_type": "application/pdf", "folder_type": "resumes"})
    }

    fn drive_event(name: &str, mime: &str, folder_type: Option<&str>) -> DriveEvent {
        DriveEvent {
            file_id: Some("f1".into()),
            name: name.into(),
            mime_type: mime.into(),
            folder_type: folder_type.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_resume_candidates() {
        assert!(drive_event("Jane_Doe_Resume.pdf", "", None).is_resume_candidate());
        assert!(drive_event("jdoe-CV.pdf", "", None).is_resume_candidate());
        assert!(drive_event("scan_0042.pdf", "", Some("resumes")).is_resume_candidate());
        assert!(!drive_event("invoice.pdf", "", None).is_resume_candidate());
    }

    #[test]
    fn test_pdf_detection() {
        assert!(drive_event("a", "application/pdf", None).is_pdf());
        assert!(drive_event("resume.PDF", "", None).is_pdf());
        assert!(!drive_event("resume.docx", "application/msword", None).is_pdf());
    }

    #[tokio::test]
    async fn test_non_pdf_resume_is_skipped() {
        let h = harness().build();
        let result = route(
            &h.state,
            json!({"file_id": "f1", "name": "resume.docx", "mime_type": "application/msword"}),
        )
        .await
        .unwrap();
        assert_eq!(result["status"], "skipped");
        assert_eq!(result["reason"], "Not a PDF file");
    }

    #[tokio::test]
    async fn test_channel_notification_is_skipped() {
        let h = harness().build();
        let result = route(&h.state, json!({"channel_id": "c", "resource_state": "update"}))
            .await
            .unwrap();
        assert_eq!(result["reason"], "No file id in event");
    }

    #[tokio::test]
    async fn test_failed_download_reports_failure() {
        let h = harness().build();
        let result = route(
            &h.state,
            json!({"file_id": "f9", "name": "Jane_Resume.pdf", "mime_type": "application/pdf", "folder_type": "resumes"}),
        )
        .await
        .unwrap();
        assert_eq!(result["status"], "failed");
        assert_eq!(result["result"]["success"], false);
    }

    #[tokio::test]
    async fn test_resume_is_processed_and_archived() {
        let stub = GoogleStub::start().await;
        resume_stub(&stub);
        let h = harness()
            .config(|c| {
                c.drive_folder_resumes_processed = Some("folder-done".into());
                c.drive_folder_icc_reports = Some("folder-icc".into());
            })
            .google(stub.services())
            .model(analysis_model())
            .build();

        let result = route(&h.state, resume_event()).await.unwrap();
        assert_eq!(result["status"], "completed");
        assert_eq!(result["result"]["success"], true);
        assert_eq!(result["result"]["icc_file_id"], "icc-1");
        assert_eq!(result["result"]["baseline_verdict"], "Strong Fit");

        let applicant = &h.store.records("applicants")[0];
        assert_eq!(applicant.str_field("Applicant Name"), Some("Jane Smith"));
        assert_eq!(applicant.str_field("Resume Drive File ID"), Some("f1"));
        assert_eq!(applicant.str_field("ICC PDF Drive File ID"), Some("icc-1"));
        assert_eq!(h.store.records("applicant_pipeline").len(), 1);

        let uploads = stub.requests_to(Method::POST, UPLOAD);
        assert_eq!(uploads.len(), 1);
        assert!(uploads[0].query.contains("uploadType=multipart"));
        assert!(uploads[0].body.as_str().unwrap().contains(r#""parents":["folder-icc"]"#));

        let moves = stub.requests_to(Method::PATCH, FILE);
        assert_eq!(moves.len(), 1);
        assert!(moves[0].query.contains("addParents=folder-done"));
        assert!(moves[0].query.contains("removeParents=folder-in"));

        let (topic, event) = &h.publisher.messages()[0];
        assert_eq!(topic, "jetsmx-applicant-events");
        assert_eq!(event["event_type"], "applicant_profile_created");
    }

    #[tokio::test]
    async fn test_resume_stays_in_place_without_processed_folder() {
        let stub = GoogleStub::start().await;
        resume_stub(&stub);
        let h = harness().google(stub.services()).model(analysis_model()).build();

        let result = route(&h.state, resume_event()).await.unwrap();
        assert_eq!(result["status"], "completed");
        assert!(stub.requests_to(Method::PATCH, FILE).is_empty());
    }

    #[tokio::test]
    async fn test_archive_failure_keeps_completed_status() {
        let stub = GoogleStub::start().await;
        resume_stub(&stub);
        stub.on_status(Method::PATCH, FILE, 403, json!({"error": {"code": 403, "message": "insufficient permissions"}}));
        let h = harness()
            .config(|c| c.drive_folder_resumes_processed = Some("folder-done".into()))
            .google(stub.services())
            .model(analysis_model())
            .build();

        let result = route(&h.state, resume_event()).await.unwrap();
        assert_eq!(result["status"], "completed");
        assert_eq!(stub.requests_to(Method::PATCH, FILE).len(), 1);
    }
}
