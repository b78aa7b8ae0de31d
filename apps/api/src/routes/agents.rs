use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::agents::applicant_analysis::ProcessResumeResult;
use crate::errors::AppError;
use crate::events::commands::{self, AirtableCommand, CommandResult};
use crate::llm_client::ChatMessage;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub reply: String,
}

fn require_message(req: &ChatRequest) -> Result<(), AppError> {
    if req.message.trim().is_empty() {
        return Err(AppError::Validation("message must not be empty".to_string()));
    }
    Ok(())
}

/// POST /agents/airtable/chat
pub async fn handle_airtable_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    require_message(&req)?;
    let reply = state.airtable_agent.chat(&req.message, &req.history).await?;
    Ok(Json(ChatResponse { reply }))
}

/// POST /agents/company-kb/chat
pub async fn handle_company_kb_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, AppError> {
    require_message(&req)?;
    let reply = state.company_kb.chat(&req.message, &req.history).await?;
    Ok(Json(ChatResponse { reply }))
}

/// POST /agents/airtable/command
/// Runs a command synchronously and returns its result.
pub async fn handle_airtable_command(
    State(state): State<AppState>,
    Json(command): Json<AirtableCommand>,
) -> Result<Json<CommandResult>, AppError> {
    Ok(Json(commands::execute(&state, &command).await))
}

#[derive(Deserialize)]
pub struct ProcessResumeRequest {
    pub file_id: String,
    pub filename: String,
    /// Skip the model loop and run every step in order.
    #[serde(default)]
    pub direct: bool,
}

/// POST /agents/applicant-analysis/process
pub async fn handle_process_resume(
    State(state): State<AppState>,
    Json(req): Json<ProcessResumeRequest>,
) -> Result<Json<ProcessResumeResult>, AppError> {
    let agent = &state.applicant_analysis;
    let result = if req.direct {
        agent.process_resume_direct(&req.file_id, &req.filename).await
    } else {
        agent.process_resume(&req.file_id, &req.filename).await
    };
    Ok(Json(result))
}
