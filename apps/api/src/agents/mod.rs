//! Conversational and workflow agents.
//!
//! Tool-calling agents implement `ToolExecutor` and share `run_tool_loop`,
//! which drives a `ChatModel` until it answers without requesting tools.

pub mod airtable_agent;
pub mod applicant_analysis;
pub mod company_kb;
pub mod hr_pipeline;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::airtable::export::ExportError;
use crate::airtable::query::QueryError;
use crate::airtable::schema::SchemaError;
use crate::airtable::AirtableError;
use crate::google::GoogleApiError;
use crate::llm_client::prompts::EMPTY_COMPLETION;
use crate::llm_client::{ChatMessage, ChatModel, LlmError, ToolDefinition};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Airtable error: {0}")]
    Airtable(#[from] AirtableError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Google API error: {0}")]
    Google(#[from] GoogleApiError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Document error: {0}")]
    Document(String),
}

/// A set of functions an agent exposes to the model.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn tool_definitions(&self) -> Vec<ToolDefinition>;

    async fn execute(&self, name: &str, args: Value) -> Result<Value, AgentError>;
}

/// Decodes tool arguments into a typed struct.
pub fn parse_args<T: DeserializeOwned>(args: Value) -> Result<T, AgentError> {
    serde_json::from_value(args).map_err(|e| AgentError::InvalidArguments(e.to_string()))
}

pub fn tool_error(message: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": message.to_string() })
}

/// Runs the function-calling loop and returns the model's final text.
///
/// Tool failures, unknown tools and malformed arguments are reported back
/// to the model as `{"success": false, "error": ...}` results. Running out
/// of iterations yields an explanatory reply rather than an error.
pub async fn run_tool_loop(
    model: &dyn ChatModel,
    system: &str,
    history: &[ChatMessage],
    user_message: &str,
    executor: &dyn ToolExecutor,
    max_iterations: usize,
) -> Result<String, LlmError> {
    let tools = executor.tool_definitions();
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system));
    messages.extend_from_slice(history);
    messages.push(ChatMessage::user(user_message));

    for iteration in 1..=max_iterations {
        let reply = model.chat(&messages, &tools).await?;
        if reply.tool_calls().is_empty() {
            let text = reply
                .content
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| EMPTY_COMPLETION.to_string());
            info!(iteration, "Tool loop finished");
            return Ok(text);
        }

        let calls = reply.tool_calls().to_vec();
        messages.push(reply);
        for call in &calls {
            info!(tool = %call.function.name, iteration, "Executing tool");
            let result = match serde_json::from_str::<Value>(non_empty_args(&call.function.arguments)) {
                Ok(args) => match executor.execute(&call.function.name, args).await {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(tool = %call.function.name, error = %e, "Tool failed");
                        tool_error(e)
                    }
                },
                Err(e) => tool_error(format!("Invalid JSON arguments: {e}")),
            };
            messages.push(ChatMessage::tool_result(call, result.to_string()));
        }
    }

    warn!(max_iterations, "Tool loop hit the iteration limit");
    Ok(format!(
        "I wasn't able to finish this request within {max_iterations} steps. \
         Please try a narrower request."
    ))
}

fn non_empty_args(arguments: &str) -> &str {
    if arguments.trim().is_empty() {
        "{}"
    } else {
        arguments
    }
}
