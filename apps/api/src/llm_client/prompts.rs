// Shared prompt constants.
// Each agent that needs LLM calls defines its own prompts alongside it.
// This file contains cross-cutting prompt fragments.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Appended to every agent system prompt that can write data.
pub const AUDIT_NOTICE: &str = "\
    All operations are logged for audit purposes. \
    Confirm the table, the affected record count and the intended change \
    before any delete or bulk update.";

/// Fallback reply when a tool loop ends without assistant text.
pub const EMPTY_COMPLETION: &str = "Operation completed";
