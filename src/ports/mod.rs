//! Capability ports: narrow interfaces standing in for the external vision
//! LLM and photo-hosting service. Generalized from the teacher's
//! `llm::provider::LlmProvider` trait (a finite set of concrete
//! implementations behind one trait, selected by a factory function).

pub mod factory;
pub mod llm_anthropic;
pub mod llm_ollama;
pub mod llm_openai;
pub mod mock;
pub mod photo_host;

use crate::error::AppError;
use serde_json::Value;

/// Result of a single vision-analysis call.
#[derive(Debug, Clone)]
pub struct RawAnalysis {
    pub content: String,
    pub model_id: String,
}

/// A content block the model emitted during a tool-calling turn.
#[derive(Debug, Clone)]
pub enum ToolTurnBlock {
    Text(String),
    ToolCall { name: String, args: Value },
}

#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone)]
pub struct ToolLoopRequest {
    pub user_text: String,
    pub system_instruction: String,
    pub tool_schemas: Vec<ToolSchema>,
    pub model_id: String,
}

/// One exchanged tool result fed back to the model for a follow-up turn.
#[derive(Debug, Clone)]
pub struct ToolResultTurn {
    pub tool_name: String,
    pub result: Value,
}

/// A candidate image handed to `verify_images` for visual re-ranking.
#[derive(Debug, Clone)]
pub struct VerifyCandidate {
    pub index: usize,
    pub image_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyResult {
    pub matched_indices: std::collections::BTreeSet<usize>,
    pub raw: String,
}

/// Capability port for the vision-capable LLM. Implementers: see
/// `llm_openai`, `llm_anthropic`, `llm_ollama`.
pub trait LlmPort: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn analyze_image(
        &self,
        image_bytes: &[u8],
        mime_type: &str,
        prompt: &str,
        model_id: &str,
    ) -> Result<RawAnalysis, AppError>;

    fn run_tool_loop(&self, request: &ToolLoopRequest) -> Result<Vec<ToolTurnBlock>, AppError>;

    /// Sends tool results back to the model and asks for a final,
    /// user-facing message (spec §4.9 step 3: follow-up turn when the
    /// model returned tool calls but no text).
    fn continue_with_tool_results(
        &self,
        request: &ToolLoopRequest,
        results: &[ToolResultTurn],
    ) -> Result<String, AppError>;

    fn verify_images(
        &self,
        candidates: &[VerifyCandidate],
        query: &str,
        model_id: &str,
    ) -> Result<VerifyResult, AppError> {
        let _ = (candidates, query, model_id);
        Err(AppError::UpstreamPayloadRejected(format!(
            "{} does not support vision verification",
            self.provider_name()
        )))
    }
}

/// Capability port for the photo-hosting service.
pub trait PhotoHostPort: Send + Sync {
    fn fetch_image(&self, url: &str) -> Result<Vec<u8>, AppError>;
    fn list_album_images(&self, album_id: &str) -> Result<Vec<PhotoHostImage>, AppError>;
    fn get_album_details(&self, album_id: &str) -> Result<AlbumDetails, AppError>;
}

#[derive(Debug, Clone)]
pub struct PhotoHostImage {
    pub source_image_key: String,
    pub filename: String,
    pub fetch_url: String,
}

#[derive(Debug, Clone, Default)]
pub struct AlbumDetails {
    pub name: String,
    pub path: String,
    pub hierarchy: Vec<String>,
}

/// Strips a leading/trailing ```json fence (or bare ```) so LLM responses
/// that wrap JSON in markdown still parse. Direct port of the teacher's
/// `llm::provider::extract_json`.
pub fn extract_json(content: &str) -> String {
    let trimmed = content.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.trim_end_matches("```").trim().to_string()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.trim_end_matches("```").trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_strips_fenced_blocks() {
        let fenced = "```json\n{\"a\":1}\n```";
        assert_eq!(extract_json(fenced), "{\"a\":1}");

        let bare_fence = "```\n{\"a\":1}\n```";
        assert_eq!(extract_json(bare_fence), "{\"a\":1}");

        let plain = "{\"a\":1}";
        assert_eq!(extract_json(plain), "{\"a\":1}");
    }
}
