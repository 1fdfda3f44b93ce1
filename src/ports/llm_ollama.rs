//! Local Ollama port. Generalized from the teacher's
//! `llm::provider::OllamaProvider`. Ollama's `/api/generate` endpoint has
//! no native tool-calling support in the general case, so the tool loop is
//! left unimplemented (default trait methods return
//! `UpstreamPayloadRejected`) — this provider is meant for the enrichment
//! path, not the conversational bridge.

use super::{AppError, LlmPort, RawAnalysis};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;

pub struct OllamaLlm {
    pub endpoint: String,
    pub timeout: Duration,
}

impl OllamaLlm {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
        }
    }
}

impl LlmPort for OllamaLlm {
    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn analyze_image(
        &self,
        image_bytes: &[u8],
        _mime_type: &str,
        prompt: &str,
        model_id: &str,
    ) -> Result<RawAnalysis, AppError> {
        let url = format!("{}/api/generate", self.endpoint.trim_end_matches('/'));
        let body = json!({
            "model": model_id,
            "prompt": prompt,
            "images": [BASE64.encode(image_bytes)],
            "stream": false,
        });
        let response = ureq::post(&url)
            .timeout(self.timeout)
            .send_json(&body)
            .map_err(|err| match err {
                ureq::Error::Status(503, _) => AppError::Upstream503(err.to_string()),
                ureq::Error::Status(code, _) if (400..500).contains(&code) => {
                    AppError::UpstreamPayloadRejected(err.to_string())
                }
                other => AppError::Upstream503(other.to_string()),
            })?
            .into_json::<Value>()
            .map_err(|err| AppError::Parse(err.to_string()))?;

        let content = response["response"]
            .as_str()
            .ok_or_else(|| AppError::Parse("missing response field".to_string()))?
            .to_string();
        Ok(RawAnalysis {
            content,
            model_id: model_id.to_string(),
        })
    }

    fn run_tool_loop(
        &self,
        _request: &super::ToolLoopRequest,
    ) -> Result<Vec<super::ToolTurnBlock>, AppError> {
        Err(AppError::UpstreamPayloadRejected(
            "ollama provider does not support tool calling".to_string(),
        ))
    }

    fn continue_with_tool_results(
        &self,
        _request: &super::ToolLoopRequest,
        _results: &[super::ToolResultTurn],
    ) -> Result<String, AppError> {
        Err(AppError::UpstreamPayloadRejected(
            "ollama provider does not support tool calling".to_string(),
        ))
    }
}
