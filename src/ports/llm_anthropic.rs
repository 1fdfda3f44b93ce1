//! Anthropic Messages API port. Generalized from the teacher's
//! `llm::provider::AnthropicProvider`.

use super::{AppError, LlmPort, RawAnalysis, ToolLoopRequest, ToolResultTurn, ToolTurnBlock};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicLlm {
    pub api_key: String,
    pub timeout: Duration,
}

impl AnthropicLlm {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_key: api_key.into(),
            timeout,
        }
    }

    fn post(&self, body: &Value) -> Result<Value, AppError> {
        let response = ureq::post("https://api.anthropic.com/v1/messages")
            .timeout(self.timeout)
            .set("x-api-key", &self.api_key)
            .set("anthropic-version", ANTHROPIC_VERSION)
            .send_json(body)
            .map_err(|err| match err {
                ureq::Error::Status(503, _) | ureq::Error::Status(429, _) => {
                    AppError::Upstream503(err.to_string())
                }
                ureq::Error::Status(code, _) if (400..500).contains(&code) => {
                    AppError::UpstreamPayloadRejected(err.to_string())
                }
                other => AppError::Upstream503(other.to_string()),
            })?;
        response
            .into_json::<Value>()
            .map_err(|err| AppError::Parse(err.to_string()))
    }
}

impl LlmPort for AnthropicLlm {
    fn provider_name(&self) -> &'static str {
        "anthropic"
    }

    fn analyze_image(
        &self,
        image_bytes: &[u8],
        mime_type: &str,
        prompt: &str,
        model_id: &str,
    ) -> Result<RawAnalysis, AppError> {
        let body = json!({
            "model": model_id,
            "max_tokens": 1024,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    {
                        "type": "image",
                        "source": {
                            "type": "base64",
                            "media_type": mime_type,
                            "data": BASE64.encode(image_bytes),
                        }
                    },
                ]
            }],
        });
        let response = self.post(&body)?;
        let content = response["content"][0]["text"]
            .as_str()
            .ok_or_else(|| AppError::Parse("missing content[0].text".to_string()))?
            .to_string();
        Ok(RawAnalysis {
            content,
            model_id: model_id.to_string(),
        })
    }

    fn run_tool_loop(&self, request: &ToolLoopRequest) -> Result<Vec<ToolTurnBlock>, AppError> {
        let tools: Vec<Value> = request
            .tool_schemas
            .iter()
            .map(|schema| {
                json!({
                    "name": schema.name,
                    "description": schema.description,
                    "input_schema": schema.parameters,
                })
            })
            .collect();
        let body = json!({
            "model": request.model_id,
            "max_tokens": 1024,
            "system": request.system_instruction,
            "messages": [{ "role": "user", "content": request.user_text }],
            "tools": tools,
        });
        let response = self.post(&body)?;
        let mut blocks = Vec::new();
        if let Some(content) = response["content"].as_array() {
            for block in content {
                match block["type"].as_str() {
                    Some("text") => {
                        if let Some(text) = block["text"].as_str() {
                            blocks.push(ToolTurnBlock::Text(text.to_string()));
                        }
                    }
                    Some("tool_use") => {
                        let name = block["name"].as_str().unwrap_or_default().to_string();
                        let args = block["input"].clone();
                        blocks.push(ToolTurnBlock::ToolCall { name, args });
                    }
                    _ => {}
                }
            }
        }
        Ok(blocks)
    }

    fn continue_with_tool_results(
        &self,
        request: &ToolLoopRequest,
        results: &[ToolResultTurn],
    ) -> Result<String, AppError> {
        let tool_results_text = results
            .iter()
            .map(|r| format!("{}: {}", r.tool_name, r.result))
            .collect::<Vec<_>>()
            .join("\n");
        let body = json!({
            "model": request.model_id,
            "max_tokens": 1024,
            "system": request.system_instruction,
            "messages": [
                { "role": "user", "content": request.user_text },
                { "role": "user", "content": format!("Tool results:\n{tool_results_text}") },
            ],
        });
        let response = self.post(&body)?;
        response["content"][0]["text"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Parse("missing follow-up content".to_string()))
    }
}
