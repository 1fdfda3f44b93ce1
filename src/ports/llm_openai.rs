//! OpenAI-compatible vision LLM port (also serves LM Studio and any other
//! OpenAI chat-completions-compatible endpoint). Direct generalization of
//! the teacher's `llm::provider::OpenAICompatibleProvider`.

use super::{
    AppError, LlmPort, RawAnalysis, ToolLoopRequest, ToolResultTurn, ToolSchema, ToolTurnBlock,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

pub struct OpenAiCompatibleLlm {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl OpenAiCompatibleLlm {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            timeout,
        }
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, AppError> {
        let url = format!("{}{}", self.endpoint.trim_end_matches('/'), path);
        let mut request = ureq::post(&url).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }
        let response = request.send_json(body).map_err(|err| match err {
            ureq::Error::Status(503, _) | ureq::Error::Status(429, _) => {
                AppError::Upstream503(err.to_string())
            }
            ureq::Error::Status(code, _) if code >= 400 && code < 500 => {
                AppError::UpstreamPayloadRejected(err.to_string())
            }
            other => AppError::Upstream503(other.to_string()),
        })?;
        response
            .into_json::<Value>()
            .map_err(|err| AppError::Parse(err.to_string()))
    }
}

#[derive(Deserialize)]
struct ToolCallFn {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ToolCall {
    function: ToolCallFn,
}

fn to_openai_tools(schemas: &[ToolSchema]) -> Value {
    json!(schemas
        .iter()
        .map(|schema| {
            json!({
                "type": "function",
                "function": {
                    "name": schema.name,
                    "description": schema.description,
                    "parameters": schema.parameters,
                }
            })
        })
        .collect::<Vec<_>>())
}

impl LlmPort for OpenAiCompatibleLlm {
    fn provider_name(&self) -> &'static str {
        "openai-compatible"
    }

    fn analyze_image(
        &self,
        image_bytes: &[u8],
        mime_type: &str,
        prompt: &str,
        model_id: &str,
    ) -> Result<RawAnalysis, AppError> {
        let data_url = format!("data:{mime_type};base64,{}", BASE64.encode(image_bytes));
        let body = json!({
            "model": model_id,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": data_url } },
                ]
            }],
        });
        let response = self.post("/chat/completions", &body)?;
        let content = response["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AppError::Parse("missing choices[0].message.content".to_string()))?
            .to_string();
        Ok(RawAnalysis {
            content,
            model_id: model_id.to_string(),
        })
    }

    fn run_tool_loop(&self, request: &ToolLoopRequest) -> Result<Vec<ToolTurnBlock>, AppError> {
        let body = json!({
            "model": request.model_id,
            "messages": [
                { "role": "system", "content": request.system_instruction },
                { "role": "user", "content": request.user_text },
            ],
            "tools": to_openai_tools(&request.tool_schemas),
        });
        let response = self.post("/chat/completions", &body)?;
        parse_tool_turn(&response)
    }

    fn continue_with_tool_results(
        &self,
        request: &ToolLoopRequest,
        results: &[ToolResultTurn],
    ) -> Result<String, AppError> {
        let mut messages = vec![
            json!({ "role": "system", "content": request.system_instruction }),
            json!({ "role": "user", "content": request.user_text }),
        ];
        for result in results {
            messages.push(json!({
                "role": "tool",
                "name": result.tool_name,
                "content": result.result.to_string(),
            }));
        }
        let body = json!({ "model": request.model_id, "messages": messages });
        let response = self.post("/chat/completions", &body)?;
        response["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::Parse("missing follow-up content".to_string()))
    }
}

fn parse_tool_turn(response: &Value) -> Result<Vec<ToolTurnBlock>, AppError> {
    let message = &response["choices"][0]["message"];
    let mut blocks = Vec::new();

    if let Some(text) = message["content"].as_str() {
        if !text.is_empty() {
            blocks.push(ToolTurnBlock::Text(text.to_string()));
        }
    }

    if let Some(tool_calls) = message["tool_calls"].as_array() {
        for call in tool_calls {
            let parsed: ToolCall = serde_json::from_value(call.clone())
                .map_err(|err| AppError::Parse(err.to_string()))?;
            let args: Value = serde_json::from_str(&parsed.function.arguments)
                .unwrap_or_else(|_| json!({}));
            blocks.push(ToolTurnBlock::ToolCall {
                name: parsed.function.name,
                args,
            });
        }
    }

    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tool_turn_extracts_text_and_calls() {
        let response = json!({
            "choices": [{
                "message": {
                    "content": "Here you go",
                    "tool_calls": [{
                        "function": { "name": "searchImages", "arguments": "{\"keywords\":[\"dog\"]}" }
                    }]
                }
            }]
        });
        let blocks = parse_tool_turn(&response).unwrap();
        assert_eq!(blocks.len(), 2);
        match &blocks[1] {
            ToolTurnBlock::ToolCall { name, args } => {
                assert_eq!(name, "searchImages");
                assert_eq!(args["keywords"][0], "dog");
            }
            _ => panic!("expected tool call block"),
        }
    }
}
