//! Selects a concrete `LlmPort` implementer from config. Direct port of the
//! teacher's `llm::provider::create_provider` factory.

use super::llm_anthropic::AnthropicLlm;
use super::llm_ollama::OllamaLlm;
use super::llm_openai::OpenAiCompatibleLlm;
use super::LlmPort;
use crate::config::{LlmConfig, LlmProviderKind};
use crate::error::AppError;
use std::time::Duration;

pub fn create_llm_port(config: &LlmConfig) -> anyhow::Result<Box<dyn LlmPort>> {
    let timeout = Duration::from_secs(config.analyze_timeout_secs);
    match config.provider {
        LlmProviderKind::OpenAi => Ok(Box::new(OpenAiCompatibleLlm::new(
            config.endpoint.clone(),
            config.api_key.clone(),
            timeout,
        ))),
        LlmProviderKind::Anthropic => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                AppError::ConfigMissing("anthropic provider requires llm.api_key".to_string())
            })?;
            Ok(Box::new(AnthropicLlm::new(api_key, timeout)))
        }
        LlmProviderKind::Ollama => Ok(Box::new(OllamaLlm::new(config.endpoint.clone(), timeout))),
    }
}
