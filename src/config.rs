use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub photo_host: PhotoHostConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub vision_verify: VisionVerifyConfig,
}

/// Where and how the album-partitioned store persists its data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Number of album shards kept resident in the LRU cache.
    #[serde(default = "default_album_cache_size")]
    pub album_cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            album_cache_size: default_album_cache_size(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    Config::config_dir().join("data")
}

fn default_album_cache_size() -> usize {
    10
}

/// Credentials and identity for the external photo-hosting service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PhotoHostConfig {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub api_secret: Option<String>,

    #[serde(default = "default_photo_host_endpoint")]
    pub endpoint: String,
}

fn default_photo_host_endpoint() -> String {
    "https://api.photo-host.example/v1".to_string()
}

/// Which vision LLM provider backs the port, and how to reach it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProviderKind {
    #[default]
    OpenAi,
    Anthropic,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: LlmProviderKind,

    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub custom_prompt: Option<String>,

    /// Upper bound on concurrent in-flight analysis calls within one batch.
    #[serde(default = "default_per_batch_concurrency")]
    pub per_batch_concurrency: usize,

    /// Independent deadlines, per spec §5.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_analyze_timeout_secs")]
    pub analyze_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProviderKind::default(),
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            api_key: None,
            custom_prompt: None,
            per_batch_concurrency: default_per_batch_concurrency(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            analyze_timeout_secs: default_analyze_timeout_secs(),
        }
    }
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:1234/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_per_batch_concurrency() -> usize {
    1
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_analyze_timeout_secs() -> u64 {
    60
}

/// Batch/job scheduling knobs not already covered by rate limiting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_concurrent_batches")]
    pub max_concurrent_batches: usize,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_eviction_delay_secs")]
    pub eviction_delay_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_batches: default_max_concurrent_batches(),
            max_retry_attempts: default_max_retry_attempts(),
            eviction_delay_secs: default_eviction_delay_secs(),
        }
    }
}

fn default_max_concurrent_batches() -> usize {
    2
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_eviction_delay_secs() -> u64 {
    30
}

/// Process-wide token bucket shared by every batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per minute, process-wide.
    #[serde(default = "default_global_rate_per_minute")]
    pub global_rate_per_minute: u32,

    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_rate_per_minute: default_global_rate_per_minute(),
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

fn default_global_rate_per_minute() -> u32 {
    60
}

fn default_max_concurrent_requests() -> usize {
    4
}

/// Optional LLM-backed visual re-verification pass in SearchEngine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionVerifyConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_vision_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_vision_max_images")]
    pub max_images: usize,

    #[serde(default = "default_llm_model")]
    pub model_id: String,
}

impl Default for VisionVerifyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            batch_size: default_vision_batch_size(),
            max_images: default_vision_max_images(),
            model_id: default_llm_model(),
        }
    }
}

fn default_vision_batch_size() -> usize {
    5
}

fn default_vision_max_images() -> usize {
    30
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = Config::default();
            config.save()?;
            config.apply_env_overrides();
            Ok(config)
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Layers secrets from the environment on top of the TOML file, so
    /// deployments can keep API keys out of the config file on disk.
    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var("SNAPGRAPH_LLM_API_KEY") {
            self.llm.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("SNAPGRAPH_PHOTO_HOST_API_KEY") {
            self.photo_host.api_key = Some(key);
        }
        if let Ok(secret) = std::env::var("SNAPGRAPH_PHOTO_HOST_API_SECRET") {
            self.photo_host.api_secret = Some(secret);
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// The configuration directory, `$XDG_CONFIG_HOME/snapgraph` (or platform
    /// equivalent).
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("snapgraph")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).expect("serialize");
        let parsed: Config = toml::from_str(&serialized).expect("parse");
        assert_eq!(parsed.llm.model, config.llm.model);
        assert_eq!(
            parsed.rate_limit.global_rate_per_minute,
            config.rate_limit.global_rate_per_minute
        );
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let partial = "[llm]\nmodel = \"custom-model\"\n";
        let parsed: Config = toml::from_str(partial).expect("parse");
        assert_eq!(parsed.llm.model, "custom-model");
        assert_eq!(parsed.batch.max_concurrent_batches, 2);
        assert!(!parsed.vision_verify.enabled);
    }

    #[test]
    fn env_overrides_layer_over_toml_secrets() {
        std::env::set_var("SNAPGRAPH_LLM_API_KEY", "env-llm-key");
        std::env::set_var("SNAPGRAPH_PHOTO_HOST_API_KEY", "env-host-key");
        std::env::set_var("SNAPGRAPH_PHOTO_HOST_API_SECRET", "env-host-secret");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.llm.api_key.as_deref(), Some("env-llm-key"));
        assert_eq!(config.photo_host.api_key.as_deref(), Some("env-host-key"));
        assert_eq!(
            config.photo_host.api_secret.as_deref(),
            Some("env-host-secret")
        );

        std::env::remove_var("SNAPGRAPH_LLM_API_KEY");
        std::env::remove_var("SNAPGRAPH_PHOTO_HOST_API_KEY");
        std::env::remove_var("SNAPGRAPH_PHOTO_HOST_API_SECRET");
    }
}
