//! Wires every long-lived component into a single, explicitly constructed
//! `AppContext`, replacing the "global singletons" shape the original
//! system used (spec §9: `dataManager`/`claudeClient`/`batchManager` as
//! global state become fields of a context built once at startup).

use crate::batch_manager::BatchManager;
use crate::config::Config;
use crate::ports::factory::create_llm_port;
use crate::ports::photo_host::RestPhotoHost;
use crate::ports::{LlmPort, PhotoHostPort};
use crate::store::Store;
use anyhow::Result;
use std::time::Duration;

/// Every component the CLI (or any future front-end) needs, constructed
/// once from `Config` and threaded explicitly rather than reached for as
/// process-wide statics.
pub struct AppContext {
    pub config: Config,
    pub store: Store,
    pub batch_manager: BatchManager,
    pub llm: Box<dyn LlmPort>,
    pub photo_host: Box<dyn PhotoHostPort>,
}

impl AppContext {
    pub fn build(config: Config) -> Result<Self> {
        let store = Store::open(config.store.data_dir.clone(), config.store.album_cache_size)?;
        let batch_manager = BatchManager::new(config.rate_limit.clone(), config.batch.clone());
        let llm = create_llm_port(&config.llm)?;
        let photo_host: Box<dyn PhotoHostPort> = Box::new(RestPhotoHost::new(
            config.photo_host.endpoint.clone(),
            config.photo_host.api_key.clone(),
            Duration::from_secs(config.llm.fetch_timeout_secs),
        ));

        Ok(Self {
            config,
            store,
            batch_manager,
            llm,
            photo_host,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_wires_store_and_ports_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.store.data_dir = dir.path().to_path_buf();

        let context = AppContext::build(config).unwrap();
        assert_eq!(context.store.data_dir(), dir.path());
        assert_eq!(context.llm.provider_name(), "openai-compatible");
    }
}
