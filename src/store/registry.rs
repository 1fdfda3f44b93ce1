//! `sourceImageKey -> albumKey` lookup table, persisted as
//! `imageRegistry.json` alongside the album shards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageRegistry {
    map: HashMap<String, String>,
}

impl ImageRegistry {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        crate::store::atomic_write_json(path, self)
    }

    pub fn album_for(&self, source_image_key: &str) -> Option<&str> {
        self.map.get(source_image_key).map(String::as_str)
    }

    pub fn set(&mut self, source_image_key: &str, album_key: &str) {
        self.map
            .insert(source_image_key.to_string(), album_key.to_string());
    }

    pub fn remove(&mut self, source_image_key: &str) {
        self.map.remove(source_image_key);
    }
}
