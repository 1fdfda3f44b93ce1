//! Album-partitioned persistence: one JSON shard per album, an
//! `ImageRegistry` for O(1) `sourceImageKey -> albumKey` lookup, and an
//! `InvertedIndex` kept consistent with album contents on every save.
//!
//! Generalized from the teacher's `db::Database` (`open`/`initialize`
//! split, `Result<Option<T>>` instead of special-casing "no rows") but
//! replaces the SQLite backend with atomic JSON file writes, since this
//! spec assumes a single writer and no relational engine.

mod index;
mod registry;

pub use index::{tokenize, InvertedIndex};
pub use registry::ImageRegistry;

use crate::model::{DuplicateHandling, ImageRecord, PutOutcome};
use anyhow::{Context, Result};
use lru::LruCache;
use std::collections::BTreeSet;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct AlbumStatus {
    pub processed: usize,
    pub total: usize,
    pub processed_image_keys: BTreeSet<String>,
    pub progress_percent: u8,
    pub complete: bool,
}

struct Inner {
    data_dir: PathBuf,
    albums_dir: PathBuf,
    registry: ImageRegistry,
    index: InvertedIndex,
    cache: LruCache<String, Vec<ImageRecord>>,
}

/// Writes `value` to `path` via write-temp/fsync/rename so readers never
/// observe a partially written file.
pub(crate) fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;
    {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("creating temp file for {}", path.display()))?;
        use std::io::Write;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming temp file into {}", path.display()))?;
    Ok(())
}

pub struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    pub fn open(data_dir: impl Into<PathBuf>, album_cache_size: usize) -> Result<Self> {
        let data_dir = data_dir.into();
        let albums_dir = data_dir.join("albums");
        fs::create_dir_all(&albums_dir)?;

        let registry = ImageRegistry::load(&data_dir.join("imageRegistry.json"))?;
        let cache_size = NonZeroUsize::new(album_cache_size.max(1)).unwrap();
        let mut inner = Inner {
            data_dir,
            albums_dir,
            registry,
            index: InvertedIndex::default(),
            cache: LruCache::new(cache_size),
        };
        inner.rebuild_index_from_disk()?;
        Ok(Self {
            inner: Mutex::new(inner),
        })
    }

    fn registry_path(data_dir: &Path) -> PathBuf {
        data_dir.join("imageRegistry.json")
    }

    pub fn load_album(&self, album_key: &str) -> Result<Vec<ImageRecord>> {
        let mut inner = self.inner.lock().unwrap();
        inner.load_album(album_key)
    }

    pub fn save_album(&self, album_key: &str, records: Vec<ImageRecord>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.save_album(album_key, records)
    }

    pub fn put_image(
        &self,
        mut record: ImageRecord,
        handling: DuplicateHandling,
    ) -> Result<PutOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let album_key = record.album_key.clone();
        let mut album = inner.load_album(&album_key)?;

        if let Some(existing_idx) = album
            .iter()
            .position(|r| r.source_image_key == record.source_image_key)
        {
            let outcome = match handling {
                DuplicateHandling::Skip => PutOutcome::Skipped,
                DuplicateHandling::Update => {
                    album[existing_idx].merge_from(&record);
                    PutOutcome::Updated
                }
                DuplicateHandling::Replace => {
                    record.created_at = album[existing_idx].created_at;
                    album[existing_idx] = record;
                    PutOutcome::Replaced
                }
            };
            if outcome != PutOutcome::Skipped {
                inner.save_album(&album_key, album)?;
            }
            return Ok(outcome);
        }

        inner.registry.set(&record.source_image_key, &album_key);
        album.push(record);
        inner.save_album(&album_key, album)?;
        let registry_path = Self::registry_path(&inner.data_dir);
        inner.registry.save(&registry_path)?;
        Ok(PutOutcome::Added)
    }

    pub fn find_by_source_key(&self, source_image_key: &str) -> Result<Option<ImageRecord>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(album_key) = inner.registry.album_for(source_image_key).map(String::from)
        else {
            return Ok(None);
        };
        let album = inner.load_album(&album_key)?;
        Ok(album
            .into_iter()
            .find(|r| r.source_image_key == source_image_key))
    }

    pub fn get_album_status(&self, album_key: &str, expected_images: usize) -> Result<AlbumStatus> {
        let mut inner = self.inner.lock().unwrap();
        let album = inner.load_album(album_key)?;
        let processed_image_keys: BTreeSet<String> = album
            .iter()
            .map(|r| r.source_image_key.clone())
            .collect();
        let processed = processed_image_keys.len();
        let progress_percent = if expected_images == 0 {
            0
        } else {
            ((processed.min(expected_images) * 100) / expected_images) as u8
        };
        Ok(AlbumStatus {
            processed,
            total: expected_images,
            processed_image_keys,
            progress_percent,
            complete: expected_images > 0 && processed >= expected_images,
        })
    }

    /// Returns album keys whose contents contain at least one of the
    /// (already-tokenized) query terms, via the inverted indices.
    pub fn search_by_index(&self, query_tokens: &[String]) -> BTreeSet<String> {
        let inner = self.inner.lock().unwrap();
        inner.index.candidate_albums(query_tokens)
    }

    /// Loads every album on disk (used by search and duplicate detection,
    /// which both need a full scan rather than an index-narrowed one).
    pub fn all_album_keys(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut keys = Vec::new();
        for entry in fs::read_dir(&inner.albums_dir)? {
            let entry = entry?;
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                keys.push(stem.to_string());
            }
        }
        Ok(keys)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.inner.lock().unwrap().data_dir.clone()
    }
}

impl Inner {
    fn album_path(&self, album_key: &str) -> PathBuf {
        self.albums_dir.join(format!("{album_key}.json"))
    }

    fn load_album(&mut self, album_key: &str) -> Result<Vec<ImageRecord>> {
        if let Some(cached) = self.cache.get(album_key) {
            return Ok(cached.clone());
        }
        let path = self.album_path(album_key);
        let records: Vec<ImageRecord> = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading album {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing album {}", path.display()))?
        } else {
            Vec::new()
        };
        self.cache.put(album_key.to_string(), records.clone());
        Ok(records)
    }

    fn save_album(&mut self, album_key: &str, records: Vec<ImageRecord>) -> Result<()> {
        let path = self.album_path(album_key);
        atomic_write_json(&path, &records)?;
        self.cache.put(album_key.to_string(), records.clone());
        self.index.remove_album(album_key);
        self.index.add_album(album_key, &records);
        Ok(())
    }

    fn rebuild_index_from_disk(&mut self) -> Result<()> {
        if !self.albums_dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.albums_dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(album_key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path)?;
            let records: Vec<ImageRecord> = serde_json::from_str(&content)
                .with_context(|| format!("parsing album {}", path.display()))?;
            self.index.add_album(album_key, &records);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AnalysisMeta;
    use chrono::Utc;

    fn record(key: &str, album_key: &str, keywords: &[&str]) -> ImageRecord {
        let now = Utc::now();
        ImageRecord {
            id: format!("id-{key}"),
            source_image_key: key.to_string(),
            filename: "f.jpg".to_string(),
            source_url: "u".to_string(),
            title: None,
            caption: None,
            album_key: album_key.to_string(),
            album_name: album_key.to_string(),
            album_path: format!("/{album_key}"),
            album_hierarchy: vec![album_key.to_string()],
            description: Some("a scenic view of mountains".to_string()),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            analysis: Some(AnalysisMeta {
                model_id: "m".to_string(),
                timestamp: now,
                batch_id: None,
                job_id: None,
                starred: false,
            }),
            created_at: now,
            last_updated_at: now,
        }
    }

    #[test]
    fn put_image_adds_new_record_and_updates_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        let outcome = store
            .put_image(record("k1", "album-1", &["sunset"]), DuplicateHandling::Skip)
            .unwrap();
        assert_eq!(outcome, PutOutcome::Added);
        assert!(store.find_by_source_key("k1").unwrap().is_some());
    }

    #[test]
    fn put_image_skip_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        store
            .put_image(record("k1", "album-1", &["sunset"]), DuplicateHandling::Skip)
            .unwrap();
        let outcome = store
            .put_image(record("k1", "album-1", &["beach"]), DuplicateHandling::Skip)
            .unwrap();
        assert_eq!(outcome, PutOutcome::Skipped);
        let album = store.load_album("album-1").unwrap();
        assert_eq!(album.len(), 1);
        assert_eq!(album[0].keywords, vec!["sunset".to_string()]);
    }

    #[test]
    fn put_image_replace_overwrites_and_registry_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        store
            .put_image(record("k1", "album-1", &["sunset"]), DuplicateHandling::Skip)
            .unwrap();
        let outcome = store
            .put_image(
                record("k1", "album-1", &["beach", "family"]),
                DuplicateHandling::Replace,
            )
            .unwrap();
        assert_eq!(outcome, PutOutcome::Replaced);
        let album = store.load_album("album-1").unwrap();
        assert_eq!(album.len(), 1);
        assert!(album[0].keywords.contains(&"beach".to_string()));
        assert_eq!(
            store.find_by_source_key("k1").unwrap().unwrap().album_key,
            "album-1"
        );
    }

    #[test]
    fn index_reflects_album_after_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        store
            .put_image(record("k1", "album-1", &["sunset"]), DuplicateHandling::Skip)
            .unwrap();
        let candidates = store.search_by_index(&["sunset".to_string()]);
        assert!(candidates.contains("album-1"));
    }

    #[test]
    fn store_reopen_rebuilds_index_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path(), 10).unwrap();
            store
                .put_image(record("k1", "album-1", &["sunset"]), DuplicateHandling::Skip)
                .unwrap();
        }
        let reopened = Store::open(dir.path(), 10).unwrap();
        let candidates = reopened.search_by_index(&["sunset".to_string()]);
        assert!(candidates.contains("album-1"));
    }
}
