//! Core data types shared by the store, job queue, search engine, and
//! duplicate tools. Mirrors the teacher's `db::PhotoMetadata` shape (an
//! `Option`-heavy record enriched in place) but persisted as JSON album
//! shards instead of SQLite rows.

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Metadata produced by a single successful analysis pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisMeta {
    pub model_id: String,
    pub timestamp: DateTime<Utc>,
    pub batch_id: Option<String>,
    pub job_id: Option<String>,
    #[serde(default)]
    pub starred: bool,
}

/// One enriched image, living inside exactly one album.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    pub source_image_key: String,
    pub filename: String,
    pub source_url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,

    pub album_key: String,
    pub album_name: String,
    pub album_path: String,
    pub album_hierarchy: Vec<String>,

    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub analysis: Option<AnalysisMeta>,

    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Inserts `keyword`, deduplicating case-insensitively.
    pub fn add_keyword(&mut self, keyword: impl Into<String>) {
        let keyword = keyword.into();
        let already_present = self
            .keywords
            .iter()
            .any(|k| k.eq_ignore_ascii_case(&keyword));
        if !already_present {
            self.keywords.push(keyword);
        }
    }

    pub fn set_keywords(&mut self, keywords: Vec<String>) {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut deduped = Vec::new();
        for keyword in keywords {
            let normalized = keyword.to_ascii_lowercase();
            if seen.insert(normalized) {
                deduped.push(keyword);
            }
        }
        self.keywords = deduped;
    }

    /// Completeness score used by `DuplicateTools` to choose a keeper among
    /// records sharing a `source_image_key`. Weighted sum of field
    /// presence, generalized from the teacher's
    /// `db::similarity::calculate_quality_score`.
    pub fn completeness_score(&self) -> i64 {
        let mut score: i64 = 0;
        if let Some(description) = &self.description {
            score += (description.len() as i64).min(500) / 5;
        }
        score += self.keywords.len() as i64 * 10;
        if self.title.is_some() {
            score += 15;
        }
        if self.caption.is_some() {
            score += 10;
        }
        if let Some(analysis) = &self.analysis {
            score += 5;
            if analysis.starred {
                score += 50;
            }
        }
        score
    }

    /// Shallow-merges non-empty fields from `other` into `self`, used by
    /// `Store::put_image` under `DuplicateHandling::Update`. Mirrors spec
    /// §9's replacement for prototype-style object spreading: only known,
    /// non-empty fields copy over.
    pub fn merge_from(&mut self, other: &ImageRecord) {
        if other.title.is_some() {
            self.title = other.title.clone();
        }
        if other.caption.is_some() {
            self.caption = other.caption.clone();
        }
        if other.description.is_some() {
            self.description = other.description.clone();
        }
        if !other.keywords.is_empty() {
            self.set_keywords(other.keywords.clone());
        }
        if other.analysis.is_some() {
            self.analysis = other.analysis.clone();
        }
        self.last_updated_at = other.last_updated_at;
    }
}

/// Policy applied when `Store::put_image` encounters an existing record
/// with the same `source_image_key`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateHandling {
    #[default]
    Skip,
    Update,
    Replace,
}

/// Outcome of a single `put_image` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Added,
    Skipped,
    Updated,
    Replaced,
}

/// Payload for one unit of enrichment work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub source_image_key: String,
    pub fetch_url: String,
    pub filename: String,
    pub album_key: String,
    pub album_name: String,
    pub album_path: String,
    pub album_hierarchy: Vec<String>,
}

impl JobPayload {
    /// Validates the album-context invariant every job must carry
    /// (spec §3: "every job carries full album context before it may be
    /// executed").
    pub fn validate(&self) -> Result<(), String> {
        if self.album_key.is_empty() {
            return Err("job payload missing albumKey".to_string());
        }
        if self.album_name.is_empty() {
            return Err("job payload missing albumName".to_string());
        }
        if self.album_path.is_empty() {
            return Err("job payload missing albumPath".to_string());
        }
        if self.album_hierarchy.is_empty() {
            return Err("job payload missing non-empty albumHierarchy".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub payload: JobPayload,
    pub duplicate_handling: DuplicateHandling,
    pub force_reprocessing: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub last_error_kind: Option<ErrorKind>,
    pub status: JobStatus,
}

impl Job {
    pub fn new(id: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            id: id.into(),
            payload,
            duplicate_handling: DuplicateHandling::default(),
            force_reprocessing: false,
            attempts: 0,
            last_error: None,
            last_error_kind: None,
            status: JobStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    Queued,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl BatchPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchPhase::Completed | BatchPhase::Cancelled | BatchPhase::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DuplicateStatistics {
    pub skipped_images: usize,
    pub updated_images: usize,
    pub replaced_images: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(key: &str) -> ImageRecord {
        let now = Utc::now();
        ImageRecord {
            id: format!("id-{key}"),
            source_image_key: key.to_string(),
            filename: "a.jpg".to_string(),
            source_url: "https://host/a.jpg".to_string(),
            title: None,
            caption: None,
            album_key: "album-1".to_string(),
            album_name: "Album One".to_string(),
            album_path: "/Album One".to_string(),
            album_hierarchy: vec!["Album One".to_string()],
            description: None,
            keywords: vec![],
            analysis: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    #[test]
    fn add_keyword_dedupes_case_insensitively() {
        let mut record = sample_record("k1");
        record.add_keyword("Sunset");
        record.add_keyword("sunset");
        assert_eq!(record.keywords.len(), 1);
    }

    #[test]
    fn completeness_score_rewards_starred_and_fields() {
        let mut bare = sample_record("k1");
        let mut rich = sample_record("k2");
        rich.title = Some("Title".to_string());
        rich.caption = Some("Caption".to_string());
        rich.description = Some("a".repeat(100));
        rich.set_keywords(vec!["a".to_string(), "b".to_string()]);
        rich.analysis = Some(AnalysisMeta {
            model_id: "m".to_string(),
            timestamp: Utc::now(),
            batch_id: None,
            job_id: None,
            starred: true,
        });
        assert!(rich.completeness_score() > bare.completeness_score());
        bare.add_keyword("x");
        assert!(rich.completeness_score() > bare.completeness_score());
    }

    #[test]
    fn job_payload_requires_album_context() {
        let payload = JobPayload {
            source_image_key: "k".to_string(),
            fetch_url: "u".to_string(),
            filename: "f".to_string(),
            album_key: "".to_string(),
            album_name: "n".to_string(),
            album_path: "p".to_string(),
            album_hierarchy: vec!["n".to_string()],
        };
        assert!(payload.validate().is_err());
    }
}
