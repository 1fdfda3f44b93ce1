//! Relevance-scored search over the store's albums, with negative-keyword
//! exclusion and an optional LLM-backed vision-verification post-filter.
//!
//! Field-weighted scoring generalizes the teacher's
//! `db::similarity::calculate_quality_score` (a weighted sum over present
//! fields) from photo-quality scoring to keyword relevance; candidate
//! narrowing and truncation generalize `db::mod::semantic_search_by_text`
//! (tokenize, score, sort, truncate) from single-field substring matching
//! to the full multi-field weighted scheme below.

use crate::model::ImageRecord;
use crate::ports::{LlmPort, VerifyCandidate};
use crate::store::{tokenize, Store};
use regex::Regex;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub keywords: Vec<String>,
    pub negative_keywords: Vec<String>,
    pub people_type: Option<String>,
    pub activity: Option<String>,
    pub mood: Option<String>,
    pub location: Option<String>,
    pub album_term: Option<String>,
    pub require_all_keywords: bool,
    pub max_results: usize,
}

impl SearchCriteria {
    pub fn new() -> Self {
        Self {
            max_results: 50,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: ImageRecord,
    pub score: i64,
}

fn whole_word_matches(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let pattern = format!(r"(?i)\b{}\b", regex::escape(needle));
    Regex::new(&pattern)
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

fn record_text_fields(record: &ImageRecord) -> String {
    let mut parts = vec![record.keywords.join(" ")];
    if let Some(title) = &record.title {
        parts.push(title.clone());
    }
    if let Some(caption) = &record.caption {
        parts.push(caption.clone());
    }
    if let Some(description) = &record.description {
        parts.push(description.clone());
    }
    parts.join(" ")
}

fn album_text_fields(record: &ImageRecord) -> String {
    let mut parts = vec![record.album_name.clone()];
    parts.extend(record.album_hierarchy.clone());
    parts.join(" ")
}

fn score_record(record: &ImageRecord, criteria: &SearchCriteria) -> i64 {
    let mut score: i64 = 0;

    for keyword in &criteria.keywords {
        if record.keywords.iter().any(|k| k.eq_ignore_ascii_case(keyword)) {
            score += 10;
        }
        if record
            .title
            .as_deref()
            .is_some_and(|t| whole_word_matches(t, keyword))
        {
            score += 8;
        }
        if record
            .caption
            .as_deref()
            .is_some_and(|c| whole_word_matches(c, keyword))
        {
            score += 6;
        }
        if record
            .description
            .as_deref()
            .is_some_and(|d| whole_word_matches(d, keyword))
        {
            score += 4;
        }
        if record
            .album_hierarchy
            .iter()
            .any(|segment| whole_word_matches(segment, keyword))
        {
            score += 3;
        }
        if whole_word_matches(&record.album_name, keyword) {
            score += 2;
        }
    }

    let record_text = record_text_fields(record);
    for facet in [
        &criteria.people_type,
        &criteria.activity,
        &criteria.mood,
        &criteria.location,
    ]
    .into_iter()
    .flatten()
    {
        if whole_word_matches(&record_text, facet) {
            score += 5;
        }
    }
    if let Some(album_term) = &criteria.album_term {
        if whole_word_matches(&album_text_fields(record), album_term) {
            score += 5;
        }
    }

    score
}

fn passes_filters(record: &ImageRecord, criteria: &SearchCriteria) -> bool {
    let record_text = record_text_fields(record);

    if criteria.require_all_keywords
        && !criteria
            .keywords
            .iter()
            .all(|keyword| whole_word_matches(&record_text, keyword))
    {
        return false;
    }

    if criteria
        .negative_keywords
        .iter()
        .any(|negative| whole_word_matches(&record_text, negative))
    {
        return false;
    }

    true
}

pub struct SearchEngine<'a> {
    store: &'a Store,
}

impl<'a> SearchEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Candidate album keys the inverted index thinks might match; falls
    /// back to a full scan when no positive keyword narrows the search
    /// (e.g. a pure facet/negative-keyword query).
    fn candidate_albums(&self, criteria: &SearchCriteria) -> anyhow::Result<BTreeSet<String>> {
        if criteria.keywords.is_empty() {
            return Ok(self.store.all_album_keys()?.into_iter().collect());
        }
        let tokens: Vec<String> = criteria
            .keywords
            .iter()
            .flat_map(|k| tokenize(k))
            .chain(criteria.keywords.iter().map(|k| k.to_ascii_lowercase()))
            .collect();
        let mut candidates = self.store.search_by_index(&tokens);
        if candidates.is_empty() {
            candidates = self.store.all_album_keys()?.into_iter().collect();
        }
        Ok(candidates)
    }

    pub fn search(&self, criteria: &SearchCriteria) -> anyhow::Result<Vec<ScoredRecord>> {
        let candidate_albums = self.candidate_albums(criteria)?;
        let mut scored = Vec::new();

        for album_key in candidate_albums {
            for record in self.store.load_album(&album_key)? {
                if !passes_filters(&record, criteria) {
                    continue;
                }
                let score = score_record(&record, criteria);
                if score == 0 {
                    continue;
                }
                scored.push(ScoredRecord { record, score });
            }
        }

        scored.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.record.last_updated_at.cmp(&a.record.last_updated_at))
        });
        scored.truncate(criteria.max_results.max(1));
        Ok(scored)
    }

    /// Post-filters `ranked` with a visual verification pass, preserving
    /// rank order. Degrades gracefully on verifier error by returning the
    /// unverified ranking.
    pub fn verify_with_vision(
        &self,
        ranked: Vec<ScoredRecord>,
        query: &str,
        llm: &dyn LlmPort,
        model_id: &str,
        batch_size: usize,
        max_images: usize,
    ) -> Vec<ScoredRecord> {
        let to_verify: Vec<ScoredRecord> = ranked.iter().take(max_images).cloned().collect();
        let rest: Vec<ScoredRecord> = ranked.into_iter().skip(max_images).collect();

        let mut verified_indices = BTreeSet::new();
        let mut any_verified = false;
        for (batch_start, batch) in to_verify.chunks(batch_size.max(1)).enumerate() {
            let candidates: Vec<VerifyCandidate> = batch
                .iter()
                .enumerate()
                .map(|(i, scored)| VerifyCandidate {
                    index: batch_start * batch_size.max(1) + i,
                    image_url: scored.record.source_url.clone(),
                })
                .collect();
            match llm.verify_images(&candidates, query, model_id) {
                Ok(result) => {
                    any_verified = true;
                    verified_indices.extend(result.matched_indices);
                }
                Err(_) => {
                    // Degrade gracefully: treat this batch as unverifiable,
                    // keep its members in the unverified ranking.
                    return ranked_with_rest(to_verify, rest);
                }
            }
        }

        if !any_verified {
            return ranked_with_rest(to_verify, rest);
        }

        let verified: Vec<ScoredRecord> = to_verify
            .into_iter()
            .enumerate()
            .filter(|(i, _)| verified_indices.contains(i))
            .map(|(_, record)| record)
            .collect();
        ranked_with_rest(verified, rest)
    }
}

fn ranked_with_rest(mut head: Vec<ScoredRecord>, rest: Vec<ScoredRecord>) -> Vec<ScoredRecord> {
    head.extend(rest);
    head
}

/// Extracts negative keywords ("no X", "without X", "exclude X", "-X")
/// from free text and returns `(positive_keywords, negative_keywords)`.
pub fn parse_query(text: &str) -> (Vec<String>, Vec<String>) {
    let mut negatives = Vec::new();
    let mut positives = Vec::new();

    let words: Vec<&str> = text.split_whitespace().collect();
    let mut i = 0;
    while i < words.len() {
        let word = words[i];
        let lower = word.to_ascii_lowercase();
        if let Some(stripped) = word.strip_prefix('-') {
            if !stripped.is_empty() {
                negatives.push(stripped.trim_matches(|c: char| !c.is_alphanumeric()).to_string());
            }
            i += 1;
            continue;
        }
        if matches!(lower.as_str(), "no" | "without" | "exclude") {
            if let Some(next) = words.get(i + 1) {
                negatives.push(next.trim_matches(|c: char| !c.is_alphanumeric()).to_string());
                i += 2;
                continue;
            }
        }
        let cleaned = word.trim_matches(|c: char| !c.is_alphanumeric());
        if !cleaned.is_empty() && cleaned.len() > 2 {
            positives.push(cleaned.to_ascii_lowercase());
        }
        i += 1;
    }

    (positives, negatives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DuplicateHandling;
    use chrono::Utc;

    fn record(key: &str, album: &str, description: &str, keywords: &[&str]) -> ImageRecord {
        let now = Utc::now();
        ImageRecord {
            id: format!("id-{key}"),
            source_image_key: key.to_string(),
            filename: "f.jpg".to_string(),
            source_url: format!("https://host/{key}.jpg"),
            title: None,
            caption: None,
            album_key: album.to_string(),
            album_name: album.to_string(),
            album_path: format!("/{album}"),
            album_hierarchy: vec![album.to_string()],
            description: Some(description.to_string()),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            analysis: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    #[test]
    fn negative_keywords_exclude_matches() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        store
            .put_image(
                record("r1", "a", "kids celebrating outdoors", &["outdoors"]),
                DuplicateHandling::Skip,
            )
            .unwrap();
        store
            .put_image(
                record("r2", "a", "empty archery range", &["range"]),
                DuplicateHandling::Skip,
            )
            .unwrap();
        store
            .put_image(
                record("r3", "a", "crowd watching finals", &["range"]),
                DuplicateHandling::Skip,
            )
            .unwrap();

        let engine = SearchEngine::new(&store);
        let criteria = SearchCriteria {
            keywords: vec!["outdoors".to_string(), "range".to_string()],
            negative_keywords: vec!["people".to_string(), "crowd".to_string(), "kids".to_string()],
            max_results: 50,
            ..Default::default()
        };
        let results = engine.search(&criteria).unwrap();
        let keys: Vec<String> = results.iter().map(|r| r.record.source_image_key.clone()).collect();
        assert_eq!(keys, vec!["r2".to_string()]);
    }

    #[test]
    fn require_all_keywords_rejects_partial_matches() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        store
            .put_image(
                record("r1", "a", "a red car", &["red", "car"]),
                DuplicateHandling::Skip,
            )
            .unwrap();
        store
            .put_image(
                record("r2", "a", "a red bicycle", &["red", "bicycle"]),
                DuplicateHandling::Skip,
            )
            .unwrap();

        let engine = SearchEngine::new(&store);
        let criteria = SearchCriteria {
            keywords: vec!["red".to_string(), "car".to_string()],
            require_all_keywords: true,
            max_results: 50,
            ..Default::default()
        };
        let results = engine.search(&criteria).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.source_image_key, "r1");
    }

    #[test]
    fn parse_query_extracts_negations() {
        let (positives, negatives) = parse_query("sunset without people -crowd no kids");
        assert!(positives.contains(&"sunset".to_string()));
        assert!(negatives.contains(&"people".to_string()));
        assert!(negatives.contains(&"crowd".to_string()));
        assert!(negatives.contains(&"kids".to_string()));
    }
}
