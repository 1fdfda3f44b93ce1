//! In-memory inverted indices over album contents: `keyword -> albums` and
//! `descriptionToken -> albums`. Both are derived data — albums are the
//! source of truth — and are rebuilt per-album on every save.

use crate::model::ImageRecord;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "are", "was", "were", "has", "have", "had",
    "from", "but", "not", "you", "your",
];

pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_ascii_lowercase())
        .filter(|w| w.len() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvertedIndex {
    pub keywords: HashMap<String, BTreeSet<String>>,
    pub descriptions: HashMap<String, BTreeSet<String>>,
}

impl InvertedIndex {
    /// Removes every mapping this `album_key` contributed, dropping any
    /// token whose set becomes empty as a result.
    pub fn remove_album(&mut self, album_key: &str) {
        Self::remove_album_from(&mut self.keywords, album_key);
        Self::remove_album_from(&mut self.descriptions, album_key);
    }

    fn remove_album_from(map: &mut HashMap<String, BTreeSet<String>>, album_key: &str) {
        map.retain(|_, albums| {
            albums.remove(album_key);
            !albums.is_empty()
        });
    }

    /// Recomputes this album's contribution to both indices from its
    /// current record set. Callers must call `remove_album` first if the
    /// album already has entries (Store::save_album does both under one
    /// write lock so readers never see a torn index).
    pub fn add_album(&mut self, album_key: &str, records: &[ImageRecord]) {
        for record in records {
            for keyword in &record.keywords {
                self.keywords
                    .entry(keyword.to_ascii_lowercase())
                    .or_default()
                    .insert(album_key.to_string());
            }
            if let Some(description) = &record.description {
                for token in tokenize(description) {
                    self.descriptions
                        .entry(token)
                        .or_default()
                        .insert(album_key.to_string());
                }
            }
        }
    }

    pub fn albums_for_keyword(&self, keyword: &str) -> BTreeSet<String> {
        self.keywords
            .get(&keyword.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn albums_for_token(&self, token: &str) -> BTreeSet<String> {
        self.descriptions
            .get(&token.to_ascii_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Union of album candidates across every query token, searching both
    /// the keyword and description-token indices.
    pub fn candidate_albums(&self, query_tokens: &[String]) -> BTreeSet<String> {
        let mut candidates = BTreeSet::new();
        for token in query_tokens {
            candidates.extend(self.albums_for_keyword(token));
            candidates.extend(self.albums_for_token(token));
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(keywords: &[&str], description: &str) -> ImageRecord {
        let now = Utc::now();
        ImageRecord {
            id: "id".to_string(),
            source_image_key: "k".to_string(),
            filename: "f.jpg".to_string(),
            source_url: "u".to_string(),
            title: None,
            caption: None,
            album_key: "a".to_string(),
            album_name: "A".to_string(),
            album_path: "/A".to_string(),
            album_hierarchy: vec!["A".to_string()],
            description: Some(description.to_string()),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            analysis: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    #[test]
    fn add_then_remove_drops_empty_tokens() {
        let mut index = InvertedIndex::default();
        index.add_album("album-1", &[record(&["sunset"], "a golden sunset over water")]);
        assert!(index.albums_for_keyword("sunset").contains("album-1"));
        assert!(index.albums_for_token("golden").contains("album-1"));

        index.remove_album("album-1");
        assert!(index.albums_for_keyword("sunset").is_empty());
        assert!(index.albums_for_token("golden").is_empty());
    }

    #[test]
    fn candidate_albums_unions_keyword_and_description_hits() {
        let mut index = InvertedIndex::default();
        index.add_album("album-1", &[record(&["beach"], "children playing")]);
        index.add_album("album-2", &[record(&["mountain"], "beach ball on the sand")]);

        let candidates = index.candidate_albums(&["beach".to_string()]);
        assert!(candidates.contains("album-1"));
        assert!(candidates.contains("album-2"));
    }

    #[test]
    fn stop_words_and_short_tokens_are_ignored() {
        let tokens = tokenize("the cat and a big red dog");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"and".to_string()));
        assert!(!tokens.iter().any(|t| t.len() <= 2));
        assert!(tokens.contains(&"big".to_string()));
    }
}
