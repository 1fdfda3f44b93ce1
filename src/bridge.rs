//! LLM tool-calling loop over the search engine: a fixed tool-schema
//! registry, an ask loop that executes returned tool calls, and result
//! pagination.
//!
//! The tool schemas are declarative data owned here (per spec §9's
//! "untyped tool schema" redesign note), not JSON assembled ad hoc per
//! provider — each `LlmPort` implementer renders them into its own
//! wire format.

use crate::model::ImageRecord;
use crate::ports::{LlmPort, ToolLoopRequest, ToolResultTurn, ToolSchema, ToolTurnBlock};
use crate::search::{ScoredRecord, SearchCriteria, SearchEngine};
use crate::store::Store;
use anyhow::Result;
use serde_json::Value;

const SYSTEM_INSTRUCTION: &str = "You are a photo search assistant. You must use the provided \
tools to search the image collection before answering; never claim results without calling a \
tool. Recognize negative phrasing (\"no\", \"without\", \"exclude\") as negative keywords. When \
a request is ambiguous, ask a clarifying follow-up instead of guessing.";

const DEFAULT_PAGE_SIZE: usize = 10;

pub fn tool_schemas() -> Vec<ToolSchema> {
    let search_params = serde_json::json!({
        "type": "object",
        "properties": {
            "keywords": {"type": "array", "items": {"type": "string"}},
            "negativeKeywords": {"type": "array", "items": {"type": "string"}},
            "peopleType": {"type": "string"},
            "activity": {"type": "string"},
            "mood": {"type": "string"},
            "location": {"type": "string"},
            "albumTerm": {"type": "string"},
            "requireAllKeywords": {"type": "boolean"},
            "maxResults": {"type": "integer"},
        }
    });

    vec![
        ToolSchema {
            name: "searchImages".to_string(),
            description: "Search the image collection by any combination of keywords and facets."
                .to_string(),
            parameters: search_params.clone(),
        },
        ToolSchema {
            name: "searchByKeywords".to_string(),
            description: "Search images matching a list of keywords.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"keywords": {"type": "array", "items": {"type": "string"}}}
            }),
        },
        ToolSchema {
            name: "searchByPeople".to_string(),
            description: "Search images by the type of people depicted.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"peopleType": {"type": "string"}}
            }),
        },
        ToolSchema {
            name: "searchByActivity".to_string(),
            description: "Search images by the activity taking place.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"activity": {"type": "string"}}
            }),
        },
        ToolSchema {
            name: "searchByMood".to_string(),
            description: "Search images by mood or emotional tone.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"mood": {"type": "string"}}
            }),
        },
        ToolSchema {
            name: "searchByLocation".to_string(),
            description: "Search images by location.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"location": {"type": "string"}}
            }),
        },
        ToolSchema {
            name: "searchByAlbum".to_string(),
            description: "Search images within a named album.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"albumTerm": {"type": "string"}}
            }),
        },
        ToolSchema {
            name: "filterByCount".to_string(),
            description: "Limit the number of results returned.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"maxResults": {"type": "integer"}}
            }),
        },
        ToolSchema {
            name: "getAllImages".to_string(),
            description: "Return all images, optionally capped by maxResults.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"maxResults": {"type": "integer"}}
            }),
        },
    ]
}

fn string_array(args: &Value, field: &str) -> Vec<String> {
    args.get(field)
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn string_field(args: &Value, field: &str) -> Option<String> {
    args.get(field).and_then(Value::as_str).map(str::to_string)
}

/// Builds a `SearchCriteria` from a tool call's JSON arguments, delegating
/// every per-facet wrapper to the same unified criteria shape (spec
/// §4.9's Open Question #1 decision).
fn criteria_from_tool_call(_tool_name: &str, args: &Value) -> SearchCriteria {
    let mut criteria = SearchCriteria::new();
    criteria.keywords = string_array(args, "keywords");
    criteria.negative_keywords = string_array(args, "negativeKeywords");
    criteria.people_type = string_field(args, "peopleType");
    criteria.activity = string_field(args, "activity");
    criteria.mood = string_field(args, "mood");
    criteria.location = string_field(args, "location");
    criteria.album_term = string_field(args, "albumTerm");
    criteria.require_all_keywords = args
        .get("requireAllKeywords")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if let Some(max_results) = args.get("maxResults").and_then(Value::as_u64) {
        criteria.max_results = max_results as usize;
    }

    criteria
}

#[derive(Debug, Clone)]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total_results: usize,
    pub total_pages: usize,
}

#[derive(Debug, Clone)]
pub struct BridgeResponse {
    pub final_text: String,
    pub results: Vec<ImageRecord>,
    pub pagination: Pagination,
    pub original_query: String,
}

pub struct ConversationalBridge<'a> {
    store: &'a Store,
    llm: &'a dyn LlmPort,
}

impl<'a> ConversationalBridge<'a> {
    pub fn new(store: &'a Store, llm: &'a dyn LlmPort) -> Self {
        Self { store, llm }
    }

    fn execute_tool_call(&self, name: &str, args: &Value) -> Result<Vec<ScoredRecord>> {
        let criteria = criteria_from_tool_call(name, args);
        let engine = SearchEngine::new(self.store);
        engine.search(&criteria)
    }

    /// Runs the full ask loop: tool-call turn, execute every tool call
    /// against the search engine, optional follow-up turn for a final
    /// message, then paginate the merged results.
    pub fn ask(
        &self,
        user_text: &str,
        model_id: &str,
        page: usize,
        page_size: Option<usize>,
    ) -> Result<BridgeResponse> {
        let request = ToolLoopRequest {
            user_text: user_text.to_string(),
            system_instruction: SYSTEM_INSTRUCTION.to_string(),
            tool_schemas: tool_schemas(),
            model_id: model_id.to_string(),
        };

        let blocks = self.llm.run_tool_loop(&request)?;

        let mut final_text = String::new();
        let mut merged_results: Vec<ScoredRecord> = Vec::new();
        let mut result_turns = Vec::new();

        for block in &blocks {
            match block {
                ToolTurnBlock::Text(text) => {
                    final_text.push_str(text);
                }
                ToolTurnBlock::ToolCall { name, args } => {
                    let scored = self.execute_tool_call(name, args)?;
                    let result_json = serde_json::json!(scored
                        .iter()
                        .map(|s| s.record.source_image_key.clone())
                        .collect::<Vec<_>>());
                    result_turns.push(ToolResultTurn {
                        tool_name: name.clone(),
                        result: result_json,
                    });
                    merged_results.extend(scored);
                }
            }
        }

        if final_text.is_empty() && !result_turns.is_empty() {
            final_text = self.llm.continue_with_tool_results(&request, &result_turns)?;
        }

        merged_results.sort_by(|a, b| b.score.cmp(&a.score));
        merged_results.dedup_by(|a, b| a.record.source_image_key == b.record.source_image_key);

        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let total_results = merged_results.len();
        let total_pages = total_results.div_ceil(page_size).max(1);
        let page = page.max(1);
        let start = (page - 1) * page_size;
        let results: Vec<ImageRecord> = merged_results
            .into_iter()
            .skip(start)
            .take(page_size)
            .map(|s| s.record)
            .collect();

        Ok(BridgeResponse {
            final_text,
            results,
            pagination: Pagination {
                page,
                page_size,
                total_results,
                total_pages,
            },
            original_query: user_text.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnalysisMeta, DuplicateHandling};
    use crate::ports::mock::MockLlm;
    use chrono::Utc;

    fn record(key: &str, description: &str, keywords: &[&str]) -> ImageRecord {
        let now = Utc::now();
        ImageRecord {
            id: format!("id-{key}"),
            source_image_key: key.to_string(),
            filename: format!("{key}.jpg"),
            source_url: format!("https://host/{key}.jpg"),
            title: None,
            caption: None,
            album_key: "album-1".to_string(),
            album_name: "Album".to_string(),
            album_path: "/Album".to_string(),
            album_hierarchy: vec!["Album".to_string()],
            description: Some(description.to_string()),
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
    fn ask_executes_tool_call_and_paginates() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        store
            .put_image(
                record("k1", "sunset over water", &["sunset"]),
                DuplicateHandling::Skip,
            )
            .unwrap();

        let llm = MockLlm::default();
        let bridge = ConversationalBridge::new(&store, &llm);
        let response = bridge.ask("sunset", "model", 1, None).unwrap();

        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].source_image_key, "k1");
        assert!(!response.final_text.is_empty());
        assert_eq!(response.pagination.total_results, 1);
    }

    #[test]
    fn ask_paginates_results_across_pages() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        for i in 0..15 {
            store
                .put_image(
                    record(&format!("k{i}"), "sunset over water", &["sunset"]),
                    DuplicateHandling::Skip,
                )
                .unwrap();
        }

        let llm = MockLlm::default();
        let bridge = ConversationalBridge::new(&store, &llm);
        let page1 = bridge.ask("sunset", "model", 1, Some(10)).unwrap();
        let page2 = bridge.ask("sunset", "model", 2, Some(10)).unwrap();

        assert_eq!(page1.results.len(), 10);
        assert_eq!(page2.results.len(), 5);
        assert_eq!(page1.pagination.total_pages, 2);
    }
}
