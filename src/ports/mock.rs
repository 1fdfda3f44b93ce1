//! Deterministic in-memory port implementers backing the test suite and
//! the spec's end-to-end scenarios. These are real `LlmPort`/
//! `PhotoHostPort` implementers, not test-only stand-ins bolted on the
//! side — production code exercises the exact same trait methods.

use super::{
    AlbumDetails, AppError, LlmPort, PhotoHostImage, PhotoHostPort, RawAnalysis, ToolLoopRequest,
    ToolResultTurn, ToolTurnBlock, VerifyCandidate, VerifyResult,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// Returns a fixed `{description, keywords}` JSON payload for every image,
/// or a configured failure, for every `source_image_key` passed via the
/// image bytes (tests encode the key directly as the "bytes").
pub struct MockLlm {
    pub description: String,
    pub keywords: Vec<String>,
    pub fail_keys: Mutex<BTreeSet<String>>,
    pub calls: Mutex<Vec<String>>,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self {
            description: "a scenic photograph".to_string(),
            keywords: vec!["scenic".to_string(), "photo".to_string()],
            fail_keys: Mutex::new(BTreeSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl MockLlm {
    pub fn fail_for(&self, key: impl Into<String>) {
        self.fail_keys.lock().unwrap().insert(key.into());
    }
}

impl LlmPort for MockLlm {
    fn provider_name(&self) -> &'static str {
        "mock"
    }

    fn analyze_image(
        &self,
        image_bytes: &[u8],
        _mime_type: &str,
        _prompt: &str,
        model_id: &str,
    ) -> Result<RawAnalysis, AppError> {
        let key = String::from_utf8_lossy(image_bytes).to_string();
        self.calls.lock().unwrap().push(key.clone());
        if self.fail_keys.lock().unwrap().contains(&key) {
            return Err(AppError::Upstream503(format!("mock failure for {key}")));
        }
        let content = serde_json::json!({
            "description": self.description,
            "keywords": self.keywords,
        })
        .to_string();
        Ok(RawAnalysis {
            content,
            model_id: model_id.to_string(),
        })
    }

    fn run_tool_loop(&self, request: &ToolLoopRequest) -> Result<Vec<ToolTurnBlock>, AppError> {
        let first_tool = request
            .tool_schemas
            .first()
            .map(|schema| schema.name.clone())
            .unwrap_or_else(|| "searchImages".to_string());
        Ok(vec![ToolTurnBlock::ToolCall {
            name: first_tool,
            args: serde_json::json!({ "keywords": [request.user_text] }),
        }])
    }

    fn continue_with_tool_results(
        &self,
        _request: &ToolLoopRequest,
        results: &[ToolResultTurn],
    ) -> Result<String, AppError> {
        Ok(format!("Found {} matching result set(s).", results.len()))
    }

    fn verify_images(
        &self,
        candidates: &[VerifyCandidate],
        _query: &str,
        _model_id: &str,
    ) -> Result<VerifyResult, AppError> {
        Ok(VerifyResult {
            matched_indices: candidates.iter().map(|c| c.index).collect(),
            raw: "mock: all verified".to_string(),
        })
    }
}

/// In-memory photo host keyed by album id.
#[derive(Default)]
pub struct MockPhotoHost {
    albums: Mutex<HashMap<String, (AlbumDetails, Vec<PhotoHostImage>)>>,
    bytes: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockPhotoHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_album(&self, album_id: &str, details: AlbumDetails, images: Vec<PhotoHostImage>) {
        for image in &images {
            self.bytes
                .lock()
                .unwrap()
                .insert(image.fetch_url.clone(), image.source_image_key.clone().into_bytes());
        }
        self.albums
            .lock()
            .unwrap()
            .insert(album_id.to_string(), (details, images));
    }
}

impl PhotoHostPort for MockPhotoHost {
    fn fetch_image(&self, url: &str) -> Result<Vec<u8>, AppError> {
        self.bytes
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| AppError::InputInvalid(format!("no mock bytes registered for {url}")))
    }

    fn list_album_images(&self, album_id: &str) -> Result<Vec<PhotoHostImage>, AppError> {
        self.albums
            .lock()
            .unwrap()
            .get(album_id)
            .map(|(_, images)| images.clone())
            .ok_or_else(|| AppError::InputInvalid(format!("unknown album {album_id}")))
    }

    fn get_album_details(&self, album_id: &str) -> Result<AlbumDetails, AppError> {
        self.albums
            .lock()
            .unwrap()
            .get(album_id)
            .map(|(details, _)| details.clone())
            .ok_or_else(|| AppError::InputInvalid(format!("unknown album {album_id}")))
    }
}
