//! Production `PhotoHostPort` implementer: a thin REST client. No direct
//! teacher analog (the photo host is this system's own external
//! collaborator) — shaped after the trait-based port style the teacher
//! uses for `LlmProvider`.

use super::{AlbumDetails, AppError, PhotoHostImage, PhotoHostPort};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

pub struct RestPhotoHost {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl RestPhotoHost {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key,
            timeout,
        }
    }

    fn authed_get(&self, url: &str) -> Result<ureq::Response, AppError> {
        let mut request = ureq::get(url).timeout(self.timeout);
        if let Some(key) = &self.api_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }
        request.call().map_err(|err| match err {
            ureq::Error::Status(503, _) => AppError::Upstream503(err.to_string()),
            ureq::Error::Status(code, _) if (400..500).contains(&code) => {
                AppError::UpstreamPayloadRejected(err.to_string())
            }
            other => AppError::Upstream503(other.to_string()),
        })
    }
}

#[derive(Deserialize)]
struct AlbumImagesResponse {
    images: Vec<RemoteImage>,
}

#[derive(Deserialize)]
struct RemoteImage {
    id: String,
    filename: String,
    url: String,
}

#[derive(Deserialize)]
struct AlbumDetailsResponse {
    name: String,
    path: String,
    hierarchy: Vec<String>,
}

impl PhotoHostPort for RestPhotoHost {
    fn fetch_image(&self, url: &str) -> Result<Vec<u8>, AppError> {
        let response = self.authed_get(url)?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut bytes)
            .map_err(|err| AppError::Upstream503(err.to_string()))?;
        Ok(bytes)
    }

    fn list_album_images(&self, album_id: &str) -> Result<Vec<PhotoHostImage>, AppError> {
        let url = format!(
            "{}/albums/{album_id}/images",
            self.endpoint.trim_end_matches('/')
        );
        let response = self.authed_get(&url)?;
        let parsed: AlbumImagesResponse = response
            .into_json()
            .map_err(|err| AppError::Parse(err.to_string()))?;
        Ok(parsed
            .images
            .into_iter()
            .map(|img| PhotoHostImage {
                source_image_key: img.id,
                filename: img.filename,
                fetch_url: img.url,
            })
            .collect())
    }

    fn get_album_details(&self, album_id: &str) -> Result<AlbumDetails, AppError> {
        let url = format!(
            "{}/albums/{album_id}",
            self.endpoint.trim_end_matches('/')
        );
        let response = self.authed_get(&url)?;
        let parsed: AlbumDetailsResponse = response
            .into_json()
            .map_err(|err| AppError::Parse(err.to_string()))?;
        Ok(AlbumDetails {
            name: parsed.name,
            path: parsed.path,
            hierarchy: parsed.hierarchy,
        })
    }
}
