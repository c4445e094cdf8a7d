//! Deezer Public API Artwork Provider
//!
//! ## API Endpoints
//!
//! - **Artist search**: `https://api.deezer.com/search/artist?q={query}&limit={n}`
//! - **Album search**: `https://api.deezer.com/search/album?q={query}&limit={n}`
//!
//! No authentication. Deezer reports quota exhaustion as HTTP 200 with an
//! error object (code 4), which is mapped to `RateLimited`.

use crate::cascade::{album_strategies, artist_strategies, run_cascade, Candidate, SearchKind};
use crate::error::{MetadataError, Result};
use crate::providers::{check_status, parse_json, ArtworkMatch, ArtworkProvider, DEFAULT_REQUEST_TIMEOUT};
use crate::queue::RequestQueue;
use async_trait::async_trait;
use bridge_traits::{HttpClient, HttpMethod, HttpRequest};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

pub const DEEZER_PROVIDER: &str = "deezer";

/// Deezer API base URL
pub const DEEZER_API_BASE: &str = "https://api.deezer.com";

const DEFAULT_SEARCH_LIMIT: u32 = 10;

/// Deezer error code for "Quota limit exceeded"
const QUOTA_EXCEEDED_CODE: i64 = 4;

pub struct DeezerProvider {
    http_client: Arc<dyn HttpClient>,
    queue: Arc<RequestQueue>,
    base_url: String,
    search_limit: u32,
    user_agent: Option<String>,
    request_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<Item>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Item {
    /// Artists carry `name`, albums carry `title`
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    picture_xl: Option<String>,
    #[serde(default)]
    cover_xl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

impl SearchResponse {
    fn into_candidates(self, kind: SearchKind) -> Vec<Candidate> {
        self.data
            .into_iter()
            .filter_map(|item| {
                let (name, image_url) = match kind {
                    SearchKind::Artist => (item.name, item.picture_xl),
                    SearchKind::Album => (item.title, item.cover_xl),
                };
                name.map(|name| Candidate::new(name, image_url))
            })
            .collect()
    }
}

impl DeezerProvider {
    pub fn new(http_client: Arc<dyn HttpClient>, queue: Arc<RequestQueue>) -> Self {
        Self {
            http_client,
            queue,
            base_url: DEEZER_API_BASE.to_string(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            user_agent: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_search_limit(mut self, limit: u32) -> Self {
        self.search_limit = limit.max(1);
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[instrument(skip(self), fields(kind = kind.as_str()))]
    async fn search(&self, kind: SearchKind, query: String) -> Result<Vec<Candidate>> {
        let url = format!(
            "{}/search/{}?q={}&limit={}",
            self.base_url,
            kind.as_str(),
            urlencoding::encode(&query),
            self.search_limit
        );
        debug!("Searching Deezer");

        let mut request = HttpRequest::new(HttpMethod::Get, url)
            .header("Accept", "application/json")
            .timeout(self.request_timeout);
        if let Some(user_agent) = &self.user_agent {
            request = request.header("User-Agent", user_agent.as_str());
        }

        let response = self
            .queue
            .submit(self.http_client.execute(request))
            .await?
            .map_err(|e| MetadataError::Network(format!("Deezer search failed: {}", e)))?;

        check_status(DEEZER_PROVIDER, &response)?;
        let body: SearchResponse = parse_json(DEEZER_PROVIDER, &response)?;

        if let Some(error) = body.error {
            if error.code == QUOTA_EXCEEDED_CODE {
                return Err(MetadataError::RateLimited {
                    provider: DEEZER_PROVIDER.to_string(),
                    retry_after_seconds: 5,
                });
            }
            return Err(MetadataError::HttpError {
                status: response.status,
                body: error.message,
            });
        }

        Ok(body.into_candidates(kind))
    }
}

#[async_trait]
impl ArtworkProvider for DeezerProvider {
    fn name(&self) -> &'static str {
        DEEZER_PROVIDER
    }

    #[instrument(skip(self))]
    async fn find_artist_artwork(&self, aliases: &[String]) -> Result<Option<ArtworkMatch>> {
        let strategies = artist_strategies(aliases);
        let hit = run_cascade(&strategies, |kind, query| self.search(kind, query)).await?;
        Ok(hit.map(|hit| ArtworkMatch::from_hit(DEEZER_PROVIDER, hit)))
    }

    #[instrument(skip(self))]
    async fn find_album_artwork(
        &self,
        artist_aliases: &[String],
        album: &str,
    ) -> Result<Option<ArtworkMatch>> {
        let strategies = album_strategies(artist_aliases, album);
        let hit = run_cascade(&strategies, |kind, query| self.search(kind, query)).await?;
        Ok(hit.map(|hit| ArtworkMatch::from_hit(DEEZER_PROVIDER, hit)))
    }

    async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artist_and_album_fields() {
        let artists: SearchResponse = serde_json::from_str(
            r#"{"data":[{"id":246791,"name":"Drake","picture_xl":"https://e-cdns-images.dzcdn.net/drake.jpg"}],"total":1}"#,
        )
        .unwrap();
        let candidates = artists.into_candidates(SearchKind::Artist);
        assert_eq!(candidates[0].name, "Drake");
        assert!(candidates[0].has_image());

        let albums: SearchResponse = serde_json::from_str(
            r#"{"data":[{"id":1,"title":"Views","cover_xl":"https://e-cdns-images.dzcdn.net/views.jpg"}]}"#,
        )
        .unwrap();
        let candidates = albums.into_candidates(SearchKind::Album);
        assert_eq!(candidates[0].name, "Views");
        assert_eq!(
            candidates[0].image_url.as_deref(),
            Some("https://e-cdns-images.dzcdn.net/views.jpg")
        );
    }

    #[test]
    fn test_error_object_is_parsed() {
        let body: SearchResponse = serde_json::from_str(
            r#"{"error":{"type":"Exception","message":"Quota limit exceeded","code":4}}"#,
        )
        .unwrap();
        assert!(body.data.is_empty());
        assert_eq!(body.error.map(|e| e.code), Some(QUOTA_EXCEEDED_CODE));
    }
}
