//! Spotify Web API Artwork Provider
//!
//! ## API Endpoints
//!
//! - **Search**: `https://api.spotify.com/v1/search?q={query}&type=artist|album&limit={n}`
//! - **Token**: `https://accounts.spotify.com/api/token` (client-credentials grant)
//!
//! Every search carries a bearer token from [`ClientCredentialsManager`],
//! refreshed transparently before it expires. A 401 drops the cached token
//! and retries the search once.
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::providers::{ArtworkProvider, SpotifyProvider};
//!
//! let provider = SpotifyProvider::new(http_client, auth, queue);
//! let artwork = provider
//!     .find_artist_artwork(&["米津玄師".to_string(), "Kenshi Yonezu".to_string()])
//!     .await?;
//! ```

use crate::cascade::{album_strategies, artist_strategies, run_cascade, Candidate, SearchKind};
use crate::error::{MetadataError, Result};
use crate::providers::{check_status, parse_json, ArtworkMatch, ArtworkProvider, DEFAULT_REQUEST_TIMEOUT};
use crate::queue::RequestQueue;
use async_trait::async_trait;
use bridge_traits::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use core_auth::ClientCredentialsManager;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Name under which the provider's credentials are registered and images recorded
pub const SPOTIFY_PROVIDER: &str = "spotify";

/// Spotify Web API base URL
pub const SPOTIFY_API_BASE: &str = "https://api.spotify.com/v1";

const DEFAULT_SEARCH_LIMIT: u32 = 10;

pub struct SpotifyProvider {
    http_client: Arc<dyn HttpClient>,
    auth: Arc<ClientCredentialsManager>,
    queue: Arc<RequestQueue>,
    base_url: String,
    search_limit: u32,
    user_agent: Option<String>,
    request_timeout: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    artists: Option<Page>,
    #[serde(default)]
    albums: Option<Page>,
}

#[derive(Debug, Default, Deserialize)]
struct Page {
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    name: String,
    #[serde(default)]
    images: Vec<Image>,
}

#[derive(Debug, Deserialize)]
struct Image {
    url: String,
}

impl SearchResponse {
    fn into_candidates(self, kind: SearchKind) -> Vec<Candidate> {
        let page = match kind {
            SearchKind::Artist => self.artists,
            SearchKind::Album => self.albums,
        };
        page.map(|p| p.items)
            .unwrap_or_default()
            .into_iter()
            .map(|item| {
                let image_url = item.images.into_iter().next().map(|img| img.url);
                Candidate::new(item.name, image_url)
            })
            .collect()
    }
}

impl SpotifyProvider {
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        auth: Arc<ClientCredentialsManager>,
        queue: Arc<RequestQueue>,
    ) -> Self {
        Self {
            http_client,
            auth,
            queue,
            base_url: SPOTIFY_API_BASE.to_string(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            user_agent: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Point the provider at another API root (used by tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_search_limit(mut self, limit: u32) -> Self {
        self.search_limit = limit.clamp(1, 50);
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

    pub fn queue(&self) -> &Arc<RequestQueue> {
        &self.queue
    }

    fn search_url(&self, kind: SearchKind, query: &str) -> String {
        format!(
            "{}/search?q={}&type={}&limit={}",
            self.base_url,
            urlencoding::encode(query),
            kind.as_str(),
            self.search_limit
        )
    }

    async fn send(&self, url: &str) -> Result<HttpResponse> {
        let token = self.auth.access_token(SPOTIFY_PROVIDER).await?;

        let mut request = HttpRequest::new(HttpMethod::Get, url)
            .bearer_token(token)
            .header("Accept", "application/json")
            .timeout(self.request_timeout);
        if let Some(user_agent) = &self.user_agent {
            request = request.header("User-Agent", user_agent.as_str());
        }

        self.queue
            .submit(self.http_client.execute(request))
            .await?
            .map_err(|e| MetadataError::Network(format!("Spotify search failed: {}", e)))
    }

    #[instrument(skip(self), fields(kind = kind.as_str()))]
    async fn search(&self, kind: SearchKind, query: String) -> Result<Vec<Candidate>> {
        let url = self.search_url(kind, &query);
        debug!("Searching Spotify");

        let mut response = self.send(&url).await?;
        if response.status == 401 {
            warn!("Spotify rejected the access token, refreshing");
            self.auth.invalidate(SPOTIFY_PROVIDER).await;
            response = self.send(&url).await?;
        }

        check_status(SPOTIFY_PROVIDER, &response)?;
        let body: SearchResponse = parse_json(SPOTIFY_PROVIDER, &response)?;
        Ok(body.into_candidates(kind))
    }
}

#[async_trait]
impl ArtworkProvider for SpotifyProvider {
    fn name(&self) -> &'static str {
        SPOTIFY_PROVIDER
    }

    #[instrument(skip(self))]
    async fn find_artist_artwork(&self, aliases: &[String]) -> Result<Option<ArtworkMatch>> {
        let strategies = artist_strategies(aliases);
        let hit = run_cascade(&strategies, |kind, query| self.search(kind, query)).await?;
        Ok(hit.map(|hit| ArtworkMatch::from_hit(SPOTIFY_PROVIDER, hit)))
    }

    #[instrument(skip(self))]
    async fn find_album_artwork(
        &self,
        artist_aliases: &[String],
        album: &str,
    ) -> Result<Option<ArtworkMatch>> {
        let strategies = album_strategies(artist_aliases, album);
        let hit = run_cascade(&strategies, |kind, query| self.search(kind, query)).await?;
        Ok(hit.map(|hit| ArtworkMatch::from_hit(SPOTIFY_PROVIDER, hit)))
    }

    async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}
