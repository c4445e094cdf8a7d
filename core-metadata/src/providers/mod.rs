//! External Artwork Providers
//!
//! This module contains clients for external catalog services:
//! - Spotify - Web API search, client-credentials authenticated
//! - Deezer - public search API, no authentication
//!
//! Every provider routes its HTTP calls through a [`RequestQueue`] and runs
//! the shared search cascade from [`crate::cascade`]. A miss is `Ok(None)`,
//! since artwork is optional.
//!
//! [`RequestQueue`]: crate::queue::RequestQueue

pub mod chain;
pub mod deezer;
pub mod spotify;

pub use chain::ArtworkProviderChain;
pub use deezer::DeezerProvider;
pub use spotify::SpotifyProvider;

use crate::cascade::CascadeHit;
use crate::error::{MetadataError, Result};
use async_trait::async_trait;
use bridge_traits::HttpResponse;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default timeout for provider API requests
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Artwork URL found by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtworkMatch {
    /// Provider that produced the match ("spotify", "deezer")
    pub provider: String,
    pub url: String,
    /// Name of the matched provider entity
    pub matched_name: String,
    /// Query that produced the match
    pub query: String,
}

impl ArtworkMatch {
    pub(crate) fn from_hit(provider: &str, hit: CascadeHit) -> Self {
        Self {
            provider: provider.to_string(),
            url: hit.image_url,
            matched_name: hit.name,
            query: hit.query,
        }
    }
}

/// Source of artist and album artwork.
#[async_trait]
pub trait ArtworkProvider: Send + Sync {
    /// Stable provider name, stored as the image source
    fn name(&self) -> &'static str;

    /// Artwork for the artist known by any of `aliases`
    async fn find_artist_artwork(&self, aliases: &[String]) -> Result<Option<ArtworkMatch>>;

    /// Cover art for `album` by any of `artist_aliases`
    async fn find_album_artwork(
        &self,
        artist_aliases: &[String],
        album: &str,
    ) -> Result<Option<ArtworkMatch>>;

    /// Stop issuing requests and wait for in-flight ones.
    async fn shutdown(&self) {}
}

/// Map non-success responses onto provider errors.
pub(crate) fn check_status(provider: &str, response: &HttpResponse) -> Result<()> {
    if response.is_success() {
        return Ok(());
    }

    if response.status == 429 {
        let retry_after_seconds = response
            .headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("retry-after"))
            .and_then(|(_, value)| value.trim().parse::<u64>().ok())
            .unwrap_or(60);
        return Err(MetadataError::RateLimited {
            provider: provider.to_string(),
            retry_after_seconds,
        });
    }

    Err(MetadataError::HttpError {
        status: response.status,
        body: String::from_utf8_lossy(&response.body).to_string(),
    })
}

pub(crate) fn parse_json<T: DeserializeOwned>(provider: &str, response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(|e| {
        MetadataError::JsonParse(format!("{} search response: {}", provider, e))
    })
}
