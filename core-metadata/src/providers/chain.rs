//! Ordered provider fallback.

use crate::error::Result;
use crate::providers::{ArtworkMatch, ArtworkProvider};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tries each provider in order until one finds artwork.
///
/// Provider errors are logged and the next provider is tried. The chain only
/// returns an error when a provider's request queue has been shut down.
#[derive(Clone, Default)]
pub struct ArtworkProviderChain {
    providers: Vec<Arc<dyn ArtworkProvider>>,
}

impl ArtworkProviderChain {
    pub fn new(providers: Vec<Arc<dyn ArtworkProvider>>) -> Self {
        Self { providers }
    }

    pub fn push(&mut self, provider: Arc<dyn ArtworkProvider>) {
        self.providers.push(provider);
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}

#[async_trait]
impl ArtworkProvider for ArtworkProviderChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn find_artist_artwork(&self, aliases: &[String]) -> Result<Option<ArtworkMatch>> {
        for provider in &self.providers {
            match provider.find_artist_artwork(aliases).await {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => debug!(provider = provider.name(), "No artist artwork"),
                Err(e) if e.is_shutdown() => return Err(e),
                Err(e) => warn!(provider = provider.name(), error = %e, "Artist artwork lookup failed"),
            }
        }
        Ok(None)
    }

    async fn find_album_artwork(
        &self,
        artist_aliases: &[String],
        album: &str,
    ) -> Result<Option<ArtworkMatch>> {
        for provider in &self.providers {
            match provider.find_album_artwork(artist_aliases, album).await {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => debug!(provider = provider.name(), "No album artwork"),
                Err(e) if e.is_shutdown() => return Err(e),
                Err(e) => warn!(provider = provider.name(), error = %e, "Album artwork lookup failed"),
            }
        }
        Ok(None)
    }

    async fn shutdown(&self) {
        for provider in &self.providers {
            provider.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetadataError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedProvider {
        name: &'static str,
        result: fn() -> Result<Option<ArtworkMatch>>,
        calls: AtomicUsize,
    }

    impl FixedProvider {
        fn new(name: &'static str, result: fn() -> Result<Option<ArtworkMatch>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ArtworkProvider for FixedProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn find_artist_artwork(&self, _aliases: &[String]) -> Result<Option<ArtworkMatch>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }

        async fn find_album_artwork(&self, _a: &[String], _album: &str) -> Result<Option<ArtworkMatch>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    fn found() -> Result<Option<ArtworkMatch>> {
        Ok(Some(ArtworkMatch {
            provider: "deezer".into(),
            url: "https://cdn/x.jpg".into(),
            matched_name: "Drake".into(),
            query: "artist:\"Drake\"".into(),
        }))
    }

    fn failing() -> Result<Option<ArtworkMatch>> {
        Err(MetadataError::HttpError {
            status: 500,
            body: "down".into(),
        })
    }

    fn missing() -> Result<Option<ArtworkMatch>> {
        Ok(None)
    }

    #[tokio::test]
    async fn test_error_falls_through_to_next_provider() {
        let broken = FixedProvider::new("spotify", failing);
        let backup = FixedProvider::new("deezer", found);
        let chain = ArtworkProviderChain::new(vec![
            broken.clone() as Arc<dyn ArtworkProvider>,
            backup.clone() as Arc<dyn ArtworkProvider>,
        ]);

        let result = chain
            .find_artist_artwork(&["Drake".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.provider, "deezer");
        assert_eq!(broken.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_hit_wins() {
        let first = FixedProvider::new("spotify", found);
        let second = FixedProvider::new("deezer", found);
        let chain = ArtworkProviderChain::new(vec![
            first as Arc<dyn ArtworkProvider>,
            second.clone() as Arc<dyn ArtworkProvider>,
        ]);

        assert!(chain.find_album_artwork(&[], "Views").await.unwrap().is_some());
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_all_miss_is_none() {
        let chain = ArtworkProviderChain::new(vec![
            FixedProvider::new("spotify", missing) as Arc<dyn ArtworkProvider>,
            FixedProvider::new("deezer", failing) as Arc<dyn ArtworkProvider>,
        ]);
        assert!(chain
            .find_artist_artwork(&["Nobody".to_string()])
            .await
            .unwrap()
            .is_none());
        assert!(ArtworkProviderChain::default()
            .find_artist_artwork(&[])
            .await
            .unwrap()
            .is_none());
    }
}
