//! # Artwork Enrichment
//!
//! Best-effort background fetch of artist and release artwork after a listen
//! is stored.
//!
//! Each fetch is a detached task on a [`TaskTracker`], bound to a child of
//! the submission's cancellation token and to the scheduler's own shutdown
//! token. Outcomes are reported as [`ArtworkEvent`]s; nothing flows back to
//! the submission, which has already returned.
//!
//! An entity already being fetched is not scheduled twice, and an entity
//! that already has an image is skipped.

use crate::resolver::ResolvedIds;
use core_library::{ArtistId, CatalogStore, EntityKind, EntityRef, ReleaseId};
use core_metadata::{ArtworkMatch, ArtworkProvider, MetadataError};
use core_runtime::events::{ArtworkEvent, CoreEvent, EventBus};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

/// Schedules artwork fetches through an [`ArtworkProvider`].
#[derive(Clone)]
pub struct ArtworkScheduler {
    store: Arc<dyn CatalogStore>,
    provider: Arc<dyn ArtworkProvider>,
    events: EventBus,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

/// Removes an entity from the in-flight set when its task ends.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    key: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[derive(Debug, Clone)]
enum Target {
    Artist(ArtistId),
    Release(ReleaseId),
}

impl Target {
    fn kind(&self) -> EntityKind {
        match self {
            Target::Artist(_) => EntityKind::Artist,
            Target::Release(_) => EntityKind::Release,
        }
    }

    fn id(&self) -> &str {
        match self {
            Target::Artist(id) => id.as_str(),
            Target::Release(id) => id.as_str(),
        }
    }

    fn key(&self) -> String {
        format!("{}:{}", self.kind(), self.id())
    }
}

enum FetchOutcome {
    Cached(ArtworkMatch),
    NotFound,
    AlreadyCached,
}

impl ArtworkScheduler {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        provider: Arc<dyn ArtworkProvider>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            provider,
            events,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Queue artwork fetches for the artists and release of a resolved listen.
    ///
    /// Returns the number of tasks spawned. Must be called from within a
    /// Tokio runtime.
    pub fn schedule(&self, ids: &ResolvedIds, cancel: &CancellationToken) -> usize {
        if self.shutdown.is_cancelled() {
            return 0;
        }

        let targets = ids
            .artist_ids
            .iter()
            .cloned()
            .map(Target::Artist)
            .chain(ids.release_id.clone().map(Target::Release));

        let mut spawned = 0;
        for target in targets {
            let key = target.key();
            let newly_added = self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.clone());
            if !newly_added {
                debug!(entity = %key, "Artwork fetch already in flight");
                continue;
            }

            let guard = InFlightGuard {
                set: Arc::clone(&self.in_flight),
                key,
            };
            let scheduler = self.clone();
            let token = cancel.child_token();
            self.tracker.spawn(async move {
                let _guard = guard;
                scheduler.run(target, token).await;
            });
            spawned += 1;
        }
        spawned
    }

    /// Number of entities with a fetch in progress
    pub fn pending(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Wait until every task spawned so far has finished.
    pub async fn wait_idle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel outstanding fetches and wait for their tasks to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down artwork scheduler");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    async fn run(&self, target: Target, token: CancellationToken) {
        let outcome = tokio::select! {
            outcome = self.fetch(&target) => outcome,
            _ = token.cancelled() => {
                debug!(entity = %target.key(), "Artwork fetch cancelled with its submission");
                return;
            }
            _ = self.shutdown.cancelled() => {
                debug!(entity = %target.key(), "Artwork fetch cancelled by shutdown");
                return;
            }
        };

        let entity_type = target.kind().to_string();
        let entity_id = target.id().to_string();
        let event = match outcome {
            Ok(FetchOutcome::AlreadyCached) => return,
            Ok(FetchOutcome::Cached(found)) => {
                info!(
                    entity = %target.key(),
                    provider = %found.provider,
                    query = %found.query,
                    "Cached artwork"
                );
                ArtworkEvent::Cached {
                    entity_type,
                    entity_id,
                    provider: found.provider,
                    url: found.url,
                }
            }
            Ok(FetchOutcome::NotFound) => {
                debug!(entity = %target.key(), "No provider had artwork");
                ArtworkEvent::NotFound {
                    entity_type,
                    entity_id,
                }
            }
            Err(message) => {
                warn!(entity = %target.key(), error = %message, "Artwork fetch failed");
                ArtworkEvent::Failed {
                    entity_type,
                    entity_id,
                    message,
                }
            }
        };
        let _ = self.events.emit(CoreEvent::Artwork(event));
    }

    #[instrument(skip(self, target), fields(entity = %target.key()))]
    async fn fetch(&self, target: &Target) -> Result<FetchOutcome, String> {
        match target {
            Target::Artist(id) => self.fetch_artist(id).await,
            Target::Release(id) => self.fetch_release(id).await,
        }
    }

    async fn fetch_artist(&self, id: &ArtistId) -> Result<FetchOutcome, String> {
        let artist = match self.store.artist(id).await.map_err(|e| e.to_string())? {
            Some(artist) if !artist.has_image() => artist,
            _ => return Ok(FetchOutcome::AlreadyCached),
        };

        let aliases = self.alias_names(&EntityRef::Artist(artist.id.clone())).await?;
        match self
            .provider
            .find_artist_artwork(&aliases)
            .await
            .map_err(describe)?
        {
            Some(found) => {
                self.store
                    .set_artist_image(id, &found.url, &found.provider)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(FetchOutcome::Cached(found))
            }
            None => Ok(FetchOutcome::NotFound),
        }
    }

    async fn fetch_release(&self, id: &ReleaseId) -> Result<FetchOutcome, String> {
        let release = match self.store.release(id).await.map_err(|e| e.to_string())? {
            Some(release) if !release.has_image() => release,
            _ => return Ok(FetchOutcome::AlreadyCached),
        };

        let mut artist_aliases = Vec::new();
        for artist in self
            .store
            .artists_for_release(id)
            .await
            .map_err(|e| e.to_string())?
        {
            for alias in self.alias_names(&EntityRef::Artist(artist.id)).await? {
                if !artist_aliases.contains(&alias) {
                    artist_aliases.push(alias);
                }
            }
        }

        match self
            .provider
            .find_album_artwork(&artist_aliases, &release.title)
            .await
            .map_err(describe)?
        {
            Some(found) => {
                self.store
                    .set_release_image(id, &found.url, &found.provider)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(FetchOutcome::Cached(found))
            }
            None => Ok(FetchOutcome::NotFound),
        }
    }

    async fn alias_names(&self, entity: &EntityRef) -> Result<Vec<String>, String> {
        Ok(self
            .store
            .aliases(entity)
            .await
            .map_err(|e| e.to_string())?
            .into_iter()
            .map(|alias| alias.alias)
            .collect())
    }
}

fn describe(err: MetadataError) -> String {
    if err.is_shutdown() {
        "provider queue is shut down".to_string()
    } else {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{EntityNames, EntityResolver};
    use async_trait::async_trait;
    use core_library::{create_test_pool, SqliteCatalogStore};
    use core_metadata::Result as MetadataResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticProvider {
        calls: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl ArtworkProvider for StaticProvider {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn find_artist_artwork(
            &self,
            aliases: &[String],
        ) -> MetadataResult<Option<ArtworkMatch>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(Some(ArtworkMatch {
                provider: "static".to_string(),
                url: format!("https://img.example/{}", aliases[0]),
                matched_name: aliases[0].clone(),
                query: format!("artist:\"{}\"", aliases[0]),
            }))
        }

        async fn find_album_artwork(
            &self,
            _artist_aliases: &[String],
            _album: &str,
        ) -> MetadataResult<Option<ArtworkMatch>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(None)
        }
    }

    async fn setup(delay: Duration) -> (Arc<SqliteCatalogStore>, Arc<StaticProvider>, ArtworkScheduler, EventBus) {
        let store = Arc::new(SqliteCatalogStore::new(create_test_pool().await.unwrap()));
        let provider = Arc::new(StaticProvider {
            calls: AtomicUsize::new(0),
            delay,
        });
        let events = EventBus::new(64);
        let scheduler = ArtworkScheduler::new(store.clone(), provider.clone(), events.clone());
        (store, provider, scheduler, events)
    }

    #[tokio::test]
    async fn test_caches_artist_image_and_reports_missing_album() {
        let (store, _provider, scheduler, events) = setup(Duration::ZERO).await;
        let mut rx = events.subscribe();
        let (ids, _) = EntityResolver::new()
            .resolve(&*store, &EntityNames::new("Drake", "Nice For What").with_release("Scorpion"))
            .await
            .unwrap();

        assert_eq!(scheduler.schedule(&ids, &CancellationToken::new()), 2);
        scheduler.wait_idle().await;

        let artist = store.artist(&ids.artist_ids[0]).await.unwrap().unwrap();
        assert_eq!(artist.image_url.as_deref(), Some("https://img.example/Drake"));
        assert_eq!(artist.image_source.as_deref(), Some("static"));

        let mut cached = 0;
        let mut not_found = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                CoreEvent::Artwork(ArtworkEvent::Cached { entity_type, .. }) => {
                    assert_eq!(entity_type, "artist");
                    cached += 1;
                }
                CoreEvent::Artwork(ArtworkEvent::NotFound { entity_type, .. }) => {
                    assert_eq!(entity_type, "release");
                    not_found += 1;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!((cached, not_found), (1, 1));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_skips_entities_with_artwork() {
        let (store, provider, scheduler, _events) = setup(Duration::ZERO).await;
        let (ids, _) = EntityResolver::new()
            .resolve(&*store, &EntityNames::new("Drake", "Nonstop"))
            .await
            .unwrap();
        store
            .set_artist_image(&ids.artist_ids[0], "https://img.example/existing", "manual")
            .await
            .unwrap();

        scheduler.schedule(&ids, &CancellationToken::new());
        scheduler.wait_idle().await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_in_flight_entity_is_not_scheduled_twice() {
        let (store, provider, scheduler, _events) = setup(Duration::from_millis(50)).await;
        let (ids, _) = EntityResolver::new()
            .resolve(&*store, &EntityNames::new("Drake", "Over"))
            .await
            .unwrap();

        let token = CancellationToken::new();
        assert_eq!(scheduler.schedule(&ids, &token), 1);
        assert_eq!(scheduler.schedule(&ids, &token), 0);
        scheduler.wait_idle().await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_submission_cancels_fetch() {
        let (store, _provider, scheduler, events) = setup(Duration::from_secs(30)).await;
        let mut rx = events.subscribe();
        let (ids, _) = EntityResolver::new()
            .resolve(&*store, &EntityNames::new("Drake", "Fireworks"))
            .await
            .unwrap();

        let token = CancellationToken::new();
        scheduler.schedule(&ids, &token);
        token.cancel();
        scheduler.wait_idle().await;

        let artist = store.artist(&ids.artist_ids[0]).await.unwrap().unwrap();
        assert!(!artist.has_image());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_scheduling() {
        let (store, provider, scheduler, _events) = setup(Duration::from_secs(30)).await;
        let (ids, _) = EntityResolver::new()
            .resolve(&*store, &EntityNames::new("Drake", "Karaoke"))
            .await
            .unwrap();

        scheduler.schedule(&ids, &CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown())
            .await
            .unwrap();

        assert_eq!(scheduler.schedule(&ids, &CancellationToken::new()), 0);
        assert!(provider.calls.load(Ordering::SeqCst) <= 1);
    }
}
