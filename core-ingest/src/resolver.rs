//! # Entity Resolver
//!
//! Maps free-text artist, release and track names onto canonical catalog
//! entities, creating them on first mention.
//!
//! ## Lookup order
//!
//! For each name:
//! 1. a provider identifier, when the submission carries one
//! 2. an alias whose normalized form equals the normalized name
//! 3. a new entity whose name becomes its sole primary alias
//!
//! Releases and tracks are looked up among entities credited to at least one
//! of the resolved artists, so two artists can each own a track called
//! "Intro".
//!
//! ## Concurrency
//!
//! [`EntityResolver::begin`] takes an async lock per normalized name, in
//! sorted key order, before opening the catalog transaction, and the
//! returned [`ResolutionScope`] holds them until commit or rollback. Two
//! concurrent first mentions of a name therefore run one after the other.
//! Writers outside this process are caught by the catalog's unique alias
//! constraint: a `Conflict` on create is followed by one re-read.

use crate::error::{IngestError, Result};
use core_library::{
    normalize_name, AliasSource, Artist, ArtistId, CatalogStore, CatalogTransaction, EntityRef,
    LibraryError, Release, ReleaseId, Track, TrackId,
};
use core_runtime::events::CatalogEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument, warn};

/// Lock table size above which idle entries are dropped
const LOCK_TABLE_PRUNE_THRESHOLD: usize = 1024;

/// One credited artist of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtistCredit {
    pub name: String,
    pub musicbrainz_id: Option<String>,
}

impl ArtistCredit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            musicbrainz_id: None,
        }
    }

    pub fn with_musicbrainz_id(mut self, mbid: impl Into<String>) -> Self {
        self.musicbrainz_id = Some(mbid.into());
        self
    }
}

/// Names to resolve for one listen
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityNames {
    pub artists: Vec<ArtistCredit>,
    pub track: String,
    pub track_musicbrainz_id: Option<String>,
    pub release: Option<String>,
    pub release_musicbrainz_id: Option<String>,
    /// Track length in seconds, stored on a newly created track
    pub duration_secs: i64,
}

impl EntityNames {
    pub fn new(artist: impl Into<String>, track: impl Into<String>) -> Self {
        Self {
            artists: vec![ArtistCredit::new(artist)],
            track: track.into(),
            ..Default::default()
        }
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    /// Release title, `None` when absent or blank
    pub fn release_title(&self) -> Option<&str> {
        self.release
            .as_deref()
            .map(str::trim)
            .filter(|title| !title.is_empty())
    }

    /// Artist credits with a non-blank name, first spelling of each kept
    pub fn credited_artists(&self) -> Vec<&ArtistCredit> {
        let mut seen = Vec::new();
        let mut credits = Vec::new();
        for credit in &self.artists {
            let normalized = normalize_name(&credit.name);
            if normalized.is_empty() || seen.contains(&normalized) {
                continue;
            }
            seen.push(normalized);
            credits.push(credit);
        }
        credits
    }

    /// Sorted, de-duplicated lock keys covering every name in the submission
    pub fn lock_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .credited_artists()
            .into_iter()
            .map(|credit| format!("artist:{}", normalize_name(&credit.name)))
            .collect();
        if let Some(release) = self.release_title() {
            keys.push(format!("release:{}", normalize_name(release)));
        }
        keys.push(format!("track:{}", normalize_name(&self.track)));
        keys.sort();
        keys.dedup();
        keys
    }

    fn validate(&self) -> Result<()> {
        if self.track.trim().is_empty() {
            return Err(IngestError::InvalidInput(
                "track title cannot be empty".to_string(),
            ));
        }
        if self.credited_artists().is_empty() {
            return Err(IngestError::InvalidInput(
                "at least one artist name is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Canonical ids for a resolved submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIds {
    /// In credit order
    pub artist_ids: Vec<ArtistId>,
    pub release_id: Option<ReleaseId>,
    pub track_id: TrackId,
}

/// Resolves names to canonical entities.
///
/// Cheap to share; clones share the lock table.
#[derive(Clone, Default)]
pub struct EntityResolver {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl EntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `names` in a transaction of its own and commit it.
    pub async fn resolve(
        &self,
        store: &dyn CatalogStore,
        names: &EntityNames,
    ) -> Result<(ResolvedIds, Vec<CatalogEvent>)> {
        let mut scope = self.begin(store, names).await?;
        let ids = scope.resolve(names).await?;
        let created = scope.commit().await?;
        Ok((ids, created))
    }

    /// Lock every name in `names` and open a catalog transaction.
    ///
    /// The locks are released when the scope is committed, rolled back or
    /// dropped.
    pub async fn begin(
        &self,
        store: &dyn CatalogStore,
        names: &EntityNames,
    ) -> Result<ResolutionScope> {
        names.validate()?;
        let guards = self.lock_names(&names.lock_keys()).await;
        let tx = store.begin().await?;
        Ok(ResolutionScope {
            tx,
            created: Vec::new(),
            _guards: guards,
        })
    }

    /// Number of names currently tracked by the lock table.
    pub async fn tracked_names(&self) -> usize {
        self.locks.lock().await.len()
    }

    async fn lock_names(&self, keys: &[String]) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = {
                let mut table = self.locks.lock().await;
                if table.len() >= LOCK_TABLE_PRUNE_THRESHOLD {
                    table.retain(|_, lock| Arc::strong_count(lock) > 1);
                }
                Arc::clone(table.entry(key.clone()).or_default())
            };
            guards.push(lock.lock_owned().await);
        }
        guards
    }
}

/// Open resolution: name locks plus the catalog transaction they protect
pub struct ResolutionScope {
    tx: Box<dyn CatalogTransaction>,
    created: Vec<CatalogEvent>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ResolutionScope {
    /// The underlying transaction, for writes that must commit with the
    /// resolution (the listen row).
    pub fn transaction(&mut self) -> &mut dyn CatalogTransaction {
        self.tx.as_mut()
    }

    /// Resolve every name, creating and linking entities as needed.
    #[instrument(skip(self, names), fields(track = %names.track))]
    pub async fn resolve(&mut self, names: &EntityNames) -> Result<ResolvedIds> {
        names.validate()?;

        let mut artist_ids: Vec<ArtistId> = Vec::new();
        for credit in names.credited_artists() {
            let id = self.resolve_artist(credit).await?;
            if !artist_ids.contains(&id) {
                artist_ids.push(id);
            }
        }

        let release_id = match names.release_title() {
            Some(title) => Some(
                self.resolve_release(title, names.release_musicbrainz_id.as_deref(), &artist_ids)
                    .await?,
            ),
            None => None,
        };

        let track_id = self
            .resolve_track(names, release_id.as_ref(), &artist_ids)
            .await?;

        Ok(ResolvedIds {
            artist_ids,
            release_id,
            track_id,
        })
    }

    /// Commit and return one event per entity created in this scope.
    pub async fn commit(self) -> Result<Vec<CatalogEvent>> {
        self.tx.commit().await?;
        Ok(self.created)
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn resolve_artist(&mut self, credit: &ArtistCredit) -> Result<ArtistId> {
        let name = credit.name.trim();
        let normalized = normalize_name(name);

        if let Some(mbid) = credit.musicbrainz_id.as_deref() {
            if let Some(artist) = self.tx.find_artist_by_external_id(mbid).await? {
                self.remember_spelling(EntityRef::Artist(artist.id.clone()), name)
                    .await?;
                return Ok(artist.id);
            }
        }

        if let Some(artist) = self.tx.find_artist_by_alias(&normalized).await? {
            debug!(artist_id = %artist.id, name, "Artist matched by alias");
            if let Some(mbid) = credit.musicbrainz_id.as_deref() {
                if artist.musicbrainz_id.is_none() {
                    self.tx
                        .set_external_id(&EntityRef::Artist(artist.id.clone()), mbid)
                        .await?;
                }
            }
            return Ok(artist.id);
        }

        let mut artist = Artist::new(name);
        artist.musicbrainz_id = credit.musicbrainz_id.clone();
        match self.tx.create_artist(&artist).await {
            Ok(()) => {
                debug!(artist_id = %artist.id, name, "Created artist");
                self.created.push(CatalogEvent::ArtistCreated {
                    artist_id: artist.id.to_string(),
                    name: artist.name.clone(),
                });
                Ok(artist.id)
            }
            Err(err) if err.is_conflict() => {
                warn!(name, "Artist created concurrently, re-reading");
                self.tx
                    .find_artist_by_alias(&normalized)
                    .await?
                    .map(|existing| existing.id)
                    .ok_or_else(|| err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn resolve_release(
        &mut self,
        title: &str,
        musicbrainz_id: Option<&str>,
        artist_ids: &[ArtistId],
    ) -> Result<ReleaseId> {
        let normalized = normalize_name(title);

        let mut existing = None;
        if let Some(mbid) = musicbrainz_id {
            if let Some(release) = self.tx.find_release_by_external_id(mbid).await? {
                self.remember_spelling(EntityRef::Release(release.id.clone()), title)
                    .await?;
                existing = Some(release.id);
            }
        }
        if existing.is_none() {
            existing = self
                .tx
                .find_release_by_alias(&normalized, artist_ids)
                .await?
                .map(|release| release.id);
        }

        let release_id = match existing {
            Some(id) => id,
            None => {
                let mut release = Release::new(title);
                release.musicbrainz_id = musicbrainz_id.map(str::to_string);
                match self.tx.create_release(&release).await {
                    Ok(()) => {
                        debug!(release_id = %release.id, title, "Created release");
                        self.created.push(CatalogEvent::ReleaseCreated {
                            release_id: release.id.to_string(),
                            title: release.title.clone(),
                        });
                        release.id
                    }
                    Err(err) if err.is_conflict() => self
                        .tx
                        .find_release_by_alias(&normalized, artist_ids)
                        .await?
                        .map(|release| release.id)
                        .ok_or(err)?,
                    Err(err) => return Err(err.into()),
                }
            }
        };

        for artist_id in artist_ids {
            self.tx.link_artist_release(artist_id, &release_id).await?;
        }
        Ok(release_id)
    }

    async fn resolve_track(
        &mut self,
        names: &EntityNames,
        release_id: Option<&ReleaseId>,
        artist_ids: &[ArtistId],
    ) -> Result<TrackId> {
        let title = names.track.trim();
        let normalized = normalize_name(title);

        let mut existing = None;
        if let Some(mbid) = names.track_musicbrainz_id.as_deref() {
            if let Some(track) = self.tx.find_track_by_external_id(mbid).await? {
                self.remember_spelling(EntityRef::Track(track.id.clone()), title)
                    .await?;
                existing = Some(track);
            }
        }
        if existing.is_none() {
            existing = self.tx.find_track_by_alias(&normalized, artist_ids).await?;
        }

        let track_id = match existing {
            Some(track) => {
                if let (None, Some(release_id)) = (&track.release_id, release_id) {
                    self.tx.set_track_release(&track.id, release_id).await?;
                }
                track.id
            }
            None => {
                let mut track = Track::new(title, names.duration_secs, release_id.cloned());
                track.musicbrainz_id = names.track_musicbrainz_id.clone();
                match self.tx.create_track(&track).await {
                    Ok(()) => {
                        debug!(track_id = %track.id, title, "Created track");
                        self.created.push(CatalogEvent::TrackCreated {
                            track_id: track.id.to_string(),
                            title: track.title.clone(),
                        });
                        track.id
                    }
                    Err(err) if err.is_conflict() => self
                        .tx
                        .find_track_by_alias(&normalized, artist_ids)
                        .await?
                        .map(|track| track.id)
                        .ok_or(err)?,
                    Err(err) => return Err(err.into()),
                }
            }
        };

        for artist_id in artist_ids {
            self.tx.link_artist_track(artist_id, &track_id).await?;
        }
        Ok(track_id)
    }

    /// Record an alternate spelling of an entity matched by provider id.
    async fn remember_spelling(&mut self, entity: EntityRef, name: &str) -> Result<()> {
        match self
            .tx
            .add_alias(&entity, name, AliasSource::Submission)
            .await
        {
            Ok(true) => {
                debug!(entity = %entity.kind(), id = entity.id(), name, "Added alias");
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(LibraryError::Conflict { .. }) => {
                warn!(
                    entity = %entity.kind(),
                    id = entity.id(),
                    name,
                    "Alias already names another entity, not added"
                );
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::{create_test_pool, SqliteCatalogStore};

    async fn setup_store() -> SqliteCatalogStore {
        SqliteCatalogStore::new(create_test_pool().await.unwrap())
    }

    #[test]
    fn test_lock_keys_are_sorted_and_normalized() {
        let mut names = EntityNames::new("Drake", "Hotline Bling").with_release("Views");
        names.artists.push(ArtistCredit::new("  drake "));
        names.artists.push(ArtistCredit::new("Abel"));

        assert_eq!(
            names.lock_keys(),
            vec![
                "artist:abel".to_string(),
                "artist:drake".to_string(),
                "release:views".to_string(),
                "track:hotline bling".to_string(),
            ]
        );
    }

    #[test]
    fn test_blank_release_is_absent() {
        let names = EntityNames::new("Drake", "Hotline Bling").with_release("   ");
        assert_eq!(names.release_title(), None);
        assert!(!names.lock_keys().iter().any(|k| k.starts_with("release:")));
    }

    #[tokio::test]
    async fn test_resolution_is_case_insensitive() {
        let store = setup_store().await;
        let resolver = EntityResolver::new();

        let (first, created) = resolver
            .resolve(&store, &EntityNames::new("Drake", "Passionfruit").with_release("More Life"))
            .await
            .unwrap();
        assert_eq!(created.len(), 3);

        let (second, created) = resolver
            .resolve(&store, &EntityNames::new("drake", "PASSIONFRUIT").with_release("more life"))
            .await
            .unwrap();
        assert!(created.is_empty());
        assert_eq!(first, second);

        let artist = store.artist(&first.artist_ids[0]).await.unwrap().unwrap();
        assert_eq!(artist.name, "Drake");
    }

    #[tokio::test]
    async fn test_same_title_under_different_artists() {
        let store = setup_store().await;
        let resolver = EntityResolver::new();

        let (a, _) = resolver
            .resolve(&store, &EntityNames::new("Drake", "Intro"))
            .await
            .unwrap();
        let (b, _) = resolver
            .resolve(&store, &EntityNames::new("Rihanna", "Intro"))
            .await
            .unwrap();

        assert_ne!(a.track_id, b.track_id);
        assert_eq!(store.counts().await.unwrap().tracks, 2);
    }

    #[tokio::test]
    async fn test_multiple_artists_link_to_track_and_release() {
        let store = setup_store().await;
        let resolver = EntityResolver::new();

        let mut names = EntityNames::new("The Weeknd", "Starboy").with_release("Starboy");
        names.artists.push(ArtistCredit::new("Daft Punk"));
        let (ids, _) = resolver.resolve(&store, &names).await.unwrap();

        assert_eq!(ids.artist_ids.len(), 2);
        let track_artists = store.artists_for_track(&ids.track_id).await.unwrap();
        assert_eq!(track_artists.len(), 2);
        let release_id = ids.release_id.unwrap();
        let release_artists = store.artists_for_release(&release_id).await.unwrap();
        assert_eq!(release_artists.len(), 2);
        let track = store.track(&ids.track_id).await.unwrap().unwrap();
        assert_eq!(track.release_id, Some(release_id));
    }

    #[tokio::test]
    async fn test_external_id_match_records_alternate_spelling() {
        let store = setup_store().await;
        let resolver = EntityResolver::new();
        let mbid = "0e4c7a2d-1f3a-4c55-9a9b-8a0e7f6f1c11";

        let mut names = EntityNames::new("米津玄師", "Lemon");
        names.artists[0] = ArtistCredit::new("米津玄師").with_musicbrainz_id(mbid);
        let (first, _) = resolver.resolve(&store, &names).await.unwrap();

        let mut names = EntityNames::new("Kenshi Yonezu", "Lemon");
        names.artists[0] = ArtistCredit::new("Kenshi Yonezu").with_musicbrainz_id(mbid);
        let (second, _) = resolver.resolve(&store, &names).await.unwrap();

        assert_eq!(first.artist_ids, second.artist_ids);
        let aliases = store
            .aliases(&EntityRef::Artist(first.artist_ids[0].clone()))
            .await
            .unwrap();
        assert_eq!(aliases.len(), 2);
        assert!(aliases[0].is_primary);
        assert_eq!(aliases[0].alias, "米津玄師");
        assert_eq!(aliases[1].source_kind(), Some(AliasSource::Submission));

        // The new spelling now resolves without the identifier.
        let (third, _) = resolver
            .resolve(&store, &EntityNames::new("kenshi yonezu", "Lemon"))
            .await
            .unwrap();
        assert_eq!(third.artist_ids, first.artist_ids);
    }

    #[tokio::test]
    async fn test_existing_track_gains_release() {
        let store = setup_store().await;
        let resolver = EntityResolver::new();

        let (bare, _) = resolver
            .resolve(&store, &EntityNames::new("Drake", "Headlines"))
            .await
            .unwrap();
        let (with_release, _) = resolver
            .resolve(&store, &EntityNames::new("Drake", "Headlines").with_release("Take Care"))
            .await
            .unwrap();

        assert_eq!(bare.track_id, with_release.track_id);
        let track = store.track(&bare.track_id).await.unwrap().unwrap();
        assert_eq!(track.release_id, with_release.release_id);
    }

    #[tokio::test]
    async fn test_rejects_empty_names() {
        let store = setup_store().await;
        let resolver = EntityResolver::new();

        let err = resolver
            .resolve(&store, &EntityNames::new("Drake", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidInput(_)));

        let err = resolver
            .resolve(&store, &EntityNames::new("", "Lemon"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidInput(_)));
        assert_eq!(store.counts().await.unwrap().artists, 0);
    }

    #[tokio::test]
    async fn test_dropped_scope_rolls_back() {
        let store = setup_store().await;
        let resolver = EntityResolver::new();
        let names = EntityNames::new("Drake", "Jaded");

        {
            let mut scope = resolver.begin(&store, &names).await.unwrap();
            scope.resolve(&names).await.unwrap();
        }

        assert_eq!(store.counts().await.unwrap().artists, 0);
        // Locks were released with the scope.
        let (ids, created) = resolver.resolve(&store, &names).await.unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(ids.artist_ids.len(), 1);
    }
}
