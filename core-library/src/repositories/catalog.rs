//! Catalog store and transaction traits
//!
//! `CatalogStore` covers pool-level reads and single-statement writes.
//! Anything that must commit together (resolving names and recording the
//! listen) goes through a [`CatalogTransaction`] obtained from
//! [`CatalogStore::begin`].

use crate::error::Result;
use crate::models::{
    Alias, AliasSource, Artist, ArtistId, CatalogCounts, EntityRef, Listen, ListenId,
    ListenInsert, NewListen, OrphanReport, Release, ReleaseId, Track, TrackId,
};
use async_trait::async_trait;

/// Pool-level catalog access
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Open a write transaction.
    ///
    /// Dropping the returned transaction without calling `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>>;

    async fn artist(&self, id: &ArtistId) -> Result<Option<Artist>>;

    async fn release(&self, id: &ReleaseId) -> Result<Option<Release>>;

    async fn track(&self, id: &TrackId) -> Result<Option<Track>>;

    /// All aliases of an entity, primary first
    async fn aliases(&self, entity: &EntityRef) -> Result<Vec<Alias>>;

    /// Attach a secondary alias.
    ///
    /// # Returns
    /// - `Ok(true)` if the alias was added
    /// - `Ok(false)` if the entity already carries it
    ///
    /// # Errors
    /// `LibraryError::Conflict` when an artist alias already names another artist.
    async fn add_alias(&self, entity: &EntityRef, alias: &str, source: AliasSource) -> Result<bool>;

    async fn artists_for_track(&self, track_id: &TrackId) -> Result<Vec<Artist>>;

    async fn artists_for_release(&self, release_id: &ReleaseId) -> Result<Vec<Artist>>;

    /// Cache an artwork URL on an artist
    async fn set_artist_image(&self, id: &ArtistId, url: &str, source: &str) -> Result<()>;

    /// Cache an artwork URL on a release
    async fn set_release_image(&self, id: &ReleaseId, url: &str, source: &str) -> Result<()>;

    /// Most recent listens for a user, newest first
    async fn recent_listens(&self, user_id: i64, limit: u32) -> Result<Vec<Listen>>;

    /// Delete a single listen. Returns `Ok(false)` if it did not exist.
    async fn delete_listen(&self, id: &ListenId) -> Result<bool>;

    async fn counts(&self) -> Result<CatalogCounts>;

    /// Remove tracks without listens, then releases without tracks, then
    /// artists without tracks or releases.
    async fn prune_orphans(&self) -> Result<OrphanReport>;
}

/// Unit of work over the catalog
#[async_trait]
pub trait CatalogTransaction: Send {
    /// Artist owning an alias with this normalized name
    async fn find_artist_by_alias(&mut self, normalized: &str) -> Result<Option<Artist>>;

    async fn find_artist_by_external_id(&mut self, musicbrainz_id: &str) -> Result<Option<Artist>>;

    /// Release with this alias that is credited to at least one of `artist_ids`
    async fn find_release_by_alias(
        &mut self,
        normalized: &str,
        artist_ids: &[ArtistId],
    ) -> Result<Option<Release>>;

    async fn find_release_by_external_id(&mut self, musicbrainz_id: &str) -> Result<Option<Release>>;

    /// Track with this alias that is credited to at least one of `artist_ids`
    async fn find_track_by_alias(
        &mut self,
        normalized: &str,
        artist_ids: &[ArtistId],
    ) -> Result<Option<Track>>;

    async fn find_track_by_external_id(&mut self, musicbrainz_id: &str) -> Result<Option<Track>>;

    /// Insert the artist together with its name as sole primary alias.
    ///
    /// # Errors
    /// `LibraryError::Conflict` if the alias already belongs to another artist.
    async fn create_artist(&mut self, artist: &Artist) -> Result<()>;

    /// Insert the release together with its title as sole primary alias.
    async fn create_release(&mut self, release: &Release) -> Result<()>;

    /// Insert the track together with its title as sole primary alias.
    async fn create_track(&mut self, track: &Track) -> Result<()>;

    /// Attach a secondary alias; `Ok(false)` if already present on the entity.
    async fn add_alias(&mut self, entity: &EntityRef, alias: &str, source: AliasSource) -> Result<bool>;

    /// Record a provider identifier on an entity that has none yet.
    async fn set_external_id(&mut self, entity: &EntityRef, musicbrainz_id: &str) -> Result<()>;

    async fn link_artist_release(&mut self, artist_id: &ArtistId, release_id: &ReleaseId) -> Result<()>;

    async fn link_artist_track(&mut self, artist_id: &ArtistId, track_id: &TrackId) -> Result<()>;

    /// Attach a track to a release if it has none.
    async fn set_track_release(&mut self, track_id: &TrackId, release_id: &ReleaseId) -> Result<()>;

    async fn insert_listen(&mut self, listen: &NewListen) -> Result<ListenInsert>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
