//! # Listen Ingestion
//!
//! Records one playback event: resolve its names, insert the listen, and
//! schedule artwork. Resolution and the listen row commit in a single
//! transaction, so a failed submission leaves nothing behind.

use crate::artwork::ArtworkScheduler;
use crate::error::{IngestError, Result};
use crate::resolver::{ArtistCredit, EntityNames, EntityResolver, ResolutionScope, ResolvedIds};
use chrono::{DateTime, Utc};
use core_library::{CatalogStore, ListenId, ListenInsert, NewListen};
use core_runtime::events::{CoreEvent, EventBus, ListenEvent};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// A playback event as reported by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitListen {
    pub names: EntityNames,
    pub listened_at: DateTime<Utc>,
    /// Seconds played
    pub duration_secs: i64,
    /// Reporting client ("navidrome", "spotify", ...)
    pub client: Option<String>,
    pub user_id: i64,
    /// Do not fetch artwork for the resolved artists and release
    pub skip_artwork: bool,
}

impl SubmitListen {
    pub fn new(
        artist: impl Into<String>,
        track: impl Into<String>,
        listened_at: DateTime<Utc>,
    ) -> Self {
        Self {
            names: EntityNames::new(artist, track),
            listened_at,
            duration_secs: 0,
            client: None,
            user_id: 1,
            skip_artwork: false,
        }
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.names.release = Some(release.into());
        self
    }

    /// Add a featured artist
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.names.artists.push(ArtistCredit::new(artist));
        self
    }

    /// Sets both the played duration and the length stored on a new track.
    pub fn with_duration_secs(mut self, secs: i64) -> Self {
        self.duration_secs = secs;
        self.names.duration_secs = secs;
        self
    }

    pub fn with_client(mut self, client: impl Into<String>) -> Self {
        self.client = Some(client.into());
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_skip_artwork(mut self, skip: bool) -> Self {
        self.skip_artwork = skip;
        self
    }

    fn skip_reason(&self) -> Option<SkipReason> {
        if self.names.track.trim().is_empty() {
            Some(SkipReason::EmptyTrack)
        } else if self.names.credited_artists().is_empty() {
            Some(SkipReason::EmptyArtist)
        } else {
            None
        }
    }
}

/// Why a submission was accepted without being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyTrack,
    EmptyArtist,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::EmptyTrack => f.write_str("empty track title"),
            SkipReason::EmptyArtist => f.write_str("empty artist name"),
        }
    }
}

/// Result of a successful submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new listen row was stored
    Recorded { listen_id: ListenId, ids: ResolvedIds },
    /// The same user, track and timestamp was already stored
    Duplicate { ids: ResolvedIds },
    /// Nothing was resolved or stored
    Skipped(SkipReason),
}

impl SubmitOutcome {
    pub fn ids(&self) -> Option<&ResolvedIds> {
        match self {
            SubmitOutcome::Recorded { ids, .. } | SubmitOutcome::Duplicate { ids } => Some(ids),
            SubmitOutcome::Skipped(_) => None,
        }
    }

    pub fn is_recorded(&self) -> bool {
        matches!(self, SubmitOutcome::Recorded { .. })
    }
}

/// Entry point for live and imported listens
pub struct ListenIngestor {
    store: Arc<dyn CatalogStore>,
    resolver: EntityResolver,
    events: EventBus,
    artwork: Option<ArtworkScheduler>,
}

impl ListenIngestor {
    pub fn new(store: Arc<dyn CatalogStore>, events: EventBus) -> Self {
        Self {
            store,
            resolver: EntityResolver::new(),
            events,
            artwork: None,
        }
    }

    /// Enable background artwork fetches for recorded listens.
    pub fn with_artwork(mut self, scheduler: ArtworkScheduler) -> Self {
        self.artwork = Some(scheduler);
        self
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub fn artwork(&self) -> Option<&ArtworkScheduler> {
        self.artwork.as_ref()
    }

    /// Record a listen.
    ///
    /// # Returns
    /// - `Recorded` once the listen is durably stored
    /// - `Duplicate` if an identical listen already exists
    /// - `Skipped` for an empty track title or artist name
    ///
    /// # Errors
    /// - `IngestError::Cancelled` if `cancel` fires before the commit
    /// - `IngestError::Catalog` for storage failures; nothing is persisted
    #[instrument(skip(self, listen, cancel), fields(track = %listen.names.track, user_id = listen.user_id))]
    pub async fn submit(
        &self,
        listen: SubmitListen,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome> {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        if let Some(reason) = listen.skip_reason() {
            debug!(%reason, "Skipping listen");
            let _ = self.events.emit(CoreEvent::Listen(ListenEvent::Skipped {
                reason: reason.to_string(),
            }));
            return Ok(SubmitOutcome::Skipped(reason));
        }

        let (scope, ids, inserted) = tokio::select! {
            biased;
            staged = self.stage(&listen) => staged?,
            _ = cancel.cancelled() => {
                debug!("Submission cancelled before commit");
                return Err(IngestError::Cancelled);
            }
        };
        let created = scope.commit().await?;

        for event in created {
            let _ = self.events.emit(CoreEvent::Catalog(event));
        }

        let outcome = match inserted {
            ListenInsert::Inserted(row) => {
                info!(listen_id = %row.id, track_id = %row.track_id, "Recorded listen");
                let _ = self.events.emit(CoreEvent::Listen(ListenEvent::Recorded {
                    listen_id: row.id.to_string(),
                    track_id: row.track_id.to_string(),
                    user_id: row.user_id,
                    client: row.client.clone().unwrap_or_default(),
                    listened_at: row.listened_at,
                }));
                SubmitOutcome::Recorded {
                    listen_id: row.id,
                    ids,
                }
            }
            ListenInsert::Duplicate => {
                debug!(track_id = %ids.track_id, "Listen already stored");
                SubmitOutcome::Duplicate { ids }
            }
        };

        if !listen.skip_artwork {
            if let (Some(artwork), Some(ids)) = (&self.artwork, outcome.ids()) {
                artwork.schedule(ids, cancel);
            }
        }

        Ok(outcome)
    }

    /// Resolve names and insert the listen without committing.
    async fn stage(
        &self,
        listen: &SubmitListen,
    ) -> Result<(ResolutionScope, ResolvedIds, ListenInsert)> {
        let mut scope = self.resolver.begin(self.store.as_ref(), &listen.names).await?;
        let ids = scope.resolve(&listen.names).await?;
        let inserted = scope
            .transaction()
            .insert_listen(&NewListen {
                track_id: ids.track_id.clone(),
                user_id: listen.user_id,
                client: listen.client.clone(),
                listened_at: listen.listened_at,
                duration_secs: listen.duration_secs,
            })
            .await?;
        Ok((scope, ids, inserted))
    }

    /// Cancel background artwork work and wait for it to stop.
    pub async fn shutdown(&self) {
        if let Some(artwork) = &self.artwork {
            artwork.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_library::{create_test_pool, SqliteCatalogStore};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn setup() -> (Arc<SqliteCatalogStore>, ListenIngestor, EventBus) {
        let store = Arc::new(SqliteCatalogStore::new(create_test_pool().await.unwrap()));
        let events = EventBus::new(64);
        let ingestor = ListenIngestor::new(store.clone(), events.clone());
        (store, ingestor, events)
    }

    #[tokio::test]
    async fn test_records_listen_and_emits_events() {
        let (store, ingestor, events) = setup().await;
        let mut rx = events.subscribe();

        let outcome = ingestor
            .submit(
                SubmitListen::new("Drake", "God's Plan", ts(1_700_000_000))
                    .with_release("Scorpion")
                    .with_duration_secs(198)
                    .with_client("navidrome"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(outcome.is_recorded());

        let listens = store.recent_listens(1, 10).await.unwrap();
        assert_eq!(listens.len(), 1);
        assert_eq!(listens[0].client.as_deref(), Some("navidrome"));
        assert_eq!(listens[0].duration_secs, 198);
        assert_eq!(listens[0].listened_at, 1_700_000_000);

        let mut descriptions = Vec::new();
        while let Ok(event) = rx.try_recv() {
            descriptions.push(event.description().to_string());
        }
        assert_eq!(
            descriptions,
            vec!["Artist created", "Release created", "Track created", "Listen recorded"]
        );
    }

    #[tokio::test]
    async fn test_same_listen_twice_is_duplicate() {
        let (store, ingestor, _events) = setup().await;
        let cancel = CancellationToken::new();
        let listen = SubmitListen::new("Drake", "In My Feelings", ts(1_700_000_000));

        let first = ingestor.submit(listen.clone(), &cancel).await.unwrap();
        let second = ingestor.submit(listen, &cancel).await.unwrap();

        assert!(first.is_recorded());
        assert!(matches!(second, SubmitOutcome::Duplicate { .. }));
        assert_eq!(first.ids(), second.ids());
        assert_eq!(store.counts().await.unwrap().listens, 1);
    }

    #[tokio::test]
    async fn test_empty_names_are_skipped_without_entities() {
        let (store, ingestor, _events) = setup().await;
        let cancel = CancellationToken::new();

        let outcome = ingestor
            .submit(SubmitListen::new("Drake", "", ts(1)), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Skipped(SkipReason::EmptyTrack));

        let outcome = ingestor
            .submit(SubmitListen::new("  ", "Lemon", ts(1)), &cancel)
            .await
            .unwrap();
        assert_eq!(outcome, SubmitOutcome::Skipped(SkipReason::EmptyArtist));

        let counts = store.counts().await.unwrap();
        assert_eq!((counts.artists, counts.tracks, counts.listens), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_cancelled_submission_persists_nothing() {
        let (store, ingestor, _events) = setup().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ingestor
            .submit(SubmitListen::new("Drake", "Toosie Slide", ts(1)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Cancelled));
        assert_eq!(store.counts().await.unwrap().artists, 0);
    }

    #[tokio::test]
    async fn test_featured_artists_share_track() {
        let (store, ingestor, _events) = setup().await;
        let cancel = CancellationToken::new();

        let outcome = ingestor
            .submit(
                SubmitListen::new("Drake", "Work", ts(10)).with_artist("Rihanna"),
                &cancel,
            )
            .await
            .unwrap();
        let ids = outcome.ids().unwrap();
        assert_eq!(ids.artist_ids.len(), 2);
        assert_eq!(store.artists_for_track(&ids.track_id).await.unwrap().len(), 2);
    }
}
