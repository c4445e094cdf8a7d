//! SQLite implementation of the catalog traits

use crate::error::{is_unique_violation, LibraryError, Result};
use crate::models::{
    normalize_name, validate_name, Alias, AliasSource, Artist, ArtistId, CatalogCounts,
    EntityKind, EntityRef, Listen, ListenId, ListenInsert, NewListen, OrphanReport, Release,
    ReleaseId, Track, TrackId,
};
use crate::repositories::{CatalogStore, CatalogTransaction};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnection, SqliteRow};
use sqlx::{query, query_as, Connection, Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// SQLite-backed catalog.
///
/// Write transactions are serialized in-process through a write gate that is
/// taken before a connection is acquired. SQLite allows one writer at a time
/// anyway; taking the gate first means a deferred transaction never has to
/// upgrade from a stale read snapshot.
#[derive(Clone)]
pub struct SqliteCatalogStore {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
}

impl SqliteCatalogStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn begin_gated(&self) -> Result<SqliteCatalogTransaction> {
        let guard = Arc::clone(&self.write_gate).lock_owned().await;
        let tx = self.pool.begin().await?;
        Ok(SqliteCatalogTransaction {
            tx,
            _write_guard: guard,
        })
    }
}

/// Open catalog transaction holding the store's write gate
pub struct SqliteCatalogTransaction {
    tx: Transaction<'static, Sqlite>,
    _write_guard: OwnedMutexGuard<()>,
}

fn invalid(field: &str, message: String) -> LibraryError {
    LibraryError::InvalidInput {
        field: field.to_string(),
        message,
    }
}

fn write_error(err: sqlx::Error, kind: EntityKind, name: &str) -> LibraryError {
    if is_unique_violation(&err) {
        LibraryError::Conflict {
            entity_type: kind.as_str().to_string(),
            name: name.to_string(),
        }
    } else {
        LibraryError::Database(err)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

async fn insert_alias(
    conn: &mut SqliteConnection,
    kind: EntityKind,
    entity_id: &str,
    alias: &str,
    source: AliasSource,
    is_primary: bool,
) -> std::result::Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO {} ({}, alias, normalized_alias, source, is_primary) VALUES (?, ?, ?, ?, ?)",
        kind.alias_table(),
        kind.id_column()
    );
    query(&sql)
        .bind(entity_id)
        .bind(alias.trim())
        .bind(normalize_name(alias))
        .bind(source.as_str())
        .bind(is_primary)
        .execute(conn)
        .await?;
    Ok(())
}

async fn add_secondary_alias(
    conn: &mut SqliteConnection,
    entity: &EntityRef,
    alias: &str,
    source: AliasSource,
) -> Result<bool> {
    let kind = entity.kind();
    validate_name("Alias", alias).map_err(|e| invalid("Alias", e))?;

    let exists_sql = format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ? AND normalized_alias = ?",
        kind.alias_table(),
        kind.id_column()
    );
    let (existing,): (i64,) = query_as(&exists_sql)
        .bind(entity.id())
        .bind(normalize_name(alias))
        .fetch_one(&mut *conn)
        .await?;
    if existing > 0 {
        return Ok(false);
    }

    insert_alias(conn, kind, entity.id(), alias, source, false)
        .await
        .map_err(|e| write_error(e, kind, alias))?;
    debug!(entity_type = %kind, entity_id = entity.id(), alias, "Alias added");
    Ok(true)
}

async fn fetch_aliases(conn: &mut SqliteConnection, entity: &EntityRef) -> Result<Vec<Alias>> {
    let kind = entity.kind();
    let sql = format!(
        "SELECT {} AS entity_id, alias, normalized_alias, source, is_primary \
         FROM {} WHERE {} = ? ORDER BY is_primary DESC, alias ASC",
        kind.id_column(),
        kind.alias_table(),
        kind.id_column()
    );
    let aliases = query_as::<_, Alias>(&sql)
        .bind(entity.id())
        .fetch_all(conn)
        .await?;
    Ok(aliases)
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>> {
        Ok(Box::new(self.begin_gated().await?))
    }

    async fn artist(&self, id: &ArtistId) -> Result<Option<Artist>> {
        let artist = query_as::<_, Artist>("SELECT * FROM artists WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(artist)
    }

    async fn release(&self, id: &ReleaseId) -> Result<Option<Release>> {
        let release = query_as::<_, Release>("SELECT * FROM releases WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(release)
    }

    async fn track(&self, id: &TrackId) -> Result<Option<Track>> {
        let track = query_as::<_, Track>("SELECT * FROM tracks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(track)
    }

    async fn aliases(&self, entity: &EntityRef) -> Result<Vec<Alias>> {
        let mut conn = self.pool.acquire().await?;
        fetch_aliases(&mut conn, entity).await
    }

    async fn add_alias(&self, entity: &EntityRef, alias: &str, source: AliasSource) -> Result<bool> {
        let mut tx = self.begin_gated().await?;
        let added = add_secondary_alias(&mut tx.tx, entity, alias, source).await?;
        tx.tx.commit().await?;
        Ok(added)
    }

    async fn artists_for_track(&self, track_id: &TrackId) -> Result<Vec<Artist>> {
        let artists = query_as::<_, Artist>(
            r#"
            SELECT a.* FROM artists a
            INNER JOIN artist_tracks at ON at.artist_id = a.id
            WHERE at.track_id = ?
            ORDER BY at.rowid ASC
            "#,
        )
        .bind(track_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(artists)
    }

    async fn artists_for_release(&self, release_id: &ReleaseId) -> Result<Vec<Artist>> {
        let artists = query_as::<_, Artist>(
            r#"
            SELECT a.* FROM artists a
            INNER JOIN artist_releases ar ON ar.artist_id = a.id
            WHERE ar.release_id = ?
            ORDER BY ar.rowid ASC
            "#,
        )
        .bind(release_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(artists)
    }

    async fn set_artist_image(&self, id: &ArtistId, url: &str, source: &str) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let result = query(
            "UPDATE artists SET image_url = ?, image_source = ?, updated_at = ? WHERE id = ?",
        )
        .bind(url)
        .bind(source)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "Artist".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_release_image(&self, id: &ReleaseId, url: &str, source: &str) -> Result<()> {
        let _gate = self.write_gate.lock().await;
        let result = query(
            "UPDATE releases SET image_url = ?, image_source = ?, updated_at = ? WHERE id = ?",
        )
        .bind(url)
        .bind(source)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "Release".to_string(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn recent_listens(&self, user_id: i64, limit: u32) -> Result<Vec<Listen>> {
        let listens = query_as::<_, Listen>(
            "SELECT * FROM listens WHERE user_id = ? ORDER BY listened_at DESC, created_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(listens)
    }

    async fn delete_listen(&self, id: &ListenId) -> Result<bool> {
        let _gate = self.write_gate.lock().await;
        let result = query("DELETE FROM listens WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn counts(&self) -> Result<CatalogCounts> {
        let (artists, releases, tracks, listens): (i64, i64, i64, i64) = query_as(
            r#"
            SELECT
                (SELECT COUNT(*) FROM artists),
                (SELECT COUNT(*) FROM releases),
                (SELECT COUNT(*) FROM tracks),
                (SELECT COUNT(*) FROM listens)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(CatalogCounts {
            artists,
            releases,
            tracks,
            listens,
        })
    }

    async fn prune_orphans(&self) -> Result<OrphanReport> {
        let mut tx = self.begin_gated().await?;

        let tracks = query(
            "DELETE FROM tracks WHERE NOT EXISTS (SELECT 1 FROM listens l WHERE l.track_id = tracks.id)",
        )
        .execute(&mut *tx.tx)
        .await?
        .rows_affected();

        let releases = query(
            "DELETE FROM releases WHERE NOT EXISTS (SELECT 1 FROM tracks t WHERE t.release_id = releases.id)",
        )
        .execute(&mut *tx.tx)
        .await?
        .rows_affected();

        let artists = query(
            r#"
            DELETE FROM artists
            WHERE NOT EXISTS (SELECT 1 FROM artist_tracks at WHERE at.artist_id = artists.id)
              AND NOT EXISTS (SELECT 1 FROM artist_releases ar WHERE ar.artist_id = artists.id)
            "#,
        )
        .execute(&mut *tx.tx)
        .await?
        .rows_affected();

        tx.tx.commit().await?;

        let report = OrphanReport {
            tracks,
            releases,
            artists,
        };
        debug!(?report, "Pruned orphaned catalog entities");
        Ok(report)
    }
}

impl SqliteCatalogTransaction {
    /// Insert an entity row and its primary alias under a savepoint so a
    /// conflicting alias leaves nothing behind.
    async fn insert_with_primary_alias<'q>(
        &mut self,
        kind: EntityKind,
        entity_id: &str,
        name: &str,
        insert_entity: Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> Result<()> {
        let mut savepoint = Connection::begin(&mut *self.tx).await?;

        let result = match insert_entity.execute(&mut *savepoint).await {
            Ok(_) => {
                insert_alias(
                    &mut savepoint,
                    kind,
                    entity_id,
                    name,
                    AliasSource::Canonical,
                    true,
                )
                .await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                savepoint.commit().await?;
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = savepoint.rollback().await {
                    warn!(error = %rollback_err, "Failed to roll back savepoint");
                }
                Err(write_error(err, kind, name))
            }
        }
    }

    async fn find_scoped_by_alias<T>(
        &mut self,
        kind: EntityKind,
        link_table: &str,
        normalized: &str,
        artist_ids: &[ArtistId],
    ) -> Result<Option<T>>
    where
        T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin,
    {
        if artist_ids.is_empty() {
            return Ok(None);
        }

        let id_column = kind.id_column();
        let sql = format!(
            "SELECT e.* FROM {entity} e \
             INNER JOIN {aliases} al ON al.{id_column} = e.id \
             WHERE al.normalized_alias = ? \
               AND EXISTS (SELECT 1 FROM {link} l WHERE l.{id_column} = e.id AND l.artist_id IN ({ids})) \
             ORDER BY e.created_at ASC, e.id ASC LIMIT 1",
            entity = kind.entity_table(),
            aliases = kind.alias_table(),
            id_column = id_column,
            link = link_table,
            ids = placeholders(artist_ids.len()),
        );

        let mut q = query_as::<_, T>(&sql).bind(normalized);
        for id in artist_ids {
            q = q.bind(id);
        }
        Ok(q.fetch_optional(&mut *self.tx).await?)
    }
}

#[async_trait]
impl CatalogTransaction for SqliteCatalogTransaction {
    async fn find_artist_by_alias(&mut self, normalized: &str) -> Result<Option<Artist>> {
        let artist = query_as::<_, Artist>(
            r#"
            SELECT a.* FROM artists a
            INNER JOIN artist_aliases al ON al.artist_id = a.id
            WHERE al.normalized_alias = ?
            LIMIT 1
            "#,
        )
        .bind(normalized)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(artist)
    }

    async fn find_artist_by_external_id(&mut self, musicbrainz_id: &str) -> Result<Option<Artist>> {
        let artist = query_as::<_, Artist>("SELECT * FROM artists WHERE musicbrainz_id = ?")
            .bind(musicbrainz_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(artist)
    }

    async fn find_release_by_alias(
        &mut self,
        normalized: &str,
        artist_ids: &[ArtistId],
    ) -> Result<Option<Release>> {
        self.find_scoped_by_alias(EntityKind::Release, "artist_releases", normalized, artist_ids)
            .await
    }

    async fn find_release_by_external_id(&mut self, musicbrainz_id: &str) -> Result<Option<Release>> {
        let release = query_as::<_, Release>("SELECT * FROM releases WHERE musicbrainz_id = ?")
            .bind(musicbrainz_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(release)
    }

    async fn find_track_by_alias(
        &mut self,
        normalized: &str,
        artist_ids: &[ArtistId],
    ) -> Result<Option<Track>> {
        self.find_scoped_by_alias(EntityKind::Track, "artist_tracks", normalized, artist_ids)
            .await
    }

    async fn find_track_by_external_id(&mut self, musicbrainz_id: &str) -> Result<Option<Track>> {
        let track = query_as::<_, Track>("SELECT * FROM tracks WHERE musicbrainz_id = ?")
            .bind(musicbrainz_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(track)
    }

    async fn create_artist(&mut self, artist: &Artist) -> Result<()> {
        artist.validate().map_err(|e| invalid("Artist", e))?;

        let insert = query(
            r#"
            INSERT INTO artists (id, musicbrainz_id, name, image_url, image_source, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&artist.id)
        .bind(&artist.musicbrainz_id)
        .bind(&artist.name)
        .bind(&artist.image_url)
        .bind(&artist.image_source)
        .bind(artist.created_at)
        .bind(artist.updated_at);

        self.insert_with_primary_alias(EntityKind::Artist, artist.id.as_str(), &artist.name, insert)
            .await
    }

    async fn create_release(&mut self, release: &Release) -> Result<()> {
        release.validate().map_err(|e| invalid("Release", e))?;

        let insert = query(
            r#"
            INSERT INTO releases (id, musicbrainz_id, title, image_url, image_source, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&release.id)
        .bind(&release.musicbrainz_id)
        .bind(&release.title)
        .bind(&release.image_url)
        .bind(&release.image_source)
        .bind(release.created_at)
        .bind(release.updated_at);

        self.insert_with_primary_alias(
            EntityKind::Release,
            release.id.as_str(),
            &release.title,
            insert,
        )
        .await
    }

    async fn create_track(&mut self, track: &Track) -> Result<()> {
        track.validate().map_err(|e| invalid("Track", e))?;

        let insert = query(
            r#"
            INSERT INTO tracks (id, musicbrainz_id, title, duration_secs, release_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&track.id)
        .bind(&track.musicbrainz_id)
        .bind(&track.title)
        .bind(track.duration_secs)
        .bind(&track.release_id)
        .bind(track.created_at)
        .bind(track.updated_at);

        self.insert_with_primary_alias(EntityKind::Track, track.id.as_str(), &track.title, insert)
            .await
    }

    async fn add_alias(&mut self, entity: &EntityRef, alias: &str, source: AliasSource) -> Result<bool> {
        add_secondary_alias(&mut self.tx, entity, alias, source).await
    }

    async fn set_external_id(&mut self, entity: &EntityRef, musicbrainz_id: &str) -> Result<()> {
        let kind = entity.kind();
        let sql = format!(
            "UPDATE {} SET musicbrainz_id = ?, updated_at = ? WHERE id = ? AND musicbrainz_id IS NULL",
            kind.entity_table()
        );
        query(&sql)
            .bind(musicbrainz_id)
            .bind(Utc::now().timestamp())
            .bind(entity.id())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| write_error(e, kind, musicbrainz_id))?;
        Ok(())
    }

    async fn link_artist_release(&mut self, artist_id: &ArtistId, release_id: &ReleaseId) -> Result<()> {
        query("INSERT OR IGNORE INTO artist_releases (artist_id, release_id) VALUES (?, ?)")
            .bind(artist_id)
            .bind(release_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn link_artist_track(&mut self, artist_id: &ArtistId, track_id: &TrackId) -> Result<()> {
        query("INSERT OR IGNORE INTO artist_tracks (artist_id, track_id) VALUES (?, ?)")
            .bind(artist_id)
            .bind(track_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn set_track_release(&mut self, track_id: &TrackId, release_id: &ReleaseId) -> Result<()> {
        query("UPDATE tracks SET release_id = ?, updated_at = ? WHERE id = ? AND release_id IS NULL")
            .bind(release_id)
            .bind(Utc::now().timestamp())
            .bind(track_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_listen(&mut self, listen: &NewListen) -> Result<ListenInsert> {
        let row = Listen {
            id: ListenId::new(),
            track_id: listen.track_id.clone(),
            user_id: listen.user_id,
            client: listen.client.clone(),
            listened_at: listen.listened_at.timestamp(),
            duration_secs: listen.duration_secs.max(0),
            created_at: Utc::now().timestamp(),
        };

        let result = query(
            r#"
            INSERT INTO listens (id, track_id, user_id, client, listened_at, duration_secs, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, track_id, listened_at) DO NOTHING
            "#,
        )
        .bind(&row.id)
        .bind(&row.track_id)
        .bind(row.user_id)
        .bind(&row.client)
        .bind(row.listened_at)
        .bind(row.duration_secs)
        .bind(row.created_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(ListenInsert::Duplicate);
        }
        Ok(ListenInsert::Inserted(row))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        let this = *self;
        this.tx.rollback().await?;
        Ok(())
    }
}
