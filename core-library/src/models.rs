//! Domain models for the listen catalog
//!
//! Artists, releases and tracks are canonical entities reached through
//! case-insensitive aliases. Listens reference an already-resolved track.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Longest name or alias the catalog accepts, in characters.
pub const MAX_NAME_CHARS: usize = 1024;

// =============================================================================
// ID Types
// =============================================================================

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
        #[sqlx(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

entity_id!(
    /// Unique identifier for an artist
    ArtistId
);
entity_id!(
    /// Unique identifier for a release (album, single, EP)
    ReleaseId
);
entity_id!(
    /// Unique identifier for a track
    TrackId
);
entity_id!(
    /// Unique identifier for a stored listen
    ListenId
);

// =============================================================================
// Names and aliases
// =============================================================================

/// Comparison key for a free-text name.
///
/// Trims and case-folds; the stored display name keeps its original casing
/// and script.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Reject names that cannot be stored as an alias.
pub fn validate_name(field: &str, name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err(format!("{} cannot be empty", field));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(format!(
            "{} exceeds {} characters",
            field, MAX_NAME_CHARS
        ));
    }
    Ok(())
}

/// Catalog entity kinds that carry aliases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Artist,
    Release,
    Track,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist",
            EntityKind::Release => "release",
            EntityKind::Track => "track",
        }
    }

    pub(crate) fn alias_table(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist_aliases",
            EntityKind::Release => "release_aliases",
            EntityKind::Track => "track_aliases",
        }
    }

    pub(crate) fn id_column(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artist_id",
            EntityKind::Release => "release_id",
            EntityKind::Track => "track_id",
        }
    }

    pub(crate) fn entity_table(&self) -> &'static str {
        match self {
            EntityKind::Artist => "artists",
            EntityKind::Release => "releases",
            EntityKind::Track => "tracks",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an alias-carrying entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Artist(ArtistId),
    Release(ReleaseId),
    Track(TrackId),
}

impl EntityRef {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityRef::Artist(_) => EntityKind::Artist,
            EntityRef::Release(_) => EntityKind::Release,
            EntityRef::Track(_) => EntityKind::Track,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            EntityRef::Artist(id) => id.as_str(),
            EntityRef::Release(id) => id.as_str(),
            EntityRef::Track(id) => id.as_str(),
        }
    }
}

/// Where an alias came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AliasSource {
    /// Name the entity was first created with
    Canonical,
    /// Alternate spelling seen in a submission matched by external id
    Submission,
    /// Added explicitly through the catalog API
    Manual,
}

impl AliasSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AliasSource::Canonical => "canonical",
            AliasSource::Submission => "submission",
            AliasSource::Manual => "manual",
        }
    }
}

impl FromStr for AliasSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "canonical" => Ok(AliasSource::Canonical),
            "submission" => Ok(AliasSource::Submission),
            "manual" => Ok(AliasSource::Manual),
            other => Err(format!("Unknown alias source: {}", other)),
        }
    }
}

/// Alternate name bound to an artist, release or track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Alias {
    pub entity_id: String,
    /// Name as it was submitted
    pub alias: String,
    /// Comparison key, see [`normalize_name`]
    pub normalized_alias: String,
    pub source: String,
    pub is_primary: bool,
}

impl Alias {
    pub fn source_kind(&self) -> Option<AliasSource> {
        self.source.parse().ok()
    }
}

// =============================================================================
// Domain Models
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Artist {
    pub id: ArtistId,
    /// Stable identifier from the metadata provider
    pub musicbrainz_id: Option<String>,
    /// Primary display name
    pub name: String,
    /// Cached artwork URL
    pub image_url: Option<String>,
    /// Provider the artwork came from
    pub image_source: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Artist {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: ArtistId::new(),
            musicbrainz_id: None,
            name: name.into(),
            image_url: None,
            image_source: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_name("Artist name", &self.name)
    }

    pub fn has_image(&self) -> bool {
        self.image_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Release {
    pub id: ReleaseId,
    pub musicbrainz_id: Option<String>,
    /// Primary title
    pub title: String,
    pub image_url: Option<String>,
    pub image_source: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Release {
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: ReleaseId::new(),
            musicbrainz_id: None,
            title: title.into(),
            image_url: None,
            image_source: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_name("Release title", &self.title)
    }

    pub fn has_image(&self) -> bool {
        self.image_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Track {
    pub id: TrackId,
    pub musicbrainz_id: Option<String>,
    /// Primary title
    pub title: String,
    /// Track length in seconds, 0 when unknown
    pub duration_secs: i64,
    pub release_id: Option<ReleaseId>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Track {
    pub fn new(title: impl Into<String>, duration_secs: i64, release_id: Option<ReleaseId>) -> Self {
        let now = Utc::now().timestamp();
        Self {
            id: TrackId::new(),
            musicbrainz_id: None,
            title: title.into(),
            duration_secs: duration_secs.max(0),
            release_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_name("Track title", &self.title)?;
        if self.duration_secs < 0 {
            return Err("Track duration cannot be negative".to_string());
        }
        Ok(())
    }
}

/// One recorded playback of a track by a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Listen {
    pub id: ListenId,
    pub track_id: TrackId,
    pub user_id: i64,
    /// Label of the submitting client ("spotify", "navidrome", ...)
    pub client: Option<String>,
    /// Unix epoch seconds of the playback
    pub listened_at: i64,
    /// Seconds actually played
    pub duration_secs: i64,
    pub created_at: i64,
}

impl Listen {
    pub fn listened_at_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.listened_at, 0).single()
    }
}

/// Listen about to be inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewListen {
    pub track_id: TrackId,
    pub user_id: i64,
    pub client: Option<String>,
    pub listened_at: DateTime<Utc>,
    pub duration_secs: i64,
}

/// Result of inserting a listen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenInsert {
    Inserted(Listen),
    /// Same user, track and timestamp already stored
    Duplicate,
}

/// Row counts across the catalog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogCounts {
    pub artists: i64,
    pub releases: i64,
    pub tracks: i64,
    pub listens: i64,
}

/// Rows removed by an orphan sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanReport {
    pub tracks: u64,
    pub releases: u64,
    pub artists: u64,
}
