//! # Listen Catalog
//!
//! Owns the canonical catalog database: artists, releases and tracks reached
//! through case-insensitive aliases, and the listens recorded against them.
//!
//! ## Overview
//!
//! - SQLite schema and embedded migrations ([`db`])
//! - Entity and alias models ([`models`])
//! - The [`CatalogStore`] / [`CatalogTransaction`] traits and their SQLite
//!   implementation ([`repositories`])
//!
//! ## Invariants
//!
//! - Every artist, release and track has exactly one primary alias.
//! - An artist alias (normalized) names at most one artist.
//! - A listen always references a stored track, and the same
//!   `(user, track, timestamp)` is stored once.

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use models::{
    normalize_name, Alias, AliasSource, Artist, ArtistId, CatalogCounts, EntityKind, EntityRef,
    Listen, ListenId, ListenInsert, NewListen, OrphanReport, Release, ReleaseId, Track, TrackId,
};
pub use repositories::{CatalogStore, CatalogTransaction, SqliteCatalogStore};
