//! # Metadata Providers Module
//!
//! Fetches artist and album artwork from external catalog services.
//!
//! ## Overview
//!
//! This module handles:
//! - Bounded, FIFO dispatch of outbound requests ([`queue`])
//! - Latin transliteration of names for search ([`romanize`])
//! - Ordered fallback search strategies and their executor ([`cascade`])
//! - Spotify and Deezer clients plus an ordered fallback chain ([`providers`])

pub mod cascade;
pub mod error;
pub mod providers;
pub mod queue;
pub mod romanize;

pub use cascade::{
    album_strategies, artist_strategies, run_cascade, Candidate, CascadeHit, SearchKind,
    SearchStrategy,
};
pub use error::{MetadataError, QueueError, Result};
pub use providers::{
    ArtworkMatch, ArtworkProvider, ArtworkProviderChain, DeezerProvider, SpotifyProvider,
};
pub use queue::RequestQueue;
pub use romanize::romanize;
