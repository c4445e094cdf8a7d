//! # Listen Ingestion Module
//!
//! Turns playback events into stored listens.
//!
//! ## Overview
//!
//! This module manages:
//! - Resolving free-text names to canonical artists, releases and tracks
//! - Recording a listen together with its resolution in one transaction
//! - Fetching missing artwork in the background after a listen is stored
//! - Replaying streaming-history exports with filtering and throttling
//!
//! ## Components
//!
//! - **Entity Resolver** (`resolver`): per-name locking, alias and provider-id lookup
//! - **Listen Ingestor** (`ingest`): validation, resolution, insert, events
//! - **Artwork Scheduler** (`artwork`): cancellable best-effort enrichment tasks
//! - **Bulk Importer** (`import`): export file filtering and fail-fast replay

pub mod artwork;
pub mod error;
pub mod import;
pub mod ingest;
pub mod resolver;

pub use artwork::ArtworkScheduler;
pub use error::{IngestError, Result};
pub use import::{BulkImporter, ImportReport, StreamingHistoryRecord, COMPLETED_REASON};
pub use ingest::{ListenIngestor, SkipReason, SubmitListen, SubmitOutcome};
pub use resolver::{
    ArtistCredit, EntityNames, EntityResolver, ResolutionScope, ResolvedIds,
};
pub use tokio_util::sync::CancellationToken;
