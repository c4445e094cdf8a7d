//! # Event Bus System
//!
//! Typed notifications from the ingestion core over `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! Emitting never blocks and never fails the operation that produced the
//! event; a bus with no subscribers simply drops it. Hosts subscribe to drive
//! progress bars for imports, refresh caches when artwork arrives, or mirror
//! new listens to other systems.
//!
//! ```text
//! ┌──────────────┐    emit    ┌───────────┐   subscribe   ┌────────────┐
//! │ Ingest       ├───────────>│           ├──────────────>│ Subscriber │
//! └──────────────┘            │ EventBus  │               └────────────┘
//! ┌──────────────┐    emit    │           │   subscribe   ┌────────────┐
//! │ Bulk import  ├───────────>│           ├──────────────>│ Subscriber │
//! └──────────────┘            └───────────┘               └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, ImportEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Import(ImportEvent::Started {
//!         file: "history.json".to_string(),
//!         total_records: 3,
//!     }))
//!     .ok();
//!
//! let event = subscriber.recv().await.unwrap();
//! assert_eq!(event.description(), "Import started");
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell `n` events behind; it can keep reading.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Listen submission events
    Listen(ListenEvent),
    /// Catalog entity lifecycle
    Catalog(CatalogEvent),
    /// Bulk import progress
    Import(ImportEvent),
    /// Background artwork enrichment
    Artwork(ArtworkEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Listen(e) => e.description(),
            CoreEvent::Catalog(e) => e.description(),
            CoreEvent::Import(e) => e.description(),
            CoreEvent::Artwork(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Import(ImportEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Artwork(ArtworkEvent::Failed { .. }) => EventSeverity::Warning,
            CoreEvent::Import(ImportEvent::Cancelled { .. }) => EventSeverity::Warning,
            CoreEvent::Import(ImportEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Catalog(_) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Listen Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ListenEvent {
    /// A listen was durably stored.
    Recorded {
        listen_id: String,
        track_id: String,
        user_id: i64,
        client: String,
        /// Unix epoch seconds of the playback
        listened_at: i64,
    },
    /// A submission was dropped without error (empty names).
    Skipped { reason: String },
}

impl ListenEvent {
    fn description(&self) -> &str {
        match self {
            ListenEvent::Recorded { .. } => "Listen recorded",
            ListenEvent::Skipped { .. } => "Listen skipped",
        }
    }
}

// ============================================================================
// Catalog Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CatalogEvent {
    ArtistCreated { artist_id: String, name: String },
    ReleaseCreated { release_id: String, title: String },
    TrackCreated { track_id: String, title: String },
}

impl CatalogEvent {
    fn description(&self) -> &str {
        match self {
            CatalogEvent::ArtistCreated { .. } => "Artist created",
            CatalogEvent::ReleaseCreated { .. } => "Release created",
            CatalogEvent::TrackCreated { .. } => "Track created",
        }
    }
}

// ============================================================================
// Import Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ImportEvent {
    Started {
        file: String,
        total_records: u64,
    },
    Progress {
        file: String,
        processed: u64,
        submitted: u64,
        skipped: u64,
    },
    Completed {
        file: String,
        processed: u64,
        submitted: u64,
        skipped: u64,
        failed: u64,
        duration_secs: u64,
    },
    Failed {
        file: String,
        processed: u64,
        message: String,
    },
    Cancelled {
        file: String,
        processed: u64,
    },
}

impl ImportEvent {
    fn description(&self) -> &str {
        match self {
            ImportEvent::Started { .. } => "Import started",
            ImportEvent::Progress { .. } => "Import progress",
            ImportEvent::Completed { .. } => "Import completed",
            ImportEvent::Failed { .. } => "Import failed",
            ImportEvent::Cancelled { .. } => "Import cancelled",
        }
    }
}

// ============================================================================
// Artwork Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ArtworkEvent {
    /// An artwork URL was cached on an artist or release.
    Cached {
        entity_type: String,
        entity_id: String,
        provider: String,
        url: String,
    },
    /// Every provider was searched without a match.
    NotFound {
        entity_type: String,
        entity_id: String,
    },
    /// Enrichment failed; the listen itself is unaffected.
    Failed {
        entity_type: String,
        entity_id: String,
        message: String,
    },
}

impl ArtworkEvent {
    fn description(&self) -> &str {
        match self {
            ArtworkEvent::Cached { .. } => "Artwork cached",
            ArtworkEvent::NotFound { .. } => "Artwork not found",
            ArtworkEvent::Failed { .. } => "Artwork fetch failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel; clone freely, all clones share subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus that buffers `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a receiver for all future events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional predicate.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let imports = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Import(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
