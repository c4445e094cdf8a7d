//! # Core Configuration Module
//!
//! Explicit configuration value for the listen-history core.
//!
//! ## Overview
//!
//! [`CoreConfig`] is built once through [`CoreConfigBuilder`], validated, and
//! then handed to each component's constructor. Nothing in the core reads
//! environment variables or global state; the host decides where values come
//! from and passes them in here.
//!
//! ## Sections
//!
//! - [`ImportConfig`] - bulk import window, throttle and artwork policy
//! - [`RequestQueueConfig`] - concurrency and queue depth for provider calls
//! - [`ProviderConfig`] - provider credentials and user agent
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, ImportConfig, ProviderConfig};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/var/lib/listens/listens.db")
//!     .data_dir("/var/lib/listens")
//!     .import_config(ImportConfig::new().with_throttle_ms(250))
//!     .provider_config(
//!         ProviderConfig::new().with_spotify_credentials("client-id", "client-secret"),
//!     )
//!     .build()?;
//! # Ok::<(), core_runtime::Error>(())
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Client label attached to listens replayed from a streaming-history export.
pub const DEFAULT_IMPORT_CLIENT: &str = "spotify";

/// Core configuration for the listen-history core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite catalog database
    pub database_path: PathBuf,

    /// Base data directory; import files are read from `<data_dir>/import`
    pub data_dir: PathBuf,

    /// HTTP client for provider calls (desktop default: reqwest)
    pub http_client: Option<Arc<dyn HttpClient>>,

    /// Time source (defaults to the system clock)
    pub clock: Option<Arc<dyn Clock>>,

    /// Feature flags
    pub features: FeatureFlags,

    /// Bulk import behaviour
    pub import: ImportConfig,

    /// Bounded request queue sizing
    pub request_queue: RequestQueueConfig,

    /// External artwork provider settings
    pub providers: ProviderConfig,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("data_dir", &self.data_dir)
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field("clock", &self.clock.as_ref().map(|_| "Clock { ... }"))
            .field("features", &self.features)
            .field("import", &self.import)
            .field("request_queue", &self.request_queue)
            .field("providers", &self.providers)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Fetch artist/album artwork from remote providers after a listen is stored
    pub enable_artwork_remote: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_artwork_remote: true,
        }
    }
}

/// Bulk import settings.
///
/// The time window is half-open: a record is kept when
/// `window_start <= ts < window_end`, with either bound optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    /// Earliest accepted timestamp (inclusive)
    pub window_start: Option<DateTime<Utc>>,

    /// Latest accepted timestamp (exclusive)
    pub window_end: Option<DateTime<Utc>>,

    /// Delay inserted after every submitted record, in milliseconds
    pub throttle_ms: u64,

    /// Whether imported listens schedule artwork fetches
    pub fetch_images_during_import: bool,

    /// Log and skip failed records instead of aborting the file
    pub continue_on_error: bool,

    /// Client label recorded on imported listens
    pub client_label: String,

    /// User the imported listens belong to
    pub user_id: i64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportConfig {
    pub fn new() -> Self {
        Self {
            window_start: None,
            window_end: None,
            throttle_ms: 0,
            fetch_images_during_import: false,
            continue_on_error: false,
            client_label: DEFAULT_IMPORT_CLIENT.to_string(),
            user_id: 1,
        }
    }

    pub fn with_window(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.window_start = start;
        self.window_end = end;
        self
    }

    pub fn with_throttle_ms(mut self, throttle_ms: u64) -> Self {
        self.throttle_ms = throttle_ms;
        self
    }

    pub fn with_fetch_images(mut self, enabled: bool) -> Self {
        self.fetch_images_during_import = enabled;
        self
    }

    pub fn with_continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = enabled;
        self
    }

    pub fn with_client_label(mut self, label: impl Into<String>) -> Self {
        self.client_label = label.into();
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = user_id;
        self
    }

    /// Throttle delay, if any
    pub fn throttle(&self) -> Option<Duration> {
        (self.throttle_ms > 0).then(|| Duration::from_millis(self.throttle_ms))
    }

    /// Returns true if `ts` falls inside the configured window
    pub fn in_window(&self, ts: DateTime<Utc>) -> bool {
        let after_start = self.window_start.map_or(true, |start| ts >= start);
        let before_end = self.window_end.map_or(true, |end| ts < end);
        after_start && before_end
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.window_start, self.window_end) {
            if start >= end {
                return Err(Error::Config(format!(
                    "Import window start ({}) must be before end ({})",
                    start, end
                )));
            }
        }

        if self.throttle_ms > 60_000 {
            return Err(Error::Config(
                "Import throttle exceeds maximum of 60 seconds (60,000ms)".to_string(),
            ));
        }

        if self.client_label.trim().is_empty() {
            return Err(Error::Config(
                "Import client label cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// Sizing for the bounded request queue in front of every provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestQueueConfig {
    /// Maximum tasks executing at once
    pub max_concurrent: usize,

    /// Maximum submissions waiting for a free slot
    pub max_queued: usize,
}

impl Default for RequestQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_queued: 5,
        }
    }
}

impl RequestQueueConfig {
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        Self {
            max_concurrent,
            max_queued,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(Error::Config(
                "Request queue concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent > 256 {
            return Err(Error::Config(
                "Request queue concurrency exceeds maximum of 256".to_string(),
            ));
        }

        Ok(())
    }
}

/// External artwork provider configuration.
///
/// Credentials should be injected by the host; never compile them in.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Spotify client-credentials id
    pub spotify_client_id: Option<String>,

    /// Spotify client-credentials secret
    pub spotify_client_secret: Option<String>,

    /// Query Deezer (no credentials required)
    pub enable_deezer: bool,

    /// User agent sent with provider requests
    pub user_agent: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("spotify_client_id", &self.spotify_client_id)
            .field(
                "spotify_client_secret",
                &self.spotify_client_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("enable_deezer", &self.enable_deezer)
            .field("user_agent", &self.user_agent)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self {
            spotify_client_id: None,
            spotify_client_secret: None,
            enable_deezer: true,
            user_agent: concat!("listen-core/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 15,
        }
    }

    pub fn with_spotify_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.spotify_client_id = Some(client_id.into());
        self.spotify_client_secret = Some(client_secret.into());
        self
    }

    pub fn with_deezer(mut self, enabled: bool) -> Self {
        self.enable_deezer = enabled;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Checks if Spotify credentials are configured
    pub fn has_spotify(&self) -> bool {
        matches!(
            (&self.spotify_client_id, &self.spotify_client_secret),
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty()
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        if self.spotify_client_id.is_some() != self.spotify_client_secret.is_some() {
            return Err(Error::Config(
                "Spotify client id and secret must be provided together".to_string(),
            ));
        }

        if self.user_agent.trim().is_empty() {
            return Err(Error::Config("Provider user agent cannot be empty".to_string()));
        }

        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "Provider request timeout must be greater than 0 seconds".to_string(),
            ));
        }

        Ok(())
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Directory bulk-import files are read from
    pub fn import_dir(&self) -> PathBuf {
        self.data_dir.join("import")
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.data_dir.as_os_str().is_empty() {
            return Err(Error::Config("Data directory cannot be empty".to_string()));
        }

        self.import.validate()?;
        self.request_queue.validate()?;
        self.providers.validate()?;

        if self.features.enable_artwork_remote && self.http_client.is_none() {
            return Err(Error::CapabilityMissing {
                capability: "HttpClient".to_string(),
                message: "Remote artwork is enabled but no HttpClient was provided. \
                         Inject one (bridge-desktop: ReqwestHttpClient) or disable \
                         enable_artwork_remote."
                    .to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    features: Option<FeatureFlags>,
    import: Option<ImportConfig>,
    request_queue: Option<RequestQueueConfig>,
    providers: Option<ProviderConfig>,
}

impl CoreConfigBuilder {
    /// Sets the SQLite database path.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the data directory. Defaults to the database file's parent.
    pub fn data_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enables or disables remote artwork fetching.
    ///
    /// Default: true
    pub fn enable_artwork_remote(mut self, enabled: bool) -> Self {
        self.features
            .get_or_insert_with(FeatureFlags::default)
            .enable_artwork_remote = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = Some(features);
        self
    }

    pub fn import_config(mut self, config: ImportConfig) -> Self {
        self.import = Some(config);
        self
    }

    pub fn request_queue(mut self, config: RequestQueueConfig) -> Self {
        self.request_queue = Some(config);
        self
    }

    pub fn provider_config(mut self, config: ProviderConfig) -> Self {
        self.providers = Some(config);
        self
    }

    /// Builds and validates the final `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when a required value is missing or a section
    /// fails validation, and `Error::CapabilityMissing` when a feature needs a
    /// bridge that was not injected.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let data_dir = match self.data_dir {
            Some(dir) => dir,
            None => database_path
                .parent()
                .map(PathBuf::from)
                .filter(|p| !p.as_os_str().is_empty())
                .ok_or_else(|| {
                    Error::Config(
                        "Data directory is required when the database path has no parent. \
                         Use .data_dir() to set it."
                            .to_string(),
                    )
                })?,
        };

        let config = CoreConfig {
            database_path,
            data_dir,
            http_client: self.http_client,
            clock: self.clock,
            features: self.features.unwrap_or_default(),
            import: self.import.unwrap_or_default(),
            request_queue: self.request_queue.unwrap_or_default(),
            providers: self.providers.unwrap_or_default(),
        };

        config.validate()?;

        Ok(config)
    }
}
