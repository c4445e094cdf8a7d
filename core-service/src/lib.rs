//! Core service façade and bootstrap helpers.
//!
//! [`CoreService`] wires a validated [`CoreConfig`] into the listen-history
//! core: it opens the catalog database, builds the request queue and the
//! artwork providers the configuration enables, and hands out the listen
//! ingestor and bulk importer. Desktop hosts typically enable the
//! `desktop-shims` feature and build their HTTP client with
//! [`desktop_http_client`].

pub mod error;

pub use error::{Result, ServiceError};

pub use core_ingest::{
    ArtistCredit, CancellationToken, ImportReport, SkipReason, SubmitListen, SubmitOutcome,
};
pub use core_runtime::config::{
    CoreConfig, FeatureFlags, ImportConfig, ProviderConfig, RequestQueueConfig,
};
pub use core_runtime::events::{CoreEvent, EventBus};
pub use core_runtime::logging::{init_logging, LogFormat, LogLevel, LoggingConfig};

use std::sync::Arc;

use bridge_traits::{Clock, SystemClock};
use core_auth::{ClientCredentials, ClientCredentialsManager, TokenEndpoint, SPOTIFY_TOKEN_URL};
use core_ingest::{ArtworkScheduler, BulkImporter, ListenIngestor};
use core_library::{create_pool, CatalogStore, DatabaseConfig, SqliteCatalogStore};
use core_metadata::providers::spotify::SPOTIFY_PROVIDER;
use core_metadata::{
    ArtworkProvider, ArtworkProviderChain, DeezerProvider, RequestQueue, SpotifyProvider,
};
use tracing::{info, instrument, warn};

/// HTTP client for desktop hosts, configured from the provider settings.
#[cfg(feature = "desktop-shims")]
pub fn desktop_http_client(
    providers: &ProviderConfig,
) -> Result<Arc<dyn bridge_traits::HttpClient>> {
    let client = bridge_desktop::ReqwestHttpClient::with_options(
        providers.request_timeout(),
        &providers.user_agent,
    )?;
    Ok(Arc::new(client))
}

/// Primary façade exposed to host applications.
pub struct CoreService {
    config: CoreConfig,
    store: Arc<SqliteCatalogStore>,
    queue: Arc<RequestQueue>,
    providers: Option<Arc<ArtworkProviderChain>>,
    ingestor: Arc<ListenIngestor>,
    importer: BulkImporter,
    events: EventBus,
}

impl CoreService {
    /// Open the catalog and build every component the configuration enables.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the import
    /// directory cannot be created or the database cannot be opened.
    #[instrument(skip_all, fields(database = %config.database_path.display()))]
    pub async fn new(config: CoreConfig, events: EventBus) -> Result<Self> {
        config.validate()?;

        let import_dir = config.import_dir();
        std::fs::create_dir_all(&import_dir).map_err(|e| {
            ServiceError::InitializationFailed(format!(
                "cannot create import directory {}: {}",
                import_dir.display(),
                e
            ))
        })?;

        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let store = Arc::new(SqliteCatalogStore::new(pool));

        let queue = Arc::new(RequestQueue::new(
            config.request_queue.max_concurrent,
            config.request_queue.max_queued,
        ));

        let providers = Self::build_providers(&config, &queue);
        let mut ingestor = ListenIngestor::new(store.clone(), events.clone());
        if let Some(chain) = &providers {
            ingestor = ingestor.with_artwork(ArtworkScheduler::new(
                store.clone(),
                chain.clone(),
                events.clone(),
            ));
        }
        let ingestor = Arc::new(ingestor);

        let importer = BulkImporter::new(
            Arc::clone(&ingestor),
            config.import.clone(),
            import_dir,
            events.clone(),
        );

        info!(
            providers = ?providers.as_ref().map(|chain| chain.provider_names()),
            "Core service ready"
        );

        Ok(Self {
            config,
            store,
            queue,
            providers,
            ingestor,
            importer,
            events,
        })
    }

    fn build_providers(
        config: &CoreConfig,
        queue: &Arc<RequestQueue>,
    ) -> Option<Arc<ArtworkProviderChain>> {
        if !config.features.enable_artwork_remote {
            return None;
        }
        let http = config.http_client.clone()?;
        let settings = &config.providers;
        let mut chain = ArtworkProviderChain::new(Vec::new());

        match (&settings.spotify_client_id, &settings.spotify_client_secret) {
            (Some(id), Some(secret)) if settings.has_spotify() => {
                let clock: Arc<dyn Clock> = config
                    .clock
                    .clone()
                    .unwrap_or_else(|| Arc::new(SystemClock));
                let auth = ClientCredentialsManager::new(http.clone(), clock).with_provider(
                    SPOTIFY_PROVIDER,
                    TokenEndpoint::new(
                        SPOTIFY_TOKEN_URL,
                        ClientCredentials::new(id.as_str(), secret.as_str()),
                    ),
                );
                chain.push(Arc::new(
                    SpotifyProvider::new(http.clone(), Arc::new(auth), Arc::clone(queue))
                        .with_user_agent(settings.user_agent.as_str())
                        .with_request_timeout(settings.request_timeout()),
                ));
            }
            _ => info!("Spotify credentials not configured, skipping Spotify artwork"),
        }

        if settings.enable_deezer {
            chain.push(Arc::new(
                DeezerProvider::new(http, Arc::clone(queue))
                    .with_user_agent(settings.user_agent.as_str())
                    .with_request_timeout(settings.request_timeout()),
            ));
        }

        if chain.is_empty() {
            warn!("Remote artwork enabled but no provider is configured");
            return None;
        }
        Some(Arc::new(chain))
    }

    /// Record a playback event. See [`ListenIngestor::submit`].
    pub async fn submit_listen(
        &self,
        listen: SubmitListen,
        cancel: &CancellationToken,
    ) -> Result<SubmitOutcome> {
        Ok(self.ingestor.submit(listen, cancel).await?)
    }

    /// Import `<data_dir>/import/<file_name>`. See [`BulkImporter::import_file`].
    pub async fn import_file(
        &self,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> Result<ImportReport> {
        Ok(self.importer.import_file(file_name, cancel).await?)
    }

    pub fn catalog(&self) -> Arc<dyn CatalogStore> {
        self.store.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Names of the artwork providers in fallback order
    pub fn artwork_providers(&self) -> Vec<&'static str> {
        self.providers
            .as_ref()
            .map(|chain| chain.provider_names())
            .unwrap_or_default()
    }

    /// Cancel background artwork, drain the request queue and close the
    /// database.
    pub async fn shutdown(&self) {
        info!("Shutting down core service");
        self.ingestor.shutdown().await;
        if let Some(chain) = &self.providers {
            chain.shutdown().await;
        }
        self.queue.shutdown().await;
        self.store.pool().close().await;
    }
}
