//! # Client-Credentials Token Manager
//!
//! Caches provider access tokens obtained through the OAuth 2.0
//! client-credentials grant and refreshes them shortly before they expire.
//!
//! ## Usage
//!
//! ```no_run
//! use core_auth::{ClientCredentials, ClientCredentialsManager, TokenEndpoint};
//! use bridge_traits::{HttpClient, SystemClock};
//! use std::sync::Arc;
//!
//! # async fn example(http_client: Arc<dyn HttpClient>) -> core_auth::Result<()> {
//! let manager = ClientCredentialsManager::new(http_client, Arc::new(SystemClock))
//!     .with_provider(
//!         "spotify",
//!         TokenEndpoint::new(
//!             "https://accounts.spotify.com/api/token",
//!             ClientCredentials::new("client-id", "client-secret"),
//!         ),
//!     );
//!
//! let token = manager.access_token("spotify").await?;
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::{AccessToken, TokenEndpoint, TokenResponse};
use bridge_traits::{Clock, HttpClient, HttpMethod, HttpRequest};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, instrument, warn};

/// Spotify accounts service token endpoint
pub const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Refresh a token this long before it expires (5 minutes)
pub const TOKEN_REFRESH_BUFFER: Duration = Duration::from_secs(300);

/// Upper bound on a single token exchange, retries included
const DEFAULT_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_EXCHANGE_ATTEMPTS: u32 = 3;

/// Token cache with single-flight refresh per provider.
///
/// Concurrent callers that find the token stale queue behind one refresh
/// lock and re-check the cache once they hold it, so a burst of requests
/// against an expired token produces exactly one token-endpoint call.
pub struct ClientCredentialsManager {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    endpoints: HashMap<String, TokenEndpoint>,
    tokens: RwLock<HashMap<String, AccessToken>>,
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    exchange_timeout: Duration,
}

impl ClientCredentialsManager {
    pub fn new(http_client: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http_client,
            clock,
            endpoints: HashMap::new(),
            tokens: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
            exchange_timeout: DEFAULT_EXCHANGE_TIMEOUT,
        }
    }

    /// Register the token endpoint used for `provider`.
    pub fn with_provider(mut self, provider: impl Into<String>, endpoint: TokenEndpoint) -> Self {
        self.endpoints.insert(provider.into(), endpoint);
        self
    }

    pub fn with_exchange_timeout(mut self, exchange_timeout: Duration) -> Self {
        self.exchange_timeout = exchange_timeout;
        self
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.endpoints.contains_key(provider)
    }

    /// Return a valid access token for `provider`, refreshing if needed.
    ///
    /// # Errors
    ///
    /// - `AuthError::MissingCredentials` if no endpoint is registered
    /// - `AuthError::TokenExchange` if the endpoint rejects the request
    /// - `AuthError::OperationTimeout` if the exchange does not finish in time
    #[instrument(skip(self))]
    pub async fn access_token(&self, provider: &str) -> Result<String> {
        if let Some(token) = self.cached_token(provider).await {
            return Ok(token);
        }

        let refresh_lock = {
            let mut locks = self.refresh_locks.lock().await;
            locks
                .entry(provider.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let _guard = refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.cached_token(provider).await {
            debug!("Token refreshed by concurrent caller");
            return Ok(token);
        }

        let endpoint = self
            .endpoints
            .get(provider)
            .ok_or_else(|| AuthError::MissingCredentials(provider.to_string()))?;

        info!("Token missing or expiring soon, requesting a new one");

        let fresh = match timeout(self.exchange_timeout, self.exchange(provider, endpoint)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Token exchange timed out");
                return Err(AuthError::OperationTimeout {
                    operation: format!("{} token exchange", provider),
                });
            }
        };

        let access_token = fresh.token.clone();
        self.tokens.write().await.insert(provider.to_string(), fresh);
        Ok(access_token)
    }

    /// Drop the cached token so the next call refreshes.
    ///
    /// Used after an API call is answered with 401.
    pub async fn invalidate(&self, provider: &str) {
        if self.tokens.write().await.remove(provider).is_some() {
            debug!(provider, "Cached token invalidated");
        }
    }

    async fn cached_token(&self, provider: &str) -> Option<String> {
        let buffer = chrono::Duration::seconds(TOKEN_REFRESH_BUFFER.as_secs() as i64);
        let now = self.clock.now();
        self.tokens
            .read()
            .await
            .get(provider)
            .filter(|token| !token.is_expired_with_buffer(now, buffer))
            .map(|token| token.token.clone())
    }

    async fn exchange(&self, provider: &str, endpoint: &TokenEndpoint) -> Result<AccessToken> {
        let credentials = &endpoint.credentials;
        let mut attempts = 0;

        loop {
            attempts += 1;

            let request = HttpRequest::new(HttpMethod::Post, endpoint.token_url.clone())
                .basic_auth(&credentials.client_id, &credentials.client_secret)
                .form(&[("grant_type", "client_credentials")])?;

            let issued_at = self.clock.now();
            let response = self.http_client.execute(request).await?;

            if response.is_success() {
                let body: TokenResponse = response
                    .json()
                    .map_err(|e| AuthError::InvalidTokenResponse(e.to_string()))?;
                if body.access_token.is_empty() {
                    return Err(AuthError::InvalidTokenResponse(
                        "empty access_token".to_string(),
                    ));
                }

                info!(expires_in = body.expires_in, "Obtained access token");
                return Ok(AccessToken::new(body.access_token, issued_at, body.expires_in));
            }

            let status = response.status;
            let body = response
                .text()
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            if response.is_client_error() || attempts >= MAX_EXCHANGE_ATTEMPTS {
                warn!(status, attempts, "Token exchange failed");
                return Err(AuthError::TokenExchange {
                    provider: provider.to_string(),
                    status,
                    body,
                });
            }

            let delay = Duration::from_millis(100 * 2u64.pow(attempts - 1));
            warn!(
                status,
                attempts,
                delay_ms = delay.as_millis() as u64,
                "Token exchange failed, retrying"
            );
            sleep(delay).await;
        }
    }
}
