use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::fmt;

/// Client id/secret pair for an OAuth 2.0 client-credentials grant.
///
/// The `Debug` implementation redacts the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Token endpoint plus the credentials used against it
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    pub token_url: String,
    pub credentials: ClientCredentials,
}

impl TokenEndpoint {
    pub fn new(token_url: impl Into<String>, credentials: ClientCredentials) -> Self {
        Self {
            token_url: token_url.into(),
            credentials,
        }
    }
}

/// Cached bearer token.
///
/// # Security
///
/// `Debug` never prints the token itself.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, issued_at: DateTime<Utc>, expires_in_secs: i64) -> Self {
        Self {
            token: token.into(),
            expires_at: issued_at + Duration::seconds(expires_in_secs.max(0)),
        }
    }

    /// True when the token is expired or will expire within `buffer` of `now`.
    pub fn is_expired_with_buffer(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now + buffer >= self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Token endpoint response body
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}
