//! # Authentication Module
//!
//! Client-credentials token management for metadata providers.
//!
//! ## Overview
//!
//! Metadata providers such as Spotify authenticate server-to-server with the
//! OAuth 2.0 client-credentials grant. This crate exchanges the configured
//! id/secret pair for a bearer token, caches it with its expiry, and refreshes
//! it transparently once it comes within [`TOKEN_REFRESH_BUFFER`] of expiring.
//!
//! ## Features
//!
//! - Basic-auth token exchange with retry on 5xx
//! - Expiry tracked against an injectable [`bridge_traits::Clock`]
//! - Single-flight refresh per provider
//! - Secrets redacted from `Debug` output

pub mod error;
pub mod manager;
pub mod types;

pub use error::{AuthError, Result};
pub use manager::{ClientCredentialsManager, SPOTIFY_TOKEN_URL, TOKEN_REFRESH_BUFFER};
pub use types::{AccessToken, ClientCredentials, TokenEndpoint};
