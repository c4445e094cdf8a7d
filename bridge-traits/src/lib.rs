//! # Host Bridge Traits
//!
//! Capabilities the listen-history core consumes from its host but never
//! implements itself.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Async HTTP for provider search and token calls
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! Desktop/server adapters live in `bridge-desktop`. Tests substitute
//! scripted implementations of the same traits.
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Adapters
//! convert transport-specific failures into it and keep the message actionable
//! (URL, status, timeout).
//!
//! ## Example
//!
//! ```ignore
//! use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MyHttpClient {
//!     client: reqwest::Client,
//! }
//!
//! #[async_trait]
//! impl HttpClient for MyHttpClient {
//!     async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
//!         // Implementation
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{Clock, ManualClock, SystemClock};
