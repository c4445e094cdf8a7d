//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop and server hosts.
//!
//! - [`ReqwestHttpClient`] implements `HttpClient` with `reqwest` over rustls
//! - `SystemClock` from `bridge-traits` covers the `Clock` capability
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestHttpClient;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let http_client = Arc::new(ReqwestHttpClient::new()?);
//!     // Hand to the provider clients
//!     Ok(())
//! }
//! ```

mod http;

pub use http::ReqwestHttpClient;
