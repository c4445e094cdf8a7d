//! Self-hosted listen-history core.
//!
//! Re-exports the [`core_service`] façade so hosts can depend on a single
//! crate. Enable `desktop-shims` (on by default) for the reqwest-backed HTTP
//! client.

pub use core_service::*;
