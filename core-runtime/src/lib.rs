//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the listen-history core:
//! - Logging and tracing setup
//! - The configuration value handed to every component
//! - Event bus for import progress, new listens and artwork updates

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
