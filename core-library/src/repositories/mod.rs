//! # Catalog repositories
//!
//! - [`CatalogStore`]: pool-level reads plus small standalone writes
//! - [`CatalogTransaction`]: the unit of work used while resolving a submission
//! - [`SqliteCatalogStore`]: the SQLite implementation of both

pub mod catalog;
pub mod sqlite;

pub use catalog::{CatalogStore, CatalogTransaction};
pub use sqlite::{SqliteCatalogStore, SqliteCatalogTransaction};
