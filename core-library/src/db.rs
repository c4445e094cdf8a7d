//! # Database Connection Pool Module
//!
//! SQLite connection pooling for the catalog.
//!
//! ## Features
//!
//! - **WAL Mode**: readers never block the writer
//! - **Foreign Keys**: enforced, alias and link rows cascade with their entity
//! - **Busy Timeout**: a connection waits for the write lock instead of failing
//! - **Automatic Migrations**: embedded with `sqlx::migrate!` and run on creation
//! - **Health Checks**: `SELECT 1` before the pool is handed out
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("/var/lib/listens/listens.db")).await?;
//! ```
//!
//! Tests use an in-memory database:
//!
//! ```rust,ignore
//! let pool = core_library::db::create_test_pool().await?;
//! ```

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Database configuration for SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Maximum time to wait for a connection from the pool
    pub acquire_timeout: Duration,

    /// How long a connection waits on SQLite's write lock
    pub busy_timeout: Duration,

    /// Maximum lifetime of a connection
    pub max_lifetime: Option<Duration>,

    /// Maximum idle time for a connection before being closed
    pub idle_timeout: Option<Duration>,

    /// Prepared statements cached per connection
    pub statement_cache_capacity: usize,
}

impl DatabaseConfig {
    /// Configuration for a database file, created if missing.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        let database_url = format!("sqlite:{}", path.display());

        Self {
            database_url,
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(10),
            max_lifetime: Some(Duration::from_secs(1800)),
            idle_timeout: Some(Duration::from_secs(600)),
            statement_cache_capacity: 100,
        }
    }

    /// In-memory database.
    ///
    /// Every SQLite connection to `:memory:` opens its own private database, so
    /// the pool is pinned to one connection that is never recycled.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(10),
            max_lifetime: None,
            idle_timeout: None,
            statement_cache_capacity: 100,
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url.contains(":memory:")
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Ignored for in-memory databases, which stay at one connection.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Create a configured SQLite connection pool, run migrations and check health.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, migrations fail or the
/// health check query fails.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(LibraryError::Database)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(config.busy_timeout)
        .pragma("cache_size", "-16000")
        .statement_cache_capacity(config.statement_cache_capacity);

    let (max_connections, max_lifetime, idle_timeout) = if config.is_in_memory() {
        (1, None, None)
    } else {
        (
            config.max_connections.max(1),
            config.max_lifetime,
            config.idle_timeout,
        )
    };

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections.min(max_connections))
        .max_connections(max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(max_lifetime)
        .idle_timeout(idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            LibraryError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    info!(connections = pool.size(), "Database connection pool ready");
    Ok(pool)
}

/// In-memory pool with migrations applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    debug!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Migration failed");
            LibraryError::Migration(e.to_string())
        })?;

    debug!("Database migrations completed");
    Ok(())
}

async fn health_check(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        LibraryError::Database(e)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_test_pool() {
        let pool = create_test_pool().await;
        assert!(pool.is_ok(), "Should create test pool successfully");
    }

    #[tokio::test]
    async fn test_in_memory_pool_is_single_connection() {
        let config = DatabaseConfig::in_memory().max_connections(8);
        let pool = create_pool(config).await.unwrap();

        // Writes through one handle are visible through every clone.
        sqlx::query("INSERT INTO artists (id, name, created_at, updated_at) VALUES ('a', 'A', 0, 0)")
            .execute(&pool)
            .await
            .unwrap();
        let clone = pool.clone();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM artists")
            .fetch_one(&clone)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_test_pool().await.unwrap();

        let result: (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();

        assert_eq!(result.0, 1, "Foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_file_pool_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(DatabaseConfig::new(dir.path().join("listens.db")))
            .await
            .unwrap();

        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let pool = create_test_pool().await.unwrap();

        for table in [
            "artists",
            "artist_aliases",
            "releases",
            "release_aliases",
            "tracks",
            "track_aliases",
            "artist_releases",
            "artist_tracks",
            "listens",
        ] {
            let (count,): (i32,) = sqlx::query_as(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = ?",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "{} table should exist", table);
        }
    }

    #[test]
    fn test_database_config_builder() {
        let config = DatabaseConfig::new("/tmp/listens.db")
            .min_connections(2)
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(60))
            .busy_timeout(Duration::from_secs(2));

        assert_eq!(config.database_url, "sqlite:/tmp/listens.db");
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.busy_timeout, Duration::from_secs(2));
        assert!(!config.is_in_memory());
        assert!(DatabaseConfig::in_memory().is_in_memory());
    }
}
