//! # tutorq-db
//!
//! Storage layer for the tutorq job queue.
//!
//! This crate provides:
//! - Connection pool management
//! - [`PgJobStore`], the `job_queue` table with `FOR UPDATE SKIP LOCKED` claims
//! - [`PgEntitySink`], the `generated_entity` table written by reconciliation
//! - In-memory equivalents for tests and database-free runs
//!
//! ## Example
//!
//! ```rust,ignore
//! use tutorq_db::{Database, JobStore, NewJob, JobType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/tutorq").await?;
//!     db.migrate().await?;
//!
//!     let stats = db.jobs.stats().await?;
//!     println!("pending: {}", stats.pending);
//!     Ok(())
//! }
//! ```
pub mod entities;
pub mod jobs;
pub mod memory;
pub mod pool;

// Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use tutorq_core::*;

pub use entities::PgEntitySink;
pub use jobs::{PgJobStore, LEASE_EXPIRED_ERROR};
pub use memory::{MemoryEntitySink, MemoryJobStore, StoredEntity};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};

/// Combined database context with all stores.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job queue table.
    pub jobs: PgJobStore,
    /// Generated entity table.
    pub entities: PgEntitySink,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: PgJobStore::new(pool.clone()),
            entities: PgEntitySink::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
