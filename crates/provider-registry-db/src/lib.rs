//! Database layer for the Provider Registry
//!
//! This crate persists providers, their indexed versions, platform binaries
//! and namespace GPG keys:
//! - Connection pool management with SQLx
//! - Session and store trait abstractions with nested transaction scopes
//! - PostgreSQL implementation driven by `BEGIN` / `SAVEPOINT`
//! - In-memory implementation with the same scope semantics
//! - Database migrations
//!
//! # Example
//!
//! ```rust,no_run
//! use provider_registry_db::{create_pool, PoolConfig, PostgresProviderStore, ProviderStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PoolConfig::new("postgres://localhost/provider_registry").max_connections(10);
//! let pool = create_pool(&config).await?;
//! let store = PostgresProviderStore::new(pool);
//!
//! let mut session = store.session().await?;
//! session.begin().await?;
//! let provider = session.find_provider("hashicorp", "aws").await?;
//! session.rollback().await?;
//! # Ok(())
//! # }
//! ```

// Re-export core domain types for convenience
pub use provider_registry_core;

// Public modules
pub mod error;
pub mod memory;
pub mod pool;
pub mod postgres;
pub mod store;
pub mod transaction;

// Re-exports for convenience
pub use error::{DbError, DbResult};
pub use memory::{InMemoryProviderStore, InMemorySession};
pub use pool::{create_pool, mask_password, run_migrations, verify_schema, PoolConfig, INGESTION_TABLES};
pub use postgres::{PostgresProviderStore, PostgresSession};
pub use store::{ProviderStore, StoreSession};
pub use transaction::{TransactionCommand, TransactionStack};

// Re-export sqlx types that users may need
pub use sqlx::postgres::PgPool;

/// Default database URL environment variable name
pub const DEFAULT_DATABASE_URL_ENV: &str = "DATABASE_URL";
