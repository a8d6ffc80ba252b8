//! Connection pool for the ingestion store
//!
//! Opens the SQLx pool used by [`PostgresProviderStore`](crate::PostgresProviderStore),
//! applies the bundled migrations and checks that the ingestion tables exist
//! before any session is handed out.

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::ConnectOptions;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};

/// Tables an ingestion session reads or writes
pub const INGESTION_TABLES: &[&str] = &["provider", "provider_version", "provider_binary", "gpg_key"];

/// Pool settings for the indexer
///
/// Each provider refresh holds one connection for its whole run, so
/// `max_connections` bounds how many providers ingest concurrently.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub database_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    /// Wait for a free connection before failing
    pub connect_timeout: Duration,
    /// Log every SQL statement at debug level
    pub enable_logging: bool,
    pub run_migrations: bool,
}

impl PoolConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            min_connections: 1,
            max_connections: 5,
            connect_timeout: Duration::from_secs(30),
            enable_logging: false,
            run_migrations: true,
        }
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.database_url.is_empty() {
            return Err(DbError::Configuration("database URL is empty".to_string()));
        }
        if self.max_connections == 0 {
            return Err(DbError::Configuration(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(DbError::Configuration(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        Ok(())
    }
}

/// Open the pool, migrate, then check the ingestion schema
pub async fn create_pool(config: &PoolConfig) -> DbResult<PgPool> {
    config.validate()?;

    info!(
        database = %mask_password(&config.database_url),
        min = config.min_connections,
        max = config.max_connections,
        "Opening ingestion store pool"
    );

    let level = if config.enable_logging {
        tracing::log::LevelFilter::Debug
    } else {
        tracing::log::LevelFilter::Off
    };
    let connect_opts = PgConnectOptions::from_str(&config.database_url)
        .map_err(|e| DbError::Configuration(format!("invalid database URL: {}", e)))?
        .log_statements(level);

    let pool = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .connect_with(connect_opts)
        .await
        .map_err(|e| DbError::Connection(format!("failed to open pool: {}", e)))?;

    if config.run_migrations {
        run_migrations(&pool).await?;
    }
    verify_schema(&pool).await?;

    Ok(pool)
}

/// Apply the bundled migrations
pub async fn run_migrations(pool: &PgPool) -> DbResult<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| DbError::Migration(e.to_string()))?;
    info!("Ingestion schema migrated");
    Ok(())
}

/// Fail unless every ingestion table is present
pub async fn verify_schema(pool: &PgPool) -> DbResult<()> {
    let found: Vec<String> = sqlx::query_scalar(
        "SELECT table_name::TEXT FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = ANY($1)",
    )
    .bind(INGESTION_TABLES)
    .fetch_all(pool)
    .await
    .map_err(|e| DbError::Connection(format!("schema check failed: {}", e)))?;

    let missing = missing_tables(&found);
    if !missing.is_empty() {
        return Err(DbError::Migration(format!(
            "missing ingestion tables: {}",
            missing.join(", ")
        )));
    }

    debug!(tables = found.len(), "Ingestion schema present");
    Ok(())
}

fn missing_tables(found: &[String]) -> Vec<&'static str> {
    INGESTION_TABLES
        .iter()
        .copied()
        .filter(|table| !found.iter().any(|name| name == table))
        .collect()
}

/// Database URL with the password replaced, for logs
pub fn mask_password(database_url: &str) -> String {
    match url::Url::parse(database_url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => database_url
            .rsplit_once('@')
            .map(|(_, host)| format!("***@{}", host))
            .unwrap_or_else(|| "***".to_string()),
    }
}
