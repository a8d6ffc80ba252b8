//! PostgreSQL implementation of ProviderStore
//!
//! Each session holds one pooled connection. Transaction scopes are driven
//! with plain `BEGIN` / `SAVEPOINT` statements so that scopes can be nested
//! to any depth while the same connection serves reads and writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use provider_registry_core::{
    Checksum, GpgKey, NewProviderBinary, NewProviderVersion, Platform, Provider, ProviderBinary,
    ProviderId, ProviderTier, ProviderVersion, ProviderVersionId,
};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{Executor, PgConnection, PgPool, Postgres, Row};
use std::str::FromStr;
use tracing::{debug, instrument, warn};

use crate::error::{DbError, DbResult};
use crate::store::{ProviderStore, StoreSession};
use crate::transaction::{TransactionCommand, TransactionStack};

const PROVIDER_COLUMNS: &str = "id, namespace, name, description, tier, category, \
     repository_owner, repository_name, latest_version_id";

const VERSION_COLUMNS: &str = "id, provider_id, version, git_tag, beta, gpg_key_fingerprint, \
     published_at, protocol_versions, shasums_url, shasums_signature_url, created_at";

/// PostgreSQL implementation of ProviderStore
#[derive(Debug, Clone)]
pub struct PostgresProviderStore {
    pool: PgPool,
}

impl PostgresProviderStore {
    /// Create a new PostgreSQL provider store
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ProviderStore for PostgresProviderStore {
    async fn session(&self) -> DbResult<Box<dyn StoreSession>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PostgresSession {
            conn: Some(conn),
            stack: TransactionStack::new(),
        }))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }
}

/// Session bound to a single pooled connection
pub struct PostgresSession {
    conn: Option<PoolConnection<Postgres>>,
    stack: TransactionStack,
}

impl PostgresSession {
    fn conn(&mut self) -> DbResult<&mut PgConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| DbError::Connection("session connection was released".to_string()))
    }

    async fn run(&mut self, command: TransactionCommand) -> DbResult<()> {
        debug!(command = %command, depth = self.stack.depth(), "Transaction command");
        let sql = command.sql();
        self.conn()?.execute(sql.as_str()).await?;
        Ok(())
    }
}

impl Drop for PostgresSession {
    fn drop(&mut self) {
        if !self.stack.is_active() {
            return;
        }
        if let Some(conn) = self.conn.take() {
            warn!(
                depth = self.stack.depth(),
                "Session dropped inside a transaction, closing its connection"
            );
            // Closing the connection makes the server discard the open transaction
            drop(conn.detach());
        }
        self.stack.reset();
    }
}

#[async_trait]
impl StoreSession for PostgresSession {
    async fn begin(&mut self) -> DbResult<()> {
        let command = self.stack.begin();
        if let Err(e) = self.run(command).await {
            // The scope never opened
            let _ = self.stack.rollback();
            return Err(e);
        }
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        let command = self.stack.commit()?;
        self.run(command).await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let command = self.stack.rollback()?;
        self.run(command).await
    }

    fn transaction_depth(&self) -> usize {
        self.stack.depth()
    }

    #[instrument(skip(self))]
    async fn find_provider(&mut self, namespace: &str, name: &str) -> DbResult<Option<Provider>> {
        debug!("Finding provider by namespace and name");

        let sql = format!(
            "SELECT {} FROM provider WHERE lower(namespace) = lower($1) AND name = $2",
            PROVIDER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(namespace)
            .bind(name)
            .fetch_optional(self.conn()?)
            .await?;

        row.map(row_to_provider).transpose()
    }

    #[instrument(skip(self), fields(provider_id = %id))]
    async fn get_provider(&mut self, id: ProviderId) -> DbResult<Option<Provider>> {
        let sql = format!("SELECT {} FROM provider WHERE id = $1", PROVIDER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(self.conn()?)
            .await?;

        row.map(row_to_provider).transpose()
    }

    #[instrument(skip(self), fields(provider_id = %provider_id))]
    async fn list_versions(&mut self, provider_id: ProviderId) -> DbResult<Vec<ProviderVersion>> {
        let sql = format!(
            "SELECT {} FROM provider_version WHERE provider_id = $1 ORDER BY id",
            VERSION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(provider_id.0)
            .fetch_all(self.conn()?)
            .await?;

        rows.into_iter().map(row_to_version).collect()
    }

    #[instrument(skip(self), fields(provider_id = %provider_id))]
    async fn find_version(
        &mut self,
        provider_id: ProviderId,
        version: &str,
    ) -> DbResult<Option<ProviderVersion>> {
        let sql = format!(
            "SELECT {} FROM provider_version WHERE provider_id = $1 AND version = $2",
            VERSION_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(provider_id.0)
            .bind(version)
            .fetch_optional(self.conn()?)
            .await?;

        row.map(row_to_version).transpose()
    }

    #[instrument(skip(self), fields(version_id = %id))]
    async fn get_version(&mut self, id: ProviderVersionId) -> DbResult<Option<ProviderVersion>> {
        let sql = format!("SELECT {} FROM provider_version WHERE id = $1", VERSION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(self.conn()?)
            .await?;

        row.map(row_to_version).transpose()
    }

    #[instrument(skip(self), fields(version_id = %version_id))]
    async fn list_binaries(&mut self, version_id: ProviderVersionId) -> DbResult<Vec<ProviderBinary>> {
        let rows = sqlx::query(
            r#"
            SELECT id, provider_version_id, os, arch, filename, checksum, location
            FROM provider_binary
            WHERE provider_version_id = $1
            ORDER BY os, arch
            "#,
        )
        .bind(version_id.0)
        .fetch_all(self.conn()?)
        .await?;

        rows.into_iter().map(row_to_binary).collect()
    }

    #[instrument(skip(self))]
    async fn list_gpg_keys(&mut self, namespace: &str) -> DbResult<Vec<GpgKey>> {
        let rows = sqlx::query(
            r#"
            SELECT id, namespace, key_id, fingerprint, ascii_armor,
                   source, source_url, trust_signature
            FROM gpg_key
            WHERE lower(namespace) = lower($1)
            ORDER BY id
            "#,
        )
        .bind(namespace)
        .fetch_all(self.conn()?)
        .await?;

        Ok(rows.into_iter().map(row_to_gpg_key).collect())
    }

    #[instrument(skip(self, version), fields(provider_id = %version.provider_id, version = %version.version))]
    async fn insert_version(&mut self, version: NewProviderVersion) -> DbResult<ProviderVersion> {
        debug!("Inserting provider version");

        let row = sqlx::query(
            r#"
            INSERT INTO provider_version (
                provider_id, version, git_tag, beta, gpg_key_fingerprint,
                published_at, protocol_versions, shasums_url, shasums_signature_url
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, created_at
            "#,
        )
        .bind(version.provider_id.0)
        .bind(&version.version)
        .bind(&version.git_tag)
        .bind(version.beta)
        .bind(&version.gpg_key_fingerprint)
        .bind(version.published_at)
        .bind(&version.protocol_versions)
        .bind(&version.shasums_url)
        .bind(&version.shasums_signature_url)
        .fetch_one(self.conn()?)
        .await?;

        let id: i64 = row.try_get("id")?;
        let created_at: DateTime<Utc> = row.try_get("created_at")?;
        Ok(version.into_version(ProviderVersionId(id), created_at))
    }

    #[instrument(skip(self, binary), fields(version_id = %version_id, platform = %binary.platform))]
    async fn insert_binary(
        &mut self,
        version_id: ProviderVersionId,
        binary: NewProviderBinary,
    ) -> DbResult<ProviderBinary> {
        let row = sqlx::query(
            r#"
            INSERT INTO provider_binary (
                provider_version_id, os, arch, filename, checksum, location
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(version_id.0)
        .bind(&binary.platform.os)
        .bind(&binary.platform.arch)
        .bind(&binary.filename)
        .bind(binary.checksum.value())
        .bind(&binary.location)
        .fetch_one(self.conn()?)
        .await?;

        Ok(ProviderBinary {
            id: row.try_get("id")?,
            provider_version_id: version_id,
            platform: binary.platform,
            filename: binary.filename,
            checksum: binary.checksum,
            location: binary.location,
        })
    }

    #[instrument(skip(self), fields(provider_id = %provider_id))]
    async fn set_latest_version(
        &mut self,
        provider_id: ProviderId,
        version_id: Option<ProviderVersionId>,
    ) -> DbResult<()> {
        let result = sqlx::query("UPDATE provider SET latest_version_id = $2 WHERE id = $1")
            .bind(provider_id.0)
            .bind(version_id.map(|id| id.0))
            .execute(self.conn()?)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("provider {}", provider_id)));
        }
        Ok(())
    }
}

/// Convert a database row to a Provider
fn row_to_provider(row: PgRow) -> DbResult<Provider> {
    let tier: String = row.try_get("tier")?;
    let latest_version_id: Option<i64> = row.try_get("latest_version_id")?;

    Ok(Provider {
        id: ProviderId(row.try_get("id")?),
        namespace: row.try_get("namespace")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        tier: ProviderTier::from_str(&tier)?,
        category: row.try_get("category")?,
        repository_owner: row.try_get("repository_owner")?,
        repository_name: row.try_get("repository_name")?,
        latest_version_id: latest_version_id.map(ProviderVersionId),
    })
}

/// Convert a database row to a ProviderVersion
fn row_to_version(row: PgRow) -> DbResult<ProviderVersion> {
    Ok(ProviderVersion {
        id: ProviderVersionId(row.try_get("id")?),
        provider_id: ProviderId(row.try_get("provider_id")?),
        version: row.try_get("version")?,
        git_tag: row.try_get("git_tag")?,
        beta: row.try_get("beta")?,
        gpg_key_fingerprint: row.try_get("gpg_key_fingerprint")?,
        published_at: row.try_get("published_at")?,
        protocol_versions: row.try_get("protocol_versions")?,
        shasums_url: row.try_get("shasums_url")?,
        shasums_signature_url: row.try_get("shasums_signature_url")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Convert a database row to a ProviderBinary
fn row_to_binary(row: PgRow) -> DbResult<ProviderBinary> {
    let checksum: String = row.try_get("checksum")?;
    let os: String = row.try_get("os")?;
    let arch: String = row.try_get("arch")?;

    Ok(ProviderBinary {
        id: row.try_get("id")?,
        provider_version_id: ProviderVersionId(row.try_get("provider_version_id")?),
        platform: Platform::new(os, arch),
        filename: row.try_get("filename")?,
        checksum: Checksum::new(checksum)?,
        location: row.try_get("location")?,
    })
}

/// Convert a database row to a GpgKey
fn row_to_gpg_key(row: PgRow) -> GpgKey {
    let id: i64 = row.get("id");
    let key_id: String = row.get("key_id");
    let fingerprint: Option<String> = row.get("fingerprint");
    let ascii_armor: String = row.get("ascii_armor");

    let mut key = GpgKey::new(row.get("namespace"), &key_id, ascii_armor);
    if let Some(fingerprint) = fingerprint {
        key = key.with_fingerprint(&fingerprint);
    }
    key.id = Some(id);
    key.source = row.get("source");
    key.source_url = row.get("source_url");
    key.trust_signature = row.get("trust_signature");
    key
}
