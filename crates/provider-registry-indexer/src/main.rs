//! Provider Registry Indexer
//!
//! Command-line entry point for provider version ingestion. Indexes single
//! versions, refreshes providers from their release host and prints the
//! Terraform registry documents.

mod config;
mod telemetry;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use provider_registry_core::{GpgKey, Platform};
use provider_registry_db::{create_pool, mask_password, PoolConfig, PostgresProviderStore};
use provider_registry_service::{
    DefaultProviderIngestionService, GithubConfig, GithubReleaseDiscoverer, GpgKeyResolver,
    IngestionTransactionController, LocalArtifactStore, PgpSignatureVerifier,
    ProviderIngestionService, ProviderVersionExtractor,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use url::Url;

use config::IndexerConfig;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration directory
    #[arg(short, long, env = "CONFIG_DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Environment (development, production, etc.)
    #[arg(short, long, env = "ENVIRONMENT", default_value = "development")]
    environment: String,

    /// Database URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Release host API token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index one version of a provider
    Index {
        /// Provider as `namespace/name`
        provider: String,
        /// Version, with or without a leading `v`
        version: String,
    },
    /// Index new releases of a provider
    Refresh {
        /// Provider as `namespace/name`
        provider: String,
        /// Index at most this many new versions
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        limit: Option<u64>,
    },
    /// Print the latest non-beta version
    Latest {
        /// Provider as `namespace/name`
        provider: String,
    },
    /// Print the Terraform versions listing
    Versions {
        /// Provider as `namespace/name`
        provider: String,
    },
    /// Print the Terraform download details of one binary
    Download {
        /// Provider as `namespace/name`
        provider: String,
        version: String,
        os: String,
        arch: String,
    },
    /// Print the provider's integration endpoints
    Integrations {
        /// Provider as `namespace/name`
        provider: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = IndexerConfig::load(&args.config_dir, &args.environment)
        .context("Failed to load configuration")?;
    if let Some(database_url) = args.database_url {
        config.database.url = database_url;
    }
    if let Some(token) = args.github_token {
        config.release_host.token = Some(token);
    }
    if let Some(log_level) = args.log_level {
        config.logging.level = log_level;
    }

    telemetry::init_with_config(telemetry::TelemetryConfig::from(&config.logging));

    info!(environment = %args.environment, "Starting provider registry indexer");
    info!(database = %mask_password(&config.database.url), "Database");

    let service = build_service(&config).await?;

    match args.command {
        Command::Index { provider, version } => {
            let (namespace, name) = split_provider(&provider)?;
            let indexed = service.index_version(namespace, name, &version).await?;
            print_json(&indexed)?;
        }
        Command::Refresh { provider, limit } => {
            let (namespace, name) = split_provider(&provider)?;
            let limit = limit.map(usize::try_from).transpose().context("Limit out of range")?;
            let indexed = service.refresh_versions(namespace, name, limit).await?;
            print_json(&indexed)?;
        }
        Command::Latest { provider } => {
            let (namespace, name) = split_provider(&provider)?;
            let latest = service.calculate_latest_version(namespace, name).await?;
            print_json(&latest)?;
        }
        Command::Versions { provider } => {
            let (namespace, name) = split_provider(&provider)?;
            print_json(&service.versions_document(namespace, name).await?)?;
        }
        Command::Download {
            provider,
            version,
            os,
            arch,
        } => {
            let (namespace, name) = split_provider(&provider)?;
            let details = service
                .download_details(namespace, name, &version, &Platform::new(os, arch))
                .await?;
            print_json(&details)?;
        }
        Command::Integrations { provider } => {
            let (namespace, name) = split_provider(&provider)?;
            print_json(&service.integrations(namespace, name).await?)?;
        }
    }

    Ok(())
}

/// Wire the store, release host, keys and artifact store together
async fn build_service(config: &IndexerConfig) -> Result<DefaultProviderIngestionService> {
    let pool_config = PoolConfig::new(&config.database.url)
        .min_connections(config.database.min_connections)
        .max_connections(config.database.max_connections)
        .connect_timeout(Duration::from_secs(config.database.connect_timeout_seconds))
        .run_migrations(config.database.run_migrations)
        .enable_logging(config.logging.level != "error");
    let pool = create_pool(&pool_config)
        .await
        .context("Failed to create database connection pool")?;
    let store = Arc::new(PostgresProviderStore::new(pool));

    let release_host = &config.release_host;
    let mut github = GithubConfig::new(
        Url::parse(&release_host.api_url).context("Invalid release host API URL")?,
    );
    github.token = release_host.token.clone();
    github.timeout = Duration::from_secs(release_host.timeout_seconds);
    github.max_retries = release_host.max_retries;
    github.initial_backoff = Duration::from_millis(release_host.initial_backoff_ms);
    github.max_backoff = Duration::from_secs(release_host.max_backoff_seconds);
    let discoverer = Arc::new(GithubReleaseDiscoverer::new(github)?);

    let default_keys = load_default_keys(&config.gpg.default_key_files)?;
    info!(default_keys = default_keys.len(), "Loaded default signing keys");
    let resolver = Arc::new(GpgKeyResolver::new(
        Arc::new(PgpSignatureVerifier::new()),
        default_keys,
    ));

    let mut extractor = ProviderVersionExtractor::new(discoverer.clone(), resolver);
    if let Some(directory) = &config.storage.binary_directory {
        info!(directory = %directory.display(), "Storing verified artifacts locally");
        extractor = extractor.with_artifact_store(Arc::new(LocalArtifactStore::new(directory)));
    }
    let controller = Arc::new(IngestionTransactionController::new(extractor));

    Ok(DefaultProviderIngestionService::new(store, discoverer, controller))
}

fn load_default_keys(files: &[PathBuf]) -> Result<Vec<GpgKey>> {
    files
        .iter()
        .map(|path| {
            let armor = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read GPG key {}", path.display()))?;
            let mut key = PgpSignatureVerifier::read_key(None, &armor)
                .with_context(|| format!("Invalid GPG key {}", path.display()))?;
            key.source = Some(path.display().to_string());
            Ok(key)
        })
        .collect()
}

/// Split `namespace/name`
fn split_provider(provider: &str) -> Result<(&str, &str)> {
    match provider.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((namespace, name))
        }
        _ => bail!("Provider must be given as namespace/name, got {:?}", provider),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
