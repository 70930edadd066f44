//! Process wiring shared by the commands: backends chosen by URL scheme,
//! configuration loading and shutdown handling.

use anyhow::{bail, Context, Result};
use sqlx::{MySqlPool, SqlitePool};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::adapters::memory::{MemoryBlockStore, MemoryNodeConnector, MemoryStreamLog};
use crate::adapters::redis::{RedisBlockStore, RedisNodeConnector, RedisStreamLog};
use crate::adapters::{mysql, sqlite, MigrationError, PoolConfig};
use crate::domain::models::{Config, DatabaseConfig};
use crate::domain::ports::{BlockStore, NodeConnector, StreamError, StreamLog, WebhookRepository};
use crate::infrastructure::config::ConfigLoader;
use crate::streams::{StreamKeys, SubscribeOptions};

/// Load configuration from `path`, or from the project files when unset.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Relational backend selected by the database URL scheme.
pub enum Database {
    Sqlite(SqlitePool),
    MySql(MySqlPool),
}

impl Database {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool_config = PoolConfig::from(config);
        let url = config.url.as_str();

        if url.starts_with("mysql://") {
            let pool = mysql::create_pool(url, Some(pool_config))
                .await
                .context("Failed to connect to MySQL")?;
            Ok(Self::MySql(pool))
        } else if url.starts_with("sqlite:") {
            let pool = sqlite::create_pool(url, Some(pool_config))
                .await
                .context("Failed to open SQLite database")?;
            Ok(Self::Sqlite(pool))
        } else {
            bail!("Unsupported database URL: {url}");
        }
    }

    /// Apply embedded migrations, returning how many were new.
    pub async fn migrate(&self) -> Result<usize, MigrationError> {
        match self {
            Self::Sqlite(pool) => {
                sqlite::Migrator::new(pool.clone())
                    .run_embedded_migrations(sqlite::all_embedded_migrations())
                    .await
            }
            Self::MySql(pool) => {
                mysql::MySqlMigrator::new(pool.clone())
                    .run_embedded_migrations(mysql::all_embedded_migrations())
                    .await
            }
        }
    }

    pub fn repository(&self) -> Arc<dyn WebhookRepository> {
        match self {
            Self::Sqlite(pool) => Arc::new(sqlite::SqliteWebhookRepository::new(pool.clone())),
            Self::MySql(pool) => Arc::new(mysql::MySqlWebhookRepository::new(pool.clone())),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::MySql(_) => "mysql",
        }
    }
}

fn scheme(url: &str) -> &str {
    url.split_once("://").map_or("", |(scheme, _)| scheme)
}

fn is_redis(url: &str) -> bool {
    matches!(scheme(url), "redis" | "rediss")
}

/// Open the stream log at `url`. `memory://` gives a log private to this process.
pub async fn open_stream_log(url: &str) -> Result<Arc<dyn StreamLog>, StreamError> {
    if is_redis(url) {
        Ok(Arc::new(RedisStreamLog::connect(url).await?))
    } else if scheme(url) == "memory" {
        Ok(Arc::new(MemoryStreamLog::new()))
    } else {
        Err(StreamError::UnsupportedUrl(url.to_string()))
    }
}

/// Connector matching the backend of the local stream log.
pub fn node_connector(url: &str) -> Arc<dyn NodeConnector> {
    if is_redis(url) {
        Arc::new(RedisNodeConnector)
    } else {
        Arc::new(MemoryNodeConnector::new())
    }
}

/// Everything a worker command needs once configuration is loaded.
pub struct Runtime {
    pub config: Config,
    pub keys: StreamKeys,
    pub cancel: CancellationToken,
}

impl Runtime {
    pub fn new(config: Config) -> Self {
        let keys = StreamKeys::new(config.streams.namespace.clone(), config.streams.partition.clone());
        Self {
            config,
            keys,
            cancel: CancellationToken::new(),
        }
    }

    /// Connect to the relational store, migrating it first.
    pub async fn repository(&self) -> Result<Arc<dyn WebhookRepository>> {
        let database = Database::connect(&self.config.database).await?;
        let applied = database.migrate().await.context("Failed to migrate database")?;
        info!(backend = database.backend(), applied, "database ready");
        Ok(database.repository())
    }

    pub async fn stream_log(&self) -> Result<Arc<dyn StreamLog>> {
        let url = &self.config.redis.url;
        open_stream_log(url)
            .await
            .with_context(|| format!("Failed to open stream log at {url}"))
    }

    pub fn node_connector(&self) -> Arc<dyn NodeConnector> {
        node_connector(&self.config.redis.url)
    }

    pub async fn block_store(&self) -> Result<Arc<dyn BlockStore>> {
        let url = self.config.redis.block_store_url();
        if is_redis(url) {
            let store = RedisBlockStore::connect(url, self.keys.clone())
                .await
                .with_context(|| format!("Failed to connect to block store at {url}"))?;
            Ok(Arc::new(store))
        } else if scheme(url) == "memory" {
            Ok(Arc::new(MemoryBlockStore::new()))
        } else {
            bail!("Unsupported block store URL: {url}");
        }
    }

    pub fn subscribe_options(&self) -> SubscribeOptions {
        SubscribeOptions::from(&self.config.streams)
    }

    /// Cancel the runtime's token on Ctrl-C.
    pub fn cancel_on_ctrl_c(&self) {
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(err) => warn!(error = %err, "failed to listen for Ctrl-C, shutting down"),
            }
            cancel.cancel();
        });
    }
}
