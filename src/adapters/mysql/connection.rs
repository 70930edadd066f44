//! MySQL connection pool management.

use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::MySqlPool;
use std::str::FromStr;

use crate::adapters::database::{ConnectionError, PoolConfig};

pub async fn create_pool(database_url: &str, config: Option<PoolConfig>) -> Result<MySqlPool, ConnectionError> {
    let config = config.unwrap_or_default();

    let connect_options = MySqlConnectOptions::from_str(database_url)
        .map_err(|_| ConnectionError::InvalidDatabaseUrl(database_url.to_string()))?;

    MySqlPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options)
        .await
        .map_err(ConnectionError::PoolCreationFailed)
}
