use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Database URL cannot be empty")]
    EmptyDatabaseUrl,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Redis URL cannot be empty")]
    EmptyRedisUrl,

    #[error("Invalid concurrency: {0}. Must be at least 1")]
    InvalidConcurrency(usize),

    #[error("Invalid batch_size: {0}. Must be at least 1")]
    InvalidBatchSize(usize),

    #[error("Stream consumer name cannot be empty")]
    EmptyConsumerName,

    #[error("Stream namespace cannot be empty")]
    EmptyNamespace,

    #[error("Invalid lock_retry_attempts: {0}. Must be at least 1")]
    InvalidLockRetryAttempts(u32),

    #[error("Invalid max_nodes: {0}. Must be at least 1")]
    InvalidMaxNodes(usize),

    #[error("Chain id cannot be empty")]
    EmptyChainId,
}

const ENV_PREFIX: &str = "BLOCKFEED_";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .blockfeed/config.yaml
    /// 3. .blockfeed/local.yaml (optional local overrides)
    /// 4. Environment variables (BLOCKFEED_* prefix, `__` between sections)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment(&[Path::new(".blockfeed/config.yaml"), Path::new(".blockfeed/local.yaml")])
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file instead of the project files.
    /// Environment variables still take precedence.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config: Config = Self::figment(&[path])
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(files: &[&Path]) -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        files
            .iter()
            .fold(figment, |figment, file| figment.merge(Yaml::file(file)))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.url.trim().is_empty() {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        if config.redis.url.trim().is_empty() {
            return Err(ConfigError::EmptyRedisUrl);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let streams = &config.streams;
        if streams.namespace.is_empty() {
            return Err(ConfigError::EmptyNamespace);
        }
        if streams.consumer_name.is_empty() {
            return Err(ConfigError::EmptyConsumerName);
        }
        if streams.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(streams.concurrency));
        }
        if streams.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(streams.batch_size));
        }

        if config.load_balancer.lock_retry_attempts == 0 {
            return Err(ConfigError::InvalidLockRetryAttempts(config.load_balancer.lock_retry_attempts));
        }
        if config.load_balancer.max_nodes == 0 {
            return Err(ConfigError::InvalidMaxNodes(config.load_balancer.max_nodes));
        }

        if config.chain.chain_id.is_empty() {
            return Err(ConfigError::EmptyChainId);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::{LogFormat, RotationPolicy};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn yaml_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{contents}").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database.url, "sqlite:.blockfeed/blockfeed.db");
        assert_eq!(config.redis.url, "redis://127.0.0.1:6379");
        assert_eq!(config.redis.block_store_url(), "redis://127.0.0.1:6379");
        assert_eq!(config.streams.namespace, "block-feed");
        assert_eq!(config.streams.concurrency, 1);
        assert_eq!(config.load_balancer.lock_retry_attempts, 5);
        assert_eq!(config.logging.format, LogFormat::Json);
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
database:
  url: mysql://root@localhost/blockfeed
  max_connections: 4
redis:
  url: redis://stream:6379
  block_store_url: redis://cache:6379
logging:
  level: debug
  format: pretty
  rotation: hourly
streams:
  consumer_name: lb
  concurrency: 8
  batch_size: 50
  block_timeout_ms: 250
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.database.url, "mysql://root@localhost/blockfeed");
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.redis.block_store_url(), "redis://cache:6379");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.logging.rotation, RotationPolicy::Hourly);
        assert_eq!(config.streams.consumer_name, "lb");
        assert_eq!(config.streams.concurrency, 8);
        assert_eq!(config.streams.block_timeout_ms, 250);
        assert_eq!(config.streams.namespace, "block-feed", "unset fields keep defaults");

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "loud"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_empty_database_url() {
        let mut config = Config::default();
        config.database.url = "  ".to_string();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyDatabaseUrl)));
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let mut config = Config::default();
        config.database.max_connections = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidMaxConnections(0))
        ));
    }

    #[test]
    fn test_validate_empty_redis_url() {
        let mut config = Config::default();
        config.redis.url = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyRedisUrl)));
    }

    #[test]
    fn test_validate_stream_settings() {
        let mut config = Config::default();
        config.streams.concurrency = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidConcurrency(0))));

        let mut config = Config::default();
        config.streams.batch_size = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidBatchSize(0))));

        let mut config = Config::default();
        config.streams.consumer_name = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyConsumerName)));

        let mut config = Config::default();
        config.streams.namespace = String::new();
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::EmptyNamespace)));
    }

    #[test]
    fn test_validate_load_balancer_settings() {
        let mut config = Config::default();
        config.load_balancer.lock_retry_attempts = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLockRetryAttempts(0))
        ));

        let mut config = Config::default();
        config.load_balancer.max_nodes = 0;
        assert!(matches!(ConfigLoader::validate(&config), Err(ConfigError::InvalidMaxNodes(0))));
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let file = yaml_file("streams:\n  consumer_name: from-file\n  concurrency: 2\nchain:\n  chain_id: base\n");

        temp_env::with_vars(
            [
                ("BLOCKFEED_STREAMS__CONCURRENCY", Some("6")),
                ("BLOCKFEED_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.streams.consumer_name, "from-file");
                assert_eq!(config.streams.concurrency, 6, "env should win over the file");
                assert_eq!(config.logging.level, "debug");
                assert_eq!(config.chain.chain_id, "base");
            },
        );
    }

    #[test]
    fn test_load_from_file_rejects_invalid_values() {
        let file = yaml_file("streams:\n  batch_size: 0\n");
        let err = ConfigLoader::load_from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_hierarchical_merging() {
        let base = yaml_file("streams:\n  consumer_name: base\n  batch_size: 20\nlogging:\n  level: info\n");
        let local = yaml_file("streams:\n  consumer_name: local\nlogging:\n  level: warn\n");

        let config: Config = temp_env::with_vars_unset(
            ["BLOCKFEED_LOGGING__LEVEL", "BLOCKFEED_STREAMS__CONSUMER_NAME"],
            || ConfigLoader::figment(&[base.path(), local.path()]).extract().unwrap(),
        );

        assert_eq!(config.streams.consumer_name, "local", "Override should win");
        assert_eq!(config.logging.level, "warn", "Override should win for nested fields");
        assert_eq!(config.streams.batch_size, 20, "Base value should persist when not overridden");
    }
}
