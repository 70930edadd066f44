use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for blockfeed
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Relational store holding webhooks, claims, nodes and assignments
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Redis endpoints for streams, the pending set and the block cache
    #[serde(default)]
    pub redis: RedisConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Consumer settings shared by every stream worker
    #[serde(default)]
    pub streams: StreamConfig,

    /// Node assignment settings
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,

    /// Chain served by this deployment
    #[serde(default)]
    pub chain: ChainConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Connection URL; the scheme selects the backend (`mysql://` or `sqlite:`)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite:.blockfeed/blockfeed.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RedisConfig {
    /// Stream and scheduler store for this node. `memory://` runs in-process.
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Block cache; defaults to the stream store when unset
    #[serde(default)]
    pub block_store_url: Option<String>,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            block_store_url: None,
        }
    }
}

impl RedisConfig {
    pub fn block_store_url(&self) -> &str {
        self.block_store_url.as_deref().unwrap_or(&self.url)
    }
}

/// Logging output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Log file rotation
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    #[default]
    Daily,
    Hourly,
    Never,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: LogFormat,

    /// Directory for rolling JSON log files (stdout only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    #[serde(default)]
    pub rotation: RotationPolicy,
}

fn default_log_level() -> String {
    "info".to_string()
}

const fn default_log_format() -> LogFormat {
    LogFormat::Json
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: RotationPolicy::default(),
        }
    }
}

/// Stream consumer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Prefix for every Redis key
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Hash tag grouping the scheduler keys of one node
    #[serde(default = "default_partition")]
    pub partition: String,

    /// Base consumer name; workers are named `<name>-0..<name>-N`
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Number of consumers per worker process
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Entries read per stream call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long a read for new entries blocks before the loop revisits the backlog
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,

    /// Order in which a flush releases parked jobs
    #[serde(default)]
    pub flush_order: FlushOrder,
}

/// Order in which a flush moves parked jobs back onto the delivery stream.
///
/// Jobs furthest behind go first so lagging webhooks catch up before caught-up
/// ones take their next block.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlushOrder {
    #[default]
    SmallestFirst,
}

fn default_namespace() -> String {
    "block-feed".to_string()
}

fn default_partition() -> String {
    "s0".to_string()
}

/// `blockfeed-<host>` so replicas on default config never share a consumer.
/// Falls back to a random suffix when `HOSTNAME` is unset, in which case a
/// restarted process does not see the backlog of its previous run.
fn default_consumer_name() -> String {
    let suffix = std::env::var("HOSTNAME")
        .ok()
        .map(|host| host.trim().to_string())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string()[..8].to_string());
    format!("blockfeed-{suffix}")
}

const fn default_concurrency() -> usize {
    1
}

const fn default_batch_size() -> usize {
    10
}

const fn default_block_timeout_ms() -> u64 {
    5_000
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            partition: default_partition(),
            consumer_name: default_consumer_name(),
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            block_timeout_ms: default_block_timeout_ms(),
            flush_order: FlushOrder::default(),
        }
    }
}

/// Load balancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoadBalancerConfig {
    /// Attempts at locking a node before the event is left for backlog replay
    #[serde(default = "default_lock_retry_attempts")]
    pub lock_retry_attempts: u32,

    /// Base delay between lock attempts; doubles every attempt
    #[serde(default = "default_lock_backoff_initial_ms")]
    pub lock_backoff_initial_ms: u64,

    /// Upper bound of the random jitter added to every delay
    #[serde(default = "default_lock_backoff_max_jitter_ms")]
    pub lock_backoff_max_jitter_ms: u64,

    /// Maximum number of node connections held open
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
}

const fn default_lock_retry_attempts() -> u32 {
    5
}

const fn default_lock_backoff_initial_ms() -> u64 {
    100
}

const fn default_lock_backoff_max_jitter_ms() -> u64 {
    100
}

const fn default_max_nodes() -> usize {
    64
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_backoff_initial_ms: default_lock_backoff_initial_ms(),
            lock_backoff_max_jitter_ms: default_lock_backoff_max_jitter_ms(),
            max_nodes: default_max_nodes(),
        }
    }
}

/// Chain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChainConfig {
    /// Chain whose blocks this deployment ingests
    #[serde(default = "default_chain_id")]
    pub chain_id: String,
}

fn default_chain_id() -> String {
    "ethereum-mainnet".to_string()
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: default_chain_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumer_name_defaults_to_host() {
        temp_env::with_var("HOSTNAME", Some("node-a"), || {
            assert_eq!(StreamConfig::default().consumer_name, "blockfeed-node-a");
        });
    }

    #[test]
    fn test_consumer_name_without_host_is_unique() {
        temp_env::with_var_unset("HOSTNAME", || {
            let first = StreamConfig::default().consumer_name;
            let second = StreamConfig::default().consumer_name;
            assert!(first.starts_with("blockfeed-"));
            assert_ne!(first, second);
        });
    }

    #[test]
    fn test_flush_order_defaults_to_smallest_first() {
        let config: StreamConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.flush_order, FlushOrder::SmallestFirst);

        let config: StreamConfig = serde_json::from_str(r#"{"flush_order":"smallest_first"}"#).unwrap();
        assert_eq!(config.flush_order, FlushOrder::SmallestFirst);
        assert!(serde_json::from_str::<StreamConfig>(r#"{"flush_order":"largest_first"}"#).is_err());
    }
}
