//! Domain errors for the blockfeed pipeline.

use thiserror::Error;

use super::ports::StreamError;

/// Domain-level errors that can occur while moving blocks to webhooks.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Webhook not found: {0}")]
    WebhookNotFound(String),

    #[error("No claim exists for webhook {0}")]
    ClaimNotFound(String),

    #[error("No webhook processing nodes are registered")]
    NoWebhookNodes,

    #[error("All webhook processing nodes for chain {0} are locked or missing")]
    NodesUnavailable(String),

    #[error("Webhook {webhook_id} is on chain {webhook_chain} but node {node_id} serves chain {node_chain}")]
    ChainMismatch {
        webhook_id: String,
        webhook_chain: String,
        node_id: String,
        node_chain: String,
    },

    #[error("Node {0} is not part of the node pool")]
    UnknownNode(String),

    #[error("Node pool limit of {0} nodes exceeded")]
    NodePoolFull(usize),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetryLimitExceeded { attempts: u32, last_error: String },

    #[error("Webhook delivery to {url} failed: {source}")]
    DeliveryFailed {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Stream worker {0} stopped unexpectedly")]
    WorkerFailed(String),

    #[error("Operation cancelled")]
    Cancelled,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Whether retrying the same operation later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NodesUnavailable(_))
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

impl From<redis::RedisError> for DomainError {
    fn from(err: redis::RedisError) -> Self {
        DomainError::Stream(StreamError::Redis(err))
    }
}
