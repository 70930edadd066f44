//! Stream log port.
//!
//! A stream log is an append-only log with consumer groups, plus the two
//! structures the scheduler keeps next to it: a height-ordered pending set and
//! a latest-height scalar. Operations that touch more than one structure are
//! all-or-nothing.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::FlushOrder;

/// Errors raised by stream log backends.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Consumer group {group} does not exist on stream {stream}")]
    NoGroup { stream: String, group: String },

    #[error("Entry {id} on stream {stream} has no {field} field")]
    MissingField {
        stream: String,
        id: String,
        field: &'static str,
    },

    #[error("Entry {id} is not pending for consumer {consumer}")]
    NotPending { id: String, consumer: String },

    #[error("Invalid stream entry id: {0}")]
    InvalidId(String),

    #[error("Unsupported stream store URL: {0}")]
    UnsupportedUrl(String),
}

/// Where a group read starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPosition {
    /// Entries already delivered to this consumer but not acknowledged, after
    /// the given id. `"0-0"` starts at the origin.
    Backlog(String),
    /// Entries never delivered to any consumer of the group. Waits up to the
    /// given duration when none are available.
    New(Option<Duration>),
}

impl ReadPosition {
    /// Backlog position at the stream origin.
    pub fn origin() -> Self {
        Self::Backlog(STREAM_ORIGIN.to_string())
    }

    pub fn is_backlog(&self) -> bool {
        matches!(self, Self::Backlog(_))
    }
}

/// Id that sorts before every stream entry.
pub const STREAM_ORIGIN: &str = "0-0";

/// An entry as read from the log, payload still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEntry {
    pub id: String,
    pub payload: String,
}

/// Delivery metadata for an unacknowledged entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

impl PendingEntry {
    /// Deliveries before the current one.
    pub fn retry_count(&self) -> u64 {
        self.delivery_count.saturating_sub(1)
    }
}

/// Keys of the scheduler state kept next to a delivery stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerKeys {
    pub stream: String,
    pub group: String,
    pub pending_set: String,
    pub latest_height: String,
}

/// Outcome of an acknowledge-and-reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rescheduled {
    /// The job is caught up and waits in the pending set.
    Pending,
    /// A newer block already exists; the job went straight back onto the stream.
    Requeued,
}

/// Append-only consumer-group log with the scheduler's atomic operations.
#[async_trait]
pub trait StreamLog: Send + Sync {
    /// Create the group (and the stream if needed). Succeeds if the group exists.
    async fn create_group(&self, stream: &str, group: &str) -> Result<(), StreamError>;

    /// Append a payload under the data field and return the entry id.
    async fn append(&self, stream: &str, payload: &str) -> Result<String, StreamError>;

    /// Read up to `count` entries for `consumer` of `group`.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        position: ReadPosition,
        count: usize,
    ) -> Result<Vec<RawEntry>, StreamError>;

    /// Acknowledge and delete the entries in one step.
    async fn ack_delete(&self, stream: &str, group: &str, ids: &[String])
        -> Result<(), StreamError>;

    /// Delivery metadata for one entry pending on `consumer`.
    async fn pending_entry(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        id: &str,
    ) -> Result<PendingEntry, StreamError>;

    /// Record `height` as the latest height and move every pending job with a
    /// lower score onto the stream in `order`. Returns the number moved.
    async fn flush(&self, keys: &SchedulerKeys, height: u64, order: FlushOrder)
        -> Result<u64, StreamError>;

    /// Acknowledge and delete `id`, then park `payload` in the pending set with
    /// score `height` if it is caught up, or append it to the stream otherwise.
    async fn ack_and_reschedule(
        &self,
        keys: &SchedulerKeys,
        id: &str,
        height: u64,
        payload: &str,
    ) -> Result<Rescheduled, StreamError>;

    /// Acknowledge and delete `id` on `stream`, then add `payload` to
    /// `pending_set` with score 0.
    async fn ack_and_seed(
        &self,
        stream: &str,
        group: &str,
        id: &str,
        pending_set: &str,
        payload: &str,
    ) -> Result<(), StreamError>;

    /// Latest recorded height, if any.
    async fn latest_height(&self, key: &str) -> Result<Option<u64>, StreamError>;

    /// Pending set members with their scores, lowest score first.
    async fn pending_jobs(&self, pending_set: &str) -> Result<Vec<(String, u64)>, StreamError>;

    /// Number of entries currently in the stream.
    async fn len(&self, stream: &str) -> Result<u64, StreamError>;
}

/// Opens stream logs hosted on delivery nodes.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<std::sync::Arc<dyn StreamLog>, StreamError>;
}
