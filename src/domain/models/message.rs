//! Stream message payloads and the envelope that carries them.
//!
//! Every stream entry has exactly one field, [`DATA_FIELD`], whose value is the
//! JSON encoding of the payload. Keeping the field name fixed lets one Lua
//! script move entries between the pending set and any stream without knowing
//! the payload type.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;

/// Name of the single field every stream entry stores its payload under.
pub const DATA_FIELD: &str = "Data";

/// Envelope for a payload carried on a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage<T> {
    #[serde(rename = "Data")]
    pub data: T,
}

impl<T: Serialize> StreamMessage<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }

    /// JSON text stored under [`DATA_FIELD`].
    pub fn encode(&self) -> DomainResult<String> {
        Ok(serde_json::to_string(&self.data)?)
    }
}

impl<T: DeserializeOwned> StreamMessage<T> {
    pub fn decode(raw: &str) -> DomainResult<Self> {
        Ok(Self {
            data: serde_json::from_str(raw)?,
        })
    }
}

/// A decoded stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage<T> {
    pub id: String,
    pub data: T,
}

/// A unit of work for the delivery worker.
///
/// With `is_new` set the worker sends the latest blocks on the chain; otherwise
/// it sends the range starting at `block_height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookJob {
    #[serde(rename = "WebhookID")]
    pub webhook_id: String,
    pub block_height: u64,
    pub is_new: bool,
}

impl WebhookJob {
    /// The job seeded when a webhook is first activated.
    pub fn initial(webhook_id: impl Into<String>) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            block_height: 0,
            is_new: true,
        }
    }

    pub fn at_height(webhook_id: impl Into<String>, block_height: u64) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            block_height,
            is_new: false,
        }
    }

    /// The same webhook moved one block past its current cursor.
    pub fn skip_one(&self) -> Self {
        Self::at_height(self.webhook_id.clone(), self.block_height.saturating_add(1))
    }
}

/// Request for a node to activate a webhook it has been assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActivationRequest {
    #[serde(rename = "WebhookID")]
    pub webhook_id: String,
}

/// Request for the load balancer to place a webhook on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadBalancerRequest {
    #[serde(rename = "WebhookID")]
    pub webhook_id: String,
}

/// Notice that blocks up to `height` are stored and jobs may be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockFlushNotice {
    pub height: u64,
}
