//! Relational entities: webhooks, claims, nodes and assignments.

use serde::{Deserialize, Serialize};

/// A customer's delivery target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: String,
    pub url: String,
    pub is_active: bool,
    /// Upper bound on the number of blocks sent in one POST.
    pub max_blocks: u32,
    /// Failed deliveries tolerated before the cursor is advanced past a range.
    pub max_retries: u32,
    pub timeout_ms: u64,
    pub blockchain_id: String,
    pub customer_id: String,
}

impl Webhook {
    /// Create an inactive webhook with the default delivery limits.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        blockchain_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            is_active: false,
            max_blocks: 10,
            max_retries: 3,
            timeout_ms: 5_000,
            blockchain_id: blockchain_id.into(),
            customer_id: String::new(),
        }
    }

    pub fn with_max_blocks(mut self, max_blocks: u32) -> Self {
        self.max_blocks = max_blocks;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = customer_id.into();
        self
    }

    /// Number of blocks requested per delivery. Never zero.
    pub fn blocks_per_call(&self) -> u64 {
        u64::from(self.max_blocks.max(1))
    }
}

/// Write-once record of which consumer owns the activation decision for a webhook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookClaim {
    pub id: String,
    pub webhook_id: String,
    pub claimed_by: String,
}

/// A delivery node able to host activated webhooks for one chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookNode {
    pub id: String,
    /// Address of the node's stream store (e.g. `redis://node-1:6379`).
    pub url: String,
    pub blockchain_id: String,
}

impl WebhookNode {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        blockchain_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            blockchain_id: blockchain_id.into(),
        }
    }
}

/// Binding of a claimed webhook to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookAssignment {
    pub id: String,
    pub webhook_claim_id: String,
    pub webhook_node_id: String,
    pub webhook_id: String,
}

/// A claim joined with the webhook it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedWebhook {
    pub claim: WebhookClaim,
    pub webhook: Webhook,
}

impl ClaimedWebhook {
    /// Whether the claim was written by the given fully qualified consumer.
    pub fn is_claimed_by(&self, consumer: &str) -> bool {
        self.claim.claimed_by == consumer
    }
}

/// Result of trying to flip a webhook to active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// The row does not exist or another transaction holds its lock.
    Unavailable,
    /// The webhook was already active before this call.
    AlreadyActive,
    /// This call performed the inactive to active transition.
    Activated,
}

impl ActivationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::AlreadyActive => "already_active",
            Self::Activated => "activated",
        }
    }
}
