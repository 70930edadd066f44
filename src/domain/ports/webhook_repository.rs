//! Webhook repository port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    ActivationOutcome, ClaimedWebhook, Webhook, WebhookAssignment, WebhookNode,
};

/// Relational access used by the load balancer, activator and delivery worker.
#[async_trait]
pub trait WebhookRepository: Send + Sync {
    /// Insert a webhook row.
    async fn create_webhook(&self, webhook: &Webhook) -> DomainResult<()>;

    /// Get a webhook by ID.
    async fn get_webhook(&self, id: &str) -> DomainResult<Option<Webhook>>;

    /// Remove a webhook together with its claim and assignment.
    async fn delete_webhook(&self, id: &str) -> DomainResult<()>;

    /// Register a delivery node.
    async fn create_node(&self, node: &WebhookNode) -> DomainResult<()>;

    /// All registered delivery nodes.
    async fn list_nodes(&self) -> DomainResult<Vec<WebhookNode>>;

    async fn count_nodes(&self) -> DomainResult<u64> {
        Ok(self.list_nodes().await?.len() as u64)
    }

    /// Insert a claim unless one exists. Returns the number of rows written,
    /// so only the first claimant ever sees 1.
    async fn claim_webhook(&self, webhook_id: &str, claimed_by: &str) -> DomainResult<u64>;

    /// The claim for a webhook joined with the webhook row.
    async fn find_claimed_webhook(&self, webhook_id: &str) -> DomainResult<Option<ClaimedWebhook>>;

    /// The node a webhook is already assigned to, if any.
    async fn locate_webhook(&self, webhook_id: &str) -> DomainResult<Option<WebhookNode>>;

    /// In one transaction: lock the least-loaded node serving the webhook's
    /// chain, skipping locked rows, and bind the claim to it.
    ///
    /// Fails with `NodesUnavailable` when every candidate is locked or none exist.
    async fn assign_to_least_loaded_node(
        &self,
        claimed: &ClaimedWebhook,
    ) -> DomainResult<WebhookNode>;

    /// Assignment row for a webhook.
    async fn get_assignment(&self, webhook_id: &str) -> DomainResult<Option<WebhookAssignment>>;

    /// Number of webhooks assigned to a node.
    async fn node_load(&self, node_id: &str) -> DomainResult<u64>;

    /// Lock the webhook row and flip it to active if it is not yet.
    async fn activate_webhook(&self, webhook_id: &str) -> DomainResult<ActivationOutcome>;
}
