//! Webhook load balancer: claim, assign, forward.
//!
//! Any number of balancer processes may read the same registration stream.
//! The write-once claim row picks exactly one owner per webhook, the owner
//! binds the webhook to the least-loaded node for its chain, and the
//! activation request is forwarded to that node's activation stream.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::node_pool::NodePool;
use super::retry::RetryPolicy;
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{LoadBalancerRequest, ParsedMessage, WebhookNode};
use crate::domain::ports::WebhookRepository;
use crate::streams::{LoadBalancerStream, MessageHandler, SubscribeContext, SubscribeOptions};

/// What happened to one registration event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BalanceOutcome {
    /// The activation request was sent to this node.
    Forwarded(WebhookNode),
    /// The webhook is already active.
    AlreadyActive,
    /// Another consumer owns the claim.
    ClaimedElsewhere,
    /// A repeat of an event this consumer already handled.
    Duplicate,
}

pub struct LoadBalancer {
    repository: Arc<dyn WebhookRepository>,
    nodes: Arc<NodePool>,
    stream: LoadBalancerStream,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl LoadBalancer {
    pub fn new(
        repository: Arc<dyn WebhookRepository>,
        nodes: Arc<NodePool>,
        stream: LoadBalancerStream,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            repository,
            nodes,
            stream,
            retry,
            cancel,
        }
    }

    /// Consume registration events until cancelled.
    ///
    /// Refuses to start when no delivery node is registered.
    pub async fn run(self: Arc<Self>, options: &SubscribeOptions) -> DomainResult<()> {
        if self.repository.count_nodes().await? == 0 {
            return Err(DomainError::NoWebhookNodes);
        }

        let stream = self.stream.clone();
        let cancel = self.cancel.clone();
        stream.subscribe(options, self, cancel).await
    }

    /// Handle one registration event and acknowledge it unless it failed.
    #[instrument(skip(self, message, ctx), fields(webhook_id = %message.data.webhook_id, consumer = %ctx.consumer))]
    pub async fn process(
        &self,
        message: &ParsedMessage<LoadBalancerRequest>,
        ctx: &SubscribeContext,
    ) -> DomainResult<BalanceOutcome> {
        let webhook_id = message.data.webhook_id.as_str();
        let consumer = ctx.qualified_consumer();

        let inserted = self.repository.claim_webhook(webhook_id, &consumer).await?;
        let claimed = self
            .repository
            .find_claimed_webhook(webhook_id)
            .await?
            .ok_or_else(|| DomainError::ClaimNotFound(webhook_id.to_string()))?;

        let skip = if claimed.webhook.is_active {
            Some(BalanceOutcome::AlreadyActive)
        } else if !claimed.is_claimed_by(&consumer) {
            Some(BalanceOutcome::ClaimedElsewhere)
        } else if inserted == 0 && !ctx.is_backlog {
            Some(BalanceOutcome::Duplicate)
        } else {
            None
        };
        if let Some(outcome) = skip {
            info!(?outcome, claimed_by = %claimed.claim.claimed_by, "skipping registration event");
            self.stream.acknowledge(&[message.id.clone()]).await?;
            return Ok(outcome);
        }

        let node = match self.repository.locate_webhook(webhook_id).await? {
            Some(node) => {
                debug!(node_id = %node.id, "webhook already assigned");
                node
            }
            None => {
                let repository = &self.repository;
                let claimed = &claimed;
                self.retry
                    .execute(&self.cancel, move || repository.assign_to_least_loaded_node(claimed))
                    .await?
            }
        };

        self.nodes.activation_stream(&node).await?.request(webhook_id).await?;
        self.stream.acknowledge(&[message.id.clone()]).await?;

        info!(node_id = %node.id, "forwarded activation request");
        Ok(BalanceOutcome::Forwarded(node))
    }
}

#[async_trait]
impl MessageHandler<LoadBalancerRequest> for LoadBalancer {
    async fn handle(
        &self,
        messages: Vec<ParsedMessage<LoadBalancerRequest>>,
        ctx: &SubscribeContext,
    ) -> DomainResult<()> {
        for message in &messages {
            self.process(message, ctx).await?;
        }
        Ok(())
    }
}
