//! Activator: turns activation requests into the first delivery job.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{ActivationOutcome, ActivationRequest, ParsedMessage};
use crate::domain::ports::WebhookRepository;
use crate::streams::{ActivationStream, MessageHandler, SubscribeContext, SubscribeOptions};

pub struct Activator {
    repository: Arc<dyn WebhookRepository>,
    stream: ActivationStream,
}

impl Activator {
    pub fn new(repository: Arc<dyn WebhookRepository>, stream: ActivationStream) -> Self {
        Self { repository, stream }
    }

    pub async fn run(self: Arc<Self>, options: &SubscribeOptions, cancel: CancellationToken) -> DomainResult<()> {
        let stream = self.stream.stream().clone();
        stream.subscribe(options, self, cancel).await
    }

    /// Flip the webhook to active. Returns the id to seed, if any.
    ///
    /// A webhook that is already active is only re-seeded on a backlog
    /// replay, where the earlier attempt may have died before seeding.
    pub async fn activate(&self, webhook_id: &str, is_backlog: bool) -> DomainResult<Option<String>> {
        let outcome = self.repository.activate_webhook(webhook_id).await?;
        let seed = match outcome {
            ActivationOutcome::Activated => true,
            ActivationOutcome::AlreadyActive => is_backlog,
            ActivationOutcome::Unavailable => false,
        };

        if seed {
            info!(webhook_id, outcome = outcome.as_str(), "activating webhook");
            Ok(Some(webhook_id.to_string()))
        } else {
            info!(webhook_id, outcome = outcome.as_str(), "nothing to activate");
            Ok(None)
        }
    }

    /// Activate, then acknowledge the request, seeding the first job when
    /// activation happened.
    pub async fn process(
        &self,
        message: &ParsedMessage<ActivationRequest>,
        ctx: &SubscribeContext,
    ) -> DomainResult<Option<String>> {
        let activated = self.activate(&message.data.webhook_id, ctx.is_backlog).await?;
        match &activated {
            Some(_) => self.stream.acknowledge_and_seed(message).await?,
            None => self.stream.acknowledge(message).await?,
        }
        Ok(activated)
    }
}

#[async_trait]
impl MessageHandler<ActivationRequest> for Activator {
    async fn handle(
        &self,
        messages: Vec<ParsedMessage<ActivationRequest>>,
        ctx: &SubscribeContext,
    ) -> DomainResult<()> {
        for message in &messages {
            if let Err(err) = self.process(message, ctx).await {
                warn!(webhook_id = %message.data.webhook_id, error = %err, "activation failed");
                return Err(err);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStreamLog;
    use crate::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator, SqliteWebhookRepository};
    use crate::domain::models::{Webhook, WebhookJob};
    use crate::domain::ports::ReadPosition;
    use crate::streams::{StreamKeys, WebhookStream};

    struct Fixture {
        activator: Activator,
        activation: ActivationStream,
        webhooks: WebhookStream,
    }

    async fn fixture() -> Fixture {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        let repository = Arc::new(SqliteWebhookRepository::new(pool));
        repository
            .create_webhook(&Webhook::new("w1", "http://hook.test", "eth"))
            .await
            .unwrap();

        let log = Arc::new(MemoryStreamLog::new());
        let keys = StreamKeys::new("bf", "n1");
        let activation = ActivationStream::new(log.clone(), &keys);
        activation.stream().ensure_group().await.unwrap();

        Fixture {
            activator: Activator::new(repository, activation.clone()),
            activation,
            webhooks: WebhookStream::new(log, &keys),
        }
    }

    async fn next_request(fx: &Fixture, webhook_id: &str) -> ParsedMessage<ActivationRequest> {
        fx.activation.request(webhook_id).await.unwrap();
        fx.activation
            .stream()
            .read("c-0", ReadPosition::New(None), 1)
            .await
            .unwrap()
            .remove(0)
    }

    #[tokio::test]
    async fn test_activation_seeds_initial_job() {
        let fx = fixture().await;
        let message = next_request(&fx, "w1").await;

        let activated = fx
            .activator
            .process(&message, &SubscribeContext::new("g", "c-0", false))
            .await
            .unwrap();

        assert_eq!(activated.as_deref(), Some("w1"));
        assert_eq!(fx.webhooks.pending_jobs().await.unwrap(), vec![(WebhookJob::initial("w1"), 0)]);
        assert_eq!(fx.activation.stream().log().len(fx.activation.stream().name()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_activation_does_not_reseed() {
        let fx = fixture().await;
        let ctx = SubscribeContext::new("g", "c-0", false);

        let first = next_request(&fx, "w1").await;
        fx.activator.process(&first, &ctx).await.unwrap();
        fx.webhooks.flush(1).await.unwrap();
        assert!(fx.webhooks.pending_jobs().await.unwrap().is_empty());

        let second = next_request(&fx, "w1").await;
        assert_eq!(fx.activator.process(&second, &ctx).await.unwrap(), None);
        assert!(fx.webhooks.pending_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backlog_replay_reseeds_active_webhook() {
        let fx = fixture().await;
        assert_eq!(fx.activator.activate("w1", false).await.unwrap().as_deref(), Some("w1"));

        assert_eq!(fx.activator.activate("w1", false).await.unwrap(), None);
        assert_eq!(fx.activator.activate("w1", true).await.unwrap().as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn test_missing_webhook_is_acknowledged() {
        let fx = fixture().await;
        let message = next_request(&fx, "ghost").await;

        let activated = fx
            .activator
            .process(&message, &SubscribeContext::new("g", "c-0", true))
            .await
            .unwrap();

        assert_eq!(activated, None);
        assert!(fx.webhooks.pending_jobs().await.unwrap().is_empty());
        assert_eq!(fx.activation.stream().log().len(fx.activation.stream().name()).await.unwrap(), 0);
    }
}
