//! Reliable consumer-group stream.
//!
//! Every subscriber first replays its own backlog (entries it read earlier but
//! never acknowledged) and only then reads entries nobody has seen. Retried
//! work therefore always surfaces before fresh work.
//!
//! Handler errors never stop the loop. The failed entries stay unacknowledged
//! and come back through the backlog on a later pass. A backlog pass that hit
//! a failure ends when it reaches the end of the backlog instead of starting
//! over, so a poison entry delays new entries by at most one pass.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ParsedMessage, StreamConfig, StreamMessage};
use crate::domain::ports::{PendingEntry, ReadPosition, StreamLog, STREAM_ORIGIN};

/// Per-batch information handed to a [`MessageHandler`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeContext {
    pub group: String,
    pub consumer: String,
    /// The batch is a replay of entries this consumer read before.
    pub is_backlog: bool,
}

impl SubscribeContext {
    pub fn new(group: impl Into<String>, consumer: impl Into<String>, is_backlog: bool) -> Self {
        Self {
            group: group.into(),
            consumer: consumer.into(),
            is_backlog,
        }
    }

    /// `<group>:<consumer>`, unique across every process reading the stream.
    pub fn qualified_consumer(&self) -> String {
        format!("{}:{}", self.group, self.consumer)
    }
}

/// Processes batches read from a [`ReliableStream`].
#[async_trait]
pub trait MessageHandler<T: Send + 'static>: Send + Sync {
    /// Handle a batch. Entries must be acknowledged by the handler; anything
    /// left unacknowledged is replayed from the backlog.
    async fn handle(&self, messages: Vec<ParsedMessage<T>>, ctx: &SubscribeContext)
        -> DomainResult<()>;
}

/// Consumer settings for [`ReliableStream::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub consumer_name: String,
    pub concurrency: usize,
    pub batch_size: usize,
    pub block_timeout: Duration,
}

impl SubscribeOptions {
    pub fn new(consumer_name: impl Into<String>) -> Self {
        Self {
            consumer_name: consumer_name.into(),
            concurrency: 1,
            batch_size: 10,
            block_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_block_timeout(mut self, block_timeout: Duration) -> Self {
        self.block_timeout = block_timeout;
        self
    }
}

impl From<&StreamConfig> for SubscribeOptions {
    fn from(config: &StreamConfig) -> Self {
        Self::new(config.consumer_name.clone())
            .with_concurrency(config.concurrency)
            .with_batch_size(config.batch_size)
            .with_block_timeout(Duration::from_millis(config.block_timeout_ms))
    }
}

/// A typed view of one stream and consumer group on a [`StreamLog`].
pub struct ReliableStream<T> {
    log: Arc<dyn StreamLog>,
    name: String,
    group: String,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for ReliableStream<T> {
    fn clone(&self) -> Self {
        Self {
            log: self.log.clone(),
            name: self.name.clone(),
            group: self.group.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> ReliableStream<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(log: Arc<dyn StreamLog>, name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            log,
            name: name.into(),
            group: group.into(),
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn log(&self) -> &Arc<dyn StreamLog> {
        &self.log
    }

    /// Create the consumer group, and the stream with it, if missing.
    pub async fn ensure_group(&self) -> DomainResult<()> {
        self.log.create_group(&self.name, &self.group).await?;
        Ok(())
    }

    pub async fn append(&self, data: &T) -> DomainResult<String> {
        let payload = StreamMessage::new(data).encode()?;
        Ok(self.log.append(&self.name, &payload).await?)
    }

    /// Acknowledge and delete entries in one step.
    pub async fn acknowledge(&self, ids: &[String]) -> DomainResult<()> {
        self.log.ack_delete(&self.name, &self.group, ids).await?;
        Ok(())
    }

    pub async fn pending_entry(&self, consumer: &str, id: &str) -> DomainResult<PendingEntry> {
        Ok(self.log.pending_entry(&self.name, &self.group, consumer, id).await?)
    }

    /// Read and decode a batch for `consumer`.
    pub async fn read(
        &self,
        consumer: &str,
        position: ReadPosition,
        count: usize,
    ) -> DomainResult<Vec<ParsedMessage<T>>> {
        let entries = self
            .log
            .read_group(&self.name, &self.group, consumer, position, count)
            .await?;

        entries
            .into_iter()
            .map(|entry| {
                StreamMessage::<T>::decode(&entry.payload).map(|message| ParsedMessage {
                    id: entry.id,
                    data: message.data,
                })
            })
            .collect()
    }

    /// Run the backlog-then-new loop until `cancel` fires or a read fails.
    ///
    /// With a concurrency of 1 the loop runs on the calling task as
    /// `<name>-0`; otherwise one task per consumer `<name>-0..<name>-N` is
    /// spawned and the first fatal error stops the others.
    pub async fn subscribe<H>(
        &self,
        options: &SubscribeOptions,
        handler: Arc<H>,
        cancel: CancellationToken,
    ) -> DomainResult<()>
    where
        H: MessageHandler<T> + 'static,
    {
        self.ensure_group().await?;
        info!(stream = %self.name, group = %self.group, "consumer group ready");

        if options.concurrency <= 1 {
            let consumer = format!("{}-0", options.consumer_name);
            return self
                .consume(&consumer, options, handler.as_ref(), &cancel)
                .await;
        }

        let workers_cancel = cancel.child_token();
        let mut workers = JoinSet::new();
        for i in 0..options.concurrency {
            let stream = self.clone();
            let handler = handler.clone();
            let options = options.clone();
            let token = workers_cancel.clone();
            let consumer = format!("{}-{i}", options.consumer_name);
            workers.spawn(async move {
                stream
                    .consume(&consumer, &options, handler.as_ref(), &token)
                    .await
            });
        }

        let mut outcome = Ok(());
        while let Some(joined) = workers.join_next().await {
            let result = joined
                .map_err(|err| DomainError::WorkerFailed(err.to_string()))
                .and_then(|result| result);
            if let Err(err) = result {
                error!(stream = %self.name, error = %err, "stream worker stopped");
                workers_cancel.cancel();
                if outcome.is_ok() {
                    outcome = Err(err);
                }
            }
        }
        outcome
    }

    async fn consume<H>(
        &self,
        consumer: &str,
        options: &SubscribeOptions,
        handler: &H,
        cancel: &CancellationToken,
    ) -> DomainResult<()>
    where
        H: MessageHandler<T>,
    {
        info!(stream = %self.name, consumer, "consumer online");
        let batch_size = options.batch_size.max(1);

        loop {
            if cancel.is_cancelled() {
                break;
            }
            self.drain_backlog(consumer, batch_size, handler, cancel)
                .await?;

            if cancel.is_cancelled() {
                break;
            }
            let messages = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                read = self.read(consumer, ReadPosition::New(Some(options.block_timeout)), batch_size) => read?,
            };
            if messages.is_empty() {
                continue;
            }

            let ctx = SubscribeContext::new(&self.group, consumer, false);
            self.dispatch(handler, messages, &ctx).await;
        }

        info!(stream = %self.name, consumer, "consumer stopped");
        Ok(())
    }

    async fn drain_backlog<H>(
        &self,
        consumer: &str,
        batch_size: usize,
        handler: &H,
        cancel: &CancellationToken,
    ) -> DomainResult<()>
    where
        H: MessageHandler<T>,
    {
        let ctx = SubscribeContext::new(&self.group, consumer, true);
        let mut cursor = STREAM_ORIGIN.to_string();
        let mut pass_failed = false;

        while !cancel.is_cancelled() {
            let messages = self
                .read(consumer, ReadPosition::Backlog(cursor.clone()), batch_size)
                .await?;

            let Some(last_id) = messages.last().map(|m| m.id.clone()) else {
                if cursor == STREAM_ORIGIN || pass_failed {
                    return Ok(());
                }
                cursor = STREAM_ORIGIN.to_string();
                continue;
            };

            debug!(stream = %self.name, consumer, count = messages.len(), "replaying backlog");
            if !self.dispatch(handler, messages, &ctx).await {
                pass_failed = true;
            }
            cursor = last_id;
        }
        Ok(())
    }

    /// Hand a batch to the handler. Errors are logged and leave the batch
    /// unacknowledged. Returns whether the handler succeeded.
    async fn dispatch<H>(&self, handler: &H, messages: Vec<ParsedMessage<T>>, ctx: &SubscribeContext)
        -> bool
    where
        H: MessageHandler<T>,
    {
        let count = messages.len();
        match handler.handle(messages, ctx).await {
            Ok(()) => {
                debug!(
                    stream = %self.name,
                    consumer = %ctx.consumer,
                    backlog = ctx.is_backlog,
                    count,
                    "processed stream messages"
                );
                true
            }
            Err(err) => {
                error!(
                    stream = %self.name,
                    consumer = %ctx.consumer,
                    backlog = ctx.is_backlog,
                    count,
                    error = %err,
                    "failed to process stream messages"
                );
                false
            }
        }
    }
}
