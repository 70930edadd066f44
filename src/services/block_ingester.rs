//! Moves raw blocks from the block stream into the block store.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BlockDocument, BlockFlushNotice, ParsedMessage};
use crate::domain::ports::BlockStore;
use crate::streams::{BlockFlushStream, BlockStream, MessageHandler, SubscribeContext, SubscribeOptions};

/// Stores each batch of blocks, then announces the highest stored height.
///
/// Replays are harmless: stores ignore heights they already hold and a flush
/// notice for a known height moves nothing.
pub struct BlockIngester {
    chain_id: String,
    store: Arc<dyn BlockStore>,
    blocks: BlockStream,
    notices: BlockFlushStream,
}

impl BlockIngester {
    pub fn new(
        chain_id: impl Into<String>,
        store: Arc<dyn BlockStore>,
        blocks: BlockStream,
        notices: BlockFlushStream,
    ) -> Self {
        Self {
            chain_id: chain_id.into(),
            store,
            blocks,
            notices,
        }
    }

    pub async fn run(self: Arc<Self>, options: &SubscribeOptions, cancel: CancellationToken) -> DomainResult<()> {
        self.store.init(&self.chain_id).await?;
        let blocks = self.blocks.clone();
        blocks.subscribe(options, self, cancel).await
    }

    /// Store the batch, announce its highest height, then acknowledge it.
    pub async fn process(&self, messages: &[ParsedMessage<BlockDocument>]) -> DomainResult<Option<u64>> {
        let documents: Vec<BlockDocument> = messages.iter().map(|m| m.data.clone()).collect();
        let highest = documents.iter().map(|block| block.height).max();

        if let Some(height) = highest {
            self.store.put_blocks(&self.chain_id, &documents).await?;
            self.notices.append(&BlockFlushNotice { height }).await?;
            debug!(chain_id = %self.chain_id, count = documents.len(), height, "stored blocks");
        }

        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        self.blocks.acknowledge(&ids).await?;
        Ok(highest)
    }
}

#[async_trait]
impl MessageHandler<BlockDocument> for BlockIngester {
    async fn handle(&self, messages: Vec<ParsedMessage<BlockDocument>>, _ctx: &SubscribeContext) -> DomainResult<()> {
        self.process(&messages).await.map(|_| ())
    }
}
