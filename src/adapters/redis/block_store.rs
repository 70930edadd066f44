//! Redis block cache: one sorted set per chain, scored by height. A height
//! is stored at most once; later payloads for it are ignored.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::debug;

use super::scripts::PUT_BLOCKS;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::BlockDocument;
use crate::domain::ports::BlockStore;
use crate::streams::StreamKeys;

pub struct RedisBlockStore {
    manager: ConnectionManager,
    keys: StreamKeys,
}

impl RedisBlockStore {
    pub async fn connect(url: &str, keys: StreamKeys) -> DomainResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager, keys })
    }

    fn decode(raw: Vec<String>) -> DomainResult<Vec<BlockDocument>> {
        raw.iter()
            .map(|member| serde_json::from_str(member).map_err(DomainError::from))
            .collect()
    }
}

#[async_trait]
impl BlockStore for RedisBlockStore {
    async fn init(&self, _chain_id: &str) -> DomainResult<()> {
        Ok(())
    }

    async fn put_blocks(&self, chain_id: &str, blocks: &[BlockDocument]) -> DomainResult<()> {
        if blocks.is_empty() {
            return Ok(());
        }
        let mut invocation = PUT_BLOCKS.key(self.keys.block_store(chain_id));
        for block in blocks {
            invocation.arg(block.height).arg(serde_json::to_string(block)?);
        }

        let mut conn = self.manager.clone();
        let added: u64 = invocation.invoke_async(&mut conn).await?;
        debug!(chain_id, added, total = blocks.len(), "stored blocks");
        Ok(())
    }

    async fn get_blocks(&self, chain_id: &str, start: u64, end: u64)
        -> DomainResult<Vec<BlockDocument>> {
        if start > end {
            return Ok(Vec::new());
        }
        let mut conn = self.manager.clone();
        let raw: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(self.keys.block_store(chain_id))
            .arg(start)
            .arg(end)
            .query_async(&mut conn)
            .await?;
        Self::decode(raw)
    }

    async fn get_latest_block(&self, chain_id: &str) -> DomainResult<Option<BlockDocument>> {
        Ok(self.get_latest_blocks(chain_id, 1).await?.into_iter().next())
    }

    async fn get_latest_blocks(&self, chain_id: &str, limit: u64)
        -> DomainResult<Vec<BlockDocument>> {
        // ZREVRANGE with a stop of -1 would return the whole set
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = i64::try_from(limit - 1).unwrap_or(i64::MAX);
        let mut conn = self.manager.clone();
        let raw: Vec<String> = redis::cmd("ZREVRANGE")
            .arg(self.keys.block_store(chain_id))
            .arg(0)
            .arg(stop)
            .query_async(&mut conn)
            .await?;
        Self::decode(raw)
    }
}
