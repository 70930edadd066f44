//! Block store port.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::BlockDocument;

/// Height-indexed block storage, one ordered collection per chain.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Prepare storage for a chain. Safe to call repeatedly.
    async fn init(&self, chain_id: &str) -> DomainResult<()>;

    /// Store blocks, ignoring heights already present.
    async fn put_blocks(&self, chain_id: &str, blocks: &[BlockDocument]) -> DomainResult<()>;

    /// Blocks with `start <= height <= end`, ascending.
    async fn get_blocks(&self, chain_id: &str, start: u64, end: u64)
        -> DomainResult<Vec<BlockDocument>>;

    /// The highest stored block.
    async fn get_latest_block(&self, chain_id: &str) -> DomainResult<Option<BlockDocument>>;

    /// Up to `limit` highest blocks, descending.
    async fn get_latest_blocks(&self, chain_id: &str, limit: u64)
        -> DomainResult<Vec<BlockDocument>>;
}
