//! In-process block store.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::domain::errors::DomainResult;
use crate::domain::models::BlockDocument;
use crate::domain::ports::BlockStore;

/// Block store keeping every chain in an ordered map.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    chains: RwLock<HashMap<String, BTreeMap<u64, String>>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn init(&self, chain_id: &str) -> DomainResult<()> {
        self.chains
            .write()
            .await
            .entry(chain_id.to_string())
            .or_default();
        Ok(())
    }

    async fn put_blocks(&self, chain_id: &str, blocks: &[BlockDocument]) -> DomainResult<()> {
        let mut chains = self.chains.write().await;
        let chain = chains.entry(chain_id.to_string()).or_default();
        for block in blocks {
            chain
                .entry(block.height)
                .or_insert_with(|| block.data.clone());
        }
        Ok(())
    }

    async fn get_blocks(&self, chain_id: &str, start: u64, end: u64)
        -> DomainResult<Vec<BlockDocument>> {
        if start > end {
            return Ok(Vec::new());
        }
        let chains = self.chains.read().await;
        Ok(chains
            .get(chain_id)
            .map(|chain| {
                chain
                    .range(start..=end)
                    .map(|(height, data)| BlockDocument::new(*height, data.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_latest_block(&self, chain_id: &str) -> DomainResult<Option<BlockDocument>> {
        let chains = self.chains.read().await;
        Ok(chains
            .get(chain_id)
            .and_then(|chain| chain.last_key_value())
            .map(|(height, data)| BlockDocument::new(*height, data.clone())))
    }

    async fn get_latest_blocks(&self, chain_id: &str, limit: u64)
        -> DomainResult<Vec<BlockDocument>> {
        let chains = self.chains.read().await;
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);
        Ok(chains
            .get(chain_id)
            .map(|chain| {
                chain
                    .iter()
                    .rev()
                    .take(limit)
                    .map(|(height, data)| BlockDocument::new(*height, data.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_store() -> MemoryBlockStore {
        let store = MemoryBlockStore::new();
        store.init("eth").await.unwrap();
        let blocks: Vec<_> = (1..=5)
            .map(|h| BlockDocument::new(h, format!("{{\"number\":{h}}}")))
            .collect();
        store.put_blocks("eth", &blocks).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_get_blocks_inclusive_ascending() {
        let store = seeded_store().await;
        let heights: Vec<u64> = store
            .get_blocks("eth", 2, 4)
            .await
            .unwrap()
            .iter()
            .map(|b| b.height)
            .collect();
        assert_eq!(heights, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_latest_blocks_descending() {
        let store = seeded_store().await;
        let heights: Vec<u64> = store
            .get_latest_blocks("eth", 2)
            .await
            .unwrap()
            .iter()
            .map(|b| b.height)
            .collect();
        assert_eq!(heights, vec![5, 4]);
        assert_eq!(store.get_latest_block("eth").await.unwrap().unwrap().height, 5);
    }

    #[tokio::test]
    async fn test_put_ignores_duplicate_heights() {
        let store = seeded_store().await;
        store
            .put_blocks("eth", &[BlockDocument::new(3, "replaced")])
            .await
            .unwrap();
        let blocks = store.get_blocks("eth", 3, 3).await.unwrap();
        assert_eq!(blocks[0].data, "{\"number\":3}");
    }

    #[tokio::test]
    async fn test_unknown_chain_is_empty() {
        let store = MemoryBlockStore::new();
        assert!(store.get_blocks("sol", 0, 10).await.unwrap().is_empty());
        assert!(store.get_latest_block("sol").await.unwrap().is_none());
    }
}
