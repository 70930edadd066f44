//! Connections to the stream stores of the delivery nodes.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::WebhookNode;
use crate::domain::ports::NodeConnector;
use crate::streams::{ActivationStream, StreamKeys};

/// Activation streams of every known delivery node, keyed by node URL.
///
/// Built once at startup from the node table. Nodes registered later are not
/// picked up until the pool is rebuilt.
pub struct NodePool {
    streams: RwLock<HashMap<String, ActivationStream>>,
}

impl NodePool {
    /// Open one connection per distinct node URL.
    pub async fn connect(
        connector: &dyn NodeConnector,
        nodes: &[WebhookNode],
        namespace: &str,
        max_nodes: usize,
    ) -> DomainResult<Self> {
        if nodes.len() > max_nodes {
            return Err(DomainError::NodePoolFull(max_nodes));
        }

        let mut streams = HashMap::with_capacity(nodes.len());
        for node in nodes {
            if streams.contains_key(&node.url) {
                continue;
            }
            let log = connector.connect(&node.url).await?;
            let stream = ActivationStream::new(log, &StreamKeys::new(namespace, node.id.as_str()));
            streams.insert(node.url.clone(), stream);
        }

        info!(nodes = streams.len(), "connected node pool");
        Ok(Self {
            streams: RwLock::new(streams),
        })
    }

    /// Activation stream hosted on `node`.
    pub async fn activation_stream(&self, node: &WebhookNode) -> DomainResult<ActivationStream> {
        self.streams
            .read()
            .await
            .get(&node.url)
            .cloned()
            .ok_or_else(|| DomainError::UnknownNode(node.id.clone()))
    }

    pub async fn len(&self) -> usize {
        self.streams.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every node connection. Later lookups fail with `UnknownNode`.
    pub async fn shutdown(&self) {
        let closed = {
            let mut streams = self.streams.write().await;
            let count = streams.len();
            streams.clear();
            count
        };
        info!(nodes = closed, "node pool shut down");
    }
}
