//! Key layout for every stream and scheduler structure.
//!
//! Keys owned by one node share the `{<partition>}` hash tag so the scheduler
//! and activation scripts only ever touch a single cluster slot. A node's
//! partition is its node id, which is how the load balancer finds the
//! activation stream of the node it picked.

use crate::domain::ports::SchedulerKeys;

const SEPARATOR: &str = ":";

/// Builds namespaced keys for one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamKeys {
    namespace: String,
    partition: String,
}

impl StreamKeys {
    pub fn new(namespace: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            partition: partition.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn global(&self, name: &str) -> String {
        [self.namespace.as_str(), name].join(SEPARATOR)
    }

    fn tagged(&self, name: &str) -> String {
        let tag = format!("{{{}}}", self.partition);
        [self.namespace.as_str(), tag.as_str(), name].join(SEPARATOR)
    }

    fn group_of(&self, name: &str) -> String {
        self.global(&format!("{name}-consumer"))
    }

    pub fn load_balancer_stream(&self) -> String {
        self.global("webhook-load-balancer-stream")
    }

    pub fn load_balancer_group(&self) -> String {
        self.group_of("webhook-load-balancer-stream")
    }

    pub fn activation_stream(&self) -> String {
        self.tagged("webhook-activation-stream")
    }

    pub fn activation_group(&self) -> String {
        self.group_of("webhook-activation-stream")
    }

    pub fn webhook_stream(&self) -> String {
        self.tagged("webhook-stream")
    }

    pub fn webhook_group(&self) -> String {
        self.group_of("webhook-stream")
    }

    pub fn pending_set(&self) -> String {
        self.tagged("pending-set")
    }

    pub fn latest_block_height(&self) -> String {
        self.tagged("latest-block-height")
    }

    pub fn block_stream(&self) -> String {
        self.tagged("block-stream")
    }

    pub fn block_group(&self) -> String {
        self.group_of("block-stream")
    }

    pub fn block_flush_stream(&self) -> String {
        self.tagged("block-flush-stream")
    }

    pub fn block_flush_group(&self) -> String {
        self.group_of("block-flush-stream")
    }

    /// Sorted set holding the blocks of one chain.
    pub fn block_store(&self, chain_id: &str) -> String {
        [self.namespace.as_str(), "blocks", chain_id].join(SEPARATOR)
    }

    /// Keys used by the flush and reschedule scripts.
    pub fn scheduler(&self) -> SchedulerKeys {
        SchedulerKeys {
            stream: self.webhook_stream(),
            group: self.webhook_group(),
            pending_set: self.pending_set(),
            latest_height: self.latest_block_height(),
        }
    }
}

impl Default for StreamKeys {
    fn default() -> Self {
        Self::new("block-feed", "s0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_keys_share_hash_tag() {
        let keys = StreamKeys::new("block-feed", "s3");
        assert_eq!(keys.webhook_stream(), "block-feed:{s3}:webhook-stream");
        assert_eq!(keys.pending_set(), "block-feed:{s3}:pending-set");
        assert_eq!(
            keys.latest_block_height(),
            "block-feed:{s3}:latest-block-height"
        );
    }

    #[test]
    fn test_global_keys_and_groups() {
        let keys = StreamKeys::default();
        assert_eq!(
            keys.load_balancer_stream(),
            "block-feed:webhook-load-balancer-stream"
        );
        assert_eq!(
            keys.load_balancer_group(),
            "block-feed:webhook-load-balancer-stream-consumer"
        );
        assert_eq!(
            keys.activation_stream(),
            "block-feed:{s0}:webhook-activation-stream"
        );
        assert_eq!(
            keys.activation_group(),
            "block-feed:webhook-activation-stream-consumer"
        );
        assert_eq!(keys.block_store("eth"), "block-feed:blocks:eth");
    }

    #[test]
    fn test_scheduler_keys() {
        let scheduler = StreamKeys::new("ns", "p").scheduler();
        assert_eq!(scheduler.stream, "ns:{p}:webhook-stream");
        assert_eq!(scheduler.group, "ns:webhook-stream-consumer");
        assert_eq!(scheduler.pending_set, "ns:{p}:pending-set");
    }
}
