//! Blockfeed - block-to-webhook delivery pipeline
//!
//! Blockfeed delivers blockchain block data to customer-registered HTTP webhooks
//! as new blocks appear on a chain. Delivery is at-least-once and ordered per
//! webhook, and every step can be retried after a crash.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and the ports the pipeline depends on
//! - **Adapters** (`adapters`): Redis, in-memory, SQLite and MySQL implementations of the ports
//! - **Streams** (`streams`): the reliable consumer-group stream and its typed variants
//! - **Service Layer** (`services`): load balancer, activator, delivery worker, flusher, ingester
//! - **Infrastructure Layer** (`infrastructure`): configuration loading and logging
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Pipeline
//!
//! ```text
//! registration -> load-balancer stream -> LoadBalancer (claim, assign)
//!     -> node activation stream -> Activator -> pending set
//!     -> (new block) flush -> webhook stream -> WebhookConsumer -> HTTP POST
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;
pub mod streams;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    ActivationRequest, BlockDocument, ClaimedWebhook, Config, LoadBalancerRequest, Webhook,
    WebhookJob, WebhookNode,
};
pub use domain::ports::{BlockStore, NodeConnector, StreamLog, WebhookRepository};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use streams::{ActivationStream, ReliableStream, WebhookStream};
