pub mod block;
pub mod config;
pub mod message;
pub mod webhook;

pub use block::BlockDocument;
pub use config::{
    ChainConfig, Config, DatabaseConfig, FlushOrder, LoadBalancerConfig, LogFormat, LoggingConfig,
    RedisConfig, RotationPolicy, StreamConfig,
};
pub use message::{
    ActivationRequest, BlockFlushNotice, LoadBalancerRequest, ParsedMessage, StreamMessage,
    WebhookJob, DATA_FIELD,
};
pub use webhook::{
    ActivationOutcome, ClaimedWebhook, Webhook, WebhookAssignment, WebhookClaim, WebhookNode,
};
