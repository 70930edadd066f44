//! CLI command implementations.

pub mod activator;
pub mod deliver;
pub mod flusher;
pub mod ingest;
pub mod load_balancer;
pub mod migrate;
pub mod nodes;
pub mod request_activation;
