//! Infrastructure layer module
//!
//! - Configuration management (figment, YAML and environment overlays)
//! - Logging infrastructure (tracing subscriber setup)

pub mod config;
pub mod logging;
