//! Domain layer for the blockfeed delivery pipeline
//!
//! This module contains the pipeline's models, its error type and the ports
//! (traits) that storage and transport adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
