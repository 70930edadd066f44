//! Adapters for the stream store, block store and relational store.

pub mod database;
pub mod memory;
pub mod mysql;
pub mod redis;
pub mod sqlite;

pub use database::{ConnectionError, Migration, MigrationError, PoolConfig};
