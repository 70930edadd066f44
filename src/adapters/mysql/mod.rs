//! MySQL adapters for the relational store.

pub mod connection;
pub mod migrations;
pub mod webhook_repository;

pub use connection::create_pool;
pub use migrations::{all_embedded_migrations, MySqlMigrator};
pub use webhook_repository::MySqlWebhookRepository;
