//! Implementation of the `blockfeed migrate` command.

use anyhow::{Context, Result};

use crate::cli::bootstrap::Database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Debug, serde::Serialize)]
pub struct MigrateOutput {
    pub backend: &'static str,
    pub applied: usize,
}

impl CommandOutput for MigrateOutput {
    fn to_human(&self) -> String {
        if self.applied == 0 {
            format!("{} schema is up to date", self.backend)
        } else {
            format!("Applied {} migration(s) to {}", self.applied, self.backend)
        }
    }
}

pub async fn execute(config: &Config, json_mode: bool) -> Result<()> {
    let database = Database::connect(&config.database).await?;
    let applied = database.migrate().await.context("Failed to migrate database")?;

    output(
        &MigrateOutput {
            backend: database.backend(),
            applied,
        },
        json_mode,
    );
    Ok(())
}
