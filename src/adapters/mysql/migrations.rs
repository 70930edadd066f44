//! MySQL schema migrations.

use sqlx::MySqlPool;

use crate::adapters::database::{Migration, MigrationError};

pub struct MySqlMigrator {
    pool: MySqlPool,
}

impl MySqlMigrator {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub async fn run_embedded_migrations(&self, migrations: Vec<Migration>) -> Result<usize, MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version BIGINT PRIMARY KEY,
                applied_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                description TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MigrationError::ExecutionError { version: 0, source: e })?;

        let (current_version,): (i64,) = sqlx::query_as("SELECT CAST(COALESCE(MAX(version), 0) AS SIGNED) FROM schema_migrations")
            .fetch_one(&self.pool)
            .await
            .map_err(MigrationError::VersionCheckError)?;

        let pending: Vec<_> = migrations.into_iter().filter(|m| m.version > current_version).collect();
        for migration in &pending {
            // MySQL commits DDL implicitly, so the version row is written after the schema.
            let to_error = |e| MigrationError::ExecutionError { version: migration.version, source: e };
            sqlx::raw_sql(&migration.sql).execute(&self.pool).await.map_err(to_error)?;
            sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
                .bind(migration.version)
                .bind(&migration.description)
                .execute(&self.pool)
                .await
                .map_err(to_error)?;
        }

        Ok(pending.len())
    }
}

pub fn all_embedded_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema".to_string(),
        sql: include_str!("../../../migrations/mysql/001_initial_schema.sql").to_string(),
    }]
}
