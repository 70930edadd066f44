//! MySQL implementation of the WebhookRepository.
//!
//! Concurrent balancers share node rows, so assignment locks the chosen node
//! with `FOR UPDATE SKIP LOCKED` and moves on to the next node instead of
//! queueing behind another transaction.

use async_trait::async_trait;
use sqlx::MySqlPool;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ActivationOutcome, ClaimedWebhook, Webhook, WebhookAssignment, WebhookClaim, WebhookNode,
};
use crate::domain::ports::WebhookRepository;

#[derive(Clone)]
pub struct MySqlWebhookRepository {
    pool: MySqlPool,
}

impl MySqlWebhookRepository {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WebhookRow {
    id: String,
    url: String,
    is_active: i8,
    max_blocks: u32,
    max_retries: u32,
    timeout_ms: u64,
    blockchain_id: String,
    customer_id: String,
}

impl From<WebhookRow> for Webhook {
    fn from(row: WebhookRow) -> Self {
        Webhook {
            id: row.id,
            url: row.url,
            is_active: row.is_active != 0,
            max_blocks: row.max_blocks,
            max_retries: row.max_retries,
            timeout_ms: row.timeout_ms,
            blockchain_id: row.blockchain_id,
            customer_id: row.customer_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ClaimedWebhookRow {
    claim_id: String,
    claimed_by: String,
    #[sqlx(flatten)]
    webhook: WebhookRow,
}

#[derive(Debug, sqlx::FromRow)]
struct NodeRow {
    id: String,
    url: String,
    blockchain_id: String,
}

impl From<NodeRow> for WebhookNode {
    fn from(row: NodeRow) -> Self {
        WebhookNode::new(row.id, row.url, row.blockchain_id)
    }
}

const WEBHOOK_COLUMNS: &str =
    "w.id, w.url, w.is_active, w.max_blocks, w.max_retries, w.timeout_ms, w.blockchain_id, w.customer_id";

const ASSIGNED_NODE: &str = r#"SELECT n.id, n.url, n.blockchain_id
    FROM webhook_assignment a
    JOIN webhook_node n ON n.id = a.webhook_node_id
    WHERE a.webhook_id = ?"#;

#[async_trait]
impl WebhookRepository for MySqlWebhookRepository {
    async fn create_webhook(&self, webhook: &Webhook) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO webhook (id, url, is_active, max_blocks, max_retries, timeout_ms, blockchain_id, customer_id)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&webhook.id)
        .bind(&webhook.url)
        .bind(i8::from(webhook.is_active))
        .bind(webhook.max_blocks)
        .bind(webhook.max_retries)
        .bind(webhook.timeout_ms)
        .bind(&webhook.blockchain_id)
        .bind(&webhook.customer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_webhook(&self, id: &str) -> DomainResult<Option<Webhook>> {
        let row: Option<WebhookRow> =
            sqlx::query_as(&format!("SELECT {WEBHOOK_COLUMNS} FROM webhook w WHERE w.id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Webhook::from))
    }

    async fn delete_webhook(&self, id: &str) -> DomainResult<()> {
        sqlx::query("DELETE FROM webhook WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_node(&self, node: &WebhookNode) -> DomainResult<()> {
        sqlx::query("INSERT INTO webhook_node (id, url, blockchain_id) VALUES (?, ?, ?)")
            .bind(&node.id)
            .bind(&node.url)
            .bind(&node.blockchain_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_nodes(&self) -> DomainResult<Vec<WebhookNode>> {
        let rows: Vec<NodeRow> = sqlx::query_as("SELECT id, url, blockchain_id FROM webhook_node ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(WebhookNode::from).collect())
    }

    async fn count_nodes(&self) -> DomainResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_node")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn claim_webhook(&self, webhook_id: &str, claimed_by: &str) -> DomainResult<u64> {
        let result = sqlx::query(
            r#"INSERT IGNORE INTO webhook_claim (id, claimed_by, webhook_id)
               SELECT ?, ?, id FROM webhook WHERE id = ?"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(claimed_by)
        .bind(webhook_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn find_claimed_webhook(&self, webhook_id: &str) -> DomainResult<Option<ClaimedWebhook>> {
        let row: Option<ClaimedWebhookRow> = sqlx::query_as(&format!(
            r#"SELECT c.id AS claim_id, c.claimed_by, {WEBHOOK_COLUMNS}
               FROM webhook_claim c
               JOIN webhook w ON w.id = c.webhook_id
               WHERE c.webhook_id = ?"#
        ))
        .bind(webhook_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ClaimedWebhook {
            claim: WebhookClaim {
                id: row.claim_id,
                webhook_id: row.webhook.id.clone(),
                claimed_by: row.claimed_by,
            },
            webhook: Webhook::from(row.webhook),
        }))
    }

    async fn locate_webhook(&self, webhook_id: &str) -> DomainResult<Option<WebhookNode>> {
        let row: Option<NodeRow> = sqlx::query_as(ASSIGNED_NODE)
            .bind(webhook_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(WebhookNode::from))
    }

    async fn assign_to_least_loaded_node(&self, claimed: &ClaimedWebhook) -> DomainResult<WebhookNode> {
        let webhook = &claimed.webhook;
        let mut tx = self.pool.begin().await?;

        let existing: Option<NodeRow> = sqlx::query_as(ASSIGNED_NODE)
            .bind(&webhook.id)
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(node) = existing {
            tx.commit().await?;
            return Ok(node.into());
        }

        let node: Option<NodeRow> = sqlx::query_as(
            r#"SELECT n.id, n.url, n.blockchain_id
               FROM webhook_node n
               WHERE n.blockchain_id = ?
               ORDER BY (SELECT COUNT(*) FROM webhook_assignment a WHERE a.webhook_node_id = n.id) ASC, n.id ASC
               LIMIT 1
               FOR UPDATE SKIP LOCKED"#,
        )
        .bind(&webhook.blockchain_id)
        .fetch_optional(&mut *tx)
        .await?;
        let node = WebhookNode::from(node.ok_or_else(|| DomainError::NodesUnavailable(webhook.blockchain_id.clone()))?);

        if node.blockchain_id != webhook.blockchain_id {
            return Err(DomainError::ChainMismatch {
                webhook_id: webhook.id.clone(),
                webhook_chain: webhook.blockchain_id.clone(),
                node_id: node.id,
                node_chain: node.blockchain_id,
            });
        }

        sqlx::query(
            r#"INSERT INTO webhook_assignment (id, webhook_claim_id, webhook_node_id, webhook_id)
               VALUES (?, ?, ?, ?)"#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&claimed.claim.id)
        .bind(&node.id)
        .bind(&webhook.id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        debug!(webhook_id = %webhook.id, node_id = %node.id, "assigned webhook to node");
        Ok(node)
    }

    async fn get_assignment(&self, webhook_id: &str) -> DomainResult<Option<WebhookAssignment>> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT id, webhook_claim_id, webhook_node_id, webhook_id FROM webhook_assignment WHERE webhook_id = ?",
        )
        .bind(webhook_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, webhook_claim_id, webhook_node_id, webhook_id)| WebhookAssignment {
            id,
            webhook_claim_id,
            webhook_node_id,
            webhook_id,
        }))
    }

    async fn node_load(&self, node_id: &str) -> DomainResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM webhook_assignment WHERE webhook_node_id = ?")
            .bind(node_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn activate_webhook(&self, webhook_id: &str) -> DomainResult<ActivationOutcome> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(i8,)> = sqlx::query_as("SELECT is_active FROM webhook WHERE id = ? FOR UPDATE SKIP LOCKED")
            .bind(webhook_id)
            .fetch_optional(&mut *tx)
            .await?;

        let outcome = match row {
            None => ActivationOutcome::Unavailable,
            Some((active,)) if active != 0 => ActivationOutcome::AlreadyActive,
            Some(_) => {
                sqlx::query("UPDATE webhook SET is_active = 1 WHERE id = ?")
                    .bind(webhook_id)
                    .execute(&mut *tx)
                    .await?;
                ActivationOutcome::Activated
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }
}
