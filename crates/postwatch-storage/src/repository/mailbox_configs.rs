//! Mailbox configuration repository

use crate::db::DatabasePool;
use crate::models::{CreateMailboxConfig, MailboxConfig};
use async_trait::async_trait;
use postwatch_common::types::{MailboxConfigId, OwnerId};
use postwatch_common::{Error, Result};
use uuid::Uuid;

/// Mailbox configuration repository trait
#[async_trait]
pub trait MailboxConfigRepository: Send + Sync {
    async fn create(&self, input: CreateMailboxConfig) -> Result<MailboxConfig>;
    async fn get(&self, owner_id: OwnerId, id: MailboxConfigId) -> Result<Option<MailboxConfig>>;
    /// All active configs across owners, for the scheduler
    async fn list_active(&self) -> Result<Vec<MailboxConfig>>;
    async fn update_last_polled(&self, id: MailboxConfigId) -> Result<()>;
    async fn set_active(&self, id: MailboxConfigId, active: bool) -> Result<()>;
}

/// Database mailbox configuration repository
pub struct DbMailboxConfigRepository {
    pool: DatabasePool,
}

impl DbMailboxConfigRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MailboxConfigRepository for DbMailboxConfigRepository {
    async fn create(&self, input: CreateMailboxConfig) -> Result<MailboxConfig> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO mailbox_configs
                (id, owner_id, name, host, port, username, password_encrypted,
                 encryption_key_id, use_ssl, folder, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, true, $11, $11)
            "#,
        )
        .bind(id)
        .bind(input.owner_id)
        .bind(&input.name)
        .bind(&input.host)
        .bind(input.port)
        .bind(&input.username)
        .bind(&input.password_encrypted)
        .bind(&input.encryption_key_id)
        .bind(input.use_ssl)
        .bind(&input.folder)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(input.owner_id, id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to create mailbox config".to_string()))
    }

    async fn get(&self, owner_id: OwnerId, id: MailboxConfigId) -> Result<Option<MailboxConfig>> {
        sqlx::query_as::<_, MailboxConfig>(
            "SELECT * FROM mailbox_configs WHERE owner_id = $1 AND id = $2",
        )
        .bind(owner_id)
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_active(&self) -> Result<Vec<MailboxConfig>> {
        sqlx::query_as::<_, MailboxConfig>(
            "SELECT * FROM mailbox_configs WHERE is_active = true ORDER BY created_at ASC",
        )
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn update_last_polled(&self, id: MailboxConfigId) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query(
            "UPDATE mailbox_configs SET last_polled_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn set_active(&self, id: MailboxConfigId, active: bool) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query("UPDATE mailbox_configs SET is_active = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(active)
            .bind(now)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
