//! Audit log repository
//!
//! The audit trail is append-only and fire-and-forget: callers log write
//! failures and carry on, so the pipeline never aborts on audit errors.

use crate::db::DatabasePool;
use async_trait::async_trait;
use postwatch_common::types::OwnerId;
use postwatch_common::{Error, Result};
use uuid::Uuid;

/// Audit repository trait
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn record(
        &self,
        owner_id: OwnerId,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        details: serde_json::Value,
    ) -> Result<()>;
}

/// Database audit repository
pub struct DbAuditRepository {
    pool: DatabasePool,
}

impl DbAuditRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for DbAuditRepository {
    async fn record(
        &self,
        owner_id: OwnerId,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        details: serde_json::Value,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query(
            r#"
            INSERT INTO audit_logs
                (id, owner_id, action, resource_type, resource_id, details, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(owner_id)
        .bind(action)
        .bind(resource_type)
        .bind(resource_id)
        .bind(&details)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
