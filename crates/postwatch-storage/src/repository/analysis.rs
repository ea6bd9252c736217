//! Analysis result repository

use crate::db::DatabasePool;
use crate::models::{AnalysisResultRow, NewAnalysisResult};
use async_trait::async_trait;
use postwatch_common::types::{AnalysisResultId, OwnerId};
use postwatch_common::{Error, Result};
use uuid::Uuid;

/// Analysis result repository trait
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    /// Append a new result; earlier results for the same domain are kept
    async fn insert(&self, input: NewAnalysisResult) -> Result<AnalysisResultRow>;
    async fn get(&self, owner_id: OwnerId, id: AnalysisResultId) -> Result<Option<AnalysisResultRow>>;
    async fn latest(&self, owner_id: OwnerId, domain: &str) -> Result<Option<AnalysisResultRow>>;
}

/// Database analysis result repository
pub struct DbAnalysisRepository {
    pool: DatabasePool,
}

impl DbAnalysisRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalysisRepository for DbAnalysisRepository {
    async fn insert(&self, input: NewAnalysisResult) -> Result<AnalysisResultRow> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO analysis_results
                (id, owner_id, domain, health_score, failure_rate,
                 anomalies_detected, issues, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(input.owner_id)
        .bind(&input.domain)
        .bind(input.health_score)
        .bind(input.failure_rate)
        .bind(input.anomalies_detected)
        .bind(&input.issues)
        .bind(&input.status)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(input.owner_id, id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to store analysis result".to_string()))
    }

    async fn get(
        &self,
        owner_id: OwnerId,
        id: AnalysisResultId,
    ) -> Result<Option<AnalysisResultRow>> {
        sqlx::query_as::<_, AnalysisResultRow>(
            "SELECT * FROM analysis_results WHERE owner_id = $1 AND id = $2",
        )
        .bind(owner_id)
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn latest(&self, owner_id: OwnerId, domain: &str) -> Result<Option<AnalysisResultRow>> {
        sqlx::query_as::<_, AnalysisResultRow>(
            r#"
            SELECT * FROM analysis_results
            WHERE owner_id = $1 AND domain = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(owner_id)
        .bind(domain)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
