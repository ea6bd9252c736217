//! Recommendation repository

use crate::db::DatabasePool;
use crate::models::{NewRecommendation, RecommendationRow};
use async_trait::async_trait;
use postwatch_common::types::{AnalysisResultId, RecommendationId, RecommendationStatus, UserAction};
use postwatch_common::{Error, Result};
use uuid::Uuid;

/// Recommendation repository trait
#[async_trait]
pub trait RecommendationRepository: Send + Sync {
    async fn create(&self, input: NewRecommendation) -> Result<RecommendationRow>;
    async fn get(&self, id: RecommendationId) -> Result<Option<RecommendationRow>>;
    async fn list_for_analysis(&self, analysis_id: AnalysisResultId) -> Result<Vec<RecommendationRow>>;
    /// Update lifecycle status and user acknowledgment. Values are typed at
    /// the call boundary, so anything reaching here is already validated.
    async fn update_status(
        &self,
        id: RecommendationId,
        status: RecommendationStatus,
        user_action: UserAction,
    ) -> Result<()>;
}

/// Database recommendation repository
pub struct DbRecommendationRepository {
    pool: DatabasePool,
}

impl DbRecommendationRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecommendationRepository for DbRecommendationRepository {
    async fn create(&self, input: NewRecommendation) -> Result<RecommendationRow> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO recommendations
                (id, analysis_result_id, recommendation_type, priority, title,
                 description, implementation_steps, status, user_action,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', 'none', $8, $8)
            "#,
        )
        .bind(id)
        .bind(input.analysis_result_id)
        .bind(&input.recommendation_type)
        .bind(&input.priority)
        .bind(&input.title)
        .bind(&input.description)
        .bind(&input.implementation_steps)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to store recommendation".to_string()))
    }

    async fn get(&self, id: RecommendationId) -> Result<Option<RecommendationRow>> {
        sqlx::query_as::<_, RecommendationRow>("SELECT * FROM recommendations WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list_for_analysis(
        &self,
        analysis_id: AnalysisResultId,
    ) -> Result<Vec<RecommendationRow>> {
        sqlx::query_as::<_, RecommendationRow>(
            r#"
            SELECT * FROM recommendations
            WHERE analysis_result_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(analysis_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn update_status(
        &self,
        id: RecommendationId,
        status: RecommendationStatus,
        user_action: UserAction,
    ) -> Result<()> {
        let now = chrono::Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE recommendations
            SET status = $2, user_action = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(user_action.as_str())
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Recommendation {}", id)));
        }
        Ok(())
    }
}
