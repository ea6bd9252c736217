//! Report and record repository

use crate::db::DatabasePool;
use crate::models::{NewReport, NewReportRecord, Report, ReportRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postwatch_common::types::{OwnerId, ReportId};
use postwatch_common::{Error, Result};
use uuid::Uuid;

/// Report repository trait
#[async_trait]
pub trait ReportRepository: Send + Sync {
    /// Look up an already-stored report by its de-duplication key
    async fn find_duplicate(
        &self,
        owner_id: OwnerId,
        report_id: &str,
        org_name: &str,
    ) -> Result<Option<ReportId>>;

    /// Insert a report together with its records in one transaction
    async fn insert(&self, report: NewReport, records: Vec<NewReportRecord>) -> Result<Report>;

    /// Reports for one (owner, domain) created after the cutoff
    async fn list_since(
        &self,
        owner_id: OwnerId,
        domain: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Report>>;

    /// All records belonging to reports for one (owner, domain) after the cutoff
    async fn records_since(
        &self,
        owner_id: OwnerId,
        domain: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReportRecord>>;
}

/// Database report repository
pub struct DbReportRepository {
    pool: DatabasePool,
}

impl DbReportRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, owner_id: OwnerId, id: ReportId) -> Result<Option<Report>> {
        sqlx::query_as::<_, Report>(
            "SELECT * FROM dmarc_reports WHERE owner_id = $1 AND id = $2",
        )
        .bind(owner_id)
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}

#[async_trait]
impl ReportRepository for DbReportRepository {
    async fn find_duplicate(
        &self,
        owner_id: OwnerId,
        report_id: &str,
        org_name: &str,
    ) -> Result<Option<ReportId>> {
        let row: Option<(ReportId,)> = sqlx::query_as(
            r#"
            SELECT id FROM dmarc_reports
            WHERE owner_id = $1 AND report_id = $2 AND org_name = $3
            "#,
        )
        .bind(owner_id)
        .bind(report_id)
        .bind(org_name)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.map(|(id,)| id))
    }

    async fn insert(&self, report: NewReport, records: Vec<NewReportRecord>) -> Result<Report> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        let mut tx = self
            .pool
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO dmarc_reports
                (id, owner_id, mailbox_config_id, org_name, email, report_id, domain,
                 date_range_begin, date_range_end, domain_policy, subdomain_policy,
                 policy_percentage, total_records, pass_count, fail_count,
                 status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    'processed', $16)
            "#,
        )
        .bind(id)
        .bind(report.owner_id)
        .bind(report.mailbox_config_id)
        .bind(&report.org_name)
        .bind(&report.email)
        .bind(&report.report_id)
        .bind(&report.domain)
        .bind(report.date_range_begin)
        .bind(report.date_range_end)
        .bind(&report.domain_policy)
        .bind(&report.subdomain_policy)
        .bind(report.policy_percentage)
        .bind(report.total_records)
        .bind(report.pass_count)
        .bind(report.fail_count)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        for record in &records {
            sqlx::query(
                r#"
                INSERT INTO dmarc_records
                    (id, report_id, source_ip, count, disposition, spf_result, dkim_result,
                     dkim_domain, dkim_selector, spf_domain, header_from, envelope_from,
                     envelope_to)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(id)
            .bind(&record.source_ip)
            .bind(record.count)
            .bind(&record.disposition)
            .bind(&record.spf_result)
            .bind(&record.dkim_result)
            .bind(&record.dkim_domain)
            .bind(&record.dkim_selector)
            .bind(&record.spf_domain)
            .bind(&record.header_from)
            .bind(&record.envelope_from)
            .bind(&record.envelope_to)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        self.get(report.owner_id, id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to store report".to_string()))
    }

    async fn list_since(
        &self,
        owner_id: OwnerId,
        domain: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Report>> {
        sqlx::query_as::<_, Report>(
            r#"
            SELECT * FROM dmarc_reports
            WHERE owner_id = $1 AND domain = $2 AND created_at >= $3
            ORDER BY created_at ASC
            "#,
        )
        .bind(owner_id)
        .bind(domain)
        .bind(cutoff)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn records_since(
        &self,
        owner_id: OwnerId,
        domain: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ReportRecord>> {
        sqlx::query_as::<_, ReportRecord>(
            r#"
            SELECT r.* FROM dmarc_records r
            JOIN dmarc_reports p ON p.id = r.report_id
            WHERE p.owner_id = $1 AND p.domain = $2 AND p.created_at >= $3
            "#,
        )
        .bind(owner_id)
        .bind(domain)
        .bind(cutoff)
        .fetch_all(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }
}
