//! Database models

use chrono::{DateTime, Utc};
use postwatch_common::types::{AnalysisResultId, MailboxConfigId, OwnerId, RecommendationId, ReportId};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Mailbox polling configuration for one owner
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MailboxConfig {
    pub id: MailboxConfigId,
    pub owner_id: OwnerId,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    /// Base64 AES-GCM ciphertext, nonce-prefixed
    pub password_encrypted: String,
    /// Identifier of the key the password was encrypted under
    pub encryption_key_id: String,
    pub use_ssl: bool,
    pub folder: String,
    pub is_active: bool,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a mailbox configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMailboxConfig {
    pub owner_id: OwnerId,
    pub name: String,
    pub host: String,
    pub port: i32,
    pub username: String,
    pub password_encrypted: String,
    pub encryption_key_id: String,
    pub use_ssl: bool,
    pub folder: String,
}

/// One stored aggregate report
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub owner_id: OwnerId,
    pub mailbox_config_id: Option<MailboxConfigId>,
    pub org_name: String,
    pub email: Option<String>,
    /// External report identifier assigned by the reporting organization
    pub report_id: String,
    pub domain: String,
    pub date_range_begin: Option<DateTime<Utc>>,
    pub date_range_end: Option<DateTime<Utc>>,
    pub domain_policy: Option<String>,
    pub subdomain_policy: Option<String>,
    pub policy_percentage: i32,
    pub total_records: i64,
    pub pass_count: i64,
    pub fail_count: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for storing a report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReport {
    pub owner_id: OwnerId,
    pub mailbox_config_id: Option<MailboxConfigId>,
    pub org_name: String,
    pub email: Option<String>,
    pub report_id: String,
    pub domain: String,
    pub date_range_begin: Option<DateTime<Utc>>,
    pub date_range_end: Option<DateTime<Utc>>,
    pub domain_policy: Option<String>,
    pub subdomain_policy: Option<String>,
    pub policy_percentage: i32,
    pub total_records: i64,
    pub pass_count: i64,
    pub fail_count: i64,
}

/// One row within a stored report
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: uuid::Uuid,
    pub report_id: ReportId,
    pub source_ip: String,
    pub count: i64,
    pub disposition: String,
    pub spf_result: String,
    pub dkim_result: String,
    pub dkim_domain: Option<String>,
    pub dkim_selector: Option<String>,
    pub spf_domain: Option<String>,
    pub header_from: Option<String>,
    pub envelope_from: Option<String>,
    pub envelope_to: Option<String>,
}

/// Input for storing a report record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewReportRecord {
    pub source_ip: String,
    pub count: i64,
    pub disposition: String,
    pub spf_result: String,
    pub dkim_result: String,
    pub dkim_domain: Option<String>,
    pub dkim_selector: Option<String>,
    pub spf_domain: Option<String>,
    pub header_from: Option<String>,
    pub envelope_from: Option<String>,
    pub envelope_to: Option<String>,
}

impl ReportRecord {
    /// DMARC pass semantics: either SPF or DKIM passing is enough
    pub fn is_passing(&self) -> bool {
        self.spf_result == "pass" || self.dkim_result == "pass"
    }
}

/// One analysis run result, append-only per (owner, domain)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnalysisResultRow {
    pub id: AnalysisResultId,
    pub owner_id: OwnerId,
    pub domain: String,
    pub health_score: i32,
    pub failure_rate: f64,
    pub anomalies_detected: i32,
    pub issues: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Input for storing an analysis result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnalysisResult {
    pub owner_id: OwnerId,
    pub domain: String,
    pub health_score: i32,
    pub failure_rate: f64,
    pub anomalies_detected: i32,
    pub issues: serde_json::Value,
    pub status: String,
}

/// Stored recommendation, tied to the analysis run that produced it
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RecommendationRow {
    pub id: RecommendationId,
    pub analysis_result_id: AnalysisResultId,
    pub recommendation_type: String,
    pub priority: String,
    pub title: String,
    pub description: String,
    pub implementation_steps: serde_json::Value,
    pub status: String,
    pub user_action: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for storing a recommendation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecommendation {
    pub analysis_result_id: AnalysisResultId,
    pub recommendation_type: String,
    pub priority: String,
    pub title: String,
    pub description: String,
    pub implementation_steps: serde_json::Value,
}

/// Append-only audit trail entry
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: uuid::Uuid,
    pub owner_id: OwnerId,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
