//! Common types for Postwatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for account owners
pub type OwnerId = Uuid;

/// Unique identifier for mailbox configurations
pub type MailboxConfigId = Uuid;

/// Unique identifier for stored reports
pub type ReportId = Uuid;

/// Unique identifier for analysis results
pub type AnalysisResultId = Uuid;

/// Unique identifier for recommendations
pub type RecommendationId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Authentication outcome as reported in an aggregate report.
///
/// Reporters are not always well behaved, so parsing is lenient: anything
/// outside the known vocabulary maps to `Unknown` rather than failing the
/// record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthOutcome {
    Pass,
    Fail,
    SoftFail,
    Neutral,
    None,
    TempError,
    PermError,
    Unknown,
}

impl AuthOutcome {
    /// Parse a reported outcome string
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pass" => AuthOutcome::Pass,
            "fail" => AuthOutcome::Fail,
            "softfail" => AuthOutcome::SoftFail,
            "neutral" => AuthOutcome::Neutral,
            "none" | "" => AuthOutcome::None,
            "temperror" => AuthOutcome::TempError,
            "permerror" => AuthOutcome::PermError,
            _ => AuthOutcome::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthOutcome::Pass => "pass",
            AuthOutcome::Fail => "fail",
            AuthOutcome::SoftFail => "softfail",
            AuthOutcome::Neutral => "neutral",
            AuthOutcome::None => "none",
            AuthOutcome::TempError => "temperror",
            AuthOutcome::PermError => "permerror",
            AuthOutcome::Unknown => "unknown",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, AuthOutcome::Pass)
    }
}

impl std::fmt::Display for AuthOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disposition a receiver applied to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    None,
    Quarantine,
    Reject,
    Unknown,
}

impl Disposition {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "" => Disposition::None,
            "quarantine" => Disposition::Quarantine,
            "reject" => Disposition::Reject,
            _ => Disposition::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::None => "none",
            Disposition::Quarantine => "quarantine",
            Disposition::Reject => "reject",
            Disposition::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a detected issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Health-score penalty carried by an issue of this severity
    pub fn penalty(&self) -> f64 {
        match self {
            Severity::Critical => 20.0,
            Severity::High => 10.0,
            Severity::Medium => 5.0,
            Severity::Low => 2.0,
        }
    }

    /// Severities that count toward the anomaly total
    pub fn is_anomalous(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Issue category for grouping in the UI layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Spf,
    Dkim,
    Pattern,
    Alignment,
    Info,
}

/// Overall status of an analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Excellent,
    Good,
    Warning,
    Critical,
    NoData,
    Error,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Excellent => "excellent",
            AnalysisStatus::Good => "good",
            AnalysisStatus::Warning => "warning",
            AnalysisStatus::Critical => "critical",
            AnalysisStatus::NoData => "no_data",
            AnalysisStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Pending,
    InProgress,
    Completed,
    Dismissed,
    Failed,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::InProgress => "in_progress",
            RecommendationStatus::Completed => "completed",
            RecommendationStatus::Dismissed => "dismissed",
            RecommendationStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RecommendationStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RecommendationStatus::Pending),
            "in_progress" => Ok(RecommendationStatus::InProgress),
            "completed" => Ok(RecommendationStatus::Completed),
            "dismissed" => Ok(RecommendationStatus::Dismissed),
            "failed" => Ok(RecommendationStatus::Failed),
            other => Err(crate::Error::Validation(format!(
                "Invalid recommendation status: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for RecommendationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User acknowledgment on a recommendation, tracked separately from status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    None,
    Acknowledged,
    Implementing,
    Completed,
    Dismissed,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::None => "none",
            UserAction::Acknowledged => "acknowledged",
            UserAction::Implementing => "implementing",
            UserAction::Completed => "completed",
            UserAction::Dismissed => "dismissed",
        }
    }
}

impl std::str::FromStr for UserAction {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(UserAction::None),
            "acknowledged" => Ok(UserAction::Acknowledged),
            "implementing" => Ok(UserAction::Implementing),
            "completed" => Ok(UserAction::Completed),
            "dismissed" => Ok(UserAction::Dismissed),
            other => Err(crate::Error::Validation(format!(
                "Invalid user action: {}",
                other
            ))),
        }
    }
}

impl std::fmt::Display for UserAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
