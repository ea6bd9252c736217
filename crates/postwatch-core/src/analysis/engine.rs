//! Domain authentication analyzer
//!
//! Aggregates stored reports for one (owner, domain) over a sliding
//! window and distills them into a health score, a set of issues, and
//! an overall status. The run never fails outward: missing data yields
//! a no_data result, and an internal failure yields an error result,
//! both persisted like any other run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{Duration, Utc};
use postwatch_common::types::{AnalysisStatus, IssueCategory, OwnerId, Severity};
use postwatch_common::Result;
use postwatch_storage::models::{AnalysisResultRow, NewAnalysisResult, Report, ReportRecord};
use postwatch_storage::repository::{AnalysisRepository, ReportRepository};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analysis::providers::ProviderDirectory;
use crate::analysis::spf_record::{self, SpfSource};

/// One detected issue, stored as JSONB alongside the analysis run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Issue {
    #[serde(rename = "type")]
    pub issue_type: String,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub impact: String,
    pub category: IssueCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

/// Outcome of one analysis run, before persistence
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub domain: String,
    pub health_score: i32,
    pub failure_rate: f64,
    pub anomalies_detected: i32,
    pub issues: Vec<Issue>,
    pub status: AnalysisStatus,
}

/// What the analyzer learned about the published SPF record
struct SpfFindings {
    record: Option<String>,
    lookup_count: usize,
    /// Failing source IPs not covered by the record, with the provider
    /// that operates them when known
    unauthorized: Vec<(String, Option<&'static str>)>,
}

struct DkimFindings {
    valid: i64,
    invalid: i64,
    missing: i64,
}

impl DkimFindings {
    fn total(&self) -> i64 {
        self.valid + self.invalid + self.missing
    }

    fn fail_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.invalid as f64 / self.total() as f64 * 100.0
        }
    }

    fn missing_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.missing as f64 / self.total() as f64 * 100.0
        }
    }
}

pub struct AuthAnalyzer {
    reports: Arc<dyn ReportRepository>,
    analyses: Arc<dyn AnalysisRepository>,
    spf: Arc<dyn SpfSource>,
    providers: ProviderDirectory,
}

impl AuthAnalyzer {
    pub fn new(
        reports: Arc<dyn ReportRepository>,
        analyses: Arc<dyn AnalysisRepository>,
        spf: Arc<dyn SpfSource>,
    ) -> Self {
        Self {
            reports,
            analyses,
            spf,
            providers: ProviderDirectory::new(),
        }
    }

    /// Analyze reports for one domain over the last `window_days` days
    /// and persist the outcome. Always produces a stored result.
    pub async fn analyze(
        &self,
        owner: OwnerId,
        domain: &str,
        window_days: i64,
    ) -> Result<AnalysisResultRow> {
        let result = match self.evaluate(owner, domain, window_days).await {
            Ok(result) => result,
            Err(e) => {
                warn!(domain, error = %e, "analysis run failed");
                error_result(domain, &e.to_string())
            }
        };

        info!(
            domain,
            health_score = result.health_score,
            failure_rate = result.failure_rate,
            status = %result.status,
            "analysis completed"
        );

        self.analyses
            .insert(NewAnalysisResult {
                owner_id: owner,
                domain: result.domain.clone(),
                health_score: result.health_score,
                failure_rate: result.failure_rate,
                anomalies_detected: result.anomalies_detected,
                issues: serde_json::to_value(&result.issues).unwrap_or_default(),
                status: result.status.to_string(),
            })
            .await
    }

    async fn evaluate(
        &self,
        owner: OwnerId,
        domain: &str,
        window_days: i64,
    ) -> Result<AnalysisResult> {
        let cutoff = Utc::now() - Duration::days(window_days);
        let reports = self.reports.list_since(owner, domain, cutoff).await?;
        if reports.is_empty() {
            return Ok(no_data_result(domain));
        }
        let records = self.reports.records_since(owner, domain, cutoff).await?;

        let spf_record = self.spf.lookup_spf(domain).await;
        let spf = self.inspect_spf(spf_record, &records);
        let dkim = inspect_dkim(&records);

        Ok(self.compose(domain, &reports, &records, spf, dkim))
    }

    fn inspect_spf(&self, record: Option<String>, records: &[ReportRecord]) -> SpfFindings {
        let lookup_count = record
            .as_deref()
            .map(spf_record::lookup_estimate)
            .unwrap_or(0);

        let mut failing_ips: Vec<&str> = Vec::new();
        for r in records {
            if r.spf_result == "fail" && r.count > 0 && !failing_ips.contains(&r.source_ip.as_str())
            {
                failing_ips.push(&r.source_ip);
            }
        }

        let unauthorized = failing_ips
            .into_iter()
            .filter(|ip| !spf_record::ip_authorized(ip, record.as_deref()))
            .map(|ip| (ip.to_string(), self.providers.identify_str(ip)))
            .collect();

        SpfFindings {
            record,
            lookup_count,
            unauthorized,
        }
    }

    fn compose(
        &self,
        domain: &str,
        reports: &[Report],
        records: &[ReportRecord],
        spf: SpfFindings,
        dkim: DkimFindings,
    ) -> AnalysisResult {
        let total: i64 = reports.iter().map(|r| r.total_records).sum();
        let failures: i64 = reports.iter().map(|r| r.fail_count).sum();
        let failure_rate = if total > 0 {
            failures as f64 / total as f64 * 100.0
        } else {
            0.0
        };

        let mut issues = Vec::new();
        issues.extend(spf_issues(&spf));
        issues.extend(dkim_issues(&dkim));
        issues.extend(pattern_issues(records, &self.providers));
        issues.extend(alignment_issues(records));

        let health_score = health_score(failure_rate, &issues, &spf, &dkim);
        let anomalies_detected = issues
            .iter()
            .filter(|i| i.severity.is_anomalous())
            .count() as i32;
        let status = status_for(health_score, failure_rate);

        AnalysisResult {
            domain: domain.to_string(),
            health_score,
            failure_rate: (failure_rate * 100.0).round() / 100.0,
            anomalies_detected,
            issues,
            status,
        }
    }
}

fn no_data_result(domain: &str) -> AnalysisResult {
    AnalysisResult {
        domain: domain.to_string(),
        health_score: 0,
        failure_rate: 0.0,
        anomalies_detected: 0,
        issues: vec![Issue {
            issue_type: "no_data".into(),
            severity: Severity::Low,
            title: "No Reports Available".into(),
            message: "No aggregate reports found for analysis".into(),
            impact: "Domain health cannot be assessed yet".into(),
            category: IssueCategory::Info,
            provider: None,
            ip: None,
            details: None,
        }],
        status: AnalysisStatus::NoData,
    }
}

fn error_result(domain: &str, message: &str) -> AnalysisResult {
    AnalysisResult {
        domain: domain.to_string(),
        health_score: 0,
        failure_rate: 0.0,
        anomalies_detected: 0,
        issues: vec![Issue {
            issue_type: "analysis_error".into(),
            severity: Severity::Low,
            title: "Analysis Failed".into(),
            message: format!("Analysis failed: {}", message),
            impact: "Domain health could not be assessed".into(),
            category: IssueCategory::Info,
            provider: None,
            ip: None,
            details: None,
        }],
        status: AnalysisStatus::Error,
    }
}

fn inspect_dkim(records: &[ReportRecord]) -> DkimFindings {
    let mut findings = DkimFindings {
        valid: 0,
        invalid: 0,
        missing: 0,
    };
    for r in records {
        match r.dkim_result.as_str() {
            "pass" => findings.valid += r.count,
            "fail" => findings.invalid += r.count,
            _ => findings.missing += r.count,
        }
    }
    findings
}

fn spf_issues(spf: &SpfFindings) -> Vec<Issue> {
    let mut issues = Vec::new();

    if spf.record.is_none() {
        issues.push(Issue {
            issue_type: "spf_missing".into(),
            severity: Severity::Critical,
            title: "SPF Record Missing".into(),
            message: "No SPF record found for this domain".into(),
            impact: "All emails will fail SPF authentication".into(),
            category: IssueCategory::Spf,
            provider: None,
            ip: None,
            details: None,
        });
    } else if spf.lookup_count > 10 {
        issues.push(Issue {
            issue_type: "spf_lookup_limit".into(),
            severity: Severity::High,
            title: "SPF DNS Lookup Limit Exceeded".into(),
            message: format!(
                "SPF record requires {} DNS lookups (limit is 10)",
                spf.lookup_count
            ),
            impact: "SPF evaluation may fail due to too many DNS lookups".into(),
            category: IssueCategory::Spf,
            provider: None,
            ip: None,
            details: None,
        });
    }

    if let Some(record) = spf.record.as_deref() {
        if !spf_record::has_terminal_all(record) {
            issues.push(Issue {
                issue_type: "spf_no_terminal_all".into(),
                severity: Severity::Low,
                title: "SPF Record Missing 'all' Mechanism".into(),
                message: "SPF record has no terminal all qualifier".into(),
                impact: "Receivers decide how to treat unlisted senders".into(),
                category: IssueCategory::Spf,
                provider: None,
                ip: None,
                details: None,
            });
        }
    }

    // at most five unauthorized IPs reported per run
    for (ip, provider) in spf.unauthorized.iter().take(5) {
        match provider {
            Some(provider) => issues.push(Issue {
                issue_type: "spf_missing_provider".into(),
                severity: Severity::High,
                title: format!("Missing {} Mail Servers in SPF", title_case(provider)),
                message: format!(
                    "IP {} from {} is failing SPF but appears to be legitimate",
                    ip, provider
                ),
                impact: format!(
                    "Emails from {} services will fail DMARC authentication",
                    provider
                ),
                category: IssueCategory::Spf,
                provider: Some(provider.to_string()),
                ip: Some(ip.clone()),
                details: None,
            }),
            None => issues.push(Issue {
                issue_type: "spf_unauthorized_ip".into(),
                severity: Severity::Low,
                title: "Unrecognized IP Failing SPF".into(),
                message: format!(
                    "IP {} is failing SPF and is not authorized by the current record",
                    ip
                ),
                impact: "Mail from this source will fail DMARC authentication".into(),
                category: IssueCategory::Spf,
                provider: None,
                ip: Some(ip.clone()),
                details: None,
            }),
        }
    }

    issues
}

fn dkim_issues(dkim: &DkimFindings) -> Vec<Issue> {
    let mut issues = Vec::new();
    if dkim.total() == 0 {
        return issues;
    }

    let fail_rate = dkim.fail_rate();
    if fail_rate > 10.0 {
        issues.push(Issue {
            issue_type: "dkim_high_failure".into(),
            severity: Severity::High,
            title: "High DKIM Failure Rate".into(),
            message: format!("High DKIM failure rate: {:.1}%", fail_rate),
            impact: "Many emails are failing DKIM authentication".into(),
            category: IssueCategory::Dkim,
            provider: None,
            ip: None,
            details: None,
        });
    }

    let missing_rate = dkim.missing_rate();
    if missing_rate > 20.0 {
        issues.push(Issue {
            issue_type: "dkim_missing_signatures".into(),
            severity: Severity::Medium,
            title: "Missing DKIM Signatures".into(),
            message: format!("Many messages without DKIM signatures: {:.1}%", missing_rate),
            impact: "Emails without DKIM signatures rely solely on SPF for DMARC".into(),
            category: IssueCategory::Dkim,
            provider: None,
            ip: None,
            details: None,
        });
    }

    issues
}

fn pattern_issues(records: &[ReportRecord], providers: &ProviderDirectory) -> Vec<Issue> {
    let mut failing_ips: HashMap<&str, i64> = HashMap::new();
    for r in records {
        if r.spf_result == "fail" || r.dkim_result == "fail" {
            *failing_ips.entry(r.source_ip.as_str()).or_default() += r.count;
        }
    }

    let mut issues = Vec::new();
    if failing_ips.len() > 20 {
        let mut top: Vec<(&str, i64)> = failing_ips.into_iter().collect();
        top.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

        let mut details: Vec<String> = top
            .iter()
            .take(10)
            .map(|(ip, count)| match providers.identify_str(ip) {
                Some(provider) => format!("{}: {} failures ({})", ip, count, provider),
                None => format!("{}: {} failures", ip, count),
            })
            .collect();
        details.extend(provider_rollup(records, providers));

        issues.push(Issue {
            issue_type: "pattern_many_failing_ips".into(),
            severity: Severity::Medium,
            title: "Many Different IPs Failing Authentication".into(),
            message: format!("{} different IPs are failing", top.len()),
            impact: "Could indicate compromised accounts or misconfiguration".into(),
            category: IssueCategory::Pattern,
            provider: None,
            ip: None,
            details: Some(details),
        });
    }
    issues
}

/// Per-provider pass/fail volume across the whole window, one line per
/// provider. A record passes when either mechanism does.
fn provider_rollup(records: &[ReportRecord], providers: &ProviderDirectory) -> Vec<String> {
    let mut stats: BTreeMap<&str, (i64, i64, i64)> = BTreeMap::new();
    for r in records {
        let provider = providers.identify_str(&r.source_ip).unwrap_or("unknown");
        let entry = stats.entry(provider).or_default();
        entry.0 += r.count;
        if r.is_passing() {
            entry.1 += r.count;
        } else {
            entry.2 += r.count;
        }
    }
    stats
        .into_iter()
        .map(|(provider, (total, pass, fail))| {
            format!("{}: {} of {} passing, {} failing", provider, pass, total, fail)
        })
        .collect()
}

fn alignment_issues(records: &[ReportRecord]) -> Vec<Issue> {
    let mut misaligned = BTreeSet::new();
    for r in records {
        if let (Some(header), Some(envelope)) = (r.header_from.as_deref(), r.envelope_from.as_deref())
        {
            if !header.is_empty() && !envelope.is_empty() && header != envelope {
                misaligned.insert(format!("{} (envelope: {})", header, envelope));
            }
        }
    }

    if misaligned.is_empty() {
        return Vec::new();
    }

    vec![Issue {
        issue_type: "alignment_domain_mismatch".into(),
        severity: Severity::Medium,
        title: "Domain Alignment Issues".into(),
        message: format!("Found domain misalignment in {} cases", misaligned.len()),
        impact: "May cause DMARC failures even with valid SPF/DKIM".into(),
        category: IssueCategory::Alignment,
        provider: None,
        ip: None,
        details: Some(misaligned.into_iter().take(5).collect()),
    }]
}

fn health_score(
    failure_rate: f64,
    issues: &[Issue],
    spf: &SpfFindings,
    dkim: &DkimFindings,
) -> i32 {
    let mut score = 100.0;

    score -= (failure_rate * 2.0).min(60.0);

    for issue in issues {
        score -= issue.severity.penalty();
    }

    if spf.record.is_none() {
        score -= 25.0;
    } else if spf.lookup_count > 10 {
        score -= 15.0;
    }

    if dkim.total() > 0 {
        score -= (dkim.fail_rate() / 2.0).min(20.0);
    }

    (score as i32).clamp(0, 100)
}

fn status_for(health_score: i32, failure_rate: f64) -> AnalysisStatus {
    if health_score >= 90 && failure_rate < 5.0 {
        AnalysisStatus::Excellent
    } else if health_score >= 75 && failure_rate < 15.0 {
        AnalysisStatus::Good
    } else if health_score >= 50 && failure_rate < 30.0 {
        AnalysisStatus::Warning
    } else {
        AnalysisStatus::Critical
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
